//! Assigns load offsets to sections. Text sections come first in creation
//! order; if any read-only data exists it follows, starting on a cache-line
//! boundary so that data accesses stay out of the instruction cache. Each
//! section is first rounded up to the strongest alignment it accumulated.

use crate::alignment;
use crate::error::LayoutOverflow;
use crate::error::Result;
use crate::section::Section;
use crate::segment::MAX_SEGMENT_SIZE;
use anyhow::bail;

/// Walks sections in load order, reporting `(section_index, load_offset)` for
/// each, and returns the total span. Drives both size computation (with an
/// empty callback) and the loader's copy pass.
pub(crate) fn walk(sects: &[Section], mut visit: impl FnMut(usize, usize)) -> Result<usize> {
    let mut pc = 0;
    let mut has_rodata = false;
    for (i, sect) in sects.iter().enumerate() {
        if sect.is_rodata {
            has_rodata = true;
        } else {
            pc = place(pc, sect, i, &mut visit)?;
        }
    }
    if !has_rodata {
        return Ok(pc);
    }
    pc = alignment::CACHELINE.align_up_usize(pc);
    for (i, sect) in sects.iter().enumerate() {
        if sect.is_rodata {
            pc = place(pc, sect, i, &mut visit)?;
        }
    }
    Ok(pc)
}

fn place(
    pc: usize,
    sect: &Section,
    index: usize,
    visit: &mut impl FnMut(usize, usize),
) -> Result<usize> {
    let pc = sect.align.align_up_usize(pc);
    if pc + sect.len() > MAX_SEGMENT_SIZE {
        bail!(LayoutOverflow);
    }
    visit(index, pc);
    Ok(pc + sect.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::Alignment;

    fn section(len: usize, align: u64, is_rodata: bool) -> Section {
        let mut sect = Section::new(is_rodata);
        sect.reserve(len).unwrap();
        sect.emit(&vec![0u8; len]);
        sect.align = Alignment::from_value(align);
        sect
    }

    #[test]
    fn test_empty_layout() {
        assert_eq!(walk(&[], |_, _| {}).unwrap(), 0);
    }

    #[test]
    fn test_text_then_rodata_on_a_cache_line() {
        // 37 bytes of text at alignment 16, then 9 bytes of rodata: the text
        // spans [0, 37), rodata starts at the next cache line.
        let sects = [section(37, 16, false), section(9, 1, true)];
        let mut offsets = [usize::MAX; 2];
        let total = walk(&sects, |i, offset| offsets[i] = offset).unwrap();
        assert_eq!(offsets, [0, 64]);
        assert_eq!(total, 73);
    }

    #[test]
    fn test_rodata_order_is_preserved_across_interleaving() {
        let sects = [
            section(8, 1, true),
            section(10, 1, false),
            section(4, 4, true),
            section(3, 1, false),
        ];
        let mut offsets = [usize::MAX; 4];
        let total = walk(&sects, |i, offset| offsets[i] = offset).unwrap();
        assert_eq!(offsets, [64, 0, 72, 10]);
        assert_eq!(total, 76);
    }

    #[test]
    fn test_alignment_rounds_each_section() {
        let sects = [section(1, 1, false), section(1, 32, false)];
        let mut offsets = [usize::MAX; 2];
        let total = walk(&sects, |i, offset| offsets[i] = offset).unwrap();
        assert_eq!(offsets, [0, 32]);
        assert_eq!(total, 33);
    }

}
