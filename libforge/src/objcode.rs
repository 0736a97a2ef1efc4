//! The object-code container: an ordered set of sections plus the labels and
//! fixups that tie them together. Sections, labels and fixups reference each
//! other by serial-number indices, which keeps the relocation pass a simple
//! table join and the container free of ownership cycles.

use crate::error::Result;
use crate::loader;
use crate::section::Section;
use crate::section::SectionId;
use crate::segment::Segment;

/// Identifies a label within the container that created it. A label may be
/// referenced by fixups before it has been placed; it must be placed by the
/// time the container is loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    pub(crate) fn from_usize(raw: usize) -> Self {
        Label(u32::try_from(raw).expect("Label IDs overflowed 32 bits"))
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn serial(self) -> u32 {
        self.0
    }
}

/// Where a placed label points: an offset within a section.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Place {
    pub(crate) section: SectionId,
    pub(crate) offset: u32,
}

/// A relocation record. `offset` is the patch site within `section`; the
/// emitter stores the addend at the site and the loader adds the resolved
/// address in place once all load addresses are known.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Fixup {
    pub(crate) kind: FixupKind,
    pub(crate) section: SectionId,
    pub(crate) offset: u32,
    /// `None` only for [`FixupKind::MinusNextLong`], which needs no label.
    pub(crate) label: Option<Label>,
}

/// The relocation kinds needed for x86 and for all x86-64 code models. In the
/// formulas, `site` and `label` are run-time addresses after loading and all
/// arithmetic wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FixupKind {
    /// write64(site) = read64(site) + label
    PlusLabelQuad,
    /// write32(site) = read32(site) + label
    PlusLabelLong,
    /// write32(site) = read32(site) + label - (site + 4)
    PlusLabelMinusNextLong,
    /// write8(site) = read8(site) + label - (site + 1)
    PlusLabelMinusNextByte,
    /// write32(site) = read32(site) - (site + 4)
    MinusNextLong,
}

impl FixupKind {
    /// Width of the patched field in bytes.
    pub(crate) fn width(self) -> usize {
        match self {
            FixupKind::PlusLabelQuad => 8,
            FixupKind::PlusLabelLong
            | FixupKind::PlusLabelMinusNextLong
            | FixupKind::MinusNextLong => 4,
            FixupKind::PlusLabelMinusNextByte => 1,
        }
    }
}

/// Object code under construction: sections of text and read-only data,
/// labels, and the fixups to apply when the result is loaded.
///
/// A container is single-threaded; separate containers may be used freely
/// from separate threads. Section and label handles are plain indices, so
/// they stay valid when the container moves.
#[derive(Default)]
pub struct ObjectCode {
    pub(crate) sects: Vec<Section>,
    pub(crate) fixups: Vec<Fixup>,
    pub(crate) labels: Vec<Option<Place>>,
}

impl ObjectCode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new executable-text section.
    pub fn text(&mut self) -> SectionId {
        self.add_section(false)
    }

    /// Creates a new read-only data section. Rodata is laid out after all
    /// text, starting on a cache-line boundary.
    pub fn rodata(&mut self) -> SectionId {
        self.add_section(true)
    }

    fn add_section(&mut self, is_rodata: bool) -> SectionId {
        let id = SectionId::from_usize(self.sects.len());
        self.sects.push(Section::new(is_rodata));
        id
    }

    /// Creates a fresh, unplaced label.
    pub fn new_label(&mut self) -> Label {
        let label = Label::from_usize(self.labels.len());
        self.labels.push(None);
        label
    }

    /// Returns a writer over the given section.
    pub fn sect(&mut self, id: SectionId) -> SectionRef<'_> {
        SectionRef { code: self, id }
    }

    /// Computes the total number of bytes the loaded image will occupy:
    /// text sections in creation order, then rodata sections rounded up to a
    /// cache-line boundary, each section aligned as recorded.
    pub fn size(&self) -> Result<usize> {
        crate::layout::walk(&self.sects, |_, _| {})
    }

    /// Materializes the sections at `base` and applies all fixups in place.
    /// A null `base` is a no-op. Returns an error if any fixup references a
    /// label that was never placed.
    ///
    /// # Safety
    ///
    /// `base` must be null or valid for writes of [`ObjectCode::size`] bytes.
    pub unsafe fn load_at(&self, base: *mut u8) -> Result {
        loader::load(self, base)
    }

    /// Allocates an executable segment of exactly [`ObjectCode::size`] bytes
    /// and loads into it.
    pub fn load(&self) -> Result<Segment> {
        let segment = Segment::new(self.size()?)?;
        unsafe { self.load_at(segment.as_mut_ptr())? };
        Ok(segment)
    }
}

/// A fluent writer over one section of an [`ObjectCode`]. Every emission
/// returns the writer, so call chains read like an assembly listing:
///
/// ```
/// use libforge::ObjectCode;
///
/// let mut code = ObjectCode::new();
/// let text = code.text();
/// code.sect(text).reserve(16).unwrap().b(0xb8).l(42).b(0xc3); // mov $42, %eax; ret
/// ```
pub struct SectionRef<'a> {
    code: &'a mut ObjectCode,
    id: SectionId,
}

impl SectionRef<'_> {
    fn section(&mut self) -> &mut Section {
        &mut self.code.sects[self.id.as_usize()]
    }

    fn pc(&self) -> usize {
        self.code.sects[self.id.as_usize()].len()
    }

    /// Grows the section's reservation by `size` bytes. The only fallible
    /// step of emission; all emitters below assume their width has been
    /// reserved beforehand.
    pub fn reserve(mut self, size: usize) -> Result<Self> {
        self.section().reserve(size)?;
        Ok(self)
    }

    /// Appends one byte.
    pub fn b(mut self, val: u8) -> Self {
        self.section().emit(&[val]);
        self
    }

    /// Appends a 16-bit value, little-endian.
    pub fn w(mut self, val: u16) -> Self {
        self.section().emit(&val.to_le_bytes());
        self
    }

    /// Appends a 32-bit value, little-endian.
    pub fn l(mut self, val: u32) -> Self {
        self.section().emit(&val.to_le_bytes());
        self
    }

    /// Appends a 64-bit value, little-endian.
    pub fn q(mut self, val: u64) -> Self {
        self.section().emit(&val.to_le_bytes());
        self
    }

    /// Appends a 16-bit value given as a big-endian literal, which keeps
    /// instruction encodings readable: `sw(0x6690)` stores `66 90`.
    pub fn sw(self, val: u16) -> Self {
        self.w(val.swap_bytes())
    }

    /// The 32-bit counterpart of [`SectionRef::sw`].
    pub fn sl(self, val: u32) -> Self {
        self.l(val.swap_bytes())
    }

    /// The 64-bit counterpart of [`SectionRef::sw`].
    pub fn sq(self, val: u64) -> Self {
        self.q(val.swap_bytes())
    }

    /// Appends raw bytes.
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.section().emit(bytes);
        self
    }

    fn fixup(&mut self, kind: FixupKind, label: Option<Label>) {
        let fixup = Fixup {
            kind,
            section: self.id,
            offset: self.pc() as u32,
            label,
        };
        self.code.fixups.push(fixup);
    }

    /// Appends the absolute 64-bit run-time address of `label` plus `addend`.
    /// For 64-bit code models, e.g. after a `movabs` opcode.
    pub fn lq(mut self, label: Label, addend: u64) -> Self {
        self.fixup(FixupKind::PlusLabelQuad, Some(label));
        self.q(addend)
    }

    /// Appends the absolute 32-bit run-time address of `label` plus `addend`.
    /// For 32-bit code models.
    pub fn ll(mut self, label: Label, addend: u32) -> Self {
        self.fixup(FixupKind::PlusLabelLong, Some(label));
        self.l(addend)
    }

    /// Appends a 32-bit displacement from the end of the field to `label`
    /// plus `addend`: the operand form of `jmp`/`call`/RIP-relative
    /// addressing.
    pub fn rl(mut self, label: Label, addend: u32) -> Self {
        self.fixup(FixupKind::PlusLabelMinusNextLong, Some(label));
        self.l(addend)
    }

    /// The 8-bit counterpart of [`SectionRef::rl`], for short jumps.
    pub fn rb(mut self, label: Label, addend: u8) -> Self {
        self.fixup(FixupKind::PlusLabelMinusNextByte, Some(label));
        self.b(addend)
    }

    /// Appends `value` minus the run-time address of the end of the field:
    /// turns a known absolute address into a `call`/`jmp` displacement in
    /// 32-bit code models.
    pub fn ra(mut self, value: u32) -> Self {
        self.fixup(FixupKind::MinusNextLong, None);
        self.l(value)
    }

    /// Pads to `boundary` (a power of two, at most a cache line) with
    /// multi-byte NOPs.
    pub fn align(self, boundary: usize) -> Self {
        self.align_max(boundary, crate::alignment::CACHELINE.value() as usize)
    }

    /// Like [`SectionRef::align`], but gives up and leaves the section
    /// under-aligned when more than `max` bytes of padding would be needed.
    pub fn align_max(mut self, boundary: usize, max: usize) -> Self {
        self.section().align(boundary, max);
        self
    }

    /// Places `label` at the current position.
    pub fn define(self, label: Label) -> Self {
        self.define_at(label, 0)
    }

    /// Places `label` at the current position plus `offset`.
    pub fn define_at(self, label: Label, offset: i32) -> Self {
        let offset = self.pc() as i64 + i64::from(offset);
        debug_assert!(offset >= 0);
        self.code.labels[label.as_usize()] = Some(Place {
            section: self.id,
            offset: offset as u32,
        });
        self
    }

    /// Creates a fresh label and places it at the current position.
    pub fn define_here(self) -> Label {
        let label = self.code.new_label();
        self.define(label);
        label
    }

    /// Bytes emitted so far; the section's program counter.
    pub fn size(&self) -> usize {
        self.pc()
    }

    /// The current reservation bound.
    pub fn reserved(&self) -> usize {
        self.code.sects[self.id.as_usize()].reserved
    }

    /// The section this writer appends to.
    pub fn id(&self) -> SectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_widths() {
        let mut code = ObjectCode::new();
        let text = code.text();
        code.sect(text)
            .reserve(15)
            .unwrap()
            .b(0x11)
            .w(0x2233)
            .l(0x4455_6677)
            .q(0x8899_aabb_ccdd_eeff);
        assert_eq!(code.sect(text).size(), 15);
        assert_eq!(
            code.sects[0].buf,
            [0x11, 0x33, 0x22, 0x77, 0x66, 0x55, 0x44, 0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa, 0x99, 0x88]
        );
    }

    #[test]
    fn test_swapped_emitters_store_literals_verbatim() {
        let mut code = ObjectCode::new();
        let text = code.text();
        code.sect(text)
            .reserve(14)
            .unwrap()
            .sw(0x6690)
            .sl(0x0f1f_4000)
            .sq(0x0f1f_8400_0000_0000);
        assert_eq!(
            code.sects[0].buf,
            [0x66, 0x90, 0x0f, 0x1f, 0x40, 0x00, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_label_fixups_record_site_before_addend() {
        let mut code = ObjectCode::new();
        let text = code.text();
        let target = code.new_label();
        code.sect(text).reserve(8).unwrap().w(0x850f).rl(target, 0);
        assert_eq!(code.fixups.len(), 1);
        assert_eq!(code.fixups[0].offset, 2);
        assert_eq!(code.fixups[0].kind, FixupKind::PlusLabelMinusNextLong);
        assert_eq!(code.fixups[0].label, Some(target));
        // The addend occupies the field.
        assert_eq!(code.sect(text).size(), 6);
    }

    #[test]
    fn test_define_at_applies_offset() {
        let mut code = ObjectCode::new();
        let text = code.text();
        let label = code.new_label();
        code.sect(text)
            .reserve(4)
            .unwrap()
            .l(0)
            .define_at(label, -2);
        let place = code.labels[label.as_usize()].unwrap();
        assert_eq!(place.section, text);
        assert_eq!(place.offset, 2);
    }

    #[test]
    fn test_define_here_places_at_pc() {
        let mut code = ObjectCode::new();
        let text = code.text();
        let label = code.sect(text).reserve(2).unwrap().w(0x9090).define_here();
        let place = code.labels[label.as_usize()].unwrap();
        assert_eq!(place.offset, 2);
    }

    #[test]
    fn test_forward_references_are_recorded_unplaced() {
        let mut code = ObjectCode::new();
        let text = code.text();
        let forward = code.new_label();
        code.sect(text).reserve(2).unwrap().b(0xeb).rb(forward, 0);
        assert!(code.labels[forward.as_usize()].is_none());
        assert_eq!(code.fixups[0].kind, FixupKind::PlusLabelMinusNextByte);
    }
}
