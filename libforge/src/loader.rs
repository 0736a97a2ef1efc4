//! Materializes a container at its target address: repeats the layout walk to
//! copy each section into place, then patches every fixup site using the now
//! known load addresses. Sites may be unaligned and all relocation arithmetic
//! wraps.

use crate::error::Result;
use crate::error::UnplacedLabel;
use crate::layout;
use crate::objcode::Fixup;
use crate::objcode::FixupKind;
use crate::objcode::ObjectCode;
use crate::objcode::Place;
use anyhow::bail;
use jit_utils::utils;
use smallvec::SmallVec;
use std::sync::atomic::compiler_fence;
use std::sync::atomic::Ordering;

/// Load-address tables for at most this many sections live on the stack;
/// larger containers spill to the heap.
const INLINE_SECTIONS: usize = 16;

/// See [`ObjectCode::load_at`] for the contract.
#[tracing::instrument(skip_all)]
pub(crate) unsafe fn load(code: &ObjectCode, base: *mut u8) -> Result {
    if base.is_null() {
        return Ok(());
    }
    verify_labels(code)?;

    // Transfer section contents to their load addresses, recording where each
    // section landed.
    let mut load_base: SmallVec<[*mut u8; INLINE_SECTIONS]> =
        SmallVec::from_elem(std::ptr::null_mut(), code.sects.len());
    let total = layout::walk(&code.sects, |i, offset| {
        let sect = &code.sects[i];
        let dst = unsafe { base.add(offset) };
        unsafe { std::ptr::copy_nonoverlapping(sect.buf.as_ptr(), dst, sect.len()) };
        load_base[i] = dst;
    })?;

    for fixup in &code.fixups {
        crate::debug_assert_bail!(
            fixup.offset as usize + fixup.kind.width() <= code.sects[fixup.section.as_usize()].len(),
            "Fixup at offset {} overruns its section",
            fixup.offset
        );
        unsafe { apply(fixup, &load_base, &code.labels) };
    }

    // Keep the byte stores above from being reordered past whatever the
    // caller does next, which is typically reinterpreting `base` as a
    // function pointer and calling it.
    compiler_fence(Ordering::Release);
    tracing::debug!(total, fixups = code.fixups.len(), "loaded object code");
    Ok(())
}

/// Every label referenced by a fixup must have been placed; a missing one
/// would silently patch in a garbage address.
fn verify_labels(code: &ObjectCode) -> Result {
    for fixup in &code.fixups {
        if let Some(label) = fixup.label {
            if code.labels[label.as_usize()].is_none() {
                bail!(UnplacedLabel {
                    label: label.serial(),
                });
            }
        }
    }
    Ok(())
}

unsafe fn apply(fixup: &Fixup, load_base: &[*mut u8], labels: &[Option<Place>]) {
    let site = load_base[fixup.section.as_usize()].add(fixup.offset as usize);
    // Verified placed before any patching started.
    let label = fixup.label.map(|label| {
        let place = labels[label.as_usize()].expect("label placement was verified");
        load_base[place.section.as_usize()].add(place.offset as usize) as usize
    });
    let label = || label.expect("fixup kind requires a label");
    match fixup.kind {
        FixupKind::PlusLabelQuad => {
            utils::add_u64_at(site, label() as u64);
        }
        FixupKind::PlusLabelLong => {
            utils::add_u32_at(site, label() as u32);
        }
        FixupKind::PlusLabelMinusNextLong => {
            utils::add_u32_at(site, label().wrapping_sub(site as usize + 4) as u32);
        }
        FixupKind::PlusLabelMinusNextByte => {
            utils::add_u8_at(site, label().wrapping_sub(site as usize + 1) as u8);
        }
        FixupKind::MinusNextLong => {
            utils::sub_u32_at(site, (site as usize + 4) as u32);
        }
    }
}
