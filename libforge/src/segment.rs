//! Executable memory segments: contiguous RWX regions allocated from the
//! process-wide pool, released on drop.

use crate::error::Result;
use crate::pool;

/// Maximum size of an executable segment.
#[cfg(target_arch = "x86_64")]
pub(crate) const MAX_SEGMENT_SIZE_LOG2: u32 = 30; // 1 GiB
#[cfg(target_arch = "x86")]
pub(crate) const MAX_SEGMENT_SIZE_LOG2: u32 = 24; // 16 MiB
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
pub(crate) const MAX_SEGMENT_SIZE_LOG2: u32 = 20; // 1 MiB

pub(crate) const MAX_SEGMENT_SIZE: usize = 1 << MAX_SEGMENT_SIZE_LOG2;

/// A contiguous read-write-execute memory region, typically holding the
/// loaded image of an [`ObjectCode`](crate::ObjectCode). Freed on drop.
///
/// The region's contents are raw memory under the caller's control; the
/// segment hands out pointers and otherwise stays out of the way. Callers
/// executing the contents from another thread must publish the segment with a
/// release/acquire handoff so the consuming thread observes the final bytes.
pub struct Segment {
    base: *mut u8,
    size: usize,
}

// The region is exclusively owned and the pool serializes allocation state,
// so moving a segment across threads (or sharing pointers to its contents)
// is no different from a heap allocation.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Default for Segment {
    fn default() -> Self {
        Segment {
            base: std::ptr::null_mut(),
            size: 0,
        }
    }
}

impl Segment {
    /// Allocates a segment of `size` bytes of RWX memory. A zero `size`
    /// yields an empty segment that owns nothing.
    pub fn new(size: usize) -> Result<Segment> {
        if size == 0 {
            return Ok(Segment::default());
        }
        let block = pool::with(|pool| pool.alloc(size))?;
        pool::advise_willneed(&block, size);
        Ok(Segment {
            base: block.base,
            size,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    /// The contents are plain bytes with no aliasing guarantees tracked here;
    /// writing through this pointer while another thread executes the
    /// segment is the caller's race to avoid.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_null()
    }

    /// Copies the contents into a freshly allocated segment of the same size.
    pub fn try_clone(&self) -> Result<Segment> {
        let clone = Segment::new(self.size)?;
        if !self.base.is_null() {
            unsafe { std::ptr::copy_nonoverlapping(self.base, clone.base, self.size) };
        }
        Ok(clone)
    }
}

/// Allocates a segment sized to the container and loads into it; shorthand
/// for [`ObjectCode::load`](crate::ObjectCode::load).
impl TryFrom<&crate::ObjectCode> for Segment {
    type Error = anyhow::Error;

    fn try_from(code: &crate::ObjectCode) -> Result<Segment> {
        code.load()
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.base.is_null() {
            pool::with(|pool| pool.free(self.base, self.size));
        }
    }
}

/// Adjusts the cap on bytes logically allocated to live segments.
/// Process-wide; the default is 256 MiB.
pub fn set_max_total_used(bytes: usize) {
    pool::with(|pool| pool.set_max_total_used(bytes));
}

/// Adjusts the cap on the pool's resident-memory estimate. Process-wide; the
/// default is 768 MiB.
pub fn set_max_total_phys(bytes: usize) {
    pool::with(|pool| pool.set_max_total_phys(bytes));
}

/// Current `(total_used, total_phys)` pool counters.
pub fn pool_totals() -> (i64, i64) {
    pool::with(|pool| pool.totals())
}
