//! A run-time x86 / x86-64 assembler and relocating loader.
//!
//! Clients such as JIT compilers emit instruction bytes and read-only data
//! into the sections of an [`ObjectCode`], place [`Label`]s, and record
//! relocations through the label-taking emitters. Loading lays the sections
//! out in a contiguous image (text first, then read-only data on its own
//! cache line), applies the relocations in place, and hands back a [`Segment`]
//! of executable memory ready to be entered as a native function.
//!
//! ```no_run
//! use libforge::ObjectCode;
//!
//! let mut code = ObjectCode::new();
//! let text = code.text();
//! code.sect(text)
//!     .reserve(16)
//!     .unwrap()
//!     .b(0xb8)
//!     .l(42) // mov $42, %eax
//!     .b(0xc3); // ret
//! let segment = code.load().unwrap();
//! let entry: extern "C" fn() -> i32 = unsafe { std::mem::transmute(segment.as_ptr()) };
//! assert_eq!(entry(), 42);
//! ```
//!
//! The emitters are byte-agnostic: only the NOP padding behind
//! [`SectionRef::align`] and the relocation arithmetic encode ISA knowledge.
//! Containers are single-threaded; the segment pool behind [`Segment`] is
//! shared by the whole process and thread-safe.

pub(crate) mod alignment;
pub mod error;
pub(crate) mod layout;
pub(crate) mod loader;
pub(crate) mod objcode;
pub(crate) mod pool;
pub(crate) mod section;
pub mod segment;

pub use objcode::Label;
pub use objcode::ObjectCode;
pub use objcode::SectionRef;
pub use section::SectionId;
pub use segment::Segment;
