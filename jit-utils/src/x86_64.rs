/// Canonical multi-byte NOP encodings indexed by length in bytes. These are
/// the long-NOP forms recommended for x86 and x86-64; a run of padding is
/// emitted as repeated [`NOP10`] followed by the entry for the remainder.
pub const NOPS: [&[u8]; 10] = [
    &[],
    // nop
    &[0x90],
    // xchg %ax,%ax
    &[0x66, 0x90],
    // nopl (%rax)
    &[0x0f, 0x1f, 0x00],
    // nopl 0(%rax)
    &[0x0f, 0x1f, 0x40, 0x00],
    // nopl 0(%rax,%rax,1)
    &[0x0f, 0x1f, 0x44, 0x00, 0x00],
    // nopw 0(%rax,%rax,1)
    &[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00],
    // nopl 0L(%rax)
    &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00],
    // nopl 0L(%rax,%rax,1)
    &[0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    // nopw 0L(%rax,%rax,1)
    &[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

/// Ten-byte NOP used for whole decades of padding.
// nopw %cs:0L(%rax,%rax,1)
pub const NOP10: [u8; 10] = [0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Appends `len` bytes of NOP padding to `out`.
pub fn write_nops(out: &mut Vec<u8>, mut len: usize) {
    while len >= NOP10.len() {
        out.extend_from_slice(&NOP10);
        len -= NOP10.len();
    }
    out.extend_from_slice(NOPS[len]);
}
