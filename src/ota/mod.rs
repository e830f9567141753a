//! OTA / flash update subsystem.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ host                                      device            │
//! │                                                             │
//! │ 4096 raw bytes ──UDP mailbox port──▶ accumulate ──▶ "ACK"   │
//! │ "mailbox-write N" ──command port──▶ compare/erase/write     │
//! │                   ◀── "OK … erased: E, skipped S, sha1" ──  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The dual-slot layout keeps the running image untouched while the host
//! streams a new one into the inactive slot; the RTC-backed trial-boot
//! record lets the host test-boot the new slot exactly once before the
//! permanent commit rewrites the boot config sector.

pub mod boot;
pub mod mailbox;

use core::fmt::Write;

use crate::buffer::ByteBuf;

/// Flash partition map. Offsets are absolute; the two image slots mirror
/// each other across the 1 MiB boundary so a slot address maps to the
/// other slot by flipping one bit.
pub mod layout {
    /// Boot configuration sector.
    pub const BOOT_CONFIG_OFFSET: u32 = 0x00_1000;
    /// Image slot 0.
    pub const SLOT_0_OFFSET: u32 = 0x00_2000;
    /// Image slot 1.
    pub const SLOT_1_OFFSET: u32 = 0x10_2000;
    /// Config store sector.
    pub const CONFIG_OFFSET: u32 = 0x0f_a000;
    /// Per-slot sequencer data (one sector pair each).
    pub const SEQUENCER_OFFSET: [u32; 2] = [0x0f_c000, 0x1f_c000];
    /// Per-slot display pictures (one sector pair each).
    pub const PICTURE_OFFSET: [u32; 2] = [0x0f_e000, 0x1f_e000];
    /// Miscellaneous scratch region.
    pub const MISC_OFFSET: u32 = 0x1f_a000;
}

/// SHA-1 digest length in bytes.
pub const DIGEST_SIZE: usize = 20;

/// Append a digest as lowercase hex.
pub fn append_digest_hex<const CAP: usize>(digest: &[u8], dst: &mut ByteBuf<CAP>) {
    for byte in digest {
        let _ = write!(dst, "{byte:02x}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    #[test]
    fn digest_hex_rendering() {
        let digest = Sha1::digest(b"abc");
        let mut out: ByteBuf<64> = ByteBuf::new();
        append_digest_hex(&digest, &mut out);
        assert_eq!(out.as_str(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn slots_mirror_across_megabyte() {
        assert_eq!(
            layout::SLOT_1_OFFSET - layout::SLOT_0_OFFSET,
            0x10_0000
        );
    }
}
