//! Shared 4 KiB flash staging buffer with cooperative ownership.
//!
//! One RAM sector is shared between the config cache, OTA transfers,
//! display picture loads and boot-config rewrites. An owner tag arbitrates
//! access: a grant succeeds only from `Free`, from the same owner
//! (re-entrant use by the holder), or by evicting the config cache — the
//! cache is reconstructable from flash, so OTA/display/rboot may silently
//! take the buffer and the next config read re-hydrates it.
//!
//! The arbiter never blocks; a refused grant is reported to the operator as
//! `ERROR …: sector buffer in use`.

use log::debug;

use crate::ports::SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorOwner {
    Free,
    ConfigCache,
    Ota,
    DisplayPicture,
    Rboot,
}

impl SectorOwner {
    /// Owners allowed to evict the config cache.
    fn may_evict_cache(self) -> bool {
        matches!(self, Self::Ota | Self::DisplayPicture | Self::Rboot)
    }
}

pub struct SectorBuffer {
    data: [u8; SECTOR_SIZE],
    owner: SectorOwner,
    tag: &'static str,
}

impl SectorBuffer {
    pub const fn new() -> Self {
        Self {
            data: [0u8; SECTOR_SIZE],
            owner: SectorOwner::Free,
            tag: "",
        }
    }

    pub const fn owner(&self) -> SectorOwner {
        self.owner
    }

    pub const fn tag(&self) -> &'static str {
        self.tag
    }

    /// Try to take ownership. Returns whether the grant succeeded; on
    /// success the buffer content is whatever the previous owner left
    /// (an evicted config cache is simply forgotten).
    pub fn request(&mut self, new_owner: SectorOwner, tag: &'static str) -> bool {
        debug_assert!(new_owner != SectorOwner::Free, "cannot request Free");

        let granted = match self.owner {
            SectorOwner::Free => true,
            current if current == new_owner => true,
            SectorOwner::ConfigCache => new_owner.may_evict_cache(),
            _ => false,
        };

        if granted {
            if self.owner == SectorOwner::ConfigCache && new_owner != SectorOwner::ConfigCache {
                debug!("sector buffer: config cache evicted by {tag}");
            }
            self.owner = new_owner;
            self.tag = tag;
        } else {
            debug!(
                "sector buffer: {tag} denied, held by {:?} ({})",
                self.owner, self.tag
            );
        }

        granted
    }

    /// Release ownership. Ownership mismatch is a programming error.
    pub fn release(&mut self, owner: SectorOwner, tag: &'static str) {
        debug_assert!(
            self.owner == owner,
            "sector buffer release mismatch: {:?} ({}) released by {:?} ({})",
            self.owner,
            self.tag,
            owner,
            tag
        );
        self.owner = SectorOwner::Free;
        self.tag = "";
    }

    pub fn data(&self) -> &[u8; SECTOR_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; SECTOR_SIZE] {
        &mut self.data
    }
}

impl Default for SectorBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_from_free() {
        let mut buf = SectorBuffer::new();
        assert!(buf.request(SectorOwner::Ota, "test"));
        assert_eq!(buf.owner(), SectorOwner::Ota);
    }

    #[test]
    fn regrant_to_same_owner() {
        let mut buf = SectorBuffer::new();
        assert!(buf.request(SectorOwner::ConfigCache, "cache"));
        assert!(buf.request(SectorOwner::ConfigCache, "cache again"));
    }

    #[test]
    fn ota_evicts_config_cache() {
        let mut buf = SectorBuffer::new();
        assert!(buf.request(SectorOwner::ConfigCache, "cache"));
        assert!(buf.request(SectorOwner::Ota, "ota"));
        assert_eq!(buf.owner(), SectorOwner::Ota);
    }

    #[test]
    fn rboot_evicts_config_cache() {
        let mut buf = SectorBuffer::new();
        assert!(buf.request(SectorOwner::ConfigCache, "cache"));
        assert!(buf.request(SectorOwner::Rboot, "rboot"));
    }

    #[test]
    fn cache_cannot_evict_ota() {
        let mut buf = SectorBuffer::new();
        assert!(buf.request(SectorOwner::Ota, "ota"));
        assert!(!buf.request(SectorOwner::ConfigCache, "cache"));
        assert_eq!(buf.owner(), SectorOwner::Ota);
    }

    #[test]
    fn display_cannot_evict_rboot() {
        let mut buf = SectorBuffer::new();
        assert!(buf.request(SectorOwner::Rboot, "rboot"));
        assert!(!buf.request(SectorOwner::DisplayPicture, "picture"));
    }

    #[test]
    fn release_frees() {
        let mut buf = SectorBuffer::new();
        assert!(buf.request(SectorOwner::Ota, "ota"));
        buf.release(SectorOwner::Ota, "ota");
        assert_eq!(buf.owner(), SectorOwner::Free);
        assert!(buf.request(SectorOwner::DisplayPicture, "picture"));
    }
}
