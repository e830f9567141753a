//! Boot configuration sector and RTC-backed trial-boot record.
//!
//! The boot loader picks an image slot from two places: the boot config
//! sector (persistent, rewritten only on a permanent slot commit) and a
//! 12-byte record in RTC RAM that survives warm resets. When the RTC
//! record's `next_mode` is temp-rom, the loader boots `temporary_slot`
//! exactly once and resets the field, so a broken trial image falls back
//! to the committed slot on the following reset.

use log::warn;

use crate::Error;
use crate::flashbuf::{SectorBuffer, SectorOwner};
use crate::ota::layout;
use crate::ports::{FlashPort, RtcMemPort, SECTOR_SIZE};

pub const BOOT_CONFIG_MAGIC: u8 = 0xe1;
pub const BOOT_CONFIG_VERSION: u8 = 0x01;
pub const BOOT_MODE_STANDARD: u8 = 0x00;
pub const BOOT_MODE_TEMP_ROM: u8 = 0x02;

/// Serialised boot config record size.
pub const BOOT_CONFIG_SIZE: usize = 64;

/// RTC RAM word index of the trial-boot record.
pub const RTC_SLOT: u32 = 0x40;
pub const RTC_MAGIC: u32 = 0x2334_ae68;
pub const RTC_CHECKSUM_INIT: u8 = 0xef;
pub const RTC_RECORD_SIZE: usize = 12;

const RBOOT_TAG: &str = "boot config";

// ───────────────────────────────────────────────────────────────
// Boot config sector
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub boot_mode: u8,
    pub slot_current: u8,
    pub slot_count: u8,
    pub slots: [u32; 4],
}

impl BootConfig {
    /// Fresh two-slot layout.
    pub const fn default_two_slot() -> Self {
        Self {
            boot_mode: BOOT_MODE_STANDARD,
            slot_current: 0,
            slot_count: 2,
            slots: [layout::SLOT_0_OFFSET, layout::SLOT_1_OFFSET, 0, 0],
        }
    }

    pub fn encode(&self) -> [u8; BOOT_CONFIG_SIZE] {
        let mut out = [0xffu8; BOOT_CONFIG_SIZE];
        out[0] = BOOT_CONFIG_MAGIC;
        out[1] = BOOT_CONFIG_VERSION;
        out[2] = self.boot_mode;
        out[3] = self.slot_current;
        out[4] = 0;
        out[5] = self.slot_count;
        out[6] = 0;
        out[7] = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            out[8 + index * 4..12 + index * 4].copy_from_slice(&slot.to_le_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < BOOT_CONFIG_SIZE || data[0] != BOOT_CONFIG_MAGIC {
            return None;
        }
        let mut slots = [0u32; 4];
        for (index, slot) in slots.iter_mut().enumerate() {
            *slot = u32::from_le_bytes([
                data[8 + index * 4],
                data[9 + index * 4],
                data[10 + index * 4],
                data[11 + index * 4],
            ]);
        }
        Some(Self {
            boot_mode: data[2],
            slot_current: data[3],
            slot_count: data[5],
            slots,
        })
    }
}

/// Read the boot config through the shared sector buffer (owner `Rboot`).
pub fn read_boot_config(
    sector: &mut SectorBuffer,
    flash: &mut dyn FlashPort,
) -> Result<BootConfig, Error> {
    if !sector.request(SectorOwner::Rboot, RBOOT_TAG) {
        return Err(Error::Busy("sector buffer"));
    }
    let result = flash
        .read(layout::BOOT_CONFIG_OFFSET, sector.data_mut())
        .and_then(|()| {
            BootConfig::decode(sector.data()).ok_or(Error::Protocol("boot config magic invalid"))
        });
    sector.release(SectorOwner::Rboot, RBOOT_TAG);
    result
}

/// Rewrite the boot config sector. Skips the erase + write when the stored
/// record already matches; verifies after writing.
pub fn write_boot_config(
    sector: &mut SectorBuffer,
    flash: &mut dyn FlashPort,
    config: &BootConfig,
) -> Result<(), Error> {
    if !sector.request(SectorOwner::Rboot, RBOOT_TAG) {
        return Err(Error::Busy("sector buffer"));
    }

    let result = write_boot_config_inner(sector, flash, config);
    sector.release(SectorOwner::Rboot, RBOOT_TAG);
    result
}

fn write_boot_config_inner(
    sector: &mut SectorBuffer,
    flash: &mut dyn FlashPort,
    config: &BootConfig,
) -> Result<(), Error> {
    flash.read(layout::BOOT_CONFIG_OFFSET, sector.data_mut())?;

    let encoded = config.encode();
    if sector.data()[..BOOT_CONFIG_SIZE] == encoded {
        return Ok(());
    }

    flash.erase_sector(layout::BOOT_CONFIG_OFFSET / SECTOR_SIZE as u32)?;

    sector.data_mut().fill(0xff);
    sector.data_mut()[..BOOT_CONFIG_SIZE].copy_from_slice(&encoded);
    flash.write(layout::BOOT_CONFIG_OFFSET, sector.data())?;

    flash.read(layout::BOOT_CONFIG_OFFSET, sector.data_mut())?;
    match BootConfig::decode(sector.data()) {
        Some(read_back) if read_back == *config => Ok(()),
        _ => {
            warn!("boot config: verify after write failed");
            Err(Error::Flash(crate::error::FlashError::VerifyFailed))
        }
    }
}

// ───────────────────────────────────────────────────────────────
// RTC trial-boot record
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcBootRecord {
    pub next_mode: u8,
    pub last_mode: u8,
    pub last_slot: u8,
    pub temporary_slot: u8,
}

impl RtcBootRecord {
    pub fn encode(&self) -> [u8; RTC_RECORD_SIZE] {
        let mut out = [0u8; RTC_RECORD_SIZE];
        out[0..4].copy_from_slice(&RTC_MAGIC.to_le_bytes());
        out[4] = self.next_mode;
        out[5] = self.last_mode;
        out[6] = self.last_slot;
        out[7] = self.temporary_slot;
        out[8] = xor_checksum(&out[..8]);
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < RTC_RECORD_SIZE {
            return None;
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != RTC_MAGIC {
            return None;
        }
        if data[8] != xor_checksum(&data[..8]) {
            return None;
        }
        Some(Self {
            next_mode: data[4],
            last_mode: data[5],
            last_slot: data[6],
            temporary_slot: data[7],
        })
    }
}

fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(RTC_CHECKSUM_INIT, |acc, byte| acc ^ byte)
}

pub fn read_rtc_record(rtc: &mut dyn RtcMemPort) -> Option<RtcBootRecord> {
    let mut raw = [0u8; RTC_RECORD_SIZE];
    if !rtc.read(RTC_SLOT, &mut raw) {
        return None;
    }
    RtcBootRecord::decode(&raw)
}

pub fn write_rtc_record(rtc: &mut dyn RtcMemPort, record: &RtcBootRecord) -> bool {
    rtc.write(RTC_SLOT, &record.encode())
}

// ───────────────────────────────────────────────────────────────
// Slot selection
// ───────────────────────────────────────────────────────────────

/// Point the next boot at `slot`. With `permanent`, the boot config sector
/// is rewritten as well; otherwise the RTC record requests a single
/// temp-rom boot and the following reset reverts to the committed slot.
///
/// Returns the boot config as it stands after the operation.
pub fn select_slot(
    sector: &mut SectorBuffer,
    flash: &mut dyn FlashPort,
    rtc: &mut dyn RtcMemPort,
    slot: u8,
    permanent: bool,
) -> Result<BootConfig, Error> {
    let mut config = read_boot_config(sector, flash)?;

    if slot >= config.slot_count {
        return Err(Error::Parse("invalid slot"));
    }

    // Seed the RTC record when this is the first select since cold boot.
    let mut record = match read_rtc_record(rtc) {
        Some(record) => record,
        None => {
            let seeded = RtcBootRecord {
                next_mode: BOOT_MODE_STANDARD,
                last_mode: BOOT_MODE_STANDARD,
                last_slot: config.slot_current,
                temporary_slot: slot,
            };
            if !write_rtc_record(rtc, &seeded) {
                return Err(Error::Protocol("RTC RAM write failed"));
            }
            seeded
        }
    };

    record.next_mode = if permanent {
        BOOT_MODE_STANDARD
    } else {
        BOOT_MODE_TEMP_ROM
    };
    record.temporary_slot = slot;

    if !write_rtc_record(rtc, &record) {
        return Err(Error::Protocol("RTC RAM write failed"));
    }

    // Verify the record really landed; RTC RAM has no ECC.
    match read_rtc_record(rtc) {
        Some(read_back) if read_back == record => {}
        _ => return Err(Error::Protocol("RTC RAM verify failed")),
    }

    if permanent {
        config.slot_current = slot;
        write_boot_config(sector, flash, &config)?;

        let read_back = read_boot_config(sector, flash)?;
        if read_back.slot_current != slot {
            return Err(Error::Protocol("slot not selected"));
        }
        config = read_back;
    }

    Ok(config)
}

/// Loader-side selection: which slot does the next boot execute?
///
/// Consumes a pending temp-rom request (one-shot) and records the booted
/// slot/mode back into RTC RAM, exactly like the boot loader does.
pub fn boot_select(
    sector: &mut SectorBuffer,
    flash: &mut dyn FlashPort,
    rtc: &mut dyn RtcMemPort,
) -> Result<u8, Error> {
    let config = read_boot_config(sector, flash)?;

    match read_rtc_record(rtc) {
        Some(mut record) if record.next_mode == BOOT_MODE_TEMP_ROM => {
            let slot = record.temporary_slot;
            record.next_mode = BOOT_MODE_STANDARD;
            record.last_mode = BOOT_MODE_TEMP_ROM;
            record.last_slot = slot;
            let _ = write_rtc_record(rtc, &record);
            Ok(slot)
        }
        Some(mut record) => {
            record.last_mode = BOOT_MODE_STANDARD;
            record.last_slot = config.slot_current;
            let _ = write_rtc_record(rtc, &record);
            Ok(config.slot_current)
        }
        None => Ok(config.slot_current),
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::{SimFlash, SimRtcMem};

    fn setup_with_config() -> (SectorBuffer, SimFlash, SimRtcMem) {
        let mut sector = SectorBuffer::new();
        let mut flash = SimFlash::new();
        let rtc = SimRtcMem::new();
        write_boot_config(&mut sector, &mut flash, &BootConfig::default_two_slot()).unwrap();
        (sector, flash, rtc)
    }

    #[test]
    fn boot_config_encode_decode() {
        let config = BootConfig {
            boot_mode: BOOT_MODE_STANDARD,
            slot_current: 1,
            slot_count: 2,
            slots: [0x2000, 0x10_2000, 0, 0],
        };
        let encoded = config.encode();
        assert_eq!(encoded[0], BOOT_CONFIG_MAGIC);
        assert_eq!(encoded[1], BOOT_CONFIG_VERSION);
        assert_eq!(BootConfig::decode(&encoded), Some(config));
    }

    #[test]
    fn boot_config_rejects_bad_magic() {
        let mut encoded = BootConfig::default_two_slot().encode();
        encoded[0] = 0x00;
        assert!(BootConfig::decode(&encoded).is_none());
    }

    #[test]
    fn rtc_record_checksum_round_trip() {
        let record = RtcBootRecord {
            next_mode: BOOT_MODE_TEMP_ROM,
            last_mode: BOOT_MODE_STANDARD,
            last_slot: 0,
            temporary_slot: 1,
        };
        let encoded = record.encode();
        assert_eq!(RtcBootRecord::decode(&encoded), Some(record));
    }

    #[test]
    fn rtc_record_rejects_corruption() {
        let record = RtcBootRecord {
            next_mode: BOOT_MODE_STANDARD,
            last_mode: BOOT_MODE_STANDARD,
            last_slot: 0,
            temporary_slot: 0,
        };
        let mut encoded = record.encode();
        encoded[6] ^= 0x01;
        assert!(RtcBootRecord::decode(&encoded).is_none());

        let mut bad_magic = record.encode();
        bad_magic[0] ^= 0xff;
        assert!(RtcBootRecord::decode(&bad_magic).is_none());
    }

    #[test]
    fn cold_rtc_ram_reads_as_absent() {
        let mut rtc = SimRtcMem::new();
        assert!(read_rtc_record(&mut rtc).is_none());
    }

    #[test]
    fn unchanged_boot_config_skips_erase() {
        let (mut sector, mut flash, _) = setup_with_config();
        let erases = flash.erase_count;
        write_boot_config(&mut sector, &mut flash, &BootConfig::default_two_slot()).unwrap();
        assert_eq!(flash.erase_count, erases);
    }

    #[test]
    fn trial_select_boots_slot_once() {
        let (mut sector, mut flash, mut rtc) = setup_with_config();

        select_slot(&mut sector, &mut flash, &mut rtc, 1, false).unwrap();

        // First boot after the select runs the trial slot.
        assert_eq!(boot_select(&mut sector, &mut flash, &mut rtc).unwrap(), 1);
        // Boot config still points at the committed slot.
        let config = read_boot_config(&mut sector, &mut flash).unwrap();
        assert_eq!(config.slot_current, 0);
        // The boot after that reverts.
        assert_eq!(boot_select(&mut sector, &mut flash, &mut rtc).unwrap(), 0);
    }

    #[test]
    fn permanent_select_persists() {
        let (mut sector, mut flash, mut rtc) = setup_with_config();

        let config = select_slot(&mut sector, &mut flash, &mut rtc, 1, true).unwrap();
        assert_eq!(config.slot_current, 1);

        for _ in 0..3 {
            assert_eq!(boot_select(&mut sector, &mut flash, &mut rtc).unwrap(), 1);
        }
    }

    #[test]
    fn select_rejects_out_of_range_slot() {
        let (mut sector, mut flash, mut rtc) = setup_with_config();
        assert!(select_slot(&mut sector, &mut flash, &mut rtc, 2, false).is_err());
    }

    #[test]
    fn select_fails_while_buffer_held() {
        let (mut sector, mut flash, mut rtc) = setup_with_config();
        assert!(sector.request(crate::flashbuf::SectorOwner::Ota, "ota"));
        assert_eq!(
            select_slot(&mut sector, &mut flash, &mut rtc, 1, false),
            Err(Error::Busy("sector buffer"))
        );
    }
}
