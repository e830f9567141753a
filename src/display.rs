//! Display slot management.
//!
//! The panel drivers themselves live behind the pin/bus ports; the core
//! keeps the displayed content: a small set of text slots rotated on a
//! flip timeout, plus brightness, font selection and a freeze window.
//! Pictures are staged through the shared sector buffer (owner
//! `DisplayPicture`) from the per-slot picture region in flash.

use core::fmt::Write;

use heapless::String;
use log::debug;

use crate::Error;
use crate::buffer::ByteBuf;
use crate::flashbuf::{SectorBuffer, SectorOwner};
use crate::ota::layout;
use crate::ports::{FlashPort, SECTOR_SIZE};

pub const SLOT_COUNT: usize = 4;
pub const SLOT_TEXT_SIZE: usize = 64;

const PICTURE_TAG: &str = "display picture";

pub struct Display {
    detected: bool,
    slots: [String<SLOT_TEXT_SIZE>; SLOT_COUNT],
    current_slot: usize,
    brightness: u8,
    /// Deciseconds between slot rotations; 0 disables rotation.
    flip_timeout_ds: u16,
    flip_elapsed_ds: u16,
    /// Remaining freeze window in deciseconds.
    freeze_remaining_ds: u32,
    font: u8,
    picture_loaded: bool,
}

impl Display {
    pub fn new() -> Self {
        Self {
            detected: false,
            slots: [String::new(), String::new(), String::new(), String::new()],
            current_slot: 0,
            brightness: 2,
            flip_timeout_ds: 40,
            flip_elapsed_ds: 0,
            freeze_remaining_ds: 0,
            font: 0,
            picture_loaded: false,
        }
    }

    pub const fn detected(&self) -> bool {
        self.detected
    }

    pub fn set_detected(&mut self, detected: bool) {
        self.detected = detected;
    }

    pub fn set_slot(&mut self, slot: usize, text: &str) -> Result<(), Error> {
        if slot >= SLOT_COUNT {
            return Err(Error::Parse("invalid display slot"));
        }
        self.slots[slot].clear();
        let mut take = text.len().min(SLOT_TEXT_SIZE);
        while !text.is_char_boundary(take) {
            take -= 1;
        }
        let _ = self.slots[slot].push_str(&text[..take]);
        Ok(())
    }

    pub fn slot_text(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot).map(|s| s.as_str())
    }

    pub const fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn set_brightness(&mut self, level: u8) -> Result<(), Error> {
        if level > 4 {
            return Err(Error::Parse("brightness 0-4"));
        }
        self.brightness = level;
        Ok(())
    }

    pub const fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn set_flip_timeout(&mut self, ds: u16) {
        self.flip_timeout_ds = ds;
        self.flip_elapsed_ds = 0;
    }

    pub fn set_font(&mut self, font: u8) {
        self.font = font;
    }

    pub const fn font(&self) -> u8 {
        self.font
    }

    /// Hold the current slot for `ds` deciseconds.
    pub fn freeze(&mut self, ds: u32) {
        self.freeze_remaining_ds = ds;
    }

    /// 100 ms tick: rotate to the next non-empty slot when the flip
    /// timeout elapses. Returns whether the visible content changed.
    pub fn slow_tick(&mut self) -> bool {
        if !self.detected {
            return false;
        }

        if self.freeze_remaining_ds > 0 {
            self.freeze_remaining_ds -= 1;
            return false;
        }

        if self.flip_timeout_ds == 0 {
            return false;
        }

        self.flip_elapsed_ds += 1;
        if self.flip_elapsed_ds < self.flip_timeout_ds {
            return false;
        }
        self.flip_elapsed_ds = 0;

        // Advance to the next slot with content, if any other has some.
        for offset in 1..=SLOT_COUNT {
            let candidate = (self.current_slot + offset) % SLOT_COUNT;
            if !self.slots[candidate].is_empty() {
                let changed = candidate != self.current_slot;
                self.current_slot = candidate;
                return changed;
            }
        }
        false
    }

    /// Stage a picture for `slot` from the flash picture region through
    /// the shared sector buffer.
    pub fn picture_load(
        &mut self,
        sector: &mut SectorBuffer,
        flash: &mut dyn FlashPort,
        slot: usize,
    ) -> Result<(), Error> {
        if slot >= layout::PICTURE_OFFSET.len() {
            return Err(Error::Parse("invalid picture slot"));
        }
        if !sector.request(SectorOwner::DisplayPicture, PICTURE_TAG) {
            return Err(Error::Busy("sector buffer"));
        }

        let result = flash.read(layout::PICTURE_OFFSET[slot], sector.data_mut());
        sector.release(SectorOwner::DisplayPicture, PICTURE_TAG);
        result?;

        debug!("display: picture slot {slot} staged ({SECTOR_SIZE} bytes)");
        self.picture_loaded = true;
        Ok(())
    }

    pub const fn picture_loaded(&self) -> bool {
        self.picture_loaded
    }

    pub fn render<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>) {
        let _ = writeln!(
            dst,
            "> display: {}, brightness: {}, font: {}, flip: {} ds, slot: {}",
            if self.detected { "detected" } else { "absent" },
            self.brightness,
            self.font,
            self.flip_timeout_ds,
            self.current_slot
        );
        for (index, slot) in self.slots.iter().enumerate() {
            let _ = writeln!(dst, ">  slot {index}: {}", slot.as_str());
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::SimFlash;

    #[test]
    fn slot_rotation_on_flip_timeout() {
        let mut display = Display::new();
        display.set_detected(true);
        display.set_flip_timeout(2);
        display.set_slot(0, "alpha").unwrap();
        display.set_slot(1, "beta").unwrap();

        assert!(!display.slow_tick());
        assert!(display.slow_tick());
        assert_eq!(display.current_slot(), 1);

        assert!(!display.slow_tick());
        assert!(display.slow_tick());
        assert_eq!(display.current_slot(), 0);
    }

    #[test]
    fn freeze_suspends_rotation() {
        let mut display = Display::new();
        display.set_detected(true);
        display.set_flip_timeout(1);
        display.set_slot(0, "a").unwrap();
        display.set_slot(1, "b").unwrap();

        display.freeze(3);
        for _ in 0..3 {
            assert!(!display.slow_tick());
        }
        assert!(display.slow_tick());
    }

    #[test]
    fn invalid_slot_rejected() {
        let mut display = Display::new();
        assert!(display.set_slot(SLOT_COUNT, "x").is_err());
        assert!(display.set_brightness(5).is_err());
    }

    #[test]
    fn long_text_truncated() {
        let mut display = Display::new();
        let long = "x".repeat(200);
        display.set_slot(0, &long).unwrap();
        assert_eq!(display.slot_text(0).unwrap().len(), SLOT_TEXT_SIZE);
    }

    #[test]
    fn picture_load_uses_sector_buffer() {
        let mut display = Display::new();
        let mut sector = SectorBuffer::new();
        let mut flash = SimFlash::new();

        display.picture_load(&mut sector, &mut flash, 0).unwrap();
        assert!(display.picture_loaded());
        assert_eq!(sector.owner(), SectorOwner::Free);
    }

    #[test]
    fn picture_load_respects_arbiter() {
        let mut display = Display::new();
        let mut sector = SectorBuffer::new();
        let mut flash = SimFlash::new();

        assert!(sector.request(SectorOwner::Rboot, "rboot"));
        assert_eq!(
            display.picture_load(&mut sector, &mut flash, 0),
            Err(Error::Busy("sector buffer"))
        );
    }
}
