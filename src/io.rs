//! I/O state: trigger pins, per-pin flags and masked writes.
//!
//! The pin hardware lives behind [`PinPort`]; this module keeps the
//! firmware-visible state around it — which pins act as status and
//! association indicators, per-pin behaviour flags and the trigger
//! actions shared by the `io-trigger` command family, the sequencer and
//! the association alerts.

use core::fmt::Write;

use heapless::FnvIndexMap;

use crate::Error;
use crate::buffer::ByteBuf;
use crate::ports::PinPort;

/// Per-pin behaviour flags (`io-set-flag` / `io-clear-flag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PinFlag {
    Autostart = 1 << 0,
    Repeat = 1 << 1,
    Pullup = 1 << 2,
    InvertedOutput = 1 << 3,
}

impl PinFlag {
    pub const ALL: [PinFlag; 4] = [
        PinFlag::Autostart,
        PinFlag::Repeat,
        PinFlag::Pullup,
        PinFlag::InvertedOutput,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Autostart => "autostart",
            Self::Repeat => "repeat",
            Self::Pullup => "pullup",
            Self::InvertedOutput => "inverted-output",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    Off,
    On,
    Toggle,
}

impl TriggerAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "off" | "0" => Some(Self::Off),
            "on" | "1" => Some(Self::On),
            "toggle" => Some(Self::Toggle),
            _ => None,
        }
    }
}

const PIN_FLAG_SLOTS: usize = 32;

fn key(io: u8, pin: u8) -> u16 {
    u16::from(io) << 8 | u16::from(pin)
}

#[derive(Debug, Default)]
pub struct IoState {
    /// Driven on each received command when configured.
    pub status_trigger: Option<(u8, u8)>,
    /// Driven high on association, low on disassociation.
    pub assoc_trigger: Option<(u8, u8)>,
    flags: FnvIndexMap<u16, u32, PIN_FLAG_SLOTS>,
    /// Mask applied by `io-write` when set (`io-set-mask`).
    pub write_mask: u32,
}

impl IoState {
    pub fn new() -> Self {
        Self {
            status_trigger: None,
            assoc_trigger: None,
            flags: FnvIndexMap::new(),
            write_mask: u32::MAX,
        }
    }

    // ── pin flags ─────────────────────────────────────────────

    pub fn set_flag(&mut self, io: u8, pin: u8, flag: PinFlag) -> Result<(), Error> {
        let entry = key(io, pin);
        let current = self.flags.get(&entry).copied().unwrap_or(0);
        self.flags
            .insert(entry, current | flag as u32)
            .map_err(|_| Error::Parse("pin flag table full"))?;
        Ok(())
    }

    pub fn clear_flag(&mut self, io: u8, pin: u8, flag: PinFlag) {
        if let Some(bits) = self.flags.get_mut(&key(io, pin)) {
            *bits &= !(flag as u32);
        }
    }

    pub fn has_flag(&self, io: u8, pin: u8, flag: PinFlag) -> bool {
        self.flags
            .get(&key(io, pin))
            .is_some_and(|bits| bits & flag as u32 != 0)
    }

    pub fn render_flags<const CAP: usize>(&self, io: u8, pin: u8, dst: &mut ByteBuf<CAP>) {
        let bits = self.flags.get(&key(io, pin)).copied().unwrap_or(0);
        let _ = write!(dst, "> io {io} pin {pin} flags:");
        for flag in PinFlag::ALL {
            if bits & flag as u32 != 0 {
                let _ = write!(dst, " {}", flag.name());
            }
        }
        let _ = writeln!(dst);
    }

    // ── triggers ──────────────────────────────────────────────

    /// Apply a trigger action to a pin, honouring the inverted-output flag.
    pub fn trigger(
        &self,
        pins: &mut dyn PinPort,
        io: u8,
        pin: u8,
        action: TriggerAction,
    ) -> Result<bool, Error> {
        let inverted = self.has_flag(io, pin, PinFlag::InvertedOutput);
        let level = match action {
            TriggerAction::On => true,
            TriggerAction::Off => false,
            TriggerAction::Toggle => !pins.read_pin(io, pin)?,
        };
        let driven = level != inverted;
        pins.write_pin(io, pin, driven)?;
        Ok(driven)
    }

    /// Fire the status indicator, when configured. Failures are ignored —
    /// a broken indicator must not break command processing.
    pub fn pulse_status(&self, pins: &mut dyn PinPort) {
        if let Some((io, pin)) = self.status_trigger {
            let _ = self.trigger(pins, io, pin, TriggerAction::Toggle);
        }
    }

    /// Drive the association indicator.
    pub fn signal_association(&self, pins: &mut dyn PinPort, associated: bool) {
        if let Some((io, pin)) = self.assoc_trigger {
            let action = if associated {
                TriggerAction::On
            } else {
                TriggerAction::Off
            };
            let _ = self.trigger(pins, io, pin, action);
        }
    }

    /// Masked multi-pin write: bit `n` of `value` drives pin `n` of `io`
    /// where bit `n` of the write mask is set.
    pub fn masked_write(&self, pins: &mut dyn PinPort, io: u8, value: u32) -> Result<u32, Error> {
        let mut written = 0u32;
        for pin in 0..32u8 {
            let bit = 1u32 << pin;
            if self.write_mask & bit == 0 {
                continue;
            }
            if pins.pin_mode(io, pin).is_none() {
                continue;
            }
            pins.write_pin(io, pin, value & bit != 0)?;
            written |= bit;
        }
        Ok(written)
    }
}

// ── Tests ─────────────────────────────────────────────────────
