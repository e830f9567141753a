//! Output sequencer.
//!
//! A bounded list of pin steps played back from the 100 ms housekeeping
//! tick: each entry drives one pin to a level and holds it for a number of
//! deciseconds before the next entry runs. The sequence optionally repeats
//! and can be autostarted at boot via the `sequencer-autostart` flag.

use core::fmt::Write;

use heapless::Vec;
use log::info;

use crate::Error;
use crate::buffer::ByteBuf;
use crate::ports::PinPort;
use crate::stats::Stats;

pub const MAX_STEPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub io: u8,
    pub pin: u8,
    pub level: bool,
    /// Hold time in deciseconds before the next step.
    pub hold_ds: u16,
}

pub struct Sequencer {
    steps: Vec<Step, MAX_STEPS>,
    running: bool,
    repeat: bool,
    current: usize,
    hold_remaining: u32,
}

impl Sequencer {
    pub const fn new() -> Self {
        Self {
            steps: Vec::new(),
            running: false,
            repeat: false,
            current: 0,
            hold_remaining: 0,
        }
    }

    pub fn add(&mut self, step: Step) -> Result<usize, Error> {
        self.steps
            .push(step)
            .map_err(|_| Error::Parse("sequencer full"))?;
        Ok(self.steps.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> Result<(), Error> {
        if index >= self.steps.len() {
            return Err(Error::Parse("invalid sequencer entry"));
        }
        let _ = self.steps.remove(index);
        if self.current >= self.steps.len() {
            self.current = 0;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.steps.clear();
        self.running = false;
        self.current = 0;
    }

    pub fn start(&mut self, repeat: bool) -> Result<(), Error> {
        if self.steps.is_empty() {
            return Err(Error::Protocol("sequencer empty"));
        }
        self.running = true;
        self.repeat = repeat;
        self.current = 0;
        self.hold_remaining = 0;
        info!("sequencer: started, {} steps", self.steps.len());
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub const fn running(&self) -> bool {
        self.running
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 100 ms tick. Applies the pending step when its predecessor's hold
    /// has elapsed; one step per tick at most.
    pub fn slow_tick(&mut self, pins: &mut dyn PinPort, stats: &mut Stats) {
        if !self.running {
            return;
        }

        if self.hold_remaining > 0 {
            self.hold_remaining -= 1;
            return;
        }

        let Some(step) = self.steps.get(self.current).copied() else {
            self.running = false;
            return;
        };

        if pins.write_pin(step.io, step.pin, step.level).is_err() {
            info!(
                "sequencer: step {} pin {}/{} unavailable, stopping",
                self.current, step.io, step.pin
            );
            self.running = false;
            return;
        }
        stats.sequencer_steps = stats.sequencer_steps.saturating_add(1);
        self.hold_remaining = u32::from(step.hold_ds);

        self.current += 1;
        if self.current >= self.steps.len() {
            if self.repeat {
                self.current = 0;
            } else {
                self.running = false;
            }
        }
    }

    pub fn render<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>) {
        let _ = writeln!(
            dst,
            "> sequencer: {} steps, {}",
            self.steps.len(),
            if self.running { "running" } else { "stopped" }
        );
        for (index, step) in self.steps.iter().enumerate() {
            let _ = writeln!(
                dst,
                ">  {:2}: io {} pin {:2} -> {} hold {} ds",
                index,
                step.io,
                step.pin,
                u8::from(step.level),
                step.hold_ds
            );
        }
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────
