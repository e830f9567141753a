//! Runtime counters.
//!
//! Every drop, overflow and milestone in the firmware increments a counter
//! here; the `stats`/`stats-*` commands render them. Counters saturate
//! instead of wrapping so a long-running device never reports a small value
//! after 2^32 events.

use core::fmt::Write;

use crate::buffer::ByteBuf;

/// Number of task priorities (see [`crate::dispatch`]).
pub const PRIO_COUNT: usize = 3;

#[derive(Debug, Default, Clone)]
pub struct Stats {
    // ── dispatcher ────────────────────────────────────────────
    pub task_posted: [u32; PRIO_COUNT],
    pub task_post_failed: [u32; PRIO_COUNT],
    pub fast_timer_ticks: u32,
    pub slow_timer_ticks: u32,

    // ── command engine ────────────────────────────────────────
    pub cmd_tcp_received: u32,
    pub cmd_udp_received: u32,
    pub cmd_send_buffer_overflow: u32,
    pub cmd_unknown: u32,

    // ── uart bridge ───────────────────────────────────────────
    pub uart_send_buffer_overflow: u32,
    pub uart_receive_buffer_overflow: u32,
    pub uart_bridged_bytes: u32,

    // ── flash / mailbox ───────────────────────────────────────
    pub flash_sectors_erased: u32,
    pub flash_sectors_written: u32,
    pub mailbox_sectors_received: u32,
    pub mailbox_sectors_sent: u32,

    // ── config ────────────────────────────────────────────────
    pub config_commits: u32,
    pub config_aborts: u32,

    // ── time ──────────────────────────────────────────────────
    pub sntp_sent: u32,
    pub sntp_received: u32,

    // ── wlan ──────────────────────────────────────────────────
    pub wlan_associations: u32,
    pub wlan_disassociations: u32,
    pub init_associate_time_us: u64,
    pub init_ip_time_us: u64,

    // ── periphery ─────────────────────────────────────────────
    pub display_updates: u32,
    pub i2c_sensor_updates: u32,
    pub sequencer_steps: u32,
}

fn bump(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_posted(&mut self, prio: usize) {
        if prio < PRIO_COUNT {
            bump(&mut self.task_posted[prio]);
        }
    }

    pub fn task_post_failed(&mut self, prio: usize) {
        if prio < PRIO_COUNT {
            bump(&mut self.task_post_failed[prio]);
        }
    }

    pub fn bump_cmd_overflow(&mut self) {
        bump(&mut self.cmd_send_buffer_overflow);
    }

    /// Render the firmware-level summary (`stats` command).
    pub fn render_firmware<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>, uptime_us: u64) {
        let _ = writeln!(dst, "> firmware statistics:");
        let _ = writeln!(dst, ">  uptime: {} s", uptime_us / 1_000_000);
        let _ = writeln!(
            dst,
            ">  association time: {} ms",
            self.init_associate_time_us / 1000
        );
        let _ = writeln!(dst, ">  ip address time: {} ms", self.init_ip_time_us / 1000);
        let _ = writeln!(dst, ">  fast timer ticks: {}", self.fast_timer_ticks);
        let _ = writeln!(dst, ">  slow timer ticks: {}", self.slow_timer_ticks);
        let _ = writeln!(dst, ">  commands tcp: {}", self.cmd_tcp_received);
        let _ = writeln!(dst, ">  commands udp: {}", self.cmd_udp_received);
        let _ = writeln!(dst, ">  commands unknown: {}", self.cmd_unknown);
    }

    /// Render the queue/overflow counters (`stats-counters` command).
    pub fn render_counters<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>) {
        let _ = writeln!(dst, "> counters:");
        for prio in 0..PRIO_COUNT {
            let _ = writeln!(
                dst,
                ">  task queue {}: posted: {}, dropped: {}",
                prio, self.task_posted[prio], self.task_post_failed[prio]
            );
        }
        let _ = writeln!(
            dst,
            ">  cmd send buffer overflow: {}",
            self.cmd_send_buffer_overflow
        );
        let _ = writeln!(
            dst,
            ">  uart send buffer overflow: {}",
            self.uart_send_buffer_overflow
        );
        let _ = writeln!(
            dst,
            ">  uart receive buffer overflow: {}",
            self.uart_receive_buffer_overflow
        );
    }

    /// Render the flash/mailbox counters (`stats-flash` command).
    pub fn render_flash<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>) {
        let _ = writeln!(dst, "> flash statistics:");
        let _ = writeln!(dst, ">  sectors erased: {}", self.flash_sectors_erased);
        let _ = writeln!(dst, ">  sectors written: {}", self.flash_sectors_written);
        let _ = writeln!(
            dst,
            ">  mailbox sectors received: {}",
            self.mailbox_sectors_received
        );
        let _ = writeln!(dst, ">  mailbox sectors sent: {}", self.mailbox_sectors_sent);
        let _ = writeln!(dst, ">  config commits: {}", self.config_commits);
        let _ = writeln!(dst, ">  config aborts: {}", self.config_aborts);
    }

    /// Render wlan counters (`stats-wlan` command).
    pub fn render_wlan<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>) {
        let _ = writeln!(dst, "> wlan statistics:");
        let _ = writeln!(dst, ">  associations: {}", self.wlan_associations);
        let _ = writeln!(dst, ">  disassociations: {}", self.wlan_disassociations);
        let _ = writeln!(dst, ">  sntp sent: {}", self.sntp_sent);
        let _ = writeln!(dst, ">  sntp received: {}", self.sntp_received);
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_saturate() {
        let mut stats = Stats::new();
        stats.cmd_send_buffer_overflow = u32::MAX;
        stats.bump_cmd_overflow();
        assert_eq!(stats.cmd_send_buffer_overflow, u32::MAX);
    }

    #[test]
    fn out_of_range_priority_ignored() {
        let mut stats = Stats::new();
        stats.task_posted(7);
        assert_eq!(stats.task_posted, [0; PRIO_COUNT]);
    }

    #[test]
    fn render_includes_overflow_count() {
        let mut stats = Stats::new();
        stats.bump_cmd_overflow();
        stats.bump_cmd_overflow();

        let mut out: ByteBuf<1024> = ByteBuf::new();
        stats.render_counters(&mut out);
        assert!(out.as_str().contains("cmd send buffer overflow: 2"));
    }
}
