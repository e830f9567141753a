//! Wi-Fi lifecycle: association tracking, access-point selection and the
//! open-AP recovery fallback.
//!
//! The core consumes association events from the network stack (they
//! arrive as enqueued tasks, never in callback context) and keeps enough
//! state to drive the two timeout rules: fall back to an open
//! configuration AP when no association arrives after boot, and reset when
//! recovery mode itself goes nowhere.
//!
//! AP re-selection avoids sticky roaming: an active scan fills a bounded
//! candidate table and the device reassociates pinned to the strongest
//! BSSID when that differs from the current association.

use core::fmt::Write;

use heapless::Vec;
use log::info;

use crate::buffer::ByteBuf;
use crate::ports::ApCandidate;

/// Well-known recovery AP parameters (open AP on channel 1).
pub const RECOVERY_SSID: &str = "iobridge-setup";
pub const RECOVERY_PASSWORD: &str = "";
pub const RECOVERY_CHANNEL: u8 = 1;

/// Slow ticks (100 ms) in recovery mode without association before the
/// device gives up and resets: 5 minutes total.
pub const RECOVERY_RESET_TICKS: u32 = 3000;

/// Maximum scan candidates retained.
pub const ACCESS_POINTS_SIZE: usize = 8;

/// Maximum configured multicast groups (`multicast-group.<N>`).
pub const MULTICAST_GROUPS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WlanMode {
    Client,
    AccessPoint,
}

impl WlanMode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::AccessPoint => "access-point",
        }
    }

    pub fn from_config(value: u32) -> Self {
        if value == 1 {
            Self::AccessPoint
        } else {
            Self::Client
        }
    }

    pub const fn to_config(self) -> u32 {
        match self {
            Self::Client => 0,
            Self::AccessPoint => 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct WlanState {
    pub mode_is_ap: bool,
    associated: bool,
    got_ip: bool,
    in_recovery: bool,
    recovery_ticks: u32,
    candidates: Vec<ApCandidate, ACCESS_POINTS_SIZE>,
    scanning: bool,
}

impl WlanState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── association events ────────────────────────────────────

    pub fn on_associated(&mut self) {
        self.associated = true;
    }

    pub fn on_got_ip(&mut self) {
        self.got_ip = true;
        self.in_recovery = false;
        self.recovery_ticks = 0;
    }

    pub fn on_disassociated(&mut self) {
        self.associated = false;
        self.got_ip = false;
    }

    pub const fn associated(&self) -> bool {
        self.associated
    }

    pub const fn has_ip(&self) -> bool {
        self.got_ip
    }

    // ── recovery ──────────────────────────────────────────────

    pub fn enter_recovery(&mut self) {
        info!(
            "wlan: entering recovery AP '{}' on channel {}",
            RECOVERY_SSID, RECOVERY_CHANNEL
        );
        self.in_recovery = true;
        self.recovery_ticks = 0;
        self.mode_is_ap = true;
    }

    pub const fn in_recovery(&self) -> bool {
        self.in_recovery
    }

    /// 100 ms tick while in recovery. Returns true when the device should
    /// give up and reset.
    pub fn recovery_tick(&mut self) -> bool {
        if !self.in_recovery || self.associated {
            return false;
        }
        self.recovery_ticks = self.recovery_ticks.saturating_add(1);
        self.recovery_ticks >= RECOVERY_RESET_TICKS
    }

    // ── scan / reselection ────────────────────────────────────

    pub fn scan_started(&mut self) {
        self.scanning = true;
        self.candidates.clear();
    }

    pub const fn scanning(&self) -> bool {
        self.scanning
    }

    /// Record one scan result row; silently drops past the table bound.
    pub fn add_candidate(&mut self, candidate: ApCandidate) {
        let _ = self.candidates.push(candidate);
    }

    pub fn scan_finished(&mut self) {
        self.scanning = false;
    }

    pub fn candidates(&self) -> &[ApCandidate] {
        &self.candidates
    }

    /// Strongest candidate by RSSI.
    pub fn best_candidate(&self) -> Option<&ApCandidate> {
        self.candidates.iter().max_by_key(|ap| ap.rssi)
    }

    /// The candidate to reassociate with, if it differs from the current
    /// association's channel. Same channel means same AP — stay put.
    pub fn reselection_target(&self, current_channel: Option<u8>) -> Option<&ApCandidate> {
        let best = self.best_candidate()?;
        if self.associated && current_channel == Some(best.channel) {
            None
        } else {
            Some(best)
        }
    }

    /// Render the candidate table, the strongest row marked with `*`.
    pub fn render_scan<const CAP: usize>(&self, dst: &mut ByteBuf<CAP>, terse: bool) {
        let best_rssi = self.best_candidate().map(|ap| ap.rssi);

        for ap in &self.candidates {
            let marker = if Some(ap.rssi) == best_rssi { '*' } else { ' ' };
            if terse {
                let _ = writeln!(dst, "{} {} {}", marker, ap.channel, ap.rssi);
            } else {
                let _ = writeln!(
                    dst,
                    "{} ch: {:2}, rssi: {:3}, bssid: {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                    marker,
                    ap.channel,
                    ap.rssi,
                    ap.bssid[0],
                    ap.bssid[1],
                    ap.bssid[2],
                    ap.bssid[3],
                    ap.bssid[4],
                    ap.bssid[5],
                );
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(channel: u8, rssi: i8) -> ApCandidate {
        ApCandidate {
            bssid: [0, 1, 2, 3, 4, channel],
            channel,
            rssi,
        }
    }

    #[test]
    fn best_candidate_by_rssi() {
        let mut wlan = WlanState::new();
        wlan.scan_started();
        wlan.add_candidate(candidate(1, -70));
        wlan.add_candidate(candidate(6, -40));
        wlan.add_candidate(candidate(11, -55));
        wlan.scan_finished();

        assert_eq!(wlan.best_candidate().unwrap().channel, 6);
    }

    #[test]
    fn reselection_skips_current_ap() {
        let mut wlan = WlanState::new();
        wlan.on_associated();
        wlan.scan_started();
        wlan.add_candidate(candidate(6, -40));
        wlan.scan_finished();

        // Already on the strongest AP's channel: stay.
        assert!(wlan.reselection_target(Some(6)).is_none());
        // Associated elsewhere: move.
        assert_eq!(wlan.reselection_target(Some(1)).unwrap().channel, 6);
    }

    #[test]
    fn reselection_when_not_associated() {
        let mut wlan = WlanState::new();
        wlan.scan_started();
        wlan.add_candidate(candidate(6, -40));
        wlan.scan_finished();

        assert!(wlan.reselection_target(None).is_some());
    }

    #[test]
    fn candidate_table_bounded() {
        let mut wlan = WlanState::new();
        wlan.scan_started();
        for channel in 0..20 {
            wlan.add_candidate(candidate(channel, -50));
        }
        assert_eq!(wlan.candidates().len(), ACCESS_POINTS_SIZE);
    }

    #[test]
    fn recovery_resets_after_timeout() {
        let mut wlan = WlanState::new();
        wlan.enter_recovery();

        for _ in 0..RECOVERY_RESET_TICKS - 1 {
            assert!(!wlan.recovery_tick());
        }
        assert!(wlan.recovery_tick());
    }

    #[test]
    fn recovery_tick_quiet_once_associated() {
        let mut wlan = WlanState::new();
        wlan.enter_recovery();
        wlan.on_associated();
        for _ in 0..RECOVERY_RESET_TICKS * 2 {
            assert!(!wlan.recovery_tick());
        }
    }

    #[test]
    fn got_ip_clears_recovery() {
        let mut wlan = WlanState::new();
        wlan.enter_recovery();
        wlan.on_associated();
        wlan.on_got_ip();
        assert!(!wlan.in_recovery());
    }

    #[test]
    fn scan_render_marks_best() {
        let mut wlan = WlanState::new();
        wlan.scan_started();
        wlan.add_candidate(candidate(1, -70));
        wlan.add_candidate(candidate(6, -40));
        wlan.scan_finished();

        let mut out: ByteBuf<256> = ByteBuf::new();
        wlan.render_scan(&mut out, false);
        let text = out.as_str();
        assert!(text.contains("* ch:  6"));
        assert!(text.contains("  ch:  1"));
    }
}
