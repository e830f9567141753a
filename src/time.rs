//! Time subsystem: three clocks side by side.
//!
//! - microsecond uptime from the platform timer,
//! - an RTC-backed wall clock that keeps running across warm resets,
//! - an SNTP-synchronised clock.
//!
//! SNTP sends a 48-byte v4 client request to the configured server every
//! ten minutes — every five seconds during the initial burst until the
//! first reply lands. The reply's transmit timestamp becomes the Unix
//! base; deciseconds accumulate from the 100 ms housekeeping tick.
//! `now()` prefers SNTP once it has ever synchronised, then a manually
//! set wall clock, then the RTC, then boot-relative time.

use log::info;

use crate::ports::PlatformPort;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_DELTA: u64 = 2_208_988_800;

/// SNTP packet size.
pub const SNTP_PACKET_SIZE: usize = 48;

/// LI = 0, VN = 4, Mode = 3 (client).
const SNTP_REQUEST_HEADER: u8 = 0x23;

/// Slow ticks (100 ms) between polls during the initial burst.
const SNTP_BURST_TICKS: u32 = 50;

/// Slow ticks between polls once synchronised: 10 minutes.
const SNTP_REGULAR_TICKS: u32 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    Sntp,
    Wall,
    Rtc,
    Uptime,
}

impl TimeSource {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sntp => "sntp",
            Self::Wall => "wall",
            Self::Rtc => "rtc",
            Self::Uptime => "uptime",
        }
    }
}

pub struct TimeKeeper {
    sntp_server: Option<[u8; 4]>,
    sntp_synced: bool,
    sntp_base_s: u64,
    /// Deciseconds accumulated since the SNTP base.
    sntp_ds: u64,
    ticks_since_poll: u32,

    wall_set: bool,
    /// Unix seconds minus RTC seconds at the moment of `set_time`.
    wall_offset_s: i64,

    timezone_offset_minutes: i32,
}

impl TimeKeeper {
    pub const fn new() -> Self {
        Self {
            sntp_server: None,
            sntp_synced: false,
            sntp_base_s: 0,
            sntp_ds: 0,
            ticks_since_poll: 0,
            wall_set: false,
            wall_offset_s: 0,
            timezone_offset_minutes: 0,
        }
    }

    // ── SNTP ──────────────────────────────────────────────────

    pub fn set_server(&mut self, addr: [u8; 4]) {
        self.sntp_server = Some(addr);
        self.sntp_synced = false;
        self.ticks_since_poll = 0;
    }

    pub const fn server(&self) -> Option<[u8; 4]> {
        self.sntp_server
    }

    pub const fn synced(&self) -> bool {
        self.sntp_synced
    }

    /// 100 ms housekeeping tick. Returns whether an SNTP request is due.
    pub fn slow_tick(&mut self) -> bool {
        if self.sntp_synced {
            self.sntp_ds += 1;
        }

        if self.sntp_server.is_none() {
            return false;
        }

        self.ticks_since_poll += 1;
        let interval = if self.sntp_synced {
            SNTP_REGULAR_TICKS
        } else {
            SNTP_BURST_TICKS
        };
        if self.ticks_since_poll >= interval {
            self.ticks_since_poll = 0;
            return true;
        }
        false
    }

    /// Build the standard 48-byte v4 client request.
    pub fn build_request() -> [u8; SNTP_PACKET_SIZE] {
        let mut packet = [0u8; SNTP_PACKET_SIZE];
        packet[0] = SNTP_REQUEST_HEADER;
        packet
    }

    /// Parse a server reply; on success the transmit timestamp becomes the
    /// new base. Returns the Unix seconds extracted.
    pub fn handle_reply(&mut self, packet: &[u8]) -> Option<u64> {
        if packet.len() < SNTP_PACKET_SIZE {
            return None;
        }
        let mode = packet[0] & 0x07;
        if mode != 4 {
            return None;
        }

        // Transmit timestamp, seconds since 1900, big endian.
        let ntp_seconds =
            u64::from(u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]));
        if ntp_seconds <= NTP_UNIX_DELTA {
            return None;
        }

        let unix = ntp_seconds - NTP_UNIX_DELTA;
        self.sntp_base_s = unix;
        self.sntp_ds = 0;
        if !self.sntp_synced {
            info!("sntp: first sync, base {unix}");
        }
        self.sntp_synced = true;
        Some(unix)
    }

    // ── Wall clock / timezone ─────────────────────────────────

    pub fn set_time(&mut self, unix_seconds: u64, platform: &dyn PlatformPort) {
        let rtc_seconds = platform.rtc_us() / 1_000_000;
        self.wall_offset_s = unix_seconds as i64 - rtc_seconds as i64;
        self.wall_set = true;
    }

    pub fn set_timezone(&mut self, offset_minutes: i32) {
        self.timezone_offset_minutes = offset_minutes;
    }

    pub const fn timezone(&self) -> i32 {
        self.timezone_offset_minutes
    }

    // ── Reading ───────────────────────────────────────────────

    /// Current UTC seconds and which clock supplied them.
    pub fn now(&self, platform: &dyn PlatformPort) -> (u64, TimeSource) {
        if self.sntp_synced {
            return (self.sntp_base_s + self.sntp_ds / 10, TimeSource::Sntp);
        }

        let rtc_seconds = platform.rtc_us() / 1_000_000;
        if self.wall_set {
            let secs = (rtc_seconds as i64 + self.wall_offset_s).max(0) as u64;
            return (secs, TimeSource::Wall);
        }

        if rtc_seconds > 0 {
            return (rtc_seconds, TimeSource::Rtc);
        }

        (platform.uptime_us() / 1_000_000, TimeSource::Uptime)
    }

    /// Local seconds with the timezone offset applied.
    pub fn now_local(&self, platform: &dyn PlatformPort) -> u64 {
        let (utc, _) = self.now(platform);
        (utc as i64 + i64::from(self.timezone_offset_minutes) * 60).max(0) as u64
    }
}

impl Default for TimeKeeper {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::SimPlatform;

    fn reply_with_seconds(ntp_seconds: u32) -> [u8; SNTP_PACKET_SIZE] {
        let mut packet = [0u8; SNTP_PACKET_SIZE];
        packet[0] = 0x24; // LI=0 VN=4 Mode=4 (server)
        packet[40..44].copy_from_slice(&ntp_seconds.to_be_bytes());
        packet
    }

    #[test]
    fn request_format() {
        let packet = TimeKeeper::build_request();
        assert_eq!(packet.len(), SNTP_PACKET_SIZE);
        assert_eq!(packet[0], 0x23);
        assert!(packet[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reply_sets_unix_base() {
        let mut keeper = TimeKeeper::new();
        // 2021-01-01T00:00:00Z = 1609459200 Unix = 3818448000 NTP.
        let unix = keeper.handle_reply(&reply_with_seconds(3_818_448_000)).unwrap();
        assert_eq!(unix, 1_609_459_200);
        assert!(keeper.synced());
    }

    #[test]
    fn reply_rejects_short_and_wrong_mode() {
        let mut keeper = TimeKeeper::new();
        assert!(keeper.handle_reply(&[0u8; 12]).is_none());

        let mut packet = reply_with_seconds(3_818_448_000);
        packet[0] = 0x23; // client mode must be rejected
        assert!(keeper.handle_reply(&packet).is_none());
    }

    #[test]
    fn burst_then_regular_cadence() {
        let mut keeper = TimeKeeper::new();
        keeper.set_server([10, 0, 0, 1]);

        // Burst: first poll after 5 s (50 ticks).
        let mut due = 0;
        for _ in 0..SNTP_BURST_TICKS {
            if keeper.slow_tick() {
                due += 1;
            }
        }
        assert_eq!(due, 1);

        let _ = keeper.handle_reply(&reply_with_seconds(3_818_448_000));

        // Regular: nothing due for just under 10 minutes.
        let mut due = 0;
        for _ in 0..SNTP_REGULAR_TICKS - 1 {
            if keeper.slow_tick() {
                due += 1;
            }
        }
        assert_eq!(due, 0);
        assert!(keeper.slow_tick());
    }

    #[test]
    fn ticks_advance_synced_clock() {
        let mut keeper = TimeKeeper::new();
        let platform = SimPlatform::new();
        let _ = keeper.handle_reply(&reply_with_seconds(3_818_448_000));

        for _ in 0..25 {
            let _ = keeper.slow_tick();
        }
        let (now, source) = keeper.now(&platform);
        assert_eq!(source, TimeSource::Sntp);
        assert_eq!(now, 1_609_459_202);
    }

    #[test]
    fn preference_order() {
        let mut keeper = TimeKeeper::new();
        let mut platform = SimPlatform::new();

        // Nothing set: boot-relative.
        platform.advance_us(5_000_000);
        assert_eq!(keeper.now(&platform).1, TimeSource::Uptime);

        // RTC running (offset makes rtc_us > uptime).
        platform.rtc_offset_us = 3_600_000_000;
        assert_eq!(keeper.now(&platform).1, TimeSource::Rtc);

        // Manually set wall clock wins over raw RTC.
        keeper.set_time(1_700_000_000, &platform);
        let (now, source) = keeper.now(&platform);
        assert_eq!(source, TimeSource::Wall);
        assert_eq!(now, 1_700_000_000);

        // SNTP wins over everything.
        let _ = keeper.handle_reply(&reply_with_seconds(3_818_448_000));
        assert_eq!(keeper.now(&platform).1, TimeSource::Sntp);
    }

    #[test]
    fn timezone_applies_to_local() {
        let mut keeper = TimeKeeper::new();
        let platform = SimPlatform::new();
        let _ = keeper.handle_reply(&reply_with_seconds(3_818_448_000));

        keeper.set_timezone(60);
        assert_eq!(keeper.now_local(&platform), 1_609_459_200 + 3600);

        keeper.set_timezone(-120);
        assert_eq!(keeper.now_local(&platform), 1_609_459_200 - 7200);
    }
}
