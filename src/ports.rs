//! Port traits — the boundary between the bridge core and the platform.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ System (core logic)
//! ```
//!
//! Driven adapters (flash, RTC memory, pins, buses, network stack, platform
//! services) implement these traits. The core consumes them through the
//! [`Ports`] bundle, so the dispatcher, command engine and OTA machinery
//! never touch ESP-IDF directly and run unmodified under the host-side
//! simulation backends.

use crate::error::{Error, NetError};

// ───────────────────────────────────────────────────────────────
// Flash port
// ───────────────────────────────────────────────────────────────

/// Sector size — the unit of erase and of mailbox transfer.
pub const SECTOR_SIZE: usize = 4096;

/// Raw SPI flash access. Offsets are absolute byte addresses.
pub trait FlashPort {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error>;

    /// Program bytes. The target range must have been erased beforehand
    /// where bits need to go from 0 back to 1.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Error>;

    fn erase_sector(&mut self, sector: u32) -> Result<(), Error>;

    /// Total flash size in bytes.
    fn size(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// RTC-persistent scratch memory
// ───────────────────────────────────────────────────────────────

/// Word-addressed RTC RAM that survives warm resets. `slot` is the word
/// index used by the boot loader interface.
pub trait RtcMemPort {
    fn read(&mut self, slot: u32, buf: &mut [u8]) -> bool;
    fn write(&mut self, slot: u32, data: &[u8]) -> bool;
}

// ───────────────────────────────────────────────────────────────
// GPIO / PWM
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Disabled,
    Input,
    Output,
    OpenDrain,
    Pwm,
}

/// Pin access as the core sees it: `(io, pin)` addressing, where `io`
/// selects an expander or the on-chip bank.
pub trait PinPort {
    fn set_mode(&mut self, io: u8, pin: u8, mode: PinMode) -> Result<(), Error>;
    fn write_pin(&mut self, io: u8, pin: u8, level: bool) -> Result<(), Error>;
    fn read_pin(&mut self, io: u8, pin: u8) -> Result<bool, Error>;
    fn set_pwm_width(&mut self, io: u8, pin: u8, width: u32) -> Result<(), Error>;
    fn pin_mode(&self, io: u8, pin: u8) -> Option<PinMode>;
}

// ───────────────────────────────────────────────────────────────
// UART
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartParity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: UartParity,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: UartParity::None,
        }
    }
}

/// FIFO-level UART access for the bridge. `uart ∈ {0, 1}`.
pub trait UartPort {
    fn configure(&mut self, uart: u8, cfg: &UartConfig) -> Result<(), Error>;
    fn config(&self, uart: u8) -> UartConfig;

    /// Non-blocking write; returns bytes accepted by the TX FIFO.
    fn write(&mut self, uart: u8, data: &[u8]) -> usize;

    /// Non-blocking read; returns bytes drained from the RX FIFO.
    fn read(&mut self, uart: u8, buf: &mut [u8]) -> usize;

    fn rx_available(&self, uart: u8) -> usize;
    fn tx_space(&self, uart: u8) -> usize;
    fn set_loopback(&mut self, uart: u8, enable: bool);
    fn flush(&mut self, uart: u8);
}

// ───────────────────────────────────────────────────────────────
// I²C / SPI
// ───────────────────────────────────────────────────────────────

pub trait I2cPort {
    fn set_speed(&mut self, speed_khz: u32) -> Result<(), Error>;
    fn select_bus(&mut self, bus: u8) -> Result<(), Error>;
    fn current_bus(&self) -> u8;

    /// Combined write-then-read transaction; either part may be empty.
    fn write_read(&mut self, address: u8, out: &[u8], input: &mut [u8]) -> Result<usize, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    pub mode: u8,
    pub speed_khz: u32,
    pub cs_io: u8,
    pub cs_pin: u8,
}

pub trait SpiPort {
    fn configure(&mut self, cfg: &SpiConfig) -> Result<(), Error>;
    fn start(&mut self) -> Result<(), Error>;
    fn transfer(&mut self, out: &[u8], input: &mut [u8]) -> Result<usize, Error>;
    fn finish(&mut self) -> Result<(), Error>;
}

// ───────────────────────────────────────────────────────────────
// Network link
// ───────────────────────────────────────────────────────────────

/// Which of the firmware's listeners a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketId {
    Command,
    Mailbox,
    Bridge,
    Sntp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerProto {
    Tcp,
    Udp,
}

/// The peer recorded from the most recent receive; sends go back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub proto: PeerProto,
    pub addr: [u8; 4],
    pub port: u16,
}

/// Outbound side of the network stack. The inbound side is push-based:
/// the platform delivers received bytes into `System::net_deliver`.
pub trait NetLink {
    /// Emit one UDP datagram (the socket layer has already fragmented).
    fn send_udp(&mut self, socket: SocketId, peer: Peer, payload: &[u8]) -> Result<(), NetError>;

    /// Queue one TCP segment on the accepted connection. `more` signals
    /// that further segments follow before the flush.
    fn send_tcp(&mut self, socket: SocketId, payload: &[u8], more: bool) -> Result<(), NetError>;

    /// Push queued TCP segments to the wire.
    fn tcp_flush(&mut self, socket: SocketId);

    /// Abort-close the accepted TCP connection, if any.
    fn tcp_abort(&mut self, socket: SocketId);

    /// Graceful TCP close; returns false when there is no TCP connection
    /// to close (UDP peer), in which case the caller owns the follow-up.
    fn tcp_close(&mut self, socket: SocketId) -> bool;

    /// Join an IPv4 multicast group.
    fn join_multicast(&mut self, group: [u8; 4]) -> Result<(), NetError>;
}

// ───────────────────────────────────────────────────────────────
// Wi-Fi control
// ───────────────────────────────────────────────────────────────

/// One scan result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApCandidate {
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i8,
}

pub trait WlanControl {
    /// Kick off an active scan; results arrive via `System::wlan_scan_done`.
    fn start_scan(&mut self) -> Result<(), Error>;

    fn connect_client(&mut self, ssid: &str, password: &str) -> Result<(), Error>;

    /// Reassociate pinned to an explicit BSSID and channel.
    fn connect_bssid(&mut self, ssid: &str, password: &str, ap: &ApCandidate)
    -> Result<(), Error>;

    fn start_access_point(&mut self, ssid: &str, password: &str, channel: u8)
    -> Result<(), Error>;

    fn current_channel(&self) -> Option<u8>;
    fn rssi(&self) -> Option<i8>;
}

// ───────────────────────────────────────────────────────────────
// Platform services
// ───────────────────────────────────────────────────────────────

pub trait PlatformPort {
    /// Request a system reset. Returns; the actual reset happens once the
    /// current drain step completes.
    fn request_reset(&mut self);

    /// Microseconds since boot (monotonic).
    fn uptime_us(&self) -> u64;

    /// RTC-backed microsecond counter that keeps running across warm resets.
    fn rtc_us(&self) -> u64;

    /// Read a 32-bit word from a raw address. `None` when unmapped.
    fn peek(&self, address: u32) -> Option<u32>;

    /// Write a 32-bit word to a raw address. `false` when refused.
    fn poke(&mut self, address: u32, value: u32) -> bool;

    fn heap_free(&self) -> u32;
}

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// Everything the core borrows from the platform for one drain step.
pub struct Ports<'p> {
    pub flash: &'p mut dyn FlashPort,
    pub rtc: &'p mut dyn RtcMemPort,
    pub pins: &'p mut dyn PinPort,
    pub uart: &'p mut dyn UartPort,
    pub i2c: &'p mut dyn I2cPort,
    pub spi: &'p mut dyn SpiPort,
    pub net: &'p mut dyn NetLink,
    pub wlan: &'p mut dyn WlanControl,
    pub platform: &'p mut dyn PlatformPort,
}
