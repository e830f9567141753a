//! In-memory simulation backends for every port trait.
//!
//! Used by the host-side test suite and by the unit tests embedded in the
//! core modules. The flash model follows NOR semantics: erase sets a sector
//! to 0xFF, programming can only clear bits — so the erase/skip decisions
//! of the mailbox write path are exercised faithfully.

use std::collections::BTreeMap;
use std::collections::VecDeque;

use crate::error::{Error, FlashError, NetError};
use crate::ports::{
    ApCandidate, FlashPort, I2cPort, NetLink, Peer, PinMode, PinPort, PlatformPort, RtcMemPort,
    SECTOR_SIZE, SocketId, SpiConfig, SpiPort, UartConfig, UartPort, WlanControl,
};

// ───────────────────────────────────────────────────────────────
// Flash
// ───────────────────────────────────────────────────────────────

/// Simulated flash size: 2 MiB, matching the dual-slot layout.
pub const SIM_FLASH_SIZE: usize = 0x20_0000;

pub struct SimFlash {
    data: Vec<u8>,
    /// Inject failures for error-path tests.
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub fail_erases: bool,
    pub erase_count: u32,
    pub write_count: u32,
}

impl SimFlash {
    pub fn new() -> Self {
        Self {
            data: vec![0xff; SIM_FLASH_SIZE],
            fail_reads: false,
            fail_writes: false,
            fail_erases: false,
            erase_count: 0,
            write_count: 0,
        }
    }

    /// Raw view for test assertions.
    pub fn contents(&self, offset: u32, len: usize) -> &[u8] {
        &self.data[offset as usize..offset as usize + len]
    }
}

impl Default for SimFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashPort for SimFlash {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        if self.fail_reads {
            return Err(Error::Flash(FlashError::ReadFailed));
        }
        let start = offset as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(Error::Flash(FlashError::OutOfRange));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Error> {
        if self.fail_writes {
            return Err(Error::Flash(FlashError::WriteFailed));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            return Err(Error::Flash(FlashError::OutOfRange));
        }
        // NOR programming: bits can only go 1 -> 0.
        for (cell, byte) in self.data[start..end].iter_mut().zip(data) {
            *cell &= byte;
        }
        self.write_count += 1;
        Ok(())
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), Error> {
        if self.fail_erases {
            return Err(Error::Flash(FlashError::EraseFailed));
        }
        let start = sector as usize * SECTOR_SIZE;
        let end = start + SECTOR_SIZE;
        if end > self.data.len() {
            return Err(Error::Flash(FlashError::OutOfRange));
        }
        self.data[start..end].fill(0xff);
        self.erase_count += 1;
        Ok(())
    }

    fn size(&self) -> u32 {
        self.data.len() as u32
    }
}

// ───────────────────────────────────────────────────────────────
// RTC memory
// ───────────────────────────────────────────────────────────────

const SIM_RTC_SIZE: usize = 2048;

pub struct SimRtcMem {
    data: [u8; SIM_RTC_SIZE],
}

impl SimRtcMem {
    pub fn new() -> Self {
        // Cold boot: RTC RAM content is arbitrary, not zeroed.
        Self {
            data: [0x5a; SIM_RTC_SIZE],
        }
    }
}

impl Default for SimRtcMem {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcMemPort for SimRtcMem {
    fn read(&mut self, slot: u32, buf: &mut [u8]) -> bool {
        let start = slot as usize * 4;
        let end = start + buf.len();
        if end > SIM_RTC_SIZE {
            return false;
        }
        buf.copy_from_slice(&self.data[start..end]);
        true
    }

    fn write(&mut self, slot: u32, data: &[u8]) -> bool {
        let start = slot as usize * 4;
        let end = start + data.len();
        if end > SIM_RTC_SIZE {
            return false;
        }
        self.data[start..end].copy_from_slice(data);
        true
    }
}

// ───────────────────────────────────────────────────────────────
// Pins
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PinState {
    mode: PinMode,
    level: bool,
    pwm_width: u32,
}

#[derive(Default)]
pub struct SimPins {
    pins: BTreeMap<(u8, u8), PinState>,
}

impl SimPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, io: u8, pin: u8) -> Option<bool> {
        self.pins.get(&(io, pin)).map(|p| p.level)
    }

    pub fn pwm_width(&self, io: u8, pin: u8) -> Option<u32> {
        self.pins.get(&(io, pin)).map(|p| p.pwm_width)
    }

    /// Drive an input pin from the test harness.
    pub fn inject_level(&mut self, io: u8, pin: u8, level: bool) {
        self.pins
            .entry((io, pin))
            .or_insert(PinState {
                mode: PinMode::Input,
                level: false,
                pwm_width: 0,
            })
            .level = level;
    }
}

impl PinPort for SimPins {
    fn set_mode(&mut self, io: u8, pin: u8, mode: PinMode) -> Result<(), Error> {
        let entry = self.pins.entry((io, pin)).or_insert(PinState {
            mode,
            level: false,
            pwm_width: 0,
        });
        entry.mode = mode;
        Ok(())
    }

    fn write_pin(&mut self, io: u8, pin: u8, level: bool) -> Result<(), Error> {
        match self.pins.get_mut(&(io, pin)) {
            Some(state) => {
                state.level = level;
                Ok(())
            }
            None => Err(Error::Parse("pin not configured")),
        }
    }

    fn read_pin(&mut self, io: u8, pin: u8) -> Result<bool, Error> {
        self.pins
            .get(&(io, pin))
            .map(|p| p.level)
            .ok_or(Error::Parse("pin not configured"))
    }

    fn set_pwm_width(&mut self, io: u8, pin: u8, width: u32) -> Result<(), Error> {
        match self.pins.get_mut(&(io, pin)) {
            Some(state) => {
                state.pwm_width = width;
                Ok(())
            }
            None => Err(Error::Parse("pin not configured")),
        }
    }

    fn pin_mode(&self, io: u8, pin: u8) -> Option<PinMode> {
        self.pins.get(&(io, pin)).map(|p| p.mode)
    }
}

// ───────────────────────────────────────────────────────────────
// UART
// ───────────────────────────────────────────────────────────────

const UART_COUNT: usize = 2;
const FIFO_SIZE: usize = 128;

pub struct SimUart {
    configs: [UartConfig; UART_COUNT],
    loopback: [bool; UART_COUNT],
    rx: [VecDeque<u8>; UART_COUNT],
    /// Everything the firmware wrote, for test assertions.
    pub tx_log: [Vec<u8>; UART_COUNT],
}

impl SimUart {
    pub fn new() -> Self {
        Self {
            configs: [UartConfig::default(); UART_COUNT],
            loopback: [false; UART_COUNT],
            rx: [VecDeque::new(), VecDeque::new()],
            tx_log: [Vec::new(), Vec::new()],
        }
    }

    /// Feed bytes into the RX FIFO from the test harness.
    pub fn inject_rx(&mut self, uart: u8, data: &[u8]) {
        let fifo = &mut self.rx[uart as usize % UART_COUNT];
        for &byte in data {
            if fifo.len() < FIFO_SIZE {
                fifo.push_back(byte);
            }
        }
    }
}

impl Default for SimUart {
    fn default() -> Self {
        Self::new()
    }
}

impl UartPort for SimUart {
    fn configure(&mut self, uart: u8, cfg: &UartConfig) -> Result<(), Error> {
        if uart as usize >= UART_COUNT {
            return Err(Error::Parse("invalid uart"));
        }
        self.configs[uart as usize] = *cfg;
        Ok(())
    }

    fn config(&self, uart: u8) -> UartConfig {
        self.configs[uart as usize % UART_COUNT]
    }

    fn write(&mut self, uart: u8, data: &[u8]) -> usize {
        let index = uart as usize % UART_COUNT;
        self.tx_log[index].extend_from_slice(data);
        if self.loopback[index] {
            for &byte in data {
                if self.rx[index].len() < FIFO_SIZE {
                    self.rx[index].push_back(byte);
                }
            }
        }
        data.len()
    }

    fn read(&mut self, uart: u8, buf: &mut [u8]) -> usize {
        let fifo = &mut self.rx[uart as usize % UART_COUNT];
        let mut count = 0;
        while count < buf.len() {
            match fifo.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    fn rx_available(&self, uart: u8) -> usize {
        self.rx[uart as usize % UART_COUNT].len()
    }

    fn tx_space(&self, _uart: u8) -> usize {
        FIFO_SIZE
    }

    fn set_loopback(&mut self, uart: u8, enable: bool) {
        self.loopback[uart as usize % UART_COUNT] = enable;
    }

    fn flush(&mut self, _uart: u8) {}
}

// ───────────────────────────────────────────────────────────────
// I²C / SPI
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cTransaction {
    pub address: u8,
    pub written: Vec<u8>,
    pub read_len: usize,
}

pub struct SimI2c {
    speed_khz: u32,
    bus: u8,
    /// Canned responses per device address.
    pub responses: BTreeMap<u8, Vec<u8>>,
    pub transactions: Vec<I2cTransaction>,
}

impl SimI2c {
    pub fn new() -> Self {
        Self {
            speed_khz: 100,
            bus: 0,
            responses: BTreeMap::new(),
            transactions: Vec::new(),
        }
    }
}

impl Default for SimI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cPort for SimI2c {
    fn set_speed(&mut self, speed_khz: u32) -> Result<(), Error> {
        self.speed_khz = speed_khz;
        Ok(())
    }

    fn select_bus(&mut self, bus: u8) -> Result<(), Error> {
        self.bus = bus;
        Ok(())
    }

    fn current_bus(&self) -> u8 {
        self.bus
    }

    fn write_read(&mut self, address: u8, out: &[u8], input: &mut [u8]) -> Result<usize, Error> {
        self.transactions.push(I2cTransaction {
            address,
            written: out.to_vec(),
            read_len: input.len(),
        });
        match self.responses.get(&address) {
            Some(response) => {
                let n = response.len().min(input.len());
                input[..n].copy_from_slice(&response[..n]);
                Ok(n)
            }
            None if input.is_empty() => Ok(0),
            None => Err(Error::Parse("no i2c device at address")),
        }
    }
}

#[derive(Default)]
pub struct SimSpi {
    pub config: Option<SpiConfig>,
    pub started: bool,
    pub written: Vec<u8>,
    pub response: Vec<u8>,
}

impl SimSpi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpiPort for SimSpi {
    fn configure(&mut self, cfg: &SpiConfig) -> Result<(), Error> {
        self.config = Some(*cfg);
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.config.is_none() {
            return Err(Error::Protocol("spi not configured"));
        }
        self.started = true;
        Ok(())
    }

    fn transfer(&mut self, out: &[u8], input: &mut [u8]) -> Result<usize, Error> {
        if !self.started {
            return Err(Error::Protocol("spi not started"));
        }
        self.written.extend_from_slice(out);
        let n = self.response.len().min(input.len());
        input[..n].copy_from_slice(&self.response[..n]);
        Ok(n)
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.started = false;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Network
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    Udp {
        socket: SocketId,
        peer: Peer,
        payload: Vec<u8>,
    },
    TcpSegment {
        socket: SocketId,
        payload: Vec<u8>,
        more: bool,
    },
    TcpFlush(SocketId),
    TcpAbort(SocketId),
    TcpClose(SocketId),
    JoinMulticast([u8; 4]),
}

pub struct RecordingNet {
    pub events: Vec<NetEvent>,
    /// What `tcp_close` reports — false simulates a UDP-only peer.
    pub tcp_close_succeeds: bool,
    pub fail_sends: bool,
}

impl RecordingNet {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            tcp_close_succeeds: true,
            fail_sends: false,
        }
    }

    /// All UDP payloads sent on `socket`, in order.
    pub fn udp_payloads(&self, socket: SocketId) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                NetEvent::Udp {
                    socket: s, payload, ..
                } if *s == socket => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated TCP payload sent on `socket`.
    pub fn tcp_stream(&self, socket: SocketId) -> Vec<u8> {
        let mut out = Vec::new();
        for event in &self.events {
            if let NetEvent::TcpSegment {
                socket: s, payload, ..
            } = event
            {
                if *s == socket {
                    out.extend_from_slice(payload);
                }
            }
        }
        out
    }
}

impl Default for RecordingNet {
    fn default() -> Self {
        Self::new()
    }
}

impl NetLink for RecordingNet {
    fn send_udp(&mut self, socket: SocketId, peer: Peer, payload: &[u8]) -> Result<(), NetError> {
        if self.fail_sends {
            return Err(NetError::SendFailed);
        }
        self.events.push(NetEvent::Udp {
            socket,
            peer,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn send_tcp(&mut self, socket: SocketId, payload: &[u8], more: bool) -> Result<(), NetError> {
        if self.fail_sends {
            return Err(NetError::SendFailed);
        }
        self.events.push(NetEvent::TcpSegment {
            socket,
            payload: payload.to_vec(),
            more,
        });
        Ok(())
    }

    fn tcp_flush(&mut self, socket: SocketId) {
        self.events.push(NetEvent::TcpFlush(socket));
    }

    fn tcp_abort(&mut self, socket: SocketId) {
        self.events.push(NetEvent::TcpAbort(socket));
    }

    fn tcp_close(&mut self, socket: SocketId) -> bool {
        self.events.push(NetEvent::TcpClose(socket));
        self.tcp_close_succeeds
    }

    fn join_multicast(&mut self, group: [u8; 4]) -> Result<(), NetError> {
        self.events.push(NetEvent::JoinMulticast(group));
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Wi-Fi control
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WlanCall {
    Scan,
    ConnectClient { ssid: String },
    ConnectBssid { ssid: String, ap: ApCandidate },
    AccessPoint { ssid: String, channel: u8 },
}

pub struct SimWlan {
    pub calls: Vec<WlanCall>,
    pub channel: Option<u8>,
    pub rssi: Option<i8>,
}

impl SimWlan {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            channel: None,
            rssi: None,
        }
    }
}

impl Default for SimWlan {
    fn default() -> Self {
        Self::new()
    }
}

impl WlanControl for SimWlan {
    fn start_scan(&mut self) -> Result<(), Error> {
        self.calls.push(WlanCall::Scan);
        Ok(())
    }

    fn connect_client(&mut self, ssid: &str, _password: &str) -> Result<(), Error> {
        self.calls.push(WlanCall::ConnectClient {
            ssid: ssid.to_string(),
        });
        Ok(())
    }

    fn connect_bssid(
        &mut self,
        ssid: &str,
        _password: &str,
        ap: &ApCandidate,
    ) -> Result<(), Error> {
        self.channel = Some(ap.channel);
        self.calls.push(WlanCall::ConnectBssid {
            ssid: ssid.to_string(),
            ap: *ap,
        });
        Ok(())
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        _password: &str,
        channel: u8,
    ) -> Result<(), Error> {
        self.channel = Some(channel);
        self.calls.push(WlanCall::AccessPoint {
            ssid: ssid.to_string(),
            channel,
        });
        Ok(())
    }

    fn current_channel(&self) -> Option<u8> {
        self.channel
    }

    fn rssi(&self) -> Option<i8> {
        self.rssi
    }
}

// ───────────────────────────────────────────────────────────────
// Platform
// ───────────────────────────────────────────────────────────────

pub struct SimPlatform {
    pub now_us: u64,
    pub rtc_offset_us: u64,
    pub reset_requested: bool,
    scratch: BTreeMap<u32, u32>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self {
            now_us: 0,
            rtc_offset_us: 0,
            reset_requested: false,
            scratch: BTreeMap::new(),
        }
    }

    /// Advance simulated time.
    pub fn advance_us(&mut self, us: u64) {
        self.now_us += us;
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformPort for SimPlatform {
    fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    fn uptime_us(&self) -> u64 {
        self.now_us
    }

    fn rtc_us(&self) -> u64 {
        self.rtc_offset_us + self.now_us
    }

    fn peek(&self, address: u32) -> Option<u32> {
        Some(self.scratch.get(&address).copied().unwrap_or(0))
    }

    fn poke(&mut self, address: u32, value: u32) -> bool {
        self.scratch.insert(address, value);
        true
    }

    fn heap_free(&self) -> u32 {
        128 * 1024
    }
}
