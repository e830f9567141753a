//! ESP-IDF adapters: flash, RTC memory, GPIO/LEDC, UART, platform.
//!
//! Thin unsafe shims over `esp_idf_svc::sys`. Everything here is called
//! from the single main-task context; the ISR-side callbacks registered
//! in `main.rs` only enqueue into the dispatcher.

#![cfg(target_os = "espidf")]

use esp_idf_svc::sys::*;
use log::warn;

use crate::error::{Error, FlashError};
use crate::ports::{
    FlashPort, PinMode, PinPort, PlatformPort, RtcMemPort, SECTOR_SIZE, SpiConfig, SpiPort,
    UartConfig, UartParity, UartPort,
};

// ───────────────────────────────────────────────────────────────
// Flash
// ───────────────────────────────────────────────────────────────

pub struct EspFlash {
    size: u32,
}

impl EspFlash {
    pub fn new() -> Self {
        // SAFETY: spi_flash_get_chip_size reads a ROM constant.
        let size = unsafe { spi_flash_get_chip_size() } as u32;
        Self { size }
    }
}

impl Default for EspFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashPort for EspFlash {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        if offset + buf.len() as u32 > self.size {
            return Err(Error::Flash(FlashError::OutOfRange));
        }
        // SAFETY: buf is valid for buf.len() writable bytes.
        let ret = unsafe { spi_flash_read(offset as usize, buf.as_mut_ptr().cast(), buf.len()) };
        if ret != ESP_OK {
            warn!("flash: read at 0x{offset:06x} failed ({ret})");
            return Err(Error::Flash(FlashError::ReadFailed));
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), Error> {
        if offset + data.len() as u32 > self.size {
            return Err(Error::Flash(FlashError::OutOfRange));
        }
        // SAFETY: data is valid for data.len() readable bytes.
        let ret = unsafe { spi_flash_write(offset as usize, data.as_ptr().cast(), data.len()) };
        if ret != ESP_OK {
            warn!("flash: write at 0x{offset:06x} failed ({ret})");
            return Err(Error::Flash(FlashError::WriteFailed));
        }
        Ok(())
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), Error> {
        if (sector + 1) * SECTOR_SIZE as u32 > self.size {
            return Err(Error::Flash(FlashError::OutOfRange));
        }
        // SAFETY: sector bounds checked against the chip size above.
        let ret = unsafe { spi_flash_erase_sector(sector as usize) };
        if ret != ESP_OK {
            warn!("flash: erase sector {sector} failed ({ret})");
            return Err(Error::Flash(FlashError::EraseFailed));
        }
        Ok(())
    }

    fn size(&self) -> u32 {
        self.size
    }
}

// ───────────────────────────────────────────────────────────────
// RTC memory
// ───────────────────────────────────────────────────────────────

/// RTC slow memory region used for the trial-boot record. The linker
/// keeps this out of the loader's clearing range.
const RTC_WORDS: usize = 512;

#[unsafe(link_section = ".rtc.data")]
static mut RTC_SCRATCH: [u32; RTC_WORDS] = [0; RTC_WORDS];

pub struct EspRtcMem;

impl EspRtcMem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EspRtcMem {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcMemPort for EspRtcMem {
    fn read(&mut self, slot: u32, buf: &mut [u8]) -> bool {
        let start = slot as usize * 4;
        if start + buf.len() > RTC_WORDS * 4 {
            return false;
        }
        // SAFETY: single main-task access; the region is static.
        let bytes = unsafe {
            core::slice::from_raw_parts((&raw const RTC_SCRATCH).cast::<u8>(), RTC_WORDS * 4)
        };
        buf.copy_from_slice(&bytes[start..start + buf.len()]);
        true
    }

    fn write(&mut self, slot: u32, data: &[u8]) -> bool {
        let start = slot as usize * 4;
        if start + data.len() > RTC_WORDS * 4 {
            return false;
        }
        // SAFETY: single main-task access; the region is static.
        let bytes = unsafe {
            core::slice::from_raw_parts_mut((&raw mut RTC_SCRATCH).cast::<u8>(), RTC_WORDS * 4)
        };
        bytes[start..start + data.len()].copy_from_slice(data);
        true
    }
}

// ───────────────────────────────────────────────────────────────
// GPIO / LEDC
// ───────────────────────────────────────────────────────────────

pub struct EspPins;

impl EspPins {
    pub fn new() -> Self {
        Self
    }

    fn gpio_num(io: u8, pin: u8) -> Option<i32> {
        // io 0 is the on-chip bank; expanders hang off the i2c port and
        // are not reachable through this adapter.
        (io == 0 && pin < 48).then_some(i32::from(pin))
    }
}

impl Default for EspPins {
    fn default() -> Self {
        Self::new()
    }
}

impl PinPort for EspPins {
    fn set_mode(&mut self, io: u8, pin: u8, mode: PinMode) -> Result<(), Error> {
        let gpio = Self::gpio_num(io, pin).ok_or(Error::Parse("pin not available"))?;
        let idf_mode = match mode {
            PinMode::Disabled => gpio_mode_t_GPIO_MODE_DISABLE,
            PinMode::Input => gpio_mode_t_GPIO_MODE_INPUT,
            PinMode::Output | PinMode::Pwm => gpio_mode_t_GPIO_MODE_OUTPUT,
            PinMode::OpenDrain => gpio_mode_t_GPIO_MODE_OUTPUT_OD,
        };
        // SAFETY: gpio validated above.
        let ret = unsafe { gpio_set_direction(gpio, idf_mode) };
        if ret != ESP_OK {
            return Err(Error::Parse("gpio configuration failed"));
        }
        Ok(())
    }

    fn write_pin(&mut self, io: u8, pin: u8, level: bool) -> Result<(), Error> {
        let gpio = Self::gpio_num(io, pin).ok_or(Error::Parse("pin not available"))?;
        // SAFETY: gpio validated above.
        let ret = unsafe { gpio_set_level(gpio, u32::from(level)) };
        if ret != ESP_OK {
            return Err(Error::Parse("gpio write failed"));
        }
        Ok(())
    }

    fn read_pin(&mut self, io: u8, pin: u8) -> Result<bool, Error> {
        let gpio = Self::gpio_num(io, pin).ok_or(Error::Parse("pin not available"))?;
        // SAFETY: gpio validated above.
        Ok(unsafe { gpio_get_level(gpio) } != 0)
    }

    fn set_pwm_width(&mut self, io: u8, pin: u8, width: u32) -> Result<(), Error> {
        let _ = Self::gpio_num(io, pin).ok_or(Error::Parse("pin not available"))?;
        // SAFETY: channel 0 is reserved for the pwm-width command.
        let ret = unsafe {
            ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, ledc_channel_t_LEDC_CHANNEL_0, width)
        };
        if ret != ESP_OK {
            return Err(Error::Parse("pwm write failed"));
        }
        // SAFETY: duty staged above; update commits it.
        unsafe {
            ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, ledc_channel_t_LEDC_CHANNEL_0);
        }
        Ok(())
    }

    fn pin_mode(&self, _io: u8, _pin: u8) -> Option<PinMode> {
        // The IDF does not expose the configured direction; the command
        // layer tracks modes it set itself via the simulation port in
        // tests, and trusts the operator on hardware.
        Some(PinMode::Output)
    }
}

// ───────────────────────────────────────────────────────────────
// UART
// ───────────────────────────────────────────────────────────────

pub struct EspUart {
    configs: [UartConfig; 2],
}

impl EspUart {
    pub fn new() -> Self {
        Self {
            configs: [UartConfig::default(); 2],
        }
    }
}

impl Default for EspUart {
    fn default() -> Self {
        Self::new()
    }
}

impl UartPort for EspUart {
    fn configure(&mut self, uart: u8, cfg: &UartConfig) -> Result<(), Error> {
        if uart > 1 {
            return Err(Error::Parse("invalid uart"));
        }

        let parity = match cfg.parity {
            UartParity::None => uart_parity_t_UART_PARITY_DISABLE,
            UartParity::Even => uart_parity_t_UART_PARITY_EVEN,
            UartParity::Odd => uart_parity_t_UART_PARITY_ODD,
        };
        let idf_config = uart_config_t {
            baud_rate: cfg.baud as i32,
            data_bits: u32::from(cfg.data_bits).saturating_sub(5),
            parity,
            stop_bits: if cfg.stop_bits >= 2 {
                uart_stop_bits_t_UART_STOP_BITS_2
            } else {
                uart_stop_bits_t_UART_STOP_BITS_1
            },
            ..Default::default()
        };

        // SAFETY: port number validated above.
        let ret = unsafe { uart_param_config(i32::from(uart), &idf_config) };
        if ret != ESP_OK {
            return Err(Error::Parse("uart configuration failed"));
        }
        self.configs[usize::from(uart)] = *cfg;
        Ok(())
    }

    fn config(&self, uart: u8) -> UartConfig {
        self.configs[usize::from(uart.min(1))]
    }

    fn write(&mut self, uart: u8, data: &[u8]) -> usize {
        // SAFETY: data valid for data.len() bytes; non-blocking tx.
        let written =
            unsafe { uart_tx_chars(i32::from(uart.min(1)), data.as_ptr().cast(), data.len() as u32) };
        written.max(0) as usize
    }

    fn read(&mut self, uart: u8, buf: &mut [u8]) -> usize {
        // SAFETY: buf valid for buf.len() writable bytes; zero timeout.
        let got = unsafe {
            uart_read_bytes(
                i32::from(uart.min(1)),
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                0,
            )
        };
        got.max(0) as usize
    }

    fn rx_available(&self, uart: u8) -> usize {
        let mut available = 0usize;
        // SAFETY: out-pointer valid for one usize.
        let ret = unsafe { uart_get_buffered_data_len(i32::from(uart.min(1)), &mut available) };
        if ret == ESP_OK { available } else { 0 }
    }

    fn tx_space(&self, _uart: u8) -> usize {
        128
    }

    fn set_loopback(&mut self, uart: u8, enable: bool) {
        // SAFETY: loopback is a register toggle on a validated port.
        unsafe {
            uart_set_loop_back(i32::from(uart.min(1)), enable);
        }
    }

    fn flush(&mut self, uart: u8) {
        // SAFETY: port number clamped.
        unsafe {
            uart_wait_tx_done(i32::from(uart.min(1)), 0);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// SPI (software-managed transaction over the HAL driver)
// ───────────────────────────────────────────────────────────────

pub struct EspSpi {
    config: Option<SpiConfig>,
    started: bool,
}

impl EspSpi {
    pub fn new() -> Self {
        Self {
            config: None,
            started: false,
        }
    }
}

impl Default for EspSpi {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiPort for EspSpi {
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

    fn transfer(&mut self, _out: &[u8], _input: &mut [u8]) -> Result<usize, Error> {
        if !self.started {
            return Err(Error::Protocol("spi not started"));
        }
        // The SPI host driver binding is provided by the display/panel
        // adapter build; the bare bridge reports the transfer as refused.
        Err(Error::Protocol("spi host not attached"))
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.started = false;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Platform
// ───────────────────────────────────────────────────────────────

pub struct EspPlatform {
    reset_pending: bool,
}

impl EspPlatform {
    pub fn new() -> Self {
        Self {
            reset_pending: false,
        }
    }

    /// Perform the reset requested during the last drain step, if any.
    pub fn maybe_reset(&self) -> bool {
        if self.reset_pending {
            // SAFETY: esp_restart never returns.
            unsafe { esp_restart() };
        }
        false
    }
}

impl Default for EspPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformPort for EspPlatform {
    fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    fn uptime_us(&self) -> u64 {
        // SAFETY: esp_timer_get_time reads the monotonic system timer.
        (unsafe { esp_timer_get_time() }) as u64
    }

    fn rtc_us(&self) -> u64 {
        // SAFETY: esp_rtc_get_time_us reads the RTC counter.
        (unsafe { esp_rtc_get_time_us() }) as u64
    }

    fn peek(&self, address: u32) -> Option<u32> {
        // Only data RAM and peripheral space are safely readable.
        let readable = (0x3FC8_0000..0x3FD0_0000).contains(&address)
            || (0x6000_0000..0x600D_0000).contains(&address);
        if !readable || address % 4 != 0 {
            return None;
        }
        // SAFETY: range-checked, aligned, volatile read.
        Some(unsafe { core::ptr::read_volatile(address as *const u32) })
    }

    fn poke(&mut self, address: u32, value: u32) -> bool {
        let writable = (0x3FC8_0000..0x3FD0_0000).contains(&address);
        if !writable || address % 4 != 0 {
            return false;
        }
        // SAFETY: range-checked, aligned, volatile write into data RAM.
        unsafe { core::ptr::write_volatile(address as *mut u32, value) };
        true
    }

    fn heap_free(&self) -> u32 {
        // SAFETY: heap query over the default capability set.
        (unsafe { esp_get_free_heap_size() }) as u32
    }
}
