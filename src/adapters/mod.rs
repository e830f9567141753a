//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter    | Implements                     | Connects to               |
//! |------------|--------------------------------|---------------------------|
//! | `esp`      | FlashPort, RtcMemPort, PinPort | ESP-IDF SPI flash, RTC    |
//! |            | UartPort, PlatformPort         | RAM, GPIO/LEDC, UART      |
//! | `espnet`   | NetLink, WlanControl           | lwIP sockets, WiFi driver |
//! | `sim`      | every port                     | in-memory simulation      |
//!
//! The simulation backends model NOR-flash semantics (erase to 0xFF,
//! programming only clears bits) and record outbound network traffic so the
//! host-side tests can assert on full wire exchanges.

#[cfg(target_os = "espidf")]
pub mod esp;

#[cfg(target_os = "espidf")]
pub mod espnet;

#[cfg(not(target_os = "espidf"))]
pub mod sim;
