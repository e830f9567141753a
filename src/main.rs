//! IoBridge firmware — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  EspFlash   EspRtcMem   EspPins   EspUart   EspI2c   EspSpi  │
//! │  EspNet (lwIP sockets)  EspWlan (WiFi driver)  EspPlatform   │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ─────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │            System (dispatcher · command engine ·       │  │
//! │  │            config store · OTA mailbox · wlan · time)   │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The main loop is the cooperative scheduler: it advances the two
//! periodic tick sources, replays polled network events into the system
//! and drains the dispatcher. Wi-Fi driver callbacks only set bits in an
//! atomic mask; they never run firmware logic.

#![deny(unused_must_use)]

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::run()
}

/// The binary carries `required-features = ["espidf"]`; a host build of
/// it can only happen by forcing the feature on the wrong target.
#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("iobridge: device binary — build for the espidf target");
}

#[cfg(target_os = "espidf")]
mod firmware {

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result};
use log::{info, warn};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::WifiEvent;

use iobridge::adapters::esp::{EspFlash, EspPins, EspPlatform, EspRtcMem, EspSpi, EspUart};
use iobridge::adapters::espnet::{EspI2c, EspNet, EspWlan, Inbound};
use iobridge::buffer::ByteBuf;
use iobridge::ports::{NetLink, Peer, Ports, SocketId};
use iobridge::system::System;
use iobridge::{Error, NetError};

// ── Wi-Fi events, ISR side ────────────────────────────────────
//
// The driver callback context must not touch the system; it sets bits
// that the main loop converts into dispatcher tasks.

const EV_STA_CONNECTED: u32 = 1 << 0;
const EV_STA_GOT_IP: u32 = 1 << 1;
const EV_STA_DISCONNECTED: u32 = 1 << 2;
const EV_SCAN_DONE: u32 = 1 << 3;

static WIFI_EVENTS: AtomicU32 = AtomicU32::new(0);

/// Placeholder link used only while loading config, before the real
/// listeners exist; the init path never sends.
struct NullLink;

impl NetLink for NullLink {
    fn send_udp(&mut self, _: SocketId, _: Peer, _: &[u8]) -> Result<(), NetError> {
        Err(NetError::NotConnected)
    }
    fn send_tcp(&mut self, _: SocketId, _: &[u8], _: bool) -> Result<(), NetError> {
        Err(NetError::NotConnected)
    }
    fn tcp_flush(&mut self, _: SocketId) {}
    fn tcp_abort(&mut self, _: SocketId) {}
    fn tcp_close(&mut self, _: SocketId) -> bool {
        false
    }
    fn join_multicast(&mut self, _: [u8; 4]) -> Result<(), NetError> {
        Err(NetError::NotConnected)
    }
}

pub fn run() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init().context("logger init")?;

    info!(
        "iobridge {} (built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown")
    );

    let peripherals = Peripherals::take().context("peripherals")?;
    let sysloop = EspSystemEventLoop::take().context("event loop")?;
    let nvs = EspDefaultNvsPartition::take().context("nvs partition")?;

    // ── adapters ──────────────────────────────────────────────
    let mut flash = EspFlash::new();
    let mut rtc = EspRtcMem::new();
    let mut pins = EspPins::new();
    let mut uart = EspUart::new();
    let mut i2c = EspI2c::new();
    let mut spi = EspSpi::new();
    let mut platform = EspPlatform::new();
    let mut wlan = EspWlan::new(peripherals.modem, sysloop.clone(), nvs)
        .map_err(|e| anyhow::anyhow!("wifi: {e}"))?;

    let _wifi_subscription = sysloop
        .subscribe::<WifiEvent, _>(|event| {
            let bit = match event {
                WifiEvent::StaConnected(_) => EV_STA_CONNECTED,
                WifiEvent::StaDisconnected(_) => EV_STA_DISCONNECTED,
                WifiEvent::ScanDone(_) => EV_SCAN_DONE,
                WifiEvent::ApStaConnected(_) => EV_STA_CONNECTED,
                WifiEvent::ApStaDisconnected(_) => EV_STA_DISCONNECTED,
                _ => return,
            };
            WIFI_EVENTS.fetch_or(bit, Ordering::Relaxed);
        })
        .context("wifi event subscription")?;

    let _ip_subscription = sysloop
        .subscribe::<esp_idf_svc::netif::IpEvent, _>(|_| {
            WIFI_EVENTS.fetch_or(EV_STA_GOT_IP, Ordering::Relaxed);
        })
        .context("ip event subscription")?;

    // ── system init (config load, before the listeners exist) ─
    let mut sys = System::new();
    {
        let mut null_link = NullLink;
        let mut ports = Ports {
            flash: &mut flash,
            rtc: &mut rtc,
            pins: &mut pins,
            uart: &mut uart,
            i2c: &mut i2c,
            spi: &mut spi,
            net: &mut null_link,
            wlan: &mut wlan,
            platform: &mut platform,
        };
        sys.init(&mut ports);
    }

    // ── wlan bring-up from persisted config ───────────────────
    {
        let mut null_link = NullLink;
        let mut ports = Ports {
            flash: &mut flash,
            rtc: &mut rtc,
            pins: &mut pins,
            uart: &mut uart,
            i2c: &mut i2c,
            spi: &mut spi,
            net: &mut null_link,
            wlan: &mut wlan,
            platform: &mut platform,
        };
        start_wlan(&mut sys, &mut ports);
    }

    // ── listeners ─────────────────────────────────────────────
    let bridge_port = sys.bridge.active().then(|| sys.bridge.port());
    let mut net = EspNet::new(sys.cmd_port, sys.mailbox_port, bridge_port)
        .context("socket creation")?;

    info!(
        "listening: command {}, mailbox {}, bridge {:?}",
        sys.cmd_port, sys.mailbox_port, bridge_port
    );

    // ── main loop: cooperative scheduler ──────────────────────
    let mut last_fast_us = platform_uptime(&platform);
    let mut last_slow_us = last_fast_us;

    loop {
        let inbound = net.poll_collect();

        {
            let mut ports = Ports {
                flash: &mut flash,
                rtc: &mut rtc,
                pins: &mut pins,
                uart: &mut uart,
                i2c: &mut i2c,
                spi: &mut spi,
                net: &mut net,
                wlan: &mut wlan,
                platform: &mut platform,
            };

            for event in inbound {
                match event {
                    Inbound::Accepted { id, peer } => sys.tcp_accept(&mut ports, id, peer),
                    Inbound::Data { id, peer, payload } => {
                        sys.net_deliver(&mut ports, id, peer, &payload);
                        // std::net writes complete synchronously; confirm
                        // whatever the delivery's reply queued.
                        sys.net_sent(&mut ports, id, usize::MAX);
                    }
                }
            }

            drain_wifi_events(&mut sys, &mut ports);

            let now = ports.platform.uptime_us();
            while now - last_fast_us >= 10_000 {
                last_fast_us += 10_000;
                sys.on_fast_timer();
            }
            while now - last_slow_us >= 100_000 {
                last_slow_us += 100_000;
                sys.on_slow_timer();
            }

            sys.run_pending(&mut ports);
        }

        platform.maybe_reset();
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn platform_uptime(platform: &EspPlatform) -> u64 {
    use iobridge::ports::PlatformPort;
    platform.uptime_us()
}

fn drain_wifi_events(sys: &mut System, ports: &mut Ports<'_>) {
    let events = WIFI_EVENTS.swap(0, Ordering::Relaxed);
    if events == 0 {
        return;
    }
    if events & EV_STA_CONNECTED != 0 {
        sys.wlan_event_associated(ports);
    }
    if events & EV_STA_GOT_IP != 0 {
        sys.wlan_event_got_ip(ports);
    }
    if events & EV_STA_DISCONNECTED != 0 {
        sys.wlan_event_disassociated();
    }
    if events & EV_SCAN_DONE != 0 {
        // Scan result extraction needs the driver; candidates are
        // published through the scan-done hook.
        sys.wlan_scan_done(&[], ports.uart);
    }
}

/// Connect as a client or start the configured AP, from persisted config.
fn start_wlan(sys: &mut System, ports: &mut Ports<'_>) {
    let mut ssid: ByteBuf<64> = ByteBuf::new();
    let mut password: ByteBuf<64> = ByteBuf::new();

    if sys.wlan.mode_is_ap {
        let have_ssid = sys.config.get_string(
            &mut sys.sector,
            ports.flash,
            "wlan.ap.ssid",
            -1,
            -1,
            &mut ssid,
        );
        let _ = sys.config.get_string(
            &mut sys.sector,
            ports.flash,
            "wlan.ap.passwd",
            -1,
            -1,
            &mut password,
        );
        let channel = sys
            .config
            .get_uint(&mut sys.sector, ports.flash, "wlan.ap.channel", -1, -1)
            .unwrap_or(u32::from(iobridge::wlan::RECOVERY_CHANNEL)) as u8;

        let result: Result<(), Error> = if have_ssid {
            ports
                .wlan
                .start_access_point(ssid.as_str(), password.as_str(), channel)
        } else {
            ports.wlan.start_access_point(
                iobridge::wlan::RECOVERY_SSID,
                iobridge::wlan::RECOVERY_PASSWORD,
                iobridge::wlan::RECOVERY_CHANNEL,
            )
        };
        if let Err(e) = result {
            warn!("wlan: AP start failed: {e}");
        }
        return;
    }

    let have_credentials = sys.config.get_string(
        &mut sys.sector,
        ports.flash,
        "wlan.client.ssid",
        -1,
        -1,
        &mut ssid,
    ) && sys.config.get_string(
        &mut sys.sector,
        ports.flash,
        "wlan.client.passwd",
        -1,
        -1,
        &mut password,
    );

    if !have_credentials {
        warn!("wlan: no client credentials; the 30 s watchdog will open the recovery AP");
        return;
    }

    if let Err(e) = ports.wlan.connect_client(ssid.as_str(), password.as_str()) {
        warn!("wlan: client connect failed: {e}");
    }
}

} // mod firmware
