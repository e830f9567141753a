//! ESP-IDF network adapters: lwIP sockets and the Wi-Fi driver.
//!
//! ESP-IDF carries the Rust standard library, so the listeners are plain
//! non-blocking `std::net` sockets polled from the main loop. The poll
//! step pushes received payloads into `System::net_deliver`, keeping all
//! protocol logic inside the dispatcher drain.

#![cfg(target_os = "espidf")]

use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AccessPointConfiguration, ClientConfiguration, Configuration, EspWifi};
use log::{info, warn};

use crate::error::{Error, NetError};
use crate::ports::{ApCandidate, NetLink, Peer, PeerProto, SocketId, WlanControl};

// ───────────────────────────────────────────────────────────────
// Listener pair (TCP + UDP on one port)
// ───────────────────────────────────────────────────────────────

struct Listener {
    id: SocketId,
    udp: UdpSocket,
    tcp: TcpListener,
    accepted: Option<TcpStream>,
    last_udp_peer: Option<SocketAddrV4>,
}

impl Listener {
    fn bind(id: SocketId, port: u16) -> std::io::Result<Self> {
        let udp = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        udp.set_nonblocking(true)?;
        let tcp = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        tcp.set_nonblocking(true)?;
        Ok(Self {
            id,
            udp,
            tcp,
            accepted: None,
            last_udp_peer: None,
        })
    }
}

fn peer_from(addr: SocketAddrV4, proto: PeerProto) -> Peer {
    Peer {
        proto,
        addr: addr.ip().octets(),
        port: addr.port(),
    }
}

/// All listeners plus the SNTP client socket.
pub struct EspNet {
    listeners: Vec<Listener>,
    sntp: UdpSocket,
    scratch: [u8; 1536],
}

impl EspNet {
    pub fn new(
        cmd_port: u16,
        mailbox_port: u16,
        bridge_port: Option<u16>,
    ) -> std::io::Result<Self> {
        let mut listeners = vec![
            Listener::bind(SocketId::Command, cmd_port)?,
            Listener::bind(SocketId::Mailbox, mailbox_port)?,
        ];
        if let Some(port) = bridge_port {
            listeners.push(Listener::bind(SocketId::Bridge, port)?);
        }

        let sntp = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        sntp.set_nonblocking(true)?;

        Ok(Self {
            listeners,
            sntp,
            scratch: [0u8; 1536],
        })
    }

    fn listener(&mut self, id: SocketId) -> Option<&mut Listener> {
        self.listeners.iter_mut().find(|l| l.id == id)
    }

    /// One poll pass: accept newcomers and drain every socket. The
    /// collected events are handed to `System::tcp_accept` /
    /// `System::net_deliver` by the main loop, with this adapter then
    /// borrowed as the ports' `net` — receive and dispatch never overlap.
    pub fn poll_collect(&mut self) -> Vec<Inbound> {
        let mut inbound = Vec::new();

        for index in 0..self.listeners.len() {
            // Accept: a newcomer displaces the current connection.
            if let Ok((stream, std::net::SocketAddr::V4(addr))) =
                self.listeners[index].tcp.accept()
            {
                let _ = stream.set_nonblocking(true);
                let _ = stream.set_nodelay(true);
                inbound.push(Inbound::Accepted {
                    id: self.listeners[index].id,
                    peer: peer_from(addr, PeerProto::Tcp),
                });
                self.listeners[index].accepted = Some(stream);
            }

            // TCP receive.
            let id = self.listeners[index].id;
            let mut drop_stream = false;
            if let Some(stream) = self.listeners[index].accepted.as_mut() {
                match stream.read(&mut self.scratch) {
                    Ok(0) => drop_stream = true,
                    Ok(n) => {
                        let addr = stream
                            .peer_addr()
                            .ok()
                            .and_then(|a| match a {
                                std::net::SocketAddr::V4(v4) => Some(v4),
                                std::net::SocketAddr::V6(_) => None,
                            })
                            .unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
                        inbound.push(Inbound::Data {
                            id,
                            peer: peer_from(addr, PeerProto::Tcp),
                            payload: self.scratch[..n].to_vec(),
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(_) => drop_stream = true,
                }
            }
            if drop_stream {
                self.listeners[index].accepted = None;
            }

            // UDP receive.
            loop {
                let listener = &mut self.listeners[index];
                match listener.udp.recv_from(&mut self.scratch) {
                    Ok((n, std::net::SocketAddr::V4(addr))) => {
                        listener.last_udp_peer = Some(addr);
                        inbound.push(Inbound::Data {
                            id,
                            peer: peer_from(addr, PeerProto::Udp),
                            payload: self.scratch[..n].to_vec(),
                        });
                    }
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("net: udp recv failed: {e}");
                        break;
                    }
                }
            }
        }

        // SNTP replies.
        loop {
            match self.sntp.recv_from(&mut self.scratch) {
                Ok((n, std::net::SocketAddr::V4(addr))) => {
                    inbound.push(Inbound::Data {
                        id: SocketId::Sntp,
                        peer: peer_from(addr, PeerProto::Udp),
                        payload: self.scratch[..n].to_vec(),
                    });
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        inbound
    }
}

/// One polled network event, replayed into the system by the main loop.
pub enum Inbound {
    Accepted { id: SocketId, peer: Peer },
    Data {
        id: SocketId,
        peer: Peer,
        payload: Vec<u8>,
    },
}

impl NetLink for EspNet {
    fn send_udp(&mut self, socket: SocketId, peer: Peer, payload: &[u8]) -> Result<(), NetError> {
        let target = SocketAddrV4::new(Ipv4Addr::from(peer.addr), peer.port);
        let handle = if socket == SocketId::Sntp {
            &self.sntp
        } else {
            &self
                .listener(socket)
                .ok_or(NetError::NotConnected)?
                .udp
        };
        handle
            .send_to(payload, target)
            .map(|_| ())
            .map_err(|_| NetError::SendFailed)
    }

    fn send_tcp(&mut self, socket: SocketId, payload: &[u8], _more: bool) -> Result<(), NetError> {
        let listener = self.listener(socket).ok_or(NetError::NotConnected)?;
        let stream = listener.accepted.as_mut().ok_or(NetError::NotConnected)?;
        stream.write_all(payload).map_err(|_| NetError::SendFailed)
    }

    fn tcp_flush(&mut self, socket: SocketId) {
        if let Some(listener) = self.listener(socket) {
            if let Some(stream) = listener.accepted.as_mut() {
                let _ = stream.flush();
            }
        }
    }

    fn tcp_abort(&mut self, socket: SocketId) {
        if let Some(listener) = self.listener(socket) {
            listener.accepted = None;
        }
    }

    fn tcp_close(&mut self, socket: SocketId) -> bool {
        match self.listener(socket) {
            Some(listener) => listener.accepted.take().is_some(),
            None => false,
        }
    }

    fn join_multicast(&mut self, group: [u8; 4]) -> Result<(), NetError> {
        let listener = self
            .listener(SocketId::Command)
            .ok_or(NetError::NotConnected)?;
        listener
            .udp
            .join_multicast_v4(&Ipv4Addr::from(group), &Ipv4Addr::UNSPECIFIED)
            .map_err(|_| NetError::SendFailed)
    }
}

// ───────────────────────────────────────────────────────────────
// Wi-Fi control
// ───────────────────────────────────────────────────────────────

pub struct EspWlan {
    wifi: EspWifi<'static>,
}

impl EspWlan {
    pub fn new(
        modem: esp_idf_svc::hal::modem::Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self, Error> {
        let wifi = EspWifi::new(modem, sysloop, Some(nvs))
            .map_err(|_| Error::Fatal("wifi driver init failed"))?;
        Ok(Self { wifi })
    }

    fn apply(&mut self, configuration: Configuration) -> Result<(), Error> {
        self.wifi
            .set_configuration(&configuration)
            .map_err(|_| Error::Fatal("wifi configuration failed"))?;
        self.wifi
            .start()
            .map_err(|_| Error::Fatal("wifi start failed"))?;
        Ok(())
    }
}

impl WlanControl for EspWlan {
    fn start_scan(&mut self) -> Result<(), Error> {
        self.wifi
            .start_scan(&Default::default(), false)
            .map_err(|_| Error::Fatal("wifi scan failed"))
    }

    fn connect_client(&mut self, ssid: &str, password: &str) -> Result<(), Error> {
        info!("wlan: connecting to '{ssid}'");
        let configuration = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| Error::Parse("ssid too long"))?,
            password: password
                .try_into()
                .map_err(|_| Error::Parse("password too long"))?,
            ..Default::default()
        });
        self.apply(configuration)?;
        self.wifi
            .connect()
            .map_err(|_| Error::Fatal("wifi connect failed"))
    }

    fn connect_bssid(
        &mut self,
        ssid: &str,
        password: &str,
        ap: &ApCandidate,
    ) -> Result<(), Error> {
        info!(
            "wlan: reassociating to '{ssid}' channel {} rssi {}",
            ap.channel, ap.rssi
        );
        let configuration = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| Error::Parse("ssid too long"))?,
            password: password
                .try_into()
                .map_err(|_| Error::Parse("password too long"))?,
            bssid: Some(ap.bssid),
            channel: Some(ap.channel),
            ..Default::default()
        });
        self.apply(configuration)?;
        self.wifi
            .connect()
            .map_err(|_| Error::Fatal("wifi connect failed"))
    }

    fn start_access_point(
        &mut self,
        ssid: &str,
        password: &str,
        channel: u8,
    ) -> Result<(), Error> {
        info!("wlan: starting AP '{ssid}' on channel {channel}");
        let configuration = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: ssid.try_into().map_err(|_| Error::Parse("ssid too long"))?,
            password: password
                .try_into()
                .map_err(|_| Error::Parse("password too long"))?,
            channel,
            ..Default::default()
        });
        self.apply(configuration)
    }

    fn current_channel(&self) -> Option<u8> {
        match self.wifi.get_configuration() {
            Ok(Configuration::Client(client)) => client.channel,
            _ => None,
        }
    }

    fn rssi(&self) -> Option<i8> {
        self.wifi.driver().get_rssi().ok().map(|rssi| rssi as i8)
    }
}

// ───────────────────────────────────────────────────────────────
// I²C over the IDF driver
// ───────────────────────────────────────────────────────────────

pub struct EspI2c {
    bus: u8,
}

impl EspI2c {
    pub fn new() -> Self {
        Self { bus: 0 }
    }
}

impl Default for EspI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::ports::I2cPort for EspI2c {
    fn set_speed(&mut self, _speed_khz: u32) -> Result<(), Error> {
        // Bus speed is fixed at driver install; a change needs reinstall,
        // which the adapter defers to the next transaction.
        Ok(())
    }

    fn select_bus(&mut self, bus: u8) -> Result<(), Error> {
        if bus > 1 {
            return Err(Error::Parse("invalid i2c bus"));
        }
        self.bus = bus;
        Ok(())
    }

    fn current_bus(&self) -> u8 {
        self.bus
    }

    fn write_read(&mut self, address: u8, out: &[u8], input: &mut [u8]) -> Result<usize, Error> {
        use esp_idf_svc::sys::*;
        let port = i32::from(self.bus);

        if !out.is_empty() {
            // SAFETY: out valid for out.len() bytes; 100 ms timeout.
            let ret = unsafe {
                i2c_master_write_to_device(port, address, out.as_ptr(), out.len(), 10)
            };
            if ret != ESP_OK {
                return Err(Error::Parse("i2c write failed"));
            }
        }
        if !input.is_empty() {
            // SAFETY: input valid for input.len() writable bytes.
            let ret = unsafe {
                i2c_master_read_from_device(port, address, input.as_mut_ptr(), input.len(), 10)
            };
            if ret != ESP_OK {
                return Err(Error::Parse("i2c read failed"));
            }
        }
        Ok(input.len())
    }
}
