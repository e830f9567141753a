//! Shared test rig: a full `System` wired to the simulation adapters.
//!
//! Tests drive the firmware exactly the way the platform does — deliver
//! bytes, run the drain loop, read what went out on the recorded link.

#![allow(dead_code)] // each test binary uses a different slice of the rig

use iobridge::adapters::sim::{
    RecordingNet, SimFlash, SimI2c, SimPins, SimPlatform, SimRtcMem, SimSpi, SimUart, SimWlan,
};
use iobridge::ports::{Peer, PeerProto, Ports, SocketId};
use iobridge::system::System;

pub struct Rig {
    pub flash: SimFlash,
    pub rtc: SimRtcMem,
    pub pins: SimPins,
    pub uart: SimUart,
    pub i2c: SimI2c,
    pub spi: SimSpi,
    pub net: RecordingNet,
    pub wlan: SimWlan,
    pub platform: SimPlatform,
    pub sys: System,
}

impl Rig {
    pub fn new() -> Self {
        let mut rig = Self {
            flash: SimFlash::new(),
            rtc: SimRtcMem::new(),
            pins: SimPins::new(),
            uart: SimUart::new(),
            i2c: SimI2c::new(),
            spi: SimSpi::new(),
            net: RecordingNet::new(),
            wlan: SimWlan::new(),
            platform: SimPlatform::new(),
            sys: System::new(),
        };
        rig.with_ports(|sys, ports| sys.init(ports));
        rig
    }

    pub fn with_ports<R>(&mut self, f: impl FnOnce(&mut System, &mut Ports<'_>) -> R) -> R {
        let mut ports = Ports {
            flash: &mut self.flash,
            rtc: &mut self.rtc,
            pins: &mut self.pins,
            uart: &mut self.uart,
            i2c: &mut self.i2c,
            spi: &mut self.spi,
            net: &mut self.net,
            wlan: &mut self.wlan,
            platform: &mut self.platform,
        };
        f(&mut self.sys, &mut ports)
    }

    pub fn host_peer() -> Peer {
        Peer {
            proto: PeerProto::Udp,
            addr: [192, 168, 4, 20],
            port: 40000,
        }
    }

    /// Deliver one command line over UDP, drain, and reassemble the reply
    /// (a long reply leaves the socket as several MTU-sized datagrams).
    pub fn command(&mut self, line: &str) -> String {
        let before = self.net.udp_payloads(SocketId::Command).len();
        let peer = Self::host_peer();
        self.with_ports(|sys, ports| {
            let mut framed = line.to_string();
            if !framed.ends_with('\n') {
                framed.push('\n');
            }
            sys.net_deliver(ports, SocketId::Command, peer, framed.as_bytes());
            sys.run_pending(ports);
        });

        let payloads = self.net.udp_payloads(SocketId::Command);
        payloads[before..]
            .iter()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// Push one payload at the mailbox port (as the host's UDP stack
    /// would, possibly IP-fragmented into several deliveries).
    pub fn mailbox_deliver(&mut self, data: &[u8]) {
        let peer = Peer {
            proto: PeerProto::Udp,
            addr: [192, 168, 4, 20],
            port: 41000,
        };
        self.with_ports(|sys, ports| {
            sys.net_deliver(ports, SocketId::Mailbox, peer, data);
            sys.run_pending(ports);
        });
    }

    /// Send a full sector to the mailbox in MTU-sized fragments.
    pub fn mailbox_send_sector(&mut self, sector_data: &[u8; 4096]) {
        for chunk in sector_data.chunks(1472) {
            self.mailbox_deliver(chunk);
        }
    }

    /// Everything sent on the mailbox port since startup.
    pub fn mailbox_out(&self) -> Vec<Vec<u8>> {
        self.net.udp_payloads(SocketId::Mailbox)
    }
}
