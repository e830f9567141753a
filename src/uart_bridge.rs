//! Transparent UART ↔ network bridge.
//!
//! When a bridge port is configured, a second line socket forwards raw
//! bytes between the network and UART 0. Inbound network bytes are
//! telnet-stripped (when the flag is set) and pushed into the TX FIFO;
//! the RX FIFO is drained into the socket's send buffer from the 100 ms
//! housekeeping tick — but only while the socket is not mid-send, which
//! is the backpressure rule: a stalled tick just bumps the overflow
//! counter and retries next tick.

use crate::buffer::ByteBuf;
use crate::ports::{NetLink, UartPort};
use crate::socket::Socket;
use crate::stats::Stats;
use crate::telnet::TelnetStrip;

/// Bridge socket buffer size, matching the UART FIFO scale.
pub const BRIDGE_BUF_SIZE: usize = 128;

pub struct UartBridge {
    active: bool,
    port: u16,
    strip: TelnetStrip,
}

impl UartBridge {
    pub const fn new() -> Self {
        Self {
            active: false,
            port: 0,
            strip: TelnetStrip::new(),
        }
    }

    pub fn activate(&mut self, port: u16) {
        self.active = port != 0;
        self.port = port;
    }

    pub const fn active(&self) -> bool {
        self.active
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Network → UART: push received bytes into the TX FIFO, stripping
    /// telnet negotiation when requested. FIFO overflow drops bytes and
    /// counts them.
    pub fn deliver_to_uart(
        &mut self,
        data: &[u8],
        strip_telnet: bool,
        uart: &mut dyn UartPort,
        stats: &mut Stats,
    ) {
        let mut staged: ByteBuf<BRIDGE_BUF_SIZE> = ByteBuf::new();

        for &byte in data {
            let survived = if strip_telnet {
                self.strip.feed(byte)
            } else {
                Some(byte)
            };
            if let Some(byte) = survived {
                staged.push(byte);
            }
        }

        let accepted = uart.write(0, staged.as_slice());
        if accepted < staged.len() {
            stats.uart_receive_buffer_overflow = stats
                .uart_receive_buffer_overflow
                .saturating_add((staged.len() - accepted) as u32);
        }
        uart.flush(0);
    }

    /// UART → network: drain the RX FIFO into the bridge socket and send.
    /// Stalls (without consuming) while a send is still in flight.
    pub fn service(
        &mut self,
        socket: &mut Socket<BRIDGE_BUF_SIZE>,
        uart: &mut dyn UartPort,
        net: &mut dyn NetLink,
        stats: &mut Stats,
    ) {
        if !self.active || uart.rx_available(0) == 0 {
            return;
        }

        if socket.send_busy() {
            stats.uart_send_buffer_overflow = stats.uart_send_buffer_overflow.saturating_add(1);
            return;
        }

        socket.tx.clear();
        let mut chunk = [0u8; BRIDGE_BUF_SIZE];
        let got = uart.read(0, &mut chunk[..socket.tx.space()]);
        if got == 0 {
            return;
        }
        socket.tx.append(&chunk[..got]);
        stats.uart_bridged_bytes = stats.uart_bridged_bytes.saturating_add(got as u32);

        if socket.send(net).is_err() {
            stats.uart_send_buffer_overflow = stats.uart_send_buffer_overflow.saturating_add(1);
        }
    }
}

impl Default for UartBridge {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::{RecordingNet, SimUart};
    use crate::ports::{Peer, PeerProto, SocketId};

    fn udp_peer() -> Peer {
        Peer {
            proto: PeerProto::Udp,
            addr: [10, 0, 0, 2],
            port: 25,
        }
    }

    #[test]
    fn network_bytes_reach_uart() {
        let mut bridge = UartBridge::new();
        let mut uart = SimUart::new();
        let mut stats = Stats::new();
        bridge.activate(25);

        bridge.deliver_to_uart(b"hello", false, &mut uart, &mut stats);
        assert_eq!(uart.tx_log[0], b"hello");
    }

    #[test]
    fn telnet_stripped_on_the_way_to_uart() {
        let mut bridge = UartBridge::new();
        let mut uart = SimUart::new();
        let mut stats = Stats::new();
        bridge.activate(25);

        bridge.deliver_to_uart(&[0xff, 0xfb, 0x01, b'o', b'k'], true, &mut uart, &mut stats);
        assert_eq!(uart.tx_log[0], b"ok");
    }

    #[test]
    fn uart_bytes_drain_to_network() {
        let mut bridge = UartBridge::new();
        let mut uart = SimUart::new();
        let mut net = RecordingNet::new();
        let mut stats = Stats::new();
        let mut socket: Socket<BRIDGE_BUF_SIZE> = Socket::new(SocketId::Bridge, false);

        bridge.activate(25);
        socket.deliver(udp_peer(), b"");
        socket.unlock();
        uart.inject_rx(0, b"sensor output");

        bridge.service(&mut socket, &mut uart, &mut net, &mut stats);
        let payloads = net.udp_payloads(SocketId::Bridge);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0], b"sensor output");
        assert_eq!(stats.uart_bridged_bytes, 13);
    }

    #[test]
    fn busy_socket_stalls_and_counts() {
        let mut bridge = UartBridge::new();
        let mut uart = SimUart::new();
        let mut net = RecordingNet::new();
        let mut stats = Stats::new();
        let mut socket: Socket<BRIDGE_BUF_SIZE> = Socket::new(SocketId::Bridge, false);

        bridge.activate(25);
        // A TCP send that has not been confirmed keeps the socket busy.
        socket.tcp_accepted(Peer {
            proto: PeerProto::Tcp,
            addr: [10, 0, 0, 2],
            port: 25,
        });
        socket.tx.set(b"pending");
        socket.send(&mut net).unwrap();

        uart.inject_rx(0, b"stalled");
        bridge.service(&mut socket, &mut uart, &mut net, &mut stats);

        assert_eq!(stats.uart_send_buffer_overflow, 1);
        assert_eq!(uart.rx_available(0), 7);
    }

    #[test]
    fn inactive_bridge_does_nothing() {
        let mut bridge = UartBridge::new();
        let mut uart = SimUart::new();
        let mut net = RecordingNet::new();
        let mut stats = Stats::new();
        let mut socket: Socket<BRIDGE_BUF_SIZE> = Socket::new(SocketId::Bridge, false);

        uart.inject_rx(0, b"data");
        bridge.service(&mut socket, &mut uart, &mut net, &mut stats);
        assert!(net.events.is_empty());
    }
}
