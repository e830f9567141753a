//! Socket abstraction over the platform network stack.
//!
//! Each listener owns a TCP listen endpoint and a UDP endpoint on the same
//! port; whichever peer spoke last receives the reply. The receive side is
//! push-based with explicit backpressure: delivered bytes lock the receive
//! buffer and nothing more is appended until the application calls
//! `unlock`. The send side fragments the send buffer into MTU-sized UDP
//! datagrams or TCP segments and rejects overlapping sends.

use log::{debug, warn};

use crate::buffer::ByteBuf;
use crate::error::NetError;
use crate::ports::{NetLink, Peer, PeerProto, SocketId};

/// Largest UDP payload that fits an Ethernet frame without IP fragmentation.
pub const UDP_MAX_PAYLOAD: usize = 1472;

/// TCP maximum segment payload.
pub const TCP_MAX_SEGMENT: usize = 1460;

/// Outcome of a delivery attempt from the network stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Bytes appended; the receive buffer is now locked.
    Appended(usize),
    /// Receive buffer still locked; the payload was dropped.
    DroppedLocked,
}

pub struct Socket<const CAP: usize> {
    id: SocketId,
    pub rx: ByteBuf<CAP>,
    pub tx: ByteBuf<CAP>,
    peer: Option<Peer>,
    tcp_connected: bool,
    sending_remaining: usize,
    sent_remaining: usize,
    receive_locked: bool,
    reboot_pending: bool,
    udp_term_empty: bool,
}

impl<const CAP: usize> Socket<CAP> {
    pub fn new(id: SocketId, udp_term_empty: bool) -> Self {
        Self {
            id,
            rx: ByteBuf::new(),
            tx: ByteBuf::new(),
            peer: None,
            tcp_connected: false,
            sending_remaining: 0,
            sent_remaining: 0,
            receive_locked: false,
            reboot_pending: false,
            udp_term_empty,
        }
    }

    pub const fn id(&self) -> SocketId {
        self.id
    }

    pub const fn peer(&self) -> Option<Peer> {
        self.peer
    }

    pub const fn receive_locked(&self) -> bool {
        self.receive_locked
    }

    pub const fn reboot_pending(&self) -> bool {
        self.reboot_pending
    }

    pub fn set_udp_term_empty(&mut self, enable: bool) {
        self.udp_term_empty = enable;
    }

    /// Whether the last delivery came in over TCP.
    pub fn received_tcp(&self) -> bool {
        matches!(
            self.peer,
            Some(Peer {
                proto: PeerProto::Tcp,
                ..
            })
        )
    }

    pub fn received_udp(&self) -> bool {
        matches!(
            self.peer,
            Some(Peer {
                proto: PeerProto::Udp,
                ..
            })
        )
    }

    /// A new TCP connection was accepted. At most one lives at a time; the
    /// link layer abort-closes the previous one, so any in-flight send
    /// state belongs to a dead connection and is discarded.
    pub fn tcp_accepted(&mut self, peer: Peer) {
        self.tcp_connected = true;
        self.peer = Some(peer);
        self.sending_remaining = 0;
        self.sent_remaining = 0;
    }

    pub const fn tcp_connected(&self) -> bool {
        self.tcp_connected
    }

    /// Append received bytes. Locks the receive buffer and records the
    /// peer; a locked buffer drops the payload (the peer retries).
    pub fn deliver(&mut self, peer: Peer, data: &[u8]) -> Delivery {
        if self.receive_locked {
            debug!("socket {:?}: receive buffer locked, dropping", self.id);
            return Delivery::DroppedLocked;
        }
        self.rx.append(data);
        self.receive_locked = true;
        self.peer = Some(peer);
        Delivery::Appended(data.len())
    }

    /// Release the receive buffer for further deliveries.
    pub fn unlock(&mut self) {
        self.receive_locked = false;
    }

    /// A send is still in flight.
    pub const fn send_busy(&self) -> bool {
        self.sending_remaining + self.sent_remaining > 0
    }

    /// Transmit the send buffer to the last peer. Fragments per transport;
    /// fails without touching anything while a prior send is in flight.
    pub fn send(&mut self, net: &mut dyn NetLink) -> Result<(), NetError> {
        if self.send_busy() {
            warn!("socket {:?}: send while busy", self.id);
            return Err(NetError::SendInProgress);
        }

        let peer = self.peer.ok_or(NetError::NotConnected)?;

        match peer.proto {
            PeerProto::Udp => self.send_udp(net, peer),
            PeerProto::Tcp => self.send_tcp(net),
        }
    }

    fn send_udp(&mut self, net: &mut dyn NetLink, peer: Peer) -> Result<(), NetError> {
        let total = self.tx.len();
        self.sending_remaining = total;

        let mut offset = 0usize;
        while offset < total {
            let chunk = (total - offset).min(UDP_MAX_PAYLOAD);
            if let Err(e) = net.send_udp(self.id, peer, &self.tx.as_slice()[offset..offset + chunk])
            {
                warn!("socket {:?}: udp send failed at {offset}: {e}", self.id);
                self.sending_remaining = 0;
                return Err(e);
            }
            offset += chunk;
            self.sending_remaining = total - offset;
        }

        if self.udp_term_empty {
            if let Err(e) = net.send_udp(self.id, peer, &[]) {
                warn!("socket {:?}: udp terminator failed: {e}", self.id);
                self.sending_remaining = 0;
                return Err(e);
            }
        }

        // Datagrams have no sent confirmation; the send completes here.
        self.sending_remaining = 0;
        Ok(())
    }

    fn send_tcp(&mut self, net: &mut dyn NetLink) -> Result<(), NetError> {
        if !self.tcp_connected {
            return Err(NetError::NotConnected);
        }

        let total = self.tx.len();
        self.sending_remaining = total;

        let mut offset = 0usize;
        while offset < total {
            let chunk = (total - offset).min(TCP_MAX_SEGMENT);
            let more = offset + chunk < total;
            if let Err(e) = net.send_tcp(self.id, &self.tx.as_slice()[offset..offset + chunk], more)
            {
                warn!("socket {:?}: tcp send failed at {offset}: {e}", self.id);
                self.sending_remaining = 0;
                self.sent_remaining = 0;
                return Err(e);
            }
            offset += chunk;
            self.sending_remaining = total - offset;
        }

        net.tcp_flush(self.id);
        self.sent_remaining = total;
        Ok(())
    }

    /// The stack confirmed `len` bytes on the wire. Returns true when the
    /// send has fully completed.
    pub fn sent_confirm(&mut self, len: usize) -> bool {
        self.sent_remaining = self.sent_remaining.saturating_sub(len);
        self.sent_remaining == 0 && self.sending_remaining == 0
    }

    /// Abort-close the accepted TCP endpoint and reset send state.
    pub fn close(&mut self, net: &mut dyn NetLink) {
        if self.tcp_connected {
            net.tcp_abort(self.id);
            self.tcp_connected = false;
        }
        self.sending_remaining = 0;
        self.sent_remaining = 0;
    }

    /// Initiate a reset through this socket. For TCP the close completion
    /// callback performs the reset and this returns true; for UDP there is
    /// no sent confirmation, so this returns false and the caller posts an
    /// explicit reset task.
    pub fn reboot(&mut self, net: &mut dyn NetLink) -> bool {
        self.reboot_pending = true;
        if self.tcp_connected && net.tcp_close(self.id) {
            self.tcp_connected = false;
            true
        } else {
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim::RecordingNet;

    fn udp_peer() -> Peer {
        Peer {
            proto: PeerProto::Udp,
            addr: [192, 168, 1, 10],
            port: 4000,
        }
    }

    fn tcp_peer() -> Peer {
        Peer {
            proto: PeerProto::Tcp,
            addr: [192, 168, 1, 10],
            port: 4000,
        }
    }

    #[test]
    fn deliver_locks_until_unlock() {
        let mut socket: Socket<256> = Socket::new(SocketId::Command, false);

        assert_eq!(socket.deliver(udp_peer(), b"hello"), Delivery::Appended(5));
        assert!(socket.receive_locked());
        assert_eq!(socket.deliver(udp_peer(), b"more"), Delivery::DroppedLocked);

        socket.unlock();
        assert_eq!(socket.deliver(udp_peer(), b" more"), Delivery::Appended(5));
        assert_eq!(socket.rx.as_slice(), b"hello more");
    }

    #[test]
    fn udp_fragments_at_1472() {
        let mut socket: Socket<4096> = Socket::new(SocketId::Mailbox, false);
        let mut net = RecordingNet::new();

        socket.deliver(udp_peer(), b"x");
        socket.tx.clear();
        for _ in 0..2000 {
            socket.tx.push(0xab);
        }

        socket.send(&mut net).unwrap();
        let payloads = net.udp_payloads(SocketId::Mailbox);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].len(), UDP_MAX_PAYLOAD);
        assert_eq!(payloads[1].len(), 2000 - UDP_MAX_PAYLOAD);
        assert!(!socket.send_busy());
    }

    #[test]
    fn udp_exact_boundary_no_empty_fragment() {
        let mut socket: Socket<2048> = Socket::new(SocketId::Command, false);
        let mut net = RecordingNet::new();

        socket.deliver(udp_peer(), b"x");
        socket.tx.clear();
        for _ in 0..UDP_MAX_PAYLOAD {
            socket.tx.push(1);
        }

        socket.send(&mut net).unwrap();
        assert_eq!(net.udp_payloads(SocketId::Command).len(), 1);
    }

    #[test]
    fn udp_term_empty_appends_trailer() {
        let mut socket: Socket<2048> = Socket::new(SocketId::Command, true);
        let mut net = RecordingNet::new();

        socket.deliver(udp_peer(), b"x");
        socket.tx.set(b"reply");

        socket.send(&mut net).unwrap();
        let payloads = net.udp_payloads(SocketId::Command);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0], b"reply");
        assert!(payloads[1].is_empty());
    }

    #[test]
    fn tcp_segments_with_more_flags() {
        let mut socket: Socket<4096> = Socket::new(SocketId::Command, false);
        let mut net = RecordingNet::new();

        socket.tcp_accepted(tcp_peer());
        socket.tx.clear();
        for _ in 0..3000 {
            socket.tx.push(7);
        }

        socket.send(&mut net).unwrap();

        use crate::adapters::sim::NetEvent;
        let segments: Vec<_> = net
            .events
            .iter()
            .filter_map(|e| match e {
                NetEvent::TcpSegment { payload, more, .. } => Some((payload.len(), *more)),
                _ => None,
            })
            .collect();
        assert_eq!(
            segments,
            vec![(TCP_MAX_SEGMENT, true), (3000 - TCP_MAX_SEGMENT, false)]
        );
        assert!(
            net.events
                .contains(&NetEvent::TcpFlush(SocketId::Command))
        );

        // TCP completion arrives via sent confirmations.
        assert!(socket.send_busy());
        assert!(!socket.sent_confirm(TCP_MAX_SEGMENT));
        assert!(socket.sent_confirm(3000 - TCP_MAX_SEGMENT));
        assert!(!socket.send_busy());
    }

    #[test]
    fn overlapping_send_rejected() {
        let mut socket: Socket<256> = Socket::new(SocketId::Command, false);
        let mut net = RecordingNet::new();

        socket.tcp_accepted(tcp_peer());
        socket.tx.set(b"one");
        socket.send(&mut net).unwrap();

        let events_before = net.events.len();
        assert_eq!(socket.send(&mut net), Err(NetError::SendInProgress));
        assert_eq!(net.events.len(), events_before);
    }

    #[test]
    fn failed_send_leaves_socket_usable() {
        let mut socket: Socket<256> = Socket::new(SocketId::Command, false);
        let mut net = RecordingNet::new();
        net.fail_sends = true;

        socket.deliver(udp_peer(), b"x");
        socket.tx.set(b"reply");
        assert_eq!(socket.send(&mut net), Err(NetError::SendFailed));
        assert!(!socket.send_busy());

        net.fail_sends = false;
        socket.send(&mut net).unwrap();
    }

    #[test]
    fn reboot_tcp_vs_udp() {
        let mut net = RecordingNet::new();

        let mut tcp_socket: Socket<64> = Socket::new(SocketId::Command, false);
        tcp_socket.tcp_accepted(tcp_peer());
        assert!(tcp_socket.reboot(&mut net));
        assert!(tcp_socket.reboot_pending());

        let mut udp_socket: Socket<64> = Socket::new(SocketId::Command, false);
        udp_socket.deliver(udp_peer(), b"x");
        assert!(!udp_socket.reboot(&mut net));
        assert!(udp_socket.reboot_pending());
    }

    #[test]
    fn close_aborts_tcp() {
        let mut socket: Socket<64> = Socket::new(SocketId::Command, false);
        let mut net = RecordingNet::new();

        socket.tcp_accepted(tcp_peer());
        socket.close(&mut net);
        assert!(!socket.tcp_connected());
        assert!(
            net.events
                .contains(&crate::adapters::sim::NetEvent::TcpAbort(SocketId::Command))
        );
    }
}
