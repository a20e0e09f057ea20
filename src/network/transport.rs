//! Fire-and-forget packet transport
//!
//! One socket per device, shared by the audio task (send) and the
//! receive task (blocking receive with a short timeout). There is no
//! handshake, acknowledgement or retransmission: loss is absorbed by
//! the decoder's concealment, not here.

use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{NetworkConfig, Role};
use crate::error::{NetworkError, Result};
use crate::network::stats::TransportStats;
use crate::network::udp::{create_socket, SocketOptions};
use crate::protocol::{self, AudioPacket, PacketFlags, MAX_DATAGRAM};
use crate::session::state::RunFlag;

/// Where outgoing packets go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPolicy {
    /// Always send to this address (belt pack → base station)
    Fixed(SocketAddr),
    /// Start at this address and follow whoever sent last (base station)
    FollowSender(SocketAddr),
}

/// Outgoing half of the transport, as seen by the audio task
pub trait PacketSender: Send + Sync {
    /// Frame and send one packet, returning the sequence number used
    fn send_packet(&self, payload: &[u8], flags: PacketFlags) -> Result<u32>;
}

/// UDP transport for audio packets
pub struct UdpTransport {
    socket: std::net::UdpSocket,
    policy: PeerPolicy,
    peer: Mutex<SocketAddr>,
    tx_sequence: AtomicU32,
    stats: Arc<TransportStats>,
    start_time: Instant,
}

impl UdpTransport {
    /// Bind the well-known port for `role`
    pub fn bind(config: &NetworkConfig, role: Role) -> Result<Self> {
        let mut options = SocketOptions::any(config.udp_port);
        options.read_timeout = config.recv_timeout();

        let policy = match role {
            Role::BeltPack => PeerPolicy::Fixed(config.base_socket_addr()),
            Role::BaseStation => {
                options.broadcast = true;
                PeerPolicy::FollowSender(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::BROADCAST,
                    config.udp_port,
                )))
            }
        };

        Self::with_options(&options, policy)
    }

    /// Bind with explicit socket options and peer policy
    pub fn with_options(options: &SocketOptions, policy: PeerPolicy) -> Result<Self> {
        let socket = create_socket(options)?;
        let initial_peer = match policy {
            PeerPolicy::Fixed(addr) | PeerPolicy::FollowSender(addr) => addr,
        };

        tracing::info!(
            local = %socket.local_addr().map_err(NetworkError::LocalAddr)?,
            peer = %initial_peer,
            "UDP transport bound"
        );

        Ok(Self {
            socket,
            policy,
            peer: Mutex::new(initial_peer),
            tx_sequence: AtomicU32::new(0),
            stats: Arc::new(TransportStats::new()),
            start_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr().map_err(NetworkError::LocalAddr)?)
    }

    /// Current destination for outgoing packets
    pub fn peer(&self) -> SocketAddr {
        *self.peer.lock()
    }

    pub fn stats(&self) -> &Arc<TransportStats> {
        &self.stats
    }

    /// Zero counters, the outgoing sequence and the receive baseline
    pub fn reset_stats(&self) {
        self.stats.reset();
        self.tx_sequence.store(0, Ordering::Relaxed);
    }

    /// Capture time stamp: microseconds since start, truncated to 32 bits
    fn timestamp(&self) -> u32 {
        self.start_time.elapsed().as_micros() as u32
    }

    /// Frame and send one packet. Returns the sequence number used.
    ///
    /// The sequence advances even when the send itself fails so the
    /// receiver sees the failure as a gap.
    pub fn send(&self, payload: &[u8], flags: PacketFlags) -> Result<u32> {
        let sequence = self.tx_sequence.fetch_add(1, Ordering::Relaxed);
        let datagram = protocol::encode(sequence, self.timestamp(), flags, payload)?;

        let peer = self.peer();
        match self.socket.send_to(&datagram, peer) {
            Ok(sent) => {
                self.stats.record_sent(sent);
                tracing::trace!(
                    seq = sequence,
                    size = payload.len(),
                    ptt = flags.ptt(),
                    call = flags.call(),
                    "TX"
                );
                Ok(sequence)
            }
            Err(e) => {
                self.stats.record_send_failure();
                Err(NetworkError::SendFailed(e).into())
            }
        }
    }

    /// Wait for one datagram, bounded by the socket read timeout.
    ///
    /// Returns `Ok(None)` on timeout and for malformed datagrams, which
    /// are counted and dropped here.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Option<(AudioPacket, SocketAddr)>> {
        let (len, source) = match self.socket.recv_from(buf) {
            Ok(r) => r,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(NetworkError::ReceiveFailed(e).into()),
        };

        let packet = match protocol::decode(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.record_malformed();
                tracing::debug!(%source, len, "Dropping malformed packet: {}", e);
                return Ok(None);
            }
        };

        let lost = self.stats.record_received(packet.sequence, len);
        if lost > 0 {
            tracing::debug!(seq = packet.sequence, lost, "Sequence gap");
        }

        if let PeerPolicy::FollowSender(_) = self.policy {
            let mut peer = self.peer.lock();
            if *peer != source {
                tracing::info!(%source, "Peer address updated");
                *peer = source;
            }
        }

        tracing::trace!(
            seq = packet.sequence,
            size = packet.payload_size(),
            ptt = packet.flags.ptt(),
            call = packet.flags.call(),
            "RX"
        );

        Ok(Some((packet, source)))
    }

    /// Run the receive loop on its own thread until `run` is stopped.
    ///
    /// Every valid packet is handed to `on_packet`. Socket errors are
    /// logged and retried after a short pause; they never end the loop.
    pub fn spawn_receiver<F>(
        self: &Arc<Self>,
        run: RunFlag,
        mut on_packet: F,
    ) -> Result<JoinHandle<()>>
    where
        F: FnMut(AudioPacket, SocketAddr) + Send + 'static,
    {
        let transport = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("udp-rx".into())
            .spawn(move || {
                tracing::info!("UDP receive task started");
                let mut buf = vec![0u8; MAX_DATAGRAM * 2];

                while run.is_running() {
                    match transport.recv(&mut buf) {
                        Ok(Some((packet, source))) => on_packet(packet, source),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!("Receive failed: {}", e);
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                }

                tracing::info!("UDP receive task stopped");
            })?;

        Ok(handle)
    }
}

impl PacketSender for UdpTransport {
    fn send_packet(&self, payload: &[u8], flags: PacketFlags) -> Result<u32> {
        self.send(payload, flags)
    }
}
