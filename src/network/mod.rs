//! Network subsystem for UDP audio transport

pub mod stats;
pub mod transport;
pub mod udp;

pub use stats::{SequenceTracker, StatsSnapshot, TransportStats};
pub use transport::{PacketSender, PeerPolicy, UdpTransport};
pub use udp::{create_socket, SocketOptions};
