//! Belt pack and base station transports talking over loopback

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use wireless_partyline::config::{AppConfig, Role};
use wireless_partyline::control::{CallState, PttState};
use wireless_partyline::hal::{sim, Button};
use wireless_partyline::network::{PeerPolicy, SocketOptions, UdpTransport};
use wireless_partyline::protocol::{self, AudioPacket, PacketFlags, MAX_DATAGRAM};
use wireless_partyline::session::{RunFlag, Session, SessionExit};

fn loopback_options() -> SocketOptions {
    let mut options = SocketOptions::any(0);
    options.bind_addr = "127.0.0.1:0".parse().unwrap();
    options.reuse_address = false;
    options.read_timeout = Duration::from_millis(50);
    options
}

/// Base follows the sender, starting from a placeholder; belt pack is
/// pinned to the base.
fn pair() -> (Arc<UdpTransport>, Arc<UdpTransport>) {
    let placeholder: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let base = UdpTransport::with_options(&loopback_options(), PeerPolicy::FollowSender(placeholder)).unwrap();
    let base_addr = base.local_addr().unwrap();
    let belt = UdpTransport::with_options(&loopback_options(), PeerPolicy::Fixed(base_addr)).unwrap();
    (Arc::new(base), Arc::new(belt))
}

fn recv_within(transport: &UdpTransport, timeout: Duration) -> Option<(AudioPacket, SocketAddr)> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(received) = transport.recv(&mut buf).unwrap() {
            return Some(received);
        }
    }
    None
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_packets_cross_and_base_follows_sender() {
    let (base, belt) = pair();
    let belt_addr = belt.local_addr().unwrap();

    let seq = belt.send(&[1, 2, 3], PacketFlags::new(true, false)).unwrap();
    assert_eq!(seq, 0);

    let (packet, source) = recv_within(&base, Duration::from_secs(2)).expect("no packet at base");
    assert_eq!(source, belt_addr);
    assert_eq!(packet.sequence, 0);
    assert!(packet.flags.ptt());
    assert!(!packet.flags.call());
    assert_eq!(&packet.payload[..], &[1, 2, 3]);
    assert_eq!(base.peer(), belt_addr);

    // Base can now answer without knowing the address up front
    base.send(&[9; 40], PacketFlags::new(false, true)).unwrap();
    let (reply, _) = recv_within(&belt, Duration::from_secs(2)).expect("no reply at belt pack");
    assert!(reply.flags.call());
    assert_eq!(reply.payload_size(), 40);
}

#[test]
fn test_flag_only_packet() {
    let (base, belt) = pair();
    belt.send(&[], PacketFlags::new(false, true)).unwrap();

    let (packet, _) = recv_within(&base, Duration::from_secs(2)).unwrap();
    assert!(!packet.has_audio());
    assert!(packet.flags.call());
}

#[test]
fn test_gaps_and_malformed_datagrams_are_counted() {
    let (base, _belt) = pair();
    let base_addr = base.local_addr().unwrap();
    let raw = UdpSocket::bind("127.0.0.1:0").unwrap();

    for seq in [10u32, 11, 14] {
        let datagram = protocol::encode(seq, seq * 20_000, PacketFlags::empty(), &[0xAA; 8]).unwrap();
        raw.send_to(&datagram, base_addr).unwrap();
    }
    raw.send_to(&[0u8; 5], base_addr).unwrap();

    for _ in 0..3 {
        assert!(recv_within(&base, Duration::from_secs(2)).is_some());
    }
    // The short datagram is consumed and dropped
    assert!(recv_within(&base, Duration::from_millis(300)).is_none());

    let snap = base.stats().snapshot();
    assert_eq!(snap.packets_received, 3);
    assert_eq!(snap.packets_lost, 2);
    assert_eq!(snap.malformed, 1);

    base.reset_stats();
    assert_eq!(base.stats().snapshot().packets_received, 0);
}

#[test]
fn test_belt_pack_session_over_loopback() {
    let (base, belt) = pair();

    // Let the base learn the belt pack's address
    belt.send(&[], PacketFlags::empty()).unwrap();
    assert!(recv_within(&base, Duration::from_secs(2)).is_some());

    let config = AppConfig::for_role(Role::BeltPack);
    let (peripherals, controls) = sim::peripherals(&config);
    let stop = RunFlag::new();
    let session = Session::with_transport(config, peripherals, Arc::clone(&belt), stop.clone()).unwrap();
    let state = Arc::clone(session.state());
    let handle = thread::spawn(move || session.run());

    // Hold PTT: audio with the PTT bit reaches the base
    controls.buttons.press(Button::Ptt);
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let talking = wait_until(Duration::from_secs(5), || {
        matches!(base.recv(&mut buf), Ok(Some((p, _))) if p.flags.ptt() && p.has_audio())
    });
    assert!(talking, "no PTT audio from belt pack");
    assert!(state.is_transmitting());

    controls.buttons.release(Button::Ptt);
    assert!(wait_until(Duration::from_secs(2), || state.ptt_state() == PttState::Idle));

    // Base calls: the belt pack sees an incoming call
    let incoming = wait_until(Duration::from_secs(5), || {
        base.send(&[], PacketFlags::new(false, true)).unwrap();
        state.call_state() == CallState::Incoming
    });
    assert!(incoming, "call flag not picked up");
    assert!(state.link_up() || wait_until(Duration::from_secs(2), || state.link_up()));

    stop.stop();
    let exit = handle.join().expect("session panicked").unwrap();
    assert_eq!(exit, SessionExit::Shutdown);
    assert!(controls.speaker.frames_written() > 0);
}
