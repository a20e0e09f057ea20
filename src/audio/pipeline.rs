//! Frame pipeline and the audio task
//!
//! One cycle per frame period, both directions:
//!
//! ```text
//! mic ──read──► encode ──► send            (only while transmit is enabled)
//! rx queue ──► decode / conceal ──► sidetone ──► tones ──► limit ──► speaker
//! ```
//!
//! Codec failures drop the frame and the cycle carries on; nothing on
//! this path is fatal.

use bytes::Bytes;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SharedRingBuffer;
use crate::audio::processor::{apply_sidetone, limit};
use crate::audio::tones::{Notification, TonePlayer};
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::config::AudioConfig;
use crate::error::{AudioError, Error, Result};
use crate::hal::{AudioSink, AudioSource};
use crate::network::PacketSender;
use crate::protocol::{AudioPacket, PacketFlags};
use crate::session::state::{RunFlag, SharedState};

/// Per-direction frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_encoded: u64,
    pub encode_errors: u64,
    pub frames_decoded: u64,
    pub frames_concealed: u64,
    pub decode_errors: u64,
    /// Receive slots rendered as plain silence (no stream)
    pub frames_silent: u64,
}

/// Codec and DSP for one frame in each direction
pub struct FramePipeline {
    encoder: Box<dyn FrameEncoder>,
    decoder: Box<dyn FrameDecoder>,
    frame_size: usize,
    limiter_threshold: Option<f32>,
    sidetone_level: Option<f32>,
    max_concealment: u32,
    /// Empty slots since the last audio packet; `None` until the first one
    missed: Option<u32>,
    incoming: Vec<i16>,
    output: Vec<i16>,
    stats: PipelineStats,
}

impl FramePipeline {
    pub fn new(
        config: &AudioConfig,
        encoder: Box<dyn FrameEncoder>,
        decoder: Box<dyn FrameDecoder>,
    ) -> Self {
        let frame_size = config.samples_per_frame();
        Self {
            encoder,
            decoder,
            frame_size,
            limiter_threshold: config.limiter_enabled.then_some(config.limiter_threshold),
            sidetone_level: config.sidetone_enabled.then_some(config.sidetone_level),
            max_concealment: config.max_concealment_frames,
            missed: None,
            incoming: vec![0; frame_size],
            output: vec![0; frame_size],
            stats: PipelineStats::default(),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// An incoming stream is live while concealment is still allowed
    pub fn stream_live(&self) -> bool {
        self.missed.is_some_and(|m| m < self.max_concealment)
    }

    /// Compress one microphone frame. `None` when the encoder failed.
    pub fn encode_frame(&mut self, mic: &[i16]) -> Option<Bytes> {
        match self.encoder.encode(mic) {
            Ok(payload) => {
                self.stats.frames_encoded += 1;
                Some(payload)
            }
            Err(e) => {
                self.stats.encode_errors += 1;
                tracing::warn!("Encoding failed, dropping frame: {}", e);
                None
            }
        }
    }

    /// Produce this slot's incoming audio.
    ///
    /// A packet with payload is decoded. A missing packet (or a flag-only
    /// one) is concealed for up to `max_concealment_frames` slots after
    /// the last audio packet, then rendered as silence.
    pub fn receive_frame(&mut self, packet: Option<&AudioPacket>) -> &[i16] {
        match packet.filter(|p| p.has_audio()) {
            Some(packet) => {
                self.missed = Some(0);
                match self.decoder.decode(Some(&packet.payload[..]), &mut self.incoming, false) {
                    Ok(n) => {
                        self.stats.frames_decoded += 1;
                        self.incoming[n.min(self.frame_size)..].fill(0);
                    }
                    Err(e) => {
                        self.stats.decode_errors += 1;
                        tracing::warn!(seq = packet.sequence, "Decoding failed: {}", e);
                        self.incoming.fill(0);
                    }
                }
            }
            None if self.stream_live() => {
                self.missed = self.missed.map(|m| m + 1);
                match self.decoder.decode(None, &mut self.incoming, false) {
                    Ok(n) => {
                        self.stats.frames_concealed += 1;
                        self.incoming[n.min(self.frame_size)..].fill(0);
                    }
                    Err(e) => {
                        self.stats.decode_errors += 1;
                        tracing::debug!("Concealment failed: {}", e);
                        self.incoming.fill(0);
                    }
                }
            }
            None => {
                self.stats.frames_silent += 1;
                self.incoming.fill(0);
            }
        }
        &self.incoming
    }

    /// Speaker frame from the last received audio: sidetone, then any
    /// notification tone on top, then the limiter.
    pub fn render(&mut self, mic: &[i16], ptt_active: bool, tone: Option<&[i16]>) -> &[i16] {
        match self.sidetone_level {
            Some(level) => apply_sidetone(&self.incoming, mic, &mut self.output, level, ptt_active),
            None => self.output.copy_from_slice(&self.incoming),
        }

        if let Some(tone) = tone {
            for (out, &t) in self.output.iter_mut().zip(tone) {
                *out = out.saturating_add(t);
            }
        }

        if let Some(threshold) = self.limiter_threshold {
            limit(&mut self.output, threshold);
        }

        &self.output
    }
}

/// Flag-only packets sent after a PTT or call bit drops, so the peer
/// sees the clear even if some of them are lost
pub const FLAG_CLEAR_REPEAT: u8 = 5;

/// Decides when a flag-only packet has to go out while no audio is sent.
///
/// The call bit is carried every frame while set. Any bit falling (PTT
/// released, call cleared) is repeated for [`FLAG_CLEAR_REPEAT`] frames.
#[derive(Debug, Default)]
pub struct FlagCarrier {
    last: PacketFlags,
    clearing: u8,
}

impl FlagCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this frame's flags; true when a flag-only packet is due
    pub fn update(&mut self, flags: PacketFlags) -> bool {
        if self.last.bits() & !flags.bits() != 0 {
            self.clearing = FLAG_CLEAR_REPEAT;
        }
        self.last = flags;

        if flags.call() {
            return true;
        }
        if self.clearing > 0 {
            self.clearing -= 1;
            return true;
        }
        false
    }
}

/// The 20 ms real-time task
pub struct AudioTask {
    source: Box<dyn AudioSource>,
    sink: Box<dyn AudioSink>,
    pipeline: FramePipeline,
    sender: Arc<dyn PacketSender>,
    rx_queue: SharedRingBuffer<AudioPacket>,
    state: Arc<SharedState>,
    notifications: Option<Receiver<Notification>>,
    tones: Option<TonePlayer>,
    frame_duration: Duration,
    mic: Vec<i16>,
    tone: Vec<i16>,
    flags: FlagCarrier,
}

impl AudioTask {
    pub fn new(
        config: &AudioConfig,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
        pipeline: FramePipeline,
        sender: Arc<dyn PacketSender>,
        rx_queue: SharedRingBuffer<AudioPacket>,
        state: Arc<SharedState>,
    ) -> Self {
        let frame_size = pipeline.frame_size();
        Self {
            source,
            sink,
            pipeline,
            sender,
            rx_queue,
            state,
            notifications: None,
            tones: config
                .tones_enabled
                .then(|| TonePlayer::new(config.sample_rate, config.tone_amplitude)),
            frame_duration: config.frame_duration(),
            mic: vec![0; frame_size],
            tone: vec![0; frame_size],
            flags: FlagCarrier::new(),
        }
    }

    /// Mix notification tones received on `rx` into the speaker output
    pub fn with_notifications(mut self, rx: Receiver<Notification>) -> Self {
        self.notifications = Some(rx);
        self
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    /// One full frame cycle. Only device I/O failures are returned.
    pub fn run_frame(&mut self) -> std::result::Result<(), AudioError> {
        if let (Some(rx), Some(tones)) = (&self.notifications, self.tones.as_mut()) {
            while let Ok(notification) = rx.try_recv() {
                tones.notify(notification);
            }
        }

        self.source.read(&mut self.mic)?;

        let ptt_active = self.state.is_transmitting();
        self.transmit(ptt_active);

        let packet = if self.pipeline.stream_live() {
            self.rx_queue.pop()
        } else {
            self.rx_queue.try_pop()
        };
        let was_live = self.pipeline.stream_live();
        self.pipeline.receive_frame(packet.as_ref());
        if was_live && !self.pipeline.stream_live() && self.state.remote_ptt() {
            // No audio for the whole concealment window: the peer has stopped talking
            tracing::info!("Incoming stream ended, remote PTT OFF");
            self.state.set_remote_ptt(false);
        }

        let has_tone = self
            .tones
            .as_mut()
            .is_some_and(|player| player.fill(&mut self.tone));
        let tone = has_tone.then_some(self.tone.as_slice());
        let out = self.pipeline.render(&self.mic, ptt_active, tone);
        self.sink.write(out)
    }

    fn transmit(&mut self, ptt_active: bool) {
        let flags = PacketFlags::new(ptt_active, self.state.local_calling());

        let carry = self.flags.update(flags);

        let result = if self.state.transmit_enabled() {
            match self.pipeline.encode_frame(&self.mic) {
                Some(payload) => self.sender.send_packet(&payload, flags),
                None => return,
            }
        } else if carry {
            self.sender.send_packet(&[], flags)
        } else {
            return;
        };

        if let Err(e) = result {
            let expected = match &e {
                Error::Network(net) => net.is_unreachable() || !self.state.link_up(),
                _ => false,
            };
            if expected {
                tracing::debug!("Send failed while link is down: {}", e);
            } else {
                tracing::warn!("Send failed: {}", e);
            }
        }
    }

    /// Run until `run` is stopped. Frames are skipped (and the receive
    /// queue drained) while the device is asleep.
    pub fn run(mut self, run: RunFlag) {
        tracing::info!(frame_ms = self.frame_duration.as_millis() as u64, "Audio task started");
        let mut failures = 0u32;

        while run.is_running() {
            if !self.state.is_awake() {
                self.rx_queue.clear();
                run.sleep(self.frame_duration);
                continue;
            }

            match self.run_frame() {
                Ok(()) => {
                    if failures > 0 {
                        tracing::info!(failures, "Audio I/O recovered");
                        failures = 0;
                    }
                }
                Err(e) => {
                    if failures == 0 {
                        tracing::warn!("Audio I/O failed: {}", e);
                    } else {
                        tracing::trace!("Audio I/O failed: {}", e);
                    }
                    failures = failures.saturating_add(1);
                    run.sleep(self.frame_duration);
                }
            }
        }

        let stats = self.pipeline.stats();
        tracing::info!(
            encoded = stats.frames_encoded,
            decoded = stats.frames_decoded,
            concealed = stats.frames_concealed,
            "Audio task stopped"
        );
    }

    pub fn spawn(self, run: RunFlag) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("audio".into())
            .spawn(move || self.run(run))?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_buffer;
    use crate::config::Role;
    use crate::control::call::{CallMachine, CallState};
    use crate::control::ptt::PttState;
    use crate::error::{CodecError, NetworkError};
    use crate::hal::sim::{SimAudioSink, SimAudioSource, SimSignal};
    use parking_lot::Mutex;

    const DECODED: i16 = 1000;
    const CONCEALED: i16 = 10;

    struct FakeEncoder {
        fail: bool,
    }

    impl FrameEncoder for FakeEncoder {
        fn encode(&mut self, _pcm: &[i16]) -> std::result::Result<Bytes, CodecError> {
            if self.fail {
                Err(CodecError::EncodingFailed("boom".into()))
            } else {
                Ok(Bytes::from_static(&[0xAA, 0xBB]))
            }
        }

        fn frame_size(&self) -> usize {
            320
        }
    }

    struct FakeDecoder {
        fail: bool,
    }

    impl FrameDecoder for FakeDecoder {
        fn decode(
            &mut self,
            packet: Option<&[u8]>,
            out: &mut [i16],
            _use_fec: bool,
        ) -> std::result::Result<usize, CodecError> {
            if self.fail {
                return Err(CodecError::DecodingFailed("corrupt".into()));
            }
            let value = if packet.is_some() { DECODED } else { CONCEALED };
            out.fill(value);
            Ok(out.len())
        }
    }

    #[derive(Default)]
    struct FakeSender {
        sent: Mutex<Vec<(Vec<u8>, PacketFlags)>>,
        unreachable: bool,
    }

    impl PacketSender for FakeSender {
        fn send_packet(&self, payload: &[u8], flags: PacketFlags) -> Result<u32> {
            if self.unreachable {
                return Err(NetworkError::SendFailed(std::io::Error::from(
                    std::io::ErrorKind::NetworkUnreachable,
                ))
                .into());
            }
            let mut sent = self.sent.lock();
            sent.push((payload.to_vec(), flags));
            Ok(sent.len() as u32 - 1)
        }
    }

    fn pipeline(config: &AudioConfig) -> FramePipeline {
        FramePipeline::new(
            config,
            Box::new(FakeEncoder { fail: false }),
            Box::new(FakeDecoder { fail: false }),
        )
    }

    fn audio_packet(sequence: u32) -> AudioPacket {
        AudioPacket {
            sequence,
            timestamp: 0,
            flags: PacketFlags::new(true, false),
            payload: Bytes::from_static(&[1, 2, 3]),
        }
    }

    fn flag_packet(sequence: u32) -> AudioPacket {
        AudioPacket {
            sequence,
            timestamp: 0,
            flags: PacketFlags::new(false, true),
            payload: Bytes::new(),
        }
    }

    #[test]
    fn test_no_concealment_before_first_packet() {
        let mut p = pipeline(&AudioConfig::default());
        assert!(p.receive_frame(None).iter().all(|&s| s == 0));
        assert_eq!(p.stats().frames_concealed, 0);
        assert_eq!(p.stats().frames_silent, 1);
    }

    #[test]
    fn test_concealment_window() {
        let config = AudioConfig {
            max_concealment_frames: 2,
            ..AudioConfig::default()
        };
        let mut p = pipeline(&config);

        assert_eq!(p.receive_frame(Some(&audio_packet(0)))[0], DECODED);
        assert_eq!(p.receive_frame(None)[0], CONCEALED);
        assert_eq!(p.receive_frame(None)[0], CONCEALED);
        assert_eq!(p.receive_frame(None)[0], 0);
        assert!(!p.stream_live());

        let stats = p.stats();
        assert_eq!(stats.frames_decoded, 1);
        assert_eq!(stats.frames_concealed, 2);
        assert_eq!(stats.frames_silent, 1);

        // A new packet re-opens the window
        assert_eq!(p.receive_frame(Some(&audio_packet(9)))[0], DECODED);
        assert!(p.stream_live());
    }

    #[test]
    fn test_flag_only_packet_is_an_empty_slot() {
        let mut p = pipeline(&AudioConfig::default());
        p.receive_frame(Some(&audio_packet(0)));
        assert_eq!(p.receive_frame(Some(&flag_packet(1)))[0], CONCEALED);
    }

    #[test]
    fn test_decode_failure_gives_silence() {
        let mut p = FramePipeline::new(
            &AudioConfig::default(),
            Box::new(FakeEncoder { fail: false }),
            Box::new(FakeDecoder { fail: true }),
        );
        assert!(p.receive_frame(Some(&audio_packet(0))).iter().all(|&s| s == 0));
        assert_eq!(p.stats().decode_errors, 1);
    }

    #[test]
    fn test_encode_failure_drops_frame() {
        let mut p = FramePipeline::new(
            &AudioConfig::default(),
            Box::new(FakeEncoder { fail: true }),
            Box::new(FakeDecoder { fail: false }),
        );
        assert!(p.encode_frame(&[0; 320]).is_none());
        assert_eq!(p.stats().encode_errors, 1);
    }

    #[test]
    fn test_render_sidetone_only_while_talking() {
        let config = AudioConfig {
            limiter_enabled: false,
            ..AudioConfig::default()
        };
        let mut p = pipeline(&config);
        p.receive_frame(Some(&audio_packet(0)));
        let mic = vec![2000i16; 320];

        // 0.7 * 1000 + 0.3 * 2000
        assert_eq!(p.render(&mic, true, None)[0], 1300);
        assert_eq!(p.render(&mic, false, None)[0], DECODED);
    }

    #[test]
    fn test_render_tone_then_limit() {
        let config = AudioConfig {
            sidetone_enabled: false,
            ..AudioConfig::default()
        };
        let mut p = pipeline(&config);
        p.receive_frame(Some(&audio_packet(0)));

        let tone = vec![i16::MAX; 320];
        let knee = (32767.0 * 0.95) as i32;
        let out = p.render(&[0; 320], false, Some(&tone));
        // Saturated at full scale, then a quarter of the overshoot kept
        assert_eq!(out[0] as i32, knee + (32767 - knee) / 4);
    }

    struct Harness {
        task: AudioTask,
        sender: Arc<FakeSender>,
        state: Arc<SharedState>,
        queue: SharedRingBuffer<AudioPacket>,
        speaker: Arc<crate::hal::sim::SinkRecord>,
    }

    fn harness(role: Role, sender: FakeSender) -> Harness {
        let config = AudioConfig::default();
        let sink = SimAudioSink::new();
        let speaker = sink.record();
        let sender = Arc::new(sender);
        let state = Arc::new(SharedState::new(role));
        let queue = create_shared_buffer(8);

        let task = AudioTask::new(
            &config,
            Box::new(SimAudioSource::new(SimSignal::Constant(500), 16_000)),
            Box::new(sink),
            pipeline(&config),
            sender.clone(),
            Arc::clone(&queue),
            Arc::clone(&state),
        );

        Harness {
            task,
            sender,
            state,
            queue,
            speaker,
        }
    }

    #[test]
    fn test_belt_pack_silent_until_ptt() {
        let mut h = harness(Role::BeltPack, FakeSender::default());

        h.task.run_frame().unwrap();
        assert!(h.sender.sent.lock().is_empty());

        h.state.set_ptt_state(PttState::Latched);
        h.task.run_frame().unwrap();

        let sent = h.sender.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec![0xAA, 0xBB]);
        assert!(sent[0].1.ptt());
        assert!(!sent[0].1.call());
    }

    #[test]
    fn test_call_flag_carried_without_audio() {
        let mut h = harness(Role::BeltPack, FakeSender::default());

        h.state.set_call_state(CallState::Outgoing);
        h.task.run_frame().unwrap();
        h.task.run_frame().unwrap();
        h.state.set_call_state(CallState::Idle);
        h.task.run_frame().unwrap();
        h.task.run_frame().unwrap();

        for _ in 0..FLAG_CLEAR_REPEAT {
            h.task.run_frame().unwrap();
        }

        let sent = h.sender.sent.lock();
        let calls: Vec<bool> = sent.iter().map(|(_, f)| f.call()).collect();
        // Two flag carriers, then a burst of clearing packets, then silence
        let mut expected = vec![true, true];
        expected.extend(std::iter::repeat(false).take(FLAG_CLEAR_REPEAT as usize));
        assert_eq!(calls, expected);
        assert!(sent.iter().all(|(payload, flags)| payload.is_empty() && !flags.ptt()));

        // Peer loses the first clearing packet and still ends up idle
        let mut peer = CallMachine::new();
        for (i, (_, flags)) in sent.iter().enumerate() {
            if i == 2 {
                continue;
            }
            peer.remote_signal(flags.call());
        }
        assert_eq!(peer.state(), CallState::Idle);
    }

    #[test]
    fn test_ptt_release_reaches_peer() {
        let mut h = harness(Role::BeltPack, FakeSender::default());

        h.state.set_ptt_state(PttState::Latched);
        h.task.run_frame().unwrap();
        h.task.run_frame().unwrap();
        h.state.set_ptt_state(PttState::Idle);
        for _ in 0..FLAG_CLEAR_REPEAT + 2 {
            h.task.run_frame().unwrap();
        }

        let sent = h.sender.sent.lock();
        let ptt: Vec<bool> = sent.iter().map(|(_, f)| f.ptt()).collect();
        let mut expected = vec![true, true];
        expected.extend(std::iter::repeat(false).take(FLAG_CLEAR_REPEAT as usize));
        assert_eq!(ptt, expected);
        // The release packets carry no audio
        assert!(sent[2..].iter().all(|(payload, _)| payload.is_empty()));
    }

    #[test]
    fn test_flag_carrier_repeats_every_fall() {
        let mut carrier = FlagCarrier::new();
        assert!(!carrier.update(PacketFlags::empty()));
        assert!(!carrier.update(PacketFlags::new(true, false)));
        assert!(carrier.update(PacketFlags::new(true, true)));

        // Call drops while PTT stays: still repeated
        let clears = (0..10)
            .filter(|_| carrier.update(PacketFlags::new(true, false)))
            .count();
        assert_eq!(clears, FLAG_CLEAR_REPEAT as usize);
    }

    #[test]
    fn test_stream_end_clears_remote_ptt() {
        let mut h = harness(Role::BaseStation, FakeSender::default());
        h.state.set_remote_ptt(true);
        h.queue.push(audio_packet(0));

        // One decoded frame, then the concealment window minus one slot
        let window = AudioConfig::default().max_concealment_frames;
        for _ in 0..window {
            h.task.run_frame().unwrap();
        }
        assert!(h.state.remote_ptt());

        h.task.run_frame().unwrap();
        assert!(!h.state.remote_ptt());
    }

    #[test]
    fn test_base_station_always_transmits() {
        let mut h = harness(Role::BaseStation, FakeSender::default());
        h.task.run_frame().unwrap();
        h.task.run_frame().unwrap();

        let sent = h.sender.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(payload, flags)| !payload.is_empty() && !flags.ptt()));
    }

    #[test]
    fn test_received_audio_reaches_speaker() {
        let mut h = harness(Role::BeltPack, FakeSender::default());
        h.queue.push(audio_packet(0));

        h.task.run_frame().unwrap();
        assert_eq!(h.speaker.frames_written(), 1);
        assert_eq!(h.speaker.last_frame()[0], DECODED);

        // Next slot is concealed
        h.task.run_frame().unwrap();
        assert_eq!(h.speaker.last_frame()[0], CONCEALED);
    }

    #[test]
    fn test_unreachable_send_is_not_fatal() {
        let mut h = harness(
            Role::BaseStation,
            FakeSender {
                unreachable: true,
                ..FakeSender::default()
            },
        );
        assert!(h.task.run_frame().is_ok());
        assert_eq!(h.speaker.frames_written(), 1);
    }

    #[test]
    fn test_notification_tone_mixed_in() {
        let mut h = harness(Role::BeltPack, FakeSender::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        h.task = h.task.with_notifications(rx);

        tx.send(Notification::Call).unwrap();
        h.task.run_frame().unwrap();
        assert!(h.speaker.last_frame().iter().any(|&s| s != 0));
    }

    #[test]
    fn test_broken_input_reported() {
        let config = AudioConfig::default();
        let mut task = AudioTask::new(
            &config,
            Box::new(SimAudioSource::broken()),
            Box::new(SimAudioSink::new()),
            pipeline(&config),
            Arc::new(FakeSender::default()),
            create_shared_buffer(4),
            Arc::new(SharedState::new(Role::BeltPack)),
        );
        assert!(task.run_frame().is_err());
    }
}
