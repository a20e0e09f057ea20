//! Simulated collaborators
//!
//! Used when `device.simulate_hardware` is set and throughout the tests.
//! Every handle is cheap to clone and shares its state, so a test can keep
//! one copy to drive or inspect what the session owns.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::error::{AudioError, Result};
use crate::hal::{
    AudioSink, AudioSource, BatterySensor, Button, ButtonInput, Led, LedDriver, Link, Peripherals,
    SleepControl, WakeReason,
};

const SLEEP_POLL: Duration = Duration::from_millis(10);

/// Keeps a loop on a fixed period, the way a codec DMA interrupt would
#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    /// Block until the next period boundary
    pub fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            // Fell behind (debugger, overloaded host): restart the grid
            self.next = now + self.period;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimSignal {
    Silence,
    Tone { frequency: f32, amplitude: f32 },
    Constant(i16),
}

/// Microphone or line input producing a synthetic signal
pub struct SimAudioSource {
    signal: SimSignal,
    sample_rate: f32,
    phase: f32,
    pacer: Option<Pacer>,
    broken: bool,
}

impl SimAudioSource {
    pub fn new(signal: SimSignal, sample_rate: u32) -> Self {
        Self {
            signal,
            sample_rate: sample_rate as f32,
            phase: 0.0,
            pacer: None,
            broken: false,
        }
    }

    /// Deliver frames in real time instead of as fast as asked
    pub fn paced(mut self, frame_period: Duration) -> Self {
        self.pacer = Some(Pacer::new(frame_period));
        self
    }

    /// A source whose every read fails
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::new(SimSignal::Silence, crate::constants::SAMPLE_RATE)
        }
    }
}

impl AudioSource for SimAudioSource {
    fn read(&mut self, frame: &mut [i16]) -> std::result::Result<(), AudioError> {
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait();
        }
        if self.broken {
            return Err(AudioError::Disconnected);
        }

        match self.signal {
            SimSignal::Silence => frame.fill(0),
            SimSignal::Constant(v) => frame.fill(v),
            SimSignal::Tone { frequency, amplitude } => {
                let step = frequency / self.sample_rate * std::f32::consts::TAU;
                let scale = amplitude.clamp(0.0, 1.0) * crate::constants::FULL_SCALE;
                for sample in frame.iter_mut() {
                    *sample = (self.phase.sin() * scale) as i16;
                    self.phase = (self.phase + step) % std::f32::consts::TAU;
                }
            }
        }
        Ok(())
    }
}

/// What a [`SimAudioSink`] has been given
#[derive(Debug, Default)]
pub struct SinkRecord {
    frames: AtomicU64,
    last: Mutex<Vec<i16>>,
}

impl SinkRecord {
    pub fn frames_written(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn last_frame(&self) -> Vec<i16> {
        self.last.lock().clone()
    }
}

/// Speaker or line output that records what it was given
#[derive(Clone, Default)]
pub struct SimAudioSink {
    record: Arc<SinkRecord>,
}

impl SimAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> Arc<SinkRecord> {
        Arc::clone(&self.record)
    }
}

impl AudioSink for SimAudioSink {
    fn write(&mut self, frame: &[i16]) -> std::result::Result<(), AudioError> {
        self.record.frames.fetch_add(1, Ordering::Relaxed);
        let mut last = self.record.last.lock();
        last.clear();
        last.extend_from_slice(frame);
        Ok(())
    }
}

/// Buttons driven from code
#[derive(Clone, Default)]
pub struct SimButtons {
    ptt: Arc<AtomicBool>,
    call: Arc<AtomicBool>,
}

impl SimButtons {
    pub fn new() -> Self {
        Self::default()
    }

    fn level(&self, button: Button) -> &AtomicBool {
        match button {
            Button::Ptt => &self.ptt,
            Button::Call => &self.call,
        }
    }

    pub fn press(&self, button: Button) {
        self.level(button).store(true, Ordering::SeqCst);
    }

    pub fn release(&self, button: Button) {
        self.level(button).store(false, Ordering::SeqCst);
    }
}

impl ButtonInput for SimButtons {
    fn is_pressed(&self, button: Button) -> bool {
        self.level(button).load(Ordering::SeqCst)
    }
}

/// LEDs whose levels can be read back
#[derive(Clone, Default)]
pub struct SimLeds {
    levels: Arc<[AtomicBool; Led::COUNT]>,
    writes: Arc<AtomicU64>,
}

impl SimLeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self, led: Led) -> bool {
        self.levels[led.index()].load(Ordering::Relaxed)
    }

    /// Number of level changes written so far
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl LedDriver for SimLeds {
    fn set(&mut self, led: Led, on: bool) {
        self.levels[led.index()].store(on, Ordering::Relaxed);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Battery with a settable (and optionally draining) voltage
#[derive(Clone)]
pub struct SimBattery {
    millivolts: Arc<AtomicU32>,
    drain_mv_per_read: u32,
    floor_mv: u32,
    full_mv: u32,
}

impl SimBattery {
    pub fn new(voltage: f32) -> Self {
        let mv = (voltage * 1000.0) as u32;
        Self {
            millivolts: Arc::new(AtomicU32::new(mv)),
            drain_mv_per_read: 0,
            floor_mv: 0,
            full_mv: mv,
        }
    }

    /// Lose `mv` per reading; wrap back to full below `empty` (bench demo)
    pub fn draining(mut self, mv: u32, empty: f32) -> Self {
        self.drain_mv_per_read = mv;
        self.floor_mv = (empty * 1000.0) as u32;
        self
    }

    pub fn set_voltage(&self, voltage: f32) {
        self.millivolts.store((voltage * 1000.0) as u32, Ordering::Relaxed);
    }
}

impl BatterySensor for SimBattery {
    fn read_voltage(&mut self) -> Result<f32> {
        let mv = self.millivolts.load(Ordering::Relaxed);
        if self.drain_mv_per_read > 0 {
            let next = mv.saturating_sub(self.drain_mv_per_read);
            let next = if next < self.floor_mv { self.full_mv } else { next };
            self.millivolts.store(next, Ordering::Relaxed);
        }
        Ok(mv as f32 / 1000.0)
    }
}

/// Radio link with controllable association state
#[derive(Clone)]
pub struct SimLink {
    connected: Arc<AtomicBool>,
    reachable: Arc<AtomicBool>,
    radio: Arc<AtomicBool>,
    rssi: Arc<AtomicI8>,
    reconnects: Arc<AtomicU32>,
}

impl Default for SimLink {
    fn default() -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            reachable: Arc::new(AtomicBool::new(true)),
            radio: Arc::new(AtomicBool::new(true)),
            rssi: Arc::new(AtomicI8::new(-55)),
            reconnects: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop or restore the association
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Whether a reconnect attempt will succeed
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn radio_enabled(&self) -> bool {
        self.radio.load(Ordering::SeqCst)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Link for SimLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.radio_enabled()
    }

    fn rssi(&self) -> Option<i8> {
        self.is_connected().then(|| self.rssi.load(Ordering::Relaxed))
    }

    fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        let ok = self.reachable.load(Ordering::SeqCst);
        self.connected.store(ok, Ordering::SeqCst);
        Ok(())
    }

    fn set_radio_enabled(&self, enabled: bool) {
        self.radio.store(enabled, Ordering::SeqCst);
    }
}

/// Sleep controller that blocks the calling thread and wakes on the
/// simulated buttons
pub struct SimSleep {
    buttons: SimButtons,
    light_sleeps: Arc<AtomicU32>,
    deep_sleeps: Arc<AtomicU32>,
}

impl SimSleep {
    pub fn new(buttons: SimButtons) -> Self {
        Self {
            buttons,
            light_sleeps: Arc::new(AtomicU32::new(0)),
            deep_sleeps: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn counters(&self) -> (Arc<AtomicU32>, Arc<AtomicU32>) {
        (Arc::clone(&self.light_sleeps), Arc::clone(&self.deep_sleeps))
    }

    fn any_pressed(&self) -> bool {
        self.buttons.is_pressed(Button::Ptt) || self.buttons.is_pressed(Button::Call)
    }
}

impl SleepControl for SimSleep {
    fn light_sleep(&mut self, max: Duration, stop: &AtomicBool) -> WakeReason {
        self.light_sleeps.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        loop {
            if stop.load(Ordering::Relaxed) {
                return WakeReason::Stop;
            }
            if self.any_pressed() {
                return WakeReason::Button;
            }
            if start.elapsed() >= max {
                return WakeReason::Timer;
            }
            thread::sleep(SLEEP_POLL);
        }
    }

    fn deep_sleep(&mut self, stop: &AtomicBool) -> WakeReason {
        self.deep_sleeps.fetch_add(1, Ordering::Relaxed);
        loop {
            if stop.load(Ordering::Relaxed) {
                return WakeReason::Stop;
            }
            if self.buttons.is_pressed(Button::Ptt) {
                return WakeReason::Button;
            }
            thread::sleep(SLEEP_POLL);
        }
    }
}

/// Handles kept by whoever drives a simulated board
#[derive(Clone)]
pub struct SimControls {
    pub buttons: SimButtons,
    pub leds: SimLeds,
    pub link: SimLink,
    pub battery: SimBattery,
    pub speaker: Arc<SinkRecord>,
}

/// A complete simulated board for the configured role.
///
/// The input is a quiet tone (so metering and the codec have something
/// to chew on) delivered in real time.
pub fn peripherals(config: &AppConfig) -> (Peripherals, SimControls) {
    let buttons = SimButtons::new();
    let leds = SimLeds::new();
    let link = SimLink::new();
    let battery = SimBattery::new(config.battery.full_voltage).draining(1, config.battery.empty_voltage);
    let sink = SimAudioSink::new();

    let source = SimAudioSource::new(
        SimSignal::Tone {
            frequency: 440.0,
            amplitude: 0.05,
        },
        config.audio.sample_rate,
    )
    .paced(config.audio.frame_duration());

    let controls = SimControls {
        buttons: buttons.clone(),
        leds: leds.clone(),
        link: link.clone(),
        battery: battery.clone(),
        speaker: sink.record(),
    };

    let peripherals = Peripherals {
        source: Box::new(source),
        sink: Box::new(sink),
        buttons: Arc::new(buttons.clone()),
        leds: Box::new(leds),
        battery: config
            .device
            .role
            .is_belt_pack()
            .then(|| Box::new(battery) as Box<dyn BatterySensor>),
        link: Arc::new(link),
        sleep: Box::new(SimSleep::new(buttons)),
    };

    (peripherals, controls)
}
