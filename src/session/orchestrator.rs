//! Session orchestrator
//!
//! Spawns the task set (audio, UDP receive, buttons, battery, LEDs) and
//! then runs the control loop on the calling thread: it is the only place
//! that feeds events into the PTT and call state machines, publishes
//! their results to [`SharedState`], and evaluates the power gate on the
//! housekeeping tick.

use crossbeam_channel::{select, tick, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::audio::buffer::create_shared_buffer;
use crate::audio::line::{LineInput, LineOutput, LineStatus};
use crate::audio::pipeline::{AudioTask, FramePipeline};
use crate::audio::tones::Notification;
use crate::codec::{OpusDecoder, OpusEncoder};
use crate::config::{AppConfig, Role};
use crate::control::button::{ButtonEvent, ButtonPoller};
use crate::control::call::{CallMachine, CallState};
use crate::control::led::{LedBank, LedPattern, LedRenderer};
use crate::control::ptt::PttMachine;
use crate::error::Result;
use crate::hal::{AudioSink, AudioSource, Led, Link, Peripherals, SleepControl, WakeReason};
use crate::network::{TransportStats, UdpTransport};
use crate::power::battery::{BatteryAlert, BatteryMonitor};
use crate::power::gate::{PowerDecision, PowerGate, PowerState};
use crate::protocol::PacketFlags;
use crate::session::diagnostics::run_self_test;
use crate::session::events::{self, EventReceiver, SessionEvent};
use crate::session::link::{LinkEvent, LinkMonitor};
use crate::session::state::{RunFlag, SharedState};

/// Upper bound on one light-sleep wait when deep sleep is disabled
const LIGHT_SLEEP_SLICE: Duration = Duration::from_secs(60);

/// How often the control loop re-checks the stop flag when idle
const STOP_POLL: Duration = Duration::from_millis(100);

/// Why [`Session::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Stop was requested
    Shutdown,
    /// Woke from deep sleep; the caller re-initializes from scratch
    DeepSleep,
}

/// State machines and housekeeping, driven by the control loop
pub struct Orchestrator {
    role: Role,
    state: Arc<SharedState>,
    ptt: PttMachine,
    call: CallMachine,
    gate: PowerGate,
    link: LinkMonitor,
    leds: Arc<LedBank>,
    tones: Sender<Notification>,
    stats: Arc<TransportStats>,
    line: Option<Arc<LineStatus>>,
    loss_warn_percent: f32,
    stats_interval: Duration,
    last_status: Instant,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        state: Arc<SharedState>,
        link: Arc<dyn Link>,
        leds: Arc<LedBank>,
        tones: Sender<Notification>,
        stats: Arc<TransportStats>,
    ) -> Self {
        let role = config.device.role;
        let clock = Arc::clone(state.activity());
        let gate = match role {
            Role::BeltPack => PowerGate::new(&config.power, clock),
            Role::BaseStation => PowerGate::disabled(clock),
        };

        Self {
            role,
            state,
            ptt: PttMachine::new(config.ptt.hold_threshold_ms),
            call: CallMachine::new(),
            gate,
            link: LinkMonitor::new(link, config.network.reconnect_delay()),
            leds,
            tones,
            stats,
            line: None,
            loss_warn_percent: config.network.loss_warn_percent,
            stats_interval: Duration::from_secs(config.logging.stats_interval_secs.max(1)),
            last_status: Instant::now(),
        }
    }

    /// Report party-line levels in the status line (base station)
    pub fn with_line_status(mut self, line: Arc<LineStatus>) -> Self {
        self.line = Some(line);
        self
    }

    pub fn gate(&self) -> &PowerGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut PowerGate {
        &mut self.gate
    }

    fn notify(&self, notification: Notification) {
        // Audio task gone means we are shutting down
        let _ = self.tones.send(notification);
    }

    /// Dispatch one event to the state machines
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Button(ButtonEvent::Ptt { pressed, hold_ms }) => {
                self.gate.activity();
                if self.role == Role::BaseStation {
                    tracing::debug!("PTT ignored on base station");
                    return;
                }
                if let Some(change) = self.ptt.button_event(pressed, hold_ms) {
                    self.state.set_ptt_state(change.state);
                }
            }
            SessionEvent::Button(ButtonEvent::Call { pressed }) => {
                self.gate.activity();
                if let Some(next) = self.call.button_event(pressed) {
                    self.state.set_call_state(next);
                }
            }
            SessionEvent::RemoteFlags { ptt, call } => {
                if ptt != self.state.remote_ptt() {
                    tracing::info!("Remote PTT {}", if ptt { "ON" } else { "OFF" });
                    self.state.set_remote_ptt(ptt);
                }
                let was_called = self.call.remote();
                if let Some(next) = self.call.remote_signal(call) {
                    self.state.set_call_state(next);
                }
                if call && !was_called {
                    self.notify(Notification::Call);
                }
            }
            SessionEvent::Battery(update) => {
                self.state.set_battery(update.status);
                match update.alert {
                    Some(BatteryAlert::Low) => self.notify(Notification::BatteryLow),
                    Some(BatteryAlert::Critical) => self.notify(Notification::BatteryCritical),
                    None => {}
                }
            }
        }
        self.update_leds();
    }

    /// The 1 Hz tick: link supervision, status line, power gate
    pub fn housekeeping_at(&mut self, now_ms: u64) -> PowerDecision {
        if self.state.is_transmitting() {
            self.gate.clock().record_interaction_at(now_ms);
        }

        match self.link.poll_at(now_ms) {
            Some(LinkEvent::Connected) => self.notify(Notification::Connected),
            Some(LinkEvent::Disconnected) => self.notify(Notification::Disconnected),
            Some(LinkEvent::Reconnecting { .. }) | None => {}
        }
        self.state.set_link(self.link.is_connected(), self.link.rssi());

        if self.last_status.elapsed() >= self.stats_interval {
            self.last_status = Instant::now();
            self.log_status();
        }

        let decision = self.gate.evaluate_at(now_ms);
        self.update_leds();
        decision
    }

    pub fn housekeeping(&mut self) -> PowerDecision {
        let now = self.gate.clock().now_ms();
        self.housekeeping_at(now)
    }

    fn update_leds(&self) {
        let on = |lit: bool| if lit { LedPattern::On } else { LedPattern::Off };
        let bank = &self.leds;

        if !self.state.is_awake() {
            bank.all_off();
            bank.set(Led::Power, LedPattern::BlinkSlow);
            return;
        }

        bank.set(Led::Power, LedPattern::On);

        let talking = match self.role {
            Role::BeltPack => self.state.is_transmitting(),
            Role::BaseStation => self.state.remote_ptt(),
        };
        bank.set(Led::Ptt, on(talking));
        bank.set(
            Led::Receive,
            on(self.role == Role::BeltPack && self.state.remote_ptt()),
        );

        bank.set(
            Led::Call,
            match self.state.call_state() {
                CallState::Idle => LedPattern::Off,
                CallState::Incoming => LedPattern::BlinkFast,
                CallState::Outgoing | CallState::Acknowledged => LedPattern::On,
            },
        );

        let loss = self.stats.snapshot().loss_percent();
        bank.set(
            Led::Status,
            if !self.state.link_up() {
                LedPattern::Off
            } else if loss > self.loss_warn_percent {
                LedPattern::BlinkFast
            } else {
                LedPattern::BlinkSlow
            },
        );
    }

    fn log_status(&self) {
        let snap = self.stats.snapshot();
        tracing::info!(
            role = %self.role,
            uptime_s = self.state.uptime().as_secs(),
            link = if self.state.link_up() { "up" } else { "down" },
            rssi = ?self.state.rssi(),
            tx = snap.packets_sent,
            rx = snap.packets_received,
            lost = snap.packets_lost,
            loss = %format!("{:.2}%", snap.loss_percent()),
            ptt = %self.state.ptt_state(),
            call = %self.state.call_state(),
            "Status"
        );

        if let Some(battery) = self.state.battery() {
            tracing::info!(
                voltage = %format!("{:.2}V", battery.voltage),
                percent = battery.percent,
                low = battery.low,
                "Battery"
            );
        }
        if let Some(line) = &self.line {
            tracing::info!(
                input = %format!("{:.3}", line.input_level()),
                output = %format!("{:.3}", line.output_level()),
                dc_fault = line.dc_fault(),
                "Party line"
            );
        }
    }

    /// Suspend until a button or timer wakes us.
    ///
    /// Returns `Some(DeepSleep)` when the timer wake found deep sleep due.
    pub fn light_sleep(&mut self, sleep: &mut dyn SleepControl, stop: &RunFlag) -> Option<SessionExit> {
        tracing::info!(idle_s = self.gate.clock().idle().as_secs(), "Entering light sleep");
        self.state.set_power_state(PowerState::LightSleep);
        self.update_leds();
        self.link.link().set_radio_enabled(false);

        let exit = loop {
            let now = self.gate.clock().now_ms();
            let max = self
                .gate
                .until_deep_sleep_at(now)
                .unwrap_or(LIGHT_SLEEP_SLICE);

            match sleep.light_sleep(max, stop.stop_requested()) {
                WakeReason::Button => {
                    self.gate.woke_at(self.gate.clock().now_ms());
                    break None;
                }
                WakeReason::Stop => break None,
                WakeReason::Timer => {
                    if self.gate.evaluate() == PowerDecision::EnterDeepSleep {
                        break Some(SessionExit::DeepSleep);
                    }
                }
            }
        };

        self.link.link().set_radio_enabled(true);
        if exit.is_none() {
            self.state.set_power_state(PowerState::Active);
            self.update_leds();
        }
        exit
    }
}

/// One boot-to-exit run of the device
pub struct Session {
    config: AppConfig,
    peripherals: Peripherals,
    transport: Arc<UdpTransport>,
    state: Arc<SharedState>,
    stop: RunFlag,
}

impl Session {
    /// Bind the transport for the configured role
    pub fn new(config: AppConfig, peripherals: Peripherals, stop: RunFlag) -> Result<Self> {
        let transport = Arc::new(UdpTransport::bind(&config.network, config.device.role)?);
        Self::with_transport(config, peripherals, transport, stop)
    }

    /// Use an already bound transport
    pub fn with_transport(
        config: AppConfig,
        peripherals: Peripherals,
        transport: Arc<UdpTransport>,
        stop: RunFlag,
    ) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(SharedState::new(config.device.role));
        Ok(Self {
            config,
            peripherals,
            transport,
            state,
            stop,
        })
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn transport(&self) -> &Arc<UdpTransport> {
        &self.transport
    }

    /// Self-test, spawn the tasks, run the control loop until stop or
    /// deep sleep, then tear everything down.
    pub fn run(self) -> Result<SessionExit> {
        let Session {
            config,
            mut peripherals,
            transport,
            state,
            stop,
        } = self;
        let role = config.device.role;

        tracing::info!(
            role = %role,
            device_id = %format!("0x{:02X}", config.device.device_id),
            paired_id = %format!("0x{:02X}", config.device.paired_id),
            version = crate::constants::VERSION,
            "Starting session"
        );

        run_self_test(&config, &mut peripherals).enforce(config.device.simulate_hardware)?;

        let encoder = OpusEncoder::new(&config.audio)?;
        let decoder = OpusDecoder::new(&config.audio)?;

        let Peripherals {
            source,
            sink,
            buttons,
            leds,
            battery,
            link,
            mut sleep,
        } = peripherals;

        // The base station's audio path is the wired party line
        let (source, sink, line): (Box<dyn AudioSource>, Box<dyn AudioSink>, _) = match role {
            Role::BeltPack => (source, sink, None),
            Role::BaseStation => {
                let status = Arc::new(LineStatus::new());
                (
                    Box::new(LineInput::new(source, Arc::clone(&status))),
                    Box::new(LineOutput::new(sink, Arc::clone(&status))),
                    Some(status),
                )
            }
        };

        let tasks = RunFlag::new();
        let (events_tx, events_rx) = events::channel();
        let (tones_tx, tones_rx) = crossbeam_channel::unbounded();
        let rx_queue = create_shared_buffer(config.network.rx_queue_frames);
        let led_bank = Arc::new(LedBank::new());
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let spawned = (|| -> Result<()> {
            let queue = Arc::clone(&rx_queue);
            let rx_state = Arc::clone(&state);
            let rx_events = events_tx.clone();
            let mut last_flags: Option<PacketFlags> = None;
            handles.push(transport.spawn_receiver(tasks.clone(), move |packet, _source| {
                // Already counted in the transport stats (received, and any
                // sequence gap as lost); asleep we only discard it
                if !rx_state.is_awake() {
                    return;
                }
                rx_state.activity().record_packet();

                let flags = PacketFlags::new(packet.flags.ptt(), packet.flags.call());
                if remote_flags_changed(&mut last_flags, flags, rx_state.remote_ptt()) {
                    let _ = rx_events.send(SessionEvent::RemoteFlags {
                        ptt: flags.ptt(),
                        call: flags.call(),
                    });
                }

                if !queue.push(packet) {
                    tracing::trace!("RX queue full, packet dropped");
                }
            })?);

            let pipeline = FramePipeline::new(&config.audio, Box::new(encoder), Box::new(decoder));
            let audio = AudioTask::new(
                &config.audio,
                source,
                sink,
                pipeline,
                transport.clone(),
                Arc::clone(&rx_queue),
                Arc::clone(&state),
            )
            .with_notifications(tones_rx);
            handles.push(audio.spawn(tasks.clone())?);

            handles.push(ButtonPoller::new(buttons, &config.ptt).spawn(events_tx.clone(), tasks.clone())?);

            if let Some(sensor) = battery {
                let monitor = BatteryMonitor::new(config.battery.clone());
                handles.push(monitor.spawn(sensor, events_tx.clone(), tasks.clone())?);
            }

            handles.push(
                LedRenderer::new(Arc::clone(&led_bank), leds, config.led.clone()).spawn(tasks.clone())?,
            );
            Ok(())
        })();

        let exit = spawned.map(|()| {
            let mut orchestrator = Orchestrator::new(
                &config,
                Arc::clone(&state),
                link,
                led_bank,
                tones_tx,
                Arc::clone(transport.stats()),
            );
            if let Some(line) = line {
                orchestrator = orchestrator.with_line_status(line);
            }

            control_loop(
                &mut orchestrator,
                &events_rx,
                sleep.as_mut(),
                &stop,
                config.power.housekeeping_interval(),
            )
        });

        tasks.stop();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("task").to_string();
            if handle.join().is_err() {
                tracing::error!(task = %name, "Task panicked");
            }
        }

        let exit = exit?;
        if exit == SessionExit::DeepSleep {
            state.set_power_state(PowerState::DeepSleep);
            tracing::info!("Entering deep sleep");
            if sleep.deep_sleep(stop.stop_requested()) == WakeReason::Stop {
                return Ok(SessionExit::Shutdown);
            }
            tracing::info!("Woke from deep sleep, restarting");
        }

        let snap = transport.stats().snapshot();
        tracing::info!(
            tx = snap.packets_sent,
            rx = snap.packets_received,
            lost = snap.packets_lost,
            "Session ended"
        );
        Ok(exit)
    }
}

/// Whether a received packet's flags need to reach the orchestrator.
///
/// Compares against the last flags seen and against the published remote
/// PTT, which the audio task clears on its own when the stream ends.
fn remote_flags_changed(last: &mut Option<PacketFlags>, flags: PacketFlags, remote_ptt: bool) -> bool {
    let changed = *last != Some(flags) || flags.ptt() != remote_ptt;
    *last = Some(flags);
    changed
}

fn control_loop(
    orchestrator: &mut Orchestrator,
    events: &EventReceiver,
    sleep: &mut dyn SleepControl,
    stop: &RunFlag,
    interval: Duration,
) -> SessionExit {
    let ticker = tick(interval);

    while stop.is_running() {
        select! {
            recv(events) -> event => {
                if let Ok(event) = event {
                    orchestrator.handle_event(event);
                }
            }
            recv(ticker) -> _ => {
                match orchestrator.housekeeping() {
                    PowerDecision::Stay => {}
                    PowerDecision::EnterLightSleep => {
                        if let Some(exit) = orchestrator.light_sleep(sleep, stop) {
                            return exit;
                        }
                    }
                    PowerDecision::EnterDeepSleep => return SessionExit::DeepSleep,
                }
            }
            default(STOP_POLL) => {}
        }
    }

    SessionExit::Shutdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ptt::PttState;
    use crate::hal::sim::{SimButtons, SimLink, SimSleep};
    use crate::hal::Button;
    use crate::power::battery::{BatteryStatus, BatteryUpdate};
    use crossbeam_channel::Receiver;

    struct Fixture {
        orchestrator: Orchestrator,
        state: Arc<SharedState>,
        leds: Arc<LedBank>,
        tones: Receiver<Notification>,
        link: SimLink,
    }

    fn fixture(role: Role) -> Fixture {
        let config = AppConfig::for_role(role);
        let state = Arc::new(SharedState::new(role));
        let leds = Arc::new(LedBank::new());
        let link = SimLink::new();
        let (tx, tones) = crossbeam_channel::unbounded();
        let orchestrator = Orchestrator::new(
            &config,
            Arc::clone(&state),
            Arc::new(link.clone()),
            Arc::clone(&leds),
            tx,
            Arc::new(TransportStats::new()),
        );
        Fixture {
            orchestrator,
            state,
            leds,
            tones,
            link,
        }
    }

    fn ptt(pressed: bool, hold_ms: u32) -> SessionEvent {
        SessionEvent::Button(ButtonEvent::Ptt { pressed, hold_ms })
    }

    #[test]
    fn test_ptt_events_drive_shared_state() {
        let mut f = fixture(Role::BeltPack);

        f.orchestrator.handle_event(ptt(true, 0));
        assert_eq!(f.state.ptt_state(), PttState::Latched);
        assert_eq!(f.leds.get(Led::Ptt), LedPattern::On);

        f.orchestrator.handle_event(ptt(true, 250));
        assert_eq!(f.state.ptt_state(), PttState::Momentary);

        f.orchestrator.handle_event(ptt(false, 400));
        assert_eq!(f.state.ptt_state(), PttState::Idle);
        assert_eq!(f.leds.get(Led::Ptt), LedPattern::Off);
    }

    #[test]
    fn test_base_station_ignores_ptt() {
        let mut f = fixture(Role::BaseStation);
        f.orchestrator.handle_event(ptt(true, 0));
        assert_eq!(f.state.ptt_state(), PttState::Idle);
    }

    #[test]
    fn test_call_handshake() {
        let mut f = fixture(Role::BeltPack);

        f.orchestrator
            .handle_event(SessionEvent::Button(ButtonEvent::Call { pressed: true }));
        assert_eq!(f.state.call_state(), CallState::Outgoing);

        f.orchestrator.handle_event(SessionEvent::RemoteFlags {
            ptt: false,
            call: true,
        });
        assert_eq!(f.state.call_state(), CallState::Acknowledged);
        assert_eq!(f.tones.try_recv().ok(), Some(Notification::Call));

        f.orchestrator
            .handle_event(SessionEvent::Button(ButtonEvent::Call { pressed: false }));
        assert_eq!(f.state.call_state(), CallState::Incoming);
        assert_eq!(f.leds.get(Led::Call), LedPattern::BlinkFast);

        // Repeated flags do not re-ring
        f.orchestrator.handle_event(SessionEvent::RemoteFlags {
            ptt: true,
            call: true,
        });
        assert!(f.tones.try_recv().is_err());
        assert!(f.state.remote_ptt());
    }

    #[test]
    fn test_battery_alert_plays_tone() {
        let mut f = fixture(Role::BeltPack);
        let status = BatteryStatus {
            voltage: 3.2,
            percent: 28,
            low: true,
            critical: false,
        };
        f.orchestrator.handle_event(SessionEvent::Battery(BatteryUpdate {
            status,
            alert: Some(BatteryAlert::Low),
        }));
        assert_eq!(f.state.battery(), Some(status));
        assert_eq!(f.tones.try_recv().ok(), Some(Notification::BatteryLow));
    }

    #[test]
    fn test_housekeeping_link_transitions() {
        let mut f = fixture(Role::BeltPack);

        f.orchestrator.housekeeping_at(0);
        assert!(f.state.link_up());
        assert_eq!(f.state.rssi(), Some(-55));
        assert_eq!(f.tones.try_recv().ok(), Some(Notification::Connected));
        assert_eq!(f.leds.get(Led::Status), LedPattern::BlinkSlow);

        f.link.set_connected(false);
        f.orchestrator.housekeeping_at(1000);
        assert!(!f.state.link_up());
        assert_eq!(f.tones.try_recv().ok(), Some(Notification::Disconnected));
        assert_eq!(f.leds.get(Led::Status), LedPattern::Off);
    }

    #[test]
    fn test_disconnect_keeps_control_state() {
        let mut f = fixture(Role::BeltPack);
        f.orchestrator.housekeeping_at(0);
        f.orchestrator.handle_event(ptt(true, 0));

        f.link.set_connected(false);
        f.orchestrator.housekeeping_at(1000);
        assert_eq!(f.state.ptt_state(), PttState::Latched);
    }

    #[test]
    fn test_housekeeping_requests_light_sleep() {
        let mut f = fixture(Role::BeltPack);
        assert_eq!(f.orchestrator.housekeeping_at(89_999), PowerDecision::Stay);
        assert_eq!(
            f.orchestrator.housekeeping_at(90_000),
            PowerDecision::EnterLightSleep
        );
    }

    #[test]
    fn test_transmitting_counts_as_activity() {
        let mut f = fixture(Role::BeltPack);
        f.orchestrator.handle_event(ptt(true, 0));
        f.orchestrator.housekeeping_at(80_000);
        assert_eq!(f.orchestrator.housekeeping_at(120_000), PowerDecision::Stay);
    }

    #[test]
    fn test_base_station_never_sleeps() {
        let mut f = fixture(Role::BaseStation);
        assert_eq!(
            f.orchestrator.housekeeping_at(3 * 60 * 60 * 1000),
            PowerDecision::Stay
        );
    }

    #[test]
    fn test_light_sleep_button_wake() {
        let mut f = fixture(Role::BeltPack);
        let buttons = SimButtons::new();
        let mut sleep = SimSleep::new(buttons.clone());
        let (light, _) = sleep.counters();

        let now = f.orchestrator.gate().clock().now_ms();
        f.orchestrator.gate_mut().evaluate_at(now + 90_000);

        buttons.press(Button::Call);
        let exit = f.orchestrator.light_sleep(&mut sleep, &RunFlag::new());

        assert_eq!(exit, None);
        assert_eq!(light.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(f.state.power_state(), PowerState::Active);
        assert_eq!(f.orchestrator.gate().state(), PowerState::Active);
        assert!(f.link.radio_enabled());
    }

    #[test]
    fn test_remote_flags_dedup() {
        let mut last = None;
        let talking = PacketFlags::new(true, false);

        assert!(remote_flags_changed(&mut last, talking, false));
        assert!(!remote_flags_changed(&mut last, talking, true));
        assert!(remote_flags_changed(&mut last, PacketFlags::empty(), true));
        assert!(!remote_flags_changed(&mut last, PacketFlags::empty(), false));

        // Remote PTT was cleared by a stream timeout: the same flags report again
        let mut last = Some(talking);
        assert!(remote_flags_changed(&mut last, talking, false));
    }

    #[test]
    fn test_light_sleep_stop() {
        let mut f = fixture(Role::BeltPack);
        let mut sleep = SimSleep::new(SimButtons::new());
        let stop = RunFlag::new();
        stop.stop();
        assert_eq!(f.orchestrator.light_sleep(&mut sleep, &stop), None);
    }
}
