//! State shared between the session tasks
//!
//! Each field is synchronized on its own: scalars are atomics, the
//! battery record is a small mutex-guarded struct. The state machines
//! live in the orchestrator, which publishes their results here for the
//! audio, receive and LED tasks to read.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Role;
use crate::control::call::CallState;
use crate::control::ptt::PttState;
use crate::power::activity::ActivityClock;
use crate::power::battery::BatteryStatus;
use crate::power::gate::PowerState;

const STOP_POLL: Duration = Duration::from_millis(20);

/// Cooperative stop signal observed by every task.
///
/// Cloning shares the flag. Once stopped it stays stopped.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.0.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Set once a stop was requested, for sleep controllers
    pub fn stop_requested(&self) -> &AtomicBool {
        &self.0
    }

    /// Sleep up to `duration`, waking early on stop.
    /// Returns whether the session is still running.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(STOP_POLL));
        }
        false
    }
}

const RSSI_UNKNOWN: i8 = i8::MIN;

#[derive(Debug)]
pub struct SharedState {
    role: Role,
    started: Instant,
    ptt: AtomicU8,
    call: AtomicU8,
    remote_ptt: AtomicBool,
    power: AtomicU8,
    link_up: AtomicBool,
    rssi: AtomicI8,
    battery: Mutex<Option<BatteryStatus>>,
    activity: Arc<ActivityClock>,
}

impl SharedState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            started: Instant::now(),
            ptt: AtomicU8::new(PttState::Idle as u8),
            call: AtomicU8::new(CallState::Idle as u8),
            remote_ptt: AtomicBool::new(false),
            power: AtomicU8::new(PowerState::Active as u8),
            link_up: AtomicBool::new(false),
            rssi: AtomicI8::new(RSSI_UNKNOWN),
            battery: Mutex::new(None),
            activity: Arc::new(ActivityClock::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn activity(&self) -> &Arc<ActivityClock> {
        &self.activity
    }

    pub fn ptt_state(&self) -> PttState {
        PttState::from_u8(self.ptt.load(Ordering::Acquire))
    }

    pub fn set_ptt_state(&self, state: PttState) {
        self.ptt.store(state as u8, Ordering::Release);
    }

    pub fn is_transmitting(&self) -> bool {
        self.ptt_state().is_transmitting()
    }

    /// Whether the audio task encodes and sends the local input.
    ///
    /// The belt pack is gated by PTT; the base station's party line is
    /// always live.
    pub fn transmit_enabled(&self) -> bool {
        match self.role {
            Role::BeltPack => self.is_transmitting(),
            Role::BaseStation => true,
        }
    }

    pub fn call_state(&self) -> CallState {
        CallState::from_u8(self.call.load(Ordering::Acquire))
    }

    pub fn set_call_state(&self, state: CallState) {
        self.call.store(state as u8, Ordering::Release);
    }

    /// Call bit for outgoing packets
    pub fn local_calling(&self) -> bool {
        self.call_state().is_calling()
    }

    pub fn remote_ptt(&self) -> bool {
        self.remote_ptt.load(Ordering::Relaxed)
    }

    pub fn set_remote_ptt(&self, active: bool) {
        self.remote_ptt.store(active, Ordering::Relaxed);
    }

    pub fn power_state(&self) -> PowerState {
        PowerState::from_u8(self.power.load(Ordering::Acquire))
    }

    pub fn set_power_state(&self, state: PowerState) {
        self.power.store(state as u8, Ordering::Release);
    }

    /// Normal audio/network operation allowed
    pub fn is_awake(&self) -> bool {
        self.power_state() == PowerState::Active
    }

    pub fn link_up(&self) -> bool {
        self.link_up.load(Ordering::Relaxed)
    }

    pub fn set_link(&self, up: bool, rssi: Option<i8>) {
        self.link_up.store(up, Ordering::Relaxed);
        self.rssi.store(rssi.unwrap_or(RSSI_UNKNOWN), Ordering::Relaxed);
    }

    pub fn rssi(&self) -> Option<i8> {
        match self.rssi.load(Ordering::Relaxed) {
            RSSI_UNKNOWN => None,
            v => Some(v),
        }
    }

    pub fn battery(&self) -> Option<BatteryStatus> {
        *self.battery.lock()
    }

    pub fn set_battery(&self, status: BatteryStatus) {
        *self.battery.lock() = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmit_gate_by_role() {
        let pack = SharedState::new(Role::BeltPack);
        assert!(!pack.transmit_enabled());
        pack.set_ptt_state(PttState::Momentary);
        assert!(pack.transmit_enabled());

        let base = SharedState::new(Role::BaseStation);
        assert!(base.transmit_enabled());
    }

    #[test]
    fn test_call_flag_follows_state() {
        let state = SharedState::new(Role::BeltPack);
        state.set_call_state(CallState::Incoming);
        assert!(!state.local_calling());
        state.set_call_state(CallState::Acknowledged);
        assert!(state.local_calling());
    }

    #[test]
    fn test_link_and_rssi() {
        let state = SharedState::new(Role::BeltPack);
        assert_eq!(state.rssi(), None);
        state.set_link(true, Some(-60));
        assert!(state.link_up());
        assert_eq!(state.rssi(), Some(-60));
    }

    #[test]
    fn test_run_flag_sleep_interrupted() {
        let run = RunFlag::new();
        assert!(run.sleep(Duration::from_millis(5)));

        let other = run.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            other.stop();
        });
        let start = Instant::now();
        assert!(!run.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
