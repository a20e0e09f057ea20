//! Light/deep sleep decisions
//!
//! Evaluated on the housekeeping tick against the [`ActivityClock`].
//! Light sleep keeps state and resumes in place; deep sleep ends the
//! session and the device starts over on wake.

use std::sync::Arc;
use std::time::Duration;

use crate::config::PowerConfig;
use crate::power::activity::ActivityClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PowerState {
    #[default]
    Active = 0,
    LightSleep = 1,
    DeepSleep = 2,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::Active => "ACTIVE",
            PowerState::LightSleep => "LIGHT_SLEEP",
            PowerState::DeepSleep => "DEEP_SLEEP",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PowerState::LightSleep,
            2 => PowerState::DeepSleep,
            _ => PowerState::Active,
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDecision {
    Stay,
    EnterLightSleep,
    EnterDeepSleep,
}

pub struct PowerGate {
    clock: Arc<ActivityClock>,
    state: PowerState,
    light_threshold: Option<Duration>,
    deep_threshold: Option<Duration>,
}

impl PowerGate {
    pub fn new(config: &PowerConfig, clock: Arc<ActivityClock>) -> Self {
        Self {
            clock,
            state: PowerState::Active,
            light_threshold: config
                .light_sleep_enabled
                .then(|| config.light_sleep_threshold()),
            deep_threshold: config
                .deep_sleep_enabled
                .then(|| config.deep_sleep_threshold()),
        }
    }

    /// A gate that never sleeps (base station)
    pub fn disabled(clock: Arc<ActivityClock>) -> Self {
        Self {
            clock,
            state: PowerState::Active,
            light_threshold: None,
            deep_threshold: None,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn clock(&self) -> &Arc<ActivityClock> {
        &self.clock
    }

    pub fn deep_threshold(&self) -> Option<Duration> {
        self.deep_threshold
    }

    /// Time left before deep sleep would be due
    pub fn until_deep_sleep_at(&self, now_ms: u64) -> Option<Duration> {
        self.deep_threshold
            .map(|deep| deep.saturating_sub(self.clock.idle_at(now_ms)))
    }

    pub fn evaluate(&mut self) -> PowerDecision {
        self.evaluate_at(self.clock.now_ms())
    }

    /// Compare idle time against both thresholds.
    ///
    /// Any activity since the last sleep decision brings the gate back to
    /// `Active` first. Light sleep is requested once per idle period.
    pub fn evaluate_at(&mut self, now_ms: u64) -> PowerDecision {
        let idle = self.clock.idle_at(now_ms);

        if self.state == PowerState::LightSleep
            && self.light_threshold.map_or(true, |light| idle < light)
        {
            self.set_state(PowerState::Active);
        }

        if self.deep_threshold.is_some_and(|deep| idle >= deep) {
            self.set_state(PowerState::DeepSleep);
            return PowerDecision::EnterDeepSleep;
        }

        if self.state == PowerState::Active && self.light_threshold.is_some_and(|light| idle >= light) {
            self.set_state(PowerState::LightSleep);
            return PowerDecision::EnterLightSleep;
        }

        PowerDecision::Stay
    }

    pub fn activity(&mut self) {
        self.activity_at(self.clock.now_ms());
    }

    /// Local interaction: restart the idle timer and wake up
    pub fn activity_at(&mut self, now_ms: u64) {
        self.clock.record_interaction_at(now_ms);
        self.set_state(PowerState::Active);
    }

    /// Resumed from light sleep by a wake source
    pub fn woke_at(&mut self, now_ms: u64) {
        tracing::info!("Woke from light sleep");
        self.clock.reset_at(now_ms);
        self.set_state(PowerState::Active);
    }

    fn set_state(&mut self, next: PowerState) {
        if self.state != next {
            tracing::info!("Power state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
