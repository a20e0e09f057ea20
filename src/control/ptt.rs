//! PTT (Push-To-Talk) state machine
//!
//! A press latches transmit on. Holding past the hold threshold turns the
//! latch into momentary talk, which always ends on release. Releasing a
//! latch toggles it off.

/// PTT state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PttState {
    #[default]
    Idle = 0,
    Latched = 1,
    Momentary = 2,
}

impl PttState {
    #[inline]
    pub fn is_transmitting(self) -> bool {
        matches!(self, PttState::Latched | PttState::Momentary)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PttState::Idle => "IDLE",
            PttState::Latched => "LATCHED",
            PttState::Momentary => "MOMENTARY",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PttState::Latched,
            2 => PttState::Momentary,
            _ => PttState::Idle,
        }
    }
}

impl std::fmt::Display for PttState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted on every state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PttChange {
    pub state: PttState,
    pub transmitting: bool,
}

/// PTT controller
#[derive(Debug)]
pub struct PttMachine {
    state: PttState,
    hold_threshold_ms: u32,
    button_pressed: bool,
}

impl PttMachine {
    pub fn new(hold_threshold_ms: u32) -> Self {
        Self {
            state: PttState::Idle,
            hold_threshold_ms,
            button_pressed: false,
        }
    }

    #[inline]
    pub fn state(&self) -> PttState {
        self.state
    }

    #[inline]
    pub fn is_transmitting(&self) -> bool {
        self.state.is_transmitting()
    }

    /// Last level reported by the button
    pub fn button_pressed(&self) -> bool {
        self.button_pressed
    }

    /// Feed a debounced button report.
    ///
    /// `hold_time_ms` is 0 on the initial press and the time since the
    /// press for hold notifications and the release.
    pub fn button_event(&mut self, pressed: bool, hold_time_ms: u32) -> Option<PttChange> {
        self.button_pressed = pressed;

        let next = match (self.state, pressed) {
            (PttState::Idle, true) => PttState::Latched,
            (PttState::Latched, true) if hold_time_ms >= self.hold_threshold_ms => {
                PttState::Momentary
            }
            (PttState::Latched, false) | (PttState::Momentary, false) => PttState::Idle,
            (state, _) => state,
        };

        self.set_state(next)
    }

    /// Drop back to idle regardless of the button
    pub fn force_idle(&mut self) -> Option<PttChange> {
        self.set_state(PttState::Idle)
    }

    fn set_state(&mut self, next: PttState) -> Option<PttChange> {
        if next == self.state {
            return None;
        }
        tracing::info!("PTT state: {} -> {}", self.state, next);
        self.state = next;
        Some(PttChange {
            state: next,
            transmitting: next.is_transmitting(),
        })
    }
}
