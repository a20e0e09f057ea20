//! Call signaling
//!
//! The call state is a pure function of two flags: our own call button
//! and the call bit last seen in the peer's packets.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CallState {
    #[default]
    Idle = 0,
    /// We are calling, no answer yet
    Outgoing = 1,
    /// The peer is calling us
    Incoming = 2,
    /// Both sides calling
    Acknowledged = 3,
}

impl CallState {
    pub fn from_flags(local: bool, remote: bool) -> Self {
        match (local, remote) {
            (false, false) => CallState::Idle,
            (true, false) => CallState::Outgoing,
            (false, true) => CallState::Incoming,
            (true, true) => CallState::Acknowledged,
        }
    }

    /// Whether our outgoing packets carry the call bit
    pub fn is_calling(self) -> bool {
        matches!(self, CallState::Outgoing | CallState::Acknowledged)
    }

    pub fn is_being_called(self) -> bool {
        matches!(self, CallState::Incoming | CallState::Acknowledged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "IDLE",
            CallState::Outgoing => "OUTGOING",
            CallState::Incoming => "INCOMING",
            CallState::Acknowledged => "ACKNOWLEDGED",
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CallState::Outgoing,
            2 => CallState::Incoming,
            3 => CallState::Acknowledged,
            _ => CallState::Idle,
        }
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct CallMachine {
    state: CallState,
    local: bool,
    remote: bool,
}

impl CallMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn remote(&self) -> bool {
        self.remote
    }

    pub fn is_calling(&self) -> bool {
        self.state.is_calling()
    }

    /// Call button pressed or released
    pub fn button_event(&mut self, pressed: bool) -> Option<CallState> {
        tracing::info!("Call button {}", if pressed { "pressed" } else { "released" });
        self.local = pressed;
        self.update()
    }

    /// Call bit from the peer. Only a change of value recomputes the state.
    pub fn remote_signal(&mut self, calling: bool) -> Option<CallState> {
        if self.remote == calling {
            return None;
        }
        tracing::info!("Remote call signal: {}", if calling { "ON" } else { "OFF" });
        self.remote = calling;
        self.update()
    }

    /// Clear both flags
    pub fn clear(&mut self) -> Option<CallState> {
        tracing::info!("Call cleared");
        self.local = false;
        self.remote = false;
        self.update()
    }

    fn update(&mut self) -> Option<CallState> {
        let next = CallState::from_flags(self.local, self.remote);
        if next == self.state {
            return None;
        }
        tracing::info!("Call state: {} -> {}", self.state, next);
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truth_table() {
        assert_eq!(CallState::from_flags(false, false), CallState::Idle);
        assert_eq!(CallState::from_flags(true, false), CallState::Outgoing);
        assert_eq!(CallState::from_flags(false, true), CallState::Incoming);
        assert_eq!(CallState::from_flags(true, true), CallState::Acknowledged);
    }

    #[test]
    fn test_outgoing_acknowledged_incoming() {
        let mut call = CallMachine::new();
        assert_eq!(call.button_event(true), Some(CallState::Outgoing));
        assert!(call.is_calling());

        assert_eq!(call.remote_signal(true), Some(CallState::Acknowledged));
        assert!(call.is_calling());

        assert_eq!(call.button_event(false), Some(CallState::Incoming));
        assert!(!call.is_calling());
        assert!(call.state().is_being_called());
    }

    #[test]
    fn test_remote_is_edge_triggered() {
        let mut call = CallMachine::new();
        assert_eq!(call.remote_signal(true), Some(CallState::Incoming));
        assert_eq!(call.remote_signal(true), None);
        assert_eq!(call.remote_signal(false), Some(CallState::Idle));
        assert_eq!(call.remote_signal(false), None);
    }

    #[test]
    fn test_clear() {
        let mut call = CallMachine::new();
        call.button_event(true);
        call.remote_signal(true);
        assert_eq!(call.clear(), Some(CallState::Idle));
        assert!(!call.local() && !call.remote());
    }
}
