//! Messages delivered to the orchestrator
//!
//! Producers (button poller, receive task, battery monitor) never touch
//! the state machines directly; they push one of these onto the session
//! channel and the orchestrator dispatches it.

use crossbeam_channel::{Receiver, Sender};

use crate::control::button::ButtonEvent;
use crate::power::battery::BatteryUpdate;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Debounced button edge or hold notification
    Button(ButtonEvent),
    /// The peer's PTT/call bits changed
    RemoteFlags { ptt: bool, call: bool },
    /// New battery reading (belt pack)
    Battery(BatteryUpdate),
}

pub type EventSender = Sender<SessionEvent>;
pub type EventReceiver = Receiver<SessionEvent>;

/// Unbounded so producers on real-time paths never block
pub fn channel() -> (EventSender, EventReceiver) {
    crossbeam_channel::unbounded()
}
