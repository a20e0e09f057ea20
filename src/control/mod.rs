//! Operator controls: PTT and call state machines, buttons, LEDs

pub mod button;
pub mod call;
pub mod led;
pub mod ptt;

pub use button::{ButtonEvent, ButtonPoller, Debouncer};
pub use call::{CallMachine, CallState};
pub use led::{LedBank, LedPattern, LedRenderer};
pub use ptt::{PttChange, PttMachine, PttState};
