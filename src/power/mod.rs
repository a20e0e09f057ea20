//! Power management: activity tracking, sleep gating, battery

pub mod activity;
pub mod battery;
pub mod gate;

pub use activity::ActivityClock;
pub use battery::{BatteryAlert, BatteryMonitor, BatteryStatus, BatteryUpdate};
pub use gate::{PowerDecision, PowerGate, PowerState};
