//! Hardware abstraction layer
//!
//! Thin collaborator traits for everything outside the core: the codec
//! front end, buttons, LEDs, battery ADC, the radio link and the sleep
//! controller. Business logic stays in the core modules, HAL is just I/O.

#[cfg(feature = "host-audio")]
pub mod host;
pub mod sim;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AudioError, Result};

/// Blocking frame input (microphone or party-line receive)
pub trait AudioSource: Send {
    /// Fill `frame`, blocking for at most about one frame period
    fn read(&mut self, frame: &mut [i16]) -> std::result::Result<(), AudioError>;
}

/// Blocking frame output (headset or party-line send)
pub trait AudioSink: Send {
    fn write(&mut self, frame: &[i16]) -> std::result::Result<(), AudioError>;
}

impl<T: AudioSource + ?Sized> AudioSource for Box<T> {
    fn read(&mut self, frame: &mut [i16]) -> std::result::Result<(), AudioError> {
        (**self).read(frame)
    }
}

impl<T: AudioSink + ?Sized> AudioSink for Box<T> {
    fn write(&mut self, frame: &[i16]) -> std::result::Result<(), AudioError> {
        (**self).write(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Ptt,
    Call,
}

/// Raw button levels as latched by the edge interrupt
pub trait ButtonInput: Send + Sync {
    fn is_pressed(&self, button: Button) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Led {
    Power,
    Status,
    Call,
    /// Own PTT on the belt pack, mirrors the remote PTT on the base station
    Ptt,
    /// Incoming audio (belt pack)
    Receive,
}

impl Led {
    pub const COUNT: usize = 5;

    pub const ALL: [Led; Led::COUNT] = [Led::Power, Led::Status, Led::Call, Led::Ptt, Led::Receive];

    pub fn index(self) -> usize {
        self as usize
    }
}

pub trait LedDriver: Send {
    fn set(&mut self, led: Led, on: bool);
}

/// Battery voltage ADC
pub trait BatterySensor: Send {
    fn read_voltage(&mut self) -> Result<f32>;
}

/// Radio link status and control
pub trait Link: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Signal strength in dBm, when associated
    fn rssi(&self) -> Option<i8>;

    /// Request a fresh association attempt
    fn reconnect(&self) -> Result<()>;

    /// Pause or resume the radio (light sleep)
    fn set_radio_enabled(&self, enabled: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Button,
    Timer,
    /// Shutdown was requested while asleep
    Stop,
}

pub trait SleepControl: Send {
    /// Suspend until a button wakes the device or `max` elapses.
    /// Returns early with [`WakeReason::Stop`] once `stop` is set.
    fn light_sleep(&mut self, max: Duration, stop: &AtomicBool) -> WakeReason;

    /// Power down until the PTT button is pressed. On real hardware this
    /// never returns; the device resets instead.
    fn deep_sleep(&mut self, stop: &AtomicBool) -> WakeReason;
}

/// Everything a session needs from the board
pub struct Peripherals {
    pub source: Box<dyn AudioSource>,
    pub sink: Box<dyn AudioSink>,
    pub buttons: Arc<dyn ButtonInput>,
    pub leds: Box<dyn LedDriver>,
    pub battery: Option<Box<dyn BatterySensor>>,
    pub link: Arc<dyn Link>,
    pub sleep: Box<dyn SleepControl>,
}

impl std::fmt::Debug for Peripherals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripherals")
            .field("battery", &self.battery.is_some())
            .field("link_connected", &self.link.is_connected())
            .finish_non_exhaustive()
    }
}
