//! Indicator LEDs
//!
//! The orchestrator sets a pattern per LED in a shared [`LedBank`]; a
//! small periodic task renders the patterns to the driver.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::LedConfig;
use crate::error::Result;
use crate::hal::{Led, LedDriver};
use crate::session::state::RunFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LedPattern {
    #[default]
    Off = 0,
    On = 1,
    /// 1 Hz, 50% duty
    BlinkSlow = 2,
    /// 5 Hz, 50% duty
    BlinkFast = 3,
}

impl LedPattern {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LedPattern::On,
            2 => LedPattern::BlinkSlow,
            3 => LedPattern::BlinkFast,
            _ => LedPattern::Off,
        }
    }

    /// Level at `tick_ms` into the blink cycle
    pub fn level_at(self, tick_ms: u64, config: &LedConfig) -> bool {
        let blink = |period: u32| {
            let period = period.max(2) as u64;
            tick_ms % period < period / 2
        };
        match self {
            LedPattern::Off => false,
            LedPattern::On => true,
            LedPattern::BlinkSlow => blink(config.slow_blink_ms),
            LedPattern::BlinkFast => blink(config.fast_blink_ms),
        }
    }
}

/// Desired pattern per LED
#[derive(Debug, Default)]
pub struct LedBank {
    patterns: [AtomicU8; Led::COUNT],
}

impl LedBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, led: Led, pattern: LedPattern) {
        let previous = self.patterns[led.index()].swap(pattern as u8, Ordering::Relaxed);
        if previous != pattern as u8 {
            tracing::trace!(?led, ?pattern, "LED pattern");
        }
    }

    pub fn get(&self, led: Led) -> LedPattern {
        LedPattern::from_u8(self.patterns[led.index()].load(Ordering::Relaxed))
    }

    pub fn all_off(&self) {
        for led in Led::ALL {
            self.set(led, LedPattern::Off);
        }
    }
}

/// Renders the bank onto a driver, writing only level changes
pub struct LedRenderer {
    bank: Arc<LedBank>,
    driver: Box<dyn LedDriver>,
    config: LedConfig,
    levels: [Option<bool>; Led::COUNT],
}

impl LedRenderer {
    pub fn new(bank: Arc<LedBank>, driver: Box<dyn LedDriver>, config: LedConfig) -> Self {
        Self {
            bank,
            driver,
            config,
            levels: [None; Led::COUNT],
        }
    }

    pub fn render_at(&mut self, tick_ms: u64) {
        for led in Led::ALL {
            let on = self.bank.get(led).level_at(tick_ms, &self.config);
            let slot = &mut self.levels[led.index()];
            if *slot != Some(on) {
                self.driver.set(led, on);
                *slot = Some(on);
            }
        }
    }

    pub fn spawn(mut self, run: RunFlag) -> Result<JoinHandle<()>> {
        let tick = Duration::from_millis(self.config.tick_ms.max(1) as u64);

        let handle = thread::Builder::new()
            .name("leds".into())
            .spawn(move || {
                tracing::info!("LED task started");
                let mut tick_ms = 0u64;

                while run.is_running() {
                    self.render_at(tick_ms);
                    tick_ms += tick.as_millis() as u64;
                    thread::sleep(tick);
                }

                for led in Led::ALL {
                    self.driver.set(led, false);
                }
                tracing::info!("LED task stopped");
            })?;

        Ok(handle)
    }
}
