//! Button handling
//!
//! Two-stage debounce: the edge interrupt latches the raw level (see
//! [`ButtonInput`]), and a 10 ms poller only reports a change once the
//! new level has held for the debounce delay. The poller also emits
//! periodic "still held" reports for PTT so the state machine can switch
//! a latch into momentary talk.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::PttConfig;
use crate::error::Result;
use crate::hal::{Button, ButtonInput};
use crate::session::events::{EventSender, SessionEvent};
use crate::session::state::RunFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// `hold_ms` is 0 on the initial press, the time since the press otherwise
    Ptt { pressed: bool, hold_ms: u32 },
    Call { pressed: bool },
}

/// Confirms a level change only after it has been stable for `settle_ms`
#[derive(Debug)]
pub struct Debouncer {
    stable: bool,
    pending_since: Option<u64>,
    settle_ms: u64,
}

impl Debouncer {
    pub fn new(settle_ms: u32) -> Self {
        Self {
            stable: false,
            pending_since: None,
            settle_ms: settle_ms as u64,
        }
    }

    pub fn level(&self) -> bool {
        self.stable
    }

    /// Feed a raw sample; returns the new level on a confirmed change
    pub fn update(&mut self, raw: bool, now_ms: u64) -> Option<bool> {
        if raw == self.stable {
            self.pending_since = None;
            return None;
        }

        let since = *self.pending_since.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) >= self.settle_ms {
            self.stable = raw;
            self.pending_since = None;
            Some(raw)
        } else {
            None
        }
    }
}

/// Hold timing for the PTT button
#[derive(Debug)]
pub struct PttHoldTracker {
    pressed_at: Option<u64>,
    last_report: u64,
    threshold_ms: u64,
    repeat_ms: u64,
}

impl PttHoldTracker {
    pub fn new(threshold_ms: u32, repeat_ms: u32) -> Self {
        Self {
            pressed_at: None,
            last_report: 0,
            threshold_ms: threshold_ms as u64,
            repeat_ms: repeat_ms as u64,
        }
    }

    /// Debounced edge
    pub fn edge(&mut self, pressed: bool, now_ms: u64) -> ButtonEvent {
        if pressed {
            self.pressed_at = Some(now_ms);
            self.last_report = now_ms;
            ButtonEvent::Ptt {
                pressed: true,
                hold_ms: 0,
            }
        } else {
            let hold = self
                .pressed_at
                .take()
                .map_or(0, |at| now_ms.saturating_sub(at));
            ButtonEvent::Ptt {
                pressed: false,
                hold_ms: hold as u32,
            }
        }
    }

    /// Hold report once past the threshold, at most every `repeat_ms`
    pub fn poll(&mut self, now_ms: u64) -> Option<ButtonEvent> {
        let at = self.pressed_at?;
        let held = now_ms.saturating_sub(at);
        if held >= self.threshold_ms && now_ms.saturating_sub(self.last_report) >= self.repeat_ms {
            self.last_report = now_ms;
            Some(ButtonEvent::Ptt {
                pressed: true,
                hold_ms: held as u32,
            })
        } else {
            None
        }
    }
}

/// Polls both buttons and turns level changes into [`ButtonEvent`]s
pub struct ButtonPoller {
    input: Arc<dyn ButtonInput>,
    ptt: Debouncer,
    call: Debouncer,
    hold: PttHoldTracker,
    interval: Duration,
}

impl ButtonPoller {
    pub fn new(input: Arc<dyn ButtonInput>, config: &PttConfig) -> Self {
        Self {
            input,
            ptt: Debouncer::new(config.debounce_ms),
            call: Debouncer::new(config.debounce_ms),
            hold: PttHoldTracker::new(config.hold_threshold_ms, config.hold_repeat_ms),
            interval: Duration::from_millis(config.poll_interval_ms.max(1) as u64),
        }
    }

    /// One polling pass at `now_ms`
    pub fn poll_at(&mut self, now_ms: u64, mut emit: impl FnMut(ButtonEvent)) {
        if let Some(pressed) = self.ptt.update(self.input.is_pressed(Button::Ptt), now_ms) {
            emit(self.hold.edge(pressed, now_ms));
        } else if let Some(event) = self.hold.poll(now_ms) {
            emit(event);
        }

        if let Some(pressed) = self.call.update(self.input.is_pressed(Button::Call), now_ms) {
            emit(ButtonEvent::Call { pressed });
        }
    }

    pub fn spawn(mut self, events: EventSender, run: RunFlag) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("buttons".into())
            .spawn(move || {
                tracing::info!("Button monitor started");
                let start = Instant::now();

                while run.is_running() {
                    let now_ms = start.elapsed().as_millis() as u64;
                    let mut closed = false;
                    self.poll_at(now_ms, |event| {
                        tracing::debug!(?event, "Button");
                        closed |= events.send(SessionEvent::Button(event)).is_err();
                    });
                    if closed {
                        break;
                    }
                    thread::sleep(self.interval);
                }

                tracing::info!("Button monitor stopped");
            })?;

        Ok(handle)
    }
}
