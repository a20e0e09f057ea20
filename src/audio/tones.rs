//! Notification tones
//!
//! Short sine beeps mixed into the headset output: call alerts, link
//! up/down and battery warnings.

use std::f32::consts::TAU;

use crate::constants::FULL_SCALE;

/// One beep pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneSpec {
    pub frequency_hz: u16,
    pub duration_ms: u16,
    pub repeat_count: u8,
    /// Silence between repeats
    pub repeat_interval_ms: u16,
}

impl ToneSpec {
    /// Total pattern length, including gaps
    pub fn total_ms(&self) -> u32 {
        let repeats = self.repeat_count.max(1) as u32;
        repeats * self.duration_ms as u32 + (repeats - 1) * self.repeat_interval_ms as u32
    }
}

/// Events that have an audible cue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Call,
    Connected,
    Disconnected,
    BatteryLow,
    BatteryCritical,
}

impl Notification {
    pub fn tone(self) -> ToneSpec {
        match self {
            Notification::Call => ToneSpec {
                frequency_hz: 1000,
                duration_ms: 200,
                repeat_count: 1,
                repeat_interval_ms: 0,
            },
            Notification::Connected => ToneSpec {
                frequency_hz: 800,
                duration_ms: 100,
                repeat_count: 2,
                repeat_interval_ms: 100,
            },
            Notification::Disconnected => ToneSpec {
                frequency_hz: 400,
                duration_ms: 500,
                repeat_count: 1,
                repeat_interval_ms: 0,
            },
            Notification::BatteryLow => ToneSpec {
                frequency_hz: 600,
                duration_ms: 100,
                repeat_count: 1,
                repeat_interval_ms: 0,
            },
            Notification::BatteryCritical => ToneSpec {
                frequency_hz: 600,
                duration_ms: 100,
                repeat_count: 3,
                repeat_interval_ms: 150,
            },
        }
    }
}

/// Write a sine into `buffer`, continuing from `phase` (radians)
pub fn generate_sine(buffer: &mut [i16], frequency_hz: f32, amplitude: f32, sample_rate: u32, phase: &mut f32) {
    let increment = TAU * frequency_hz / sample_rate as f32;
    let peak = FULL_SCALE * amplitude.clamp(0.0, 1.0);

    for sample in buffer.iter_mut() {
        *sample = (peak * phase.sin()) as i16;
        *phase += increment;
        if *phase >= TAU {
            *phase -= TAU;
        }
    }
}

/// Plays one pattern at a time, frame by frame
#[derive(Debug)]
pub struct TonePlayer {
    sample_rate: u32,
    amplitude: f32,
    current: Option<ToneSpec>,
    /// Samples of the current pattern already produced
    position: usize,
    phase: f32,
}

impl TonePlayer {
    pub fn new(sample_rate: u32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            amplitude,
            current: None,
            position: 0,
            phase: 0.0,
        }
    }

    /// Start a pattern, replacing whatever is playing
    pub fn play(&mut self, spec: ToneSpec) {
        tracing::debug!(
            frequency = spec.frequency_hz,
            duration_ms = spec.duration_ms,
            repeats = spec.repeat_count,
            "Playing tone"
        );
        self.current = Some(spec);
        self.position = 0;
        self.phase = 0.0;
    }

    pub fn notify(&mut self, notification: Notification) {
        self.play(notification.tone());
    }

    pub fn stop(&mut self) {
        self.current = None;
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    fn ms_to_samples(&self, ms: u32) -> usize {
        self.sample_rate as usize * ms as usize / 1000
    }

    /// Produce the next frame of the pattern into `out`.
    ///
    /// Returns false (and leaves `out` untouched) when nothing is playing.
    pub fn fill(&mut self, out: &mut [i16]) -> bool {
        let Some(spec) = self.current else {
            return false;
        };

        let beep = self.ms_to_samples(spec.duration_ms as u32);
        let cycle = beep + self.ms_to_samples(spec.repeat_interval_ms as u32);
        let total = self.ms_to_samples(spec.total_ms());

        for sample in out.iter_mut() {
            if self.position >= total || cycle == 0 {
                *sample = 0;
                continue;
            }
            if self.position % cycle < beep {
                generate_sine(
                    std::slice::from_mut(sample),
                    spec.frequency_hz as f32,
                    self.amplitude,
                    self.sample_rate,
                    &mut self.phase,
                );
            } else {
                *sample = 0;
                self.phase = 0.0;
            }
            self.position += 1;
        }

        if self.position >= total {
            self.current = None;
        }
        true
    }
}
