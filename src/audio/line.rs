//! Party-line interface (base station)
//!
//! The base station's "microphone" and "speaker" are the wired party line.
//! These adapters wrap the raw line input/output with level metering and
//! DC-offset fault detection; the rest of the pipeline sees an ordinary
//! [`AudioSource`] / [`AudioSink`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::processor::{dc_offset_detected, rms};
use crate::error::AudioError;
use crate::hal::{AudioSink, AudioSource};

/// Live line levels, shared with the housekeeping task
#[derive(Debug, Default)]
pub struct LineStatus {
    input_level: AtomicU32,
    output_level: AtomicU32,
    dc_fault: AtomicBool,
    dc_fault_frames: AtomicU32,
}

impl LineStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// RMS of the last frame read from the line, 0..1
    pub fn input_level(&self) -> f32 {
        f32::from_bits(self.input_level.load(Ordering::Relaxed))
    }

    /// RMS of the last frame written to the line, 0..1
    pub fn output_level(&self) -> f32 {
        f32::from_bits(self.output_level.load(Ordering::Relaxed))
    }

    /// Whether the last input frame carried a DC offset
    pub fn dc_fault(&self) -> bool {
        self.dc_fault.load(Ordering::Relaxed)
    }

    /// Input frames flagged with DC offset since start
    pub fn dc_fault_frames(&self) -> u32 {
        self.dc_fault_frames.load(Ordering::Relaxed)
    }
}

/// Metered party-line input
pub struct LineInput<S> {
    inner: S,
    status: Arc<LineStatus>,
    dc_blocking: bool,
}

impl<S: AudioSource> LineInput<S> {
    pub fn new(inner: S, status: Arc<LineStatus>) -> Self {
        Self {
            inner,
            status,
            dc_blocking: true,
        }
    }

    /// Disable DC-offset fault detection
    pub fn without_dc_check(mut self) -> Self {
        self.dc_blocking = false;
        self
    }
}

impl<S: AudioSource> AudioSource for LineInput<S> {
    fn read(&mut self, frame: &mut [i16]) -> Result<(), AudioError> {
        self.inner.read(frame)?;

        self.status
            .input_level
            .store(rms(frame).to_bits(), Ordering::Relaxed);

        if self.dc_blocking {
            let fault = dc_offset_detected(frame);
            let was = self.status.dc_fault.swap(fault, Ordering::Relaxed);
            if fault {
                self.status.dc_fault_frames.fetch_add(1, Ordering::Relaxed);
                if !was {
                    tracing::warn!("DC offset detected on party line input");
                }
            } else if was {
                tracing::info!("Party line DC offset cleared");
            }
        }
        Ok(())
    }
}

/// Metered party-line output
pub struct LineOutput<S> {
    inner: S,
    status: Arc<LineStatus>,
}

impl<S: AudioSink> LineOutput<S> {
    pub fn new(inner: S, status: Arc<LineStatus>) -> Self {
        Self { inner, status }
    }
}

impl<S: AudioSink> AudioSink for LineOutput<S> {
    fn write(&mut self, frame: &[i16]) -> Result<(), AudioError> {
        self.status
            .output_level
            .store(rms(frame).to_bits(), Ordering::Relaxed);
        self.inner.write(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimAudioSink, SimAudioSource, SimSignal};

    #[test]
    fn test_dc_fault_flagged() {
        let status = Arc::new(LineStatus::new());
        let mut input = LineInput::new(
            SimAudioSource::new(SimSignal::Constant(5000), 16_000),
            Arc::clone(&status),
        );

        let mut frame = [0i16; 320];
        input.read(&mut frame).unwrap();
        assert!(status.dc_fault());
        assert_eq!(status.dc_fault_frames(), 1);
        assert!(status.input_level() > 0.15);
    }

    #[test]
    fn test_clean_line() {
        let status = Arc::new(LineStatus::new());
        let mut input = LineInput::new(
            SimAudioSource::new(
                SimSignal::Tone {
                    frequency: 1000.0,
                    amplitude: 0.5,
                },
                16_000,
            ),
            Arc::clone(&status),
        );

        let mut frame = [0i16; 320];
        input.read(&mut frame).unwrap();
        assert!(!status.dc_fault());
        // Sine RMS is peak / sqrt(2)
        assert!((status.input_level() - 0.5 / 2f32.sqrt()).abs() < 0.01);
    }

    #[test]
    fn test_dc_check_disabled() {
        let status = Arc::new(LineStatus::new());
        let mut input = LineInput::new(
            SimAudioSource::new(SimSignal::Constant(5000), 16_000),
            Arc::clone(&status),
        )
        .without_dc_check();

        input.read(&mut [0i16; 320]).unwrap();
        assert!(!status.dc_fault());
    }

    #[test]
    fn test_output_metered() {
        let status = Arc::new(LineStatus::new());
        let mut output = LineOutput::new(SimAudioSink::new(), Arc::clone(&status));
        output.write(&[16384; 320]).unwrap();
        assert!((status.output_level() - 0.5).abs() < 1e-6);
    }
}
