//! Sound card input
//!
//! cpal delivers samples from its own callback; [`HostCapture`] turns that
//! into the blocking frame read the audio task expects. The stream lives
//! on a dedicated thread because cpal streams are not `Send` on every
//! platform.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::AudioDevice;
use crate::error::AudioError;
use crate::hal::AudioSource;

/// Callback chunks buffered before the oldest is dropped
const CHUNK_QUEUE: usize = 32;

/// Mono 16-bit microphone input from a host device
pub struct HostCapture {
    chunks: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    running: Arc<AtomicBool>,
    dropped_chunks: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl HostCapture {
    /// Open `device` at `sample_rate` and start capturing
    pub fn start(device: AudioDevice, sample_rate: u32, frame_duration: Duration) -> Result<Self, AudioError> {
        let channels = device.channels_for(sample_rate)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (chunk_tx, chunks) = bounded::<Vec<i16>>(CHUNK_QUEUE);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let dropped_chunks = Arc::new(AtomicU64::new(0));

        let name = device.name.clone();
        let running_for_loop = Arc::clone(&running);
        let dropped = Arc::clone(&dropped_chunks);

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, channels as usize);
                        if chunk_tx.try_send(mono).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| tracing::warn!("Capture stream error: {}", err),
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        ready_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| AudioError::StreamError("capture thread did not start".into()))??;

        tracing::info!(device = %name, sample_rate, channels, "Capture started");

        Ok(Self {
            chunks,
            pending: Vec::new(),
            running,
            dropped_chunks,
            thread_handle: Some(handle),
            timeout: frame_duration * 4,
        })
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioSource for HostCapture {
    fn read(&mut self, frame: &mut [i16]) -> Result<(), AudioError> {
        while self.pending.len() < frame.len() {
            match self.chunks.recv_timeout(self.timeout) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AudioError::Timeout(self.timeout.as_millis() as u64))
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::Disconnected),
            }
        }

        frame.copy_from_slice(&self.pending[..frame.len()]);
        self.pending.drain(..frame.len());
        Ok(())
    }
}

impl Drop for HostCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Average interleaved channels down to mono 16-bit
pub(crate) fn downmix(data: &[f32], channels: usize) -> Vec<i16> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().sum();
            let mean = sum / frame.len() as f32;
            (mean.clamp(-1.0, 1.0) * 32767.0).round() as i16
        })
        .collect()
}
