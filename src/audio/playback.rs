//! Sound card output
//!
//! The audio task writes whole frames into a lock-free queue; the cpal
//! output callback drains it sample by sample and plays silence on
//! underrun.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::audio::device::AudioDevice;
use crate::error::AudioError;
use crate::hal::AudioSink;

/// Frames of headroom between the audio task and the device
const PLAYBACK_FRAMES: usize = 4;

/// Mono 16-bit headset output on a host device
pub struct HostPlayback {
    queue: SharedRingBuffer<i16>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl HostPlayback {
    pub fn start(device: AudioDevice, sample_rate: u32, frame_size: usize) -> Result<Self, AudioError> {
        let channels = device.channels_for(sample_rate)?;
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let queue = create_shared_buffer::<i16>(frame_size * PLAYBACK_FRAMES);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = Arc::new(AtomicBool::new(true));

        let name = device.name.clone();
        let running_for_loop = Arc::clone(&running);
        let source = Arc::clone(&queue);

        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels as usize) {
                            let sample = source.pop().map_or(0.0, |s| s as f32 / 32768.0);
                            frame.fill(sample);
                        }
                    },
                    move |err| tracing::warn!("Playback stream error: {}", err),
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
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        ready_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| AudioError::StreamError("playback thread did not start".into()))??;

        tracing::info!(device = %name, sample_rate, channels, "Playback started");

        Ok(Self {
            queue,
            running,
            thread_handle: Some(handle),
        })
    }

    /// Samples the device wanted but we had not delivered yet
    pub fn underruns(&self) -> usize {
        self.queue.underrun_count()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl AudioSink for HostPlayback {
    fn write(&mut self, frame: &[i16]) -> Result<(), AudioError> {
        for &sample in frame {
            // Overflow means the device fell behind; newest samples are dropped
            if !self.queue.push(sample) {
                break;
            }
        }
        Ok(())
    }
}

impl Drop for HostPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}
