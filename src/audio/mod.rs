//! Audio subsystem
//!
//! DSP primitives, the per-frame pipeline and the real-time audio task.
//! Host sound card I/O is behind the `host-audio` feature.

pub mod buffer;
pub mod line;
pub mod pipeline;
pub mod processor;
pub mod tones;

#[cfg(feature = "host-audio")]
pub mod capture;
#[cfg(feature = "host-audio")]
pub mod device;
#[cfg(feature = "host-audio")]
pub mod playback;

pub use buffer::{create_shared_buffer, RingBuffer, SharedRingBuffer};
pub use line::{LineInput, LineOutput, LineStatus};
pub use pipeline::{AudioTask, FramePipeline, PipelineStats};
pub use tones::{Notification, TonePlayer};

#[cfg(feature = "host-audio")]
pub use capture::HostCapture;
#[cfg(feature = "host-audio")]
pub use device::{list_devices, DeviceInfo};
#[cfg(feature = "host-audio")]
pub use playback::HostPlayback;
