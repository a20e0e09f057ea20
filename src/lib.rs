//! # Wireless Party-Line
//!
//! Two-node wireless push-to-talk intercom: a battery powered belt pack
//! and a base station attached to a wired party line, linked over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              DEVICE                                   │
//! │                                                                       │
//! │  ┌──────────┐  edges   ┌──────────────┐  events  ┌──────────────────┐ │
//! │  │ Buttons  │ ───────▶ │ button poller│ ───────▶ │   orchestrator   │ │
//! │  └──────────┘          │ (debounce)   │          │  PTT / Call SMs  │ │
//! │                        └──────────────┘          │  power gate      │ │
//! │                                                  │  housekeeping    │ │
//! │                                                  └────────┬─────────┘ │
//! │                                                   shared  │ state     │
//! │                                                           ▼           │
//! │  ┌──────────┐  20 ms   ┌──────────────────────────────────────────┐   │
//! │  │ Mic/Line │ ───────▶ │ audio task: capture → Opus → send        │   │
//! │  └──────────┘          │             recv → Opus/PLC → mix →      │   │
//! │  ┌──────────┐ ◀─────── │             limit → play                 │   │
//! │  │ Speaker  │          └───────────────┬──────────────▲───────────┘   │
//! │  └──────────┘                          │              │ rx queue      │
//! │                                        ▼              │               │
//! │                           ┌──────────────────────────────────┐        │
//! │                           │ UdpTransport (network::transport)│        │
//! │                           │ [seq|ts|size|flags|rsvd|opus]    │        │
//! │                           └───────────────┬──────────────────┘        │
//! └───────────────────────────────────────────┼───────────────────────────┘
//!                                             │ UDP :5000
//!                                             ▼
//!                                        peer device
//! ```

pub mod app;
pub mod audio;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod hal;
pub mod network;
pub mod power;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Voice sample rate (narrowband mono)
    pub const SAMPLE_RATE: u32 = 16_000;

    /// Audio frame period in milliseconds
    pub const FRAME_MS: u32 = 20;

    /// Samples in one frame at the default rate
    pub const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

    /// Well-known UDP port shared by both roles
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// Full-scale magnitude of a 16-bit sample
    pub const FULL_SCALE: f32 = 32767.0;

    /// Firmware version reported at boot
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
