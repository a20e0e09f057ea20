//! Desktop board: sound card audio, everything else simulated
//!
//! A PC has no PTT/call buttons, LEDs or battery, so those stay on the
//! [`sim`](super::sim) implementations and are driven through the
//! returned [`SimControls`].

use crate::audio::device::{input_device, output_device};
use crate::audio::{HostCapture, HostPlayback};
use crate::config::AppConfig;
use crate::error::Result;
use crate::hal::sim::{self, SimControls};
use crate::hal::Peripherals;

pub fn peripherals(config: &AppConfig) -> Result<(Peripherals, SimControls)> {
    let audio = &config.audio;
    let (mut peripherals, controls) = sim::peripherals(config);

    let capture = HostCapture::start(
        input_device(audio.input_device.as_deref())?,
        audio.sample_rate,
        audio.frame_duration(),
    )?;
    let playback = HostPlayback::start(
        output_device(audio.output_device.as_deref())?,
        audio.sample_rate,
        audio.samples_per_frame(),
    )?;

    peripherals.source = Box::new(capture);
    peripherals.sink = Box::new(playback);
    Ok((peripherals, controls))
}
