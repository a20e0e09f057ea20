//! Opus decoder wrapper
//!
//! Provides Opus decoding with packet loss concealment.

use opus::{Channels, Decoder};

use crate::codec::FrameDecoder;
use crate::config::AudioConfig;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    frame_size: usize,
    /// Frames decoded
    frames_decoded: u64,
    /// Frames synthesized by concealment
    frames_concealed: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(config: &AudioConfig) -> Result<Self, CodecError> {
        let decoder = Decoder::new(config.sample_rate, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            frame_size: config.samples_per_frame(),
            frames_decoded: 0,
            frames_concealed: 0,
        })
    }

    /// Reset decoder state
    pub fn reset(&mut self) -> Result<(), CodecError> {
        self.decoder
            .reset_state()
            .map_err(|e| CodecError::DecoderInit(e.to_string()))
    }

    /// Get frame size in samples
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_concealed: self.frames_concealed,
        }
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(
        &mut self,
        packet: Option<&[u8]>,
        out: &mut [i16],
        use_fec: bool,
    ) -> Result<usize, CodecError> {
        if out.len() < self.frame_size {
            return Err(CodecError::InvalidFrameSize(out.len()));
        }
        let out = &mut out[..self.frame_size];

        let samples = match packet {
            Some(data) if !data.is_empty() => {
                let n = self
                    .decoder
                    .decode(data, out, use_fec)
                    .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;
                self.frames_decoded += 1;
                n
            }
            // Empty input drives the codec's concealment
            _ => {
                let n = self
                    .decoder
                    .decode(&[], out, false)
                    .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;
                self.frames_concealed += 1;
                n
            }
        };

        Ok(samples)
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_concealed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameEncoder, OpusEncoder};

    #[test]
    fn test_encode_decode_roundtrip() {
        let config = AudioConfig::default();
        let mut encoder = OpusEncoder::new(&config).unwrap();
        let mut decoder = OpusDecoder::new(&config).unwrap();

        let samples: Vec<i16> = (0..320)
            .map(|i| ((i as f32 / 16000.0 * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16)
            .collect();

        let encoded = encoder.encode(&samples).unwrap();

        let mut out = vec![0i16; 320];
        let n = decoder.decode(Some(&encoded), &mut out, false).unwrap();
        assert_eq!(n, 320);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn test_consecutive_concealment() {
        let config = AudioConfig::default();
        let mut encoder = OpusEncoder::new(&config).unwrap();
        let mut decoder = OpusDecoder::new(&config).unwrap();

        let samples = vec![1000i16; 320];
        let encoded = encoder.encode(&samples).unwrap();
        let mut out = vec![0i16; 320];
        decoder.decode(Some(&encoded), &mut out, false).unwrap();

        for _ in 0..10 {
            let n = decoder.decode(None, &mut out, false).unwrap();
            assert_eq!(n, 320);
        }
        assert_eq!(decoder.stats().frames_concealed, 10);
    }

    #[test]
    fn test_concealment_without_history() {
        let mut decoder = OpusDecoder::new(&AudioConfig::default()).unwrap();
        let mut out = vec![0i16; 320];
        assert_eq!(decoder.decode(None, &mut out, false).unwrap(), 320);
    }

    #[test]
    fn test_output_too_small() {
        let mut decoder = OpusDecoder::new(&AudioConfig::default()).unwrap();
        let mut out = vec![0i16; 10];
        assert!(decoder.decode(None, &mut out, false).is_err());
    }
}
