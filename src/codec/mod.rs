//! Voice codec
//!
//! The audio pipeline only sees the [`FrameEncoder`] and [`FrameDecoder`]
//! traits; Opus is the production implementation.

pub mod decoder;
pub mod encoder;

use bytes::Bytes;

use crate::error::CodecError;

pub use decoder::OpusDecoder;
pub use encoder::OpusEncoder;

/// Compresses one PCM frame
pub trait FrameEncoder: Send {
    /// Encode exactly one frame of mono samples
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;

    /// Samples expected per call
    fn frame_size(&self) -> usize;
}

/// Expands compressed frames back to PCM
pub trait FrameDecoder: Send {
    /// Decode one frame into `out`, returning the number of samples written.
    ///
    /// `None` means the packet for this slot never arrived; the decoder
    /// synthesizes a continuation frame (loss concealment). With
    /// `use_fec` set, redundancy carried in `packet` is used to rebuild
    /// the previous frame instead.
    fn decode(
        &mut self,
        packet: Option<&[u8]>,
        out: &mut [i16],
        use_fec: bool,
    ) -> Result<usize, CodecError>;
}
