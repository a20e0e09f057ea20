//! Per-frame sample processing
//!
//! Everything here works on 16-bit mono frames in place or into a
//! caller-provided output so the audio task never allocates.

use crate::constants::FULL_SCALE;

/// DC offset (10% of full scale) above which a line input is considered faulty
pub const DC_OFFSET_THRESHOLD: i32 = 3276;

#[inline]
fn saturate(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Weighted sum of two streams into `output`.
///
/// Gains are clamped to `[0, 1]`. The result saturates at the 16-bit
/// range instead of wrapping. Only the common prefix of the three
/// buffers is written.
pub fn mix(a: &[i16], b: &[i16], output: &mut [i16], gain_a: f32, gain_b: f32) {
    let gain_a = gain_a.clamp(0.0, 1.0);
    let gain_b = gain_b.clamp(0.0, 1.0);

    for ((out, &sa), &sb) in output.iter_mut().zip(a).zip(b) {
        *out = saturate(sa as f32 * gain_a + sb as f32 * gain_b);
    }
}

/// Soft limiter.
///
/// Samples beyond `threshold * full_scale` keep only a quarter of their
/// overshoot. `threshold` is clamped to `[0, 1]`.
pub fn limit(buffer: &mut [i16], threshold: f32) {
    let knee = (FULL_SCALE * threshold.clamp(0.0, 1.0)) as i32;

    for sample in buffer.iter_mut() {
        let s = *sample as i32;
        let limited = if s > knee {
            knee + (s - knee) / 4
        } else if s < -knee {
            -knee + (s + knee) / 4
        } else {
            continue;
        };
        *sample = limited as i16;
    }
}

/// Headset output for one frame.
///
/// While `ptt_active` and `level > 0`, the microphone is blended in at
/// `level` with the incoming audio at `1 - level`. Otherwise the
/// incoming audio is copied through untouched.
pub fn apply_sidetone(incoming: &[i16], mic: &[i16], output: &mut [i16], level: f32, ptt_active: bool) {
    if ptt_active && level > 0.0 {
        mix(incoming, mic, output, 1.0 - level, level);
    } else {
        let n = output.len().min(incoming.len());
        output[..n].copy_from_slice(&incoming[..n]);
    }
}

/// Root-mean-square level normalized to `[0, 1]`.
pub fn rms(buffer: &[i16]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    let sum: i64 = buffer.iter().map(|&s| (s as i64) * (s as i64)).sum();
    ((sum as f64 / buffer.len() as f64).sqrt() / 32768.0) as f32
}

/// Mean sample value
pub fn dc_offset(buffer: &[i16]) -> i32 {
    if buffer.is_empty() {
        return 0;
    }
    let sum: i64 = buffer.iter().map(|&s| s as i64).sum();
    (sum / buffer.len() as i64) as i32
}

/// True when the mean sample value exceeds 10% of full scale
pub fn dc_offset_detected(buffer: &[i16]) -> bool {
    dc_offset(buffer).abs() > DC_OFFSET_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mix_identical_halves_is_identity() {
        let a: Vec<i16> = vec![0, 1, -1, 3, -3, 12345, -12345, i16::MAX, i16::MIN];
        let mut out = vec![0i16; a.len()];
        mix(&a, &a, &mut out, 0.5, 0.5);
        assert_eq!(out, a);
    }

    #[test]
    fn test_mix_saturates() {
        let a = [30000i16, -30000];
        let b = [30000i16, -30000];
        let mut out = [0i16; 2];
        mix(&a, &b, &mut out, 1.0, 1.0);
        assert_eq!(out, [i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_mix_clamps_gains() {
        let a = [1000i16];
        let b = [1000i16];
        let mut out = [0i16];
        mix(&a, &b, &mut out, 2.0, -1.0);
        assert_eq!(out, [1000]);
    }

    #[test]
    fn test_limit_reduces_overshoot() {
        let knee = (FULL_SCALE * 0.95) as i32;
        let mut buf = [i16::MAX, i16::MIN + 1, 1000, -1000];
        limit(&mut buf, 0.95);

        assert_eq!(buf[0] as i32, knee + (i16::MAX as i32 - knee) / 4);
        assert_eq!(buf[1] as i32, -knee + ((i16::MIN as i32 + 1) + knee) / 4);
        // Below the knee: untouched
        assert_eq!(buf[2], 1000);
        assert_eq!(buf[3], -1000);
    }

    #[test]
    fn test_limit_of_saturated_mix() {
        // Two near full-scale streams sum to ~150% before saturation
        let a = [24576i16; 4];
        let mut mixed = [0i16; 4];
        mix(&a, &a, &mut mixed, 1.0, 1.0);
        limit(&mut mixed, 0.95);

        let knee = (FULL_SCALE * 0.95) as i16;
        for s in mixed {
            assert!(s >= knee);
            assert!(s <= knee + (i16::MAX - knee) / 4 + 1);
        }
    }

    #[test]
    fn test_limit_zero_threshold() {
        let mut buf = [400i16, -400];
        limit(&mut buf, -1.0);
        assert_eq!(buf, [100, -100]);
    }

    #[test]
    fn test_sidetone_active() {
        let incoming = [1000i16; 4];
        let mic = [2000i16; 4];
        let mut out = [0i16; 4];
        apply_sidetone(&incoming, &mic, &mut out, 0.3, true);
        assert_eq!(out, [1300; 4]);
    }

    #[test]
    fn test_sidetone_passthrough() {
        let incoming = [1, 2, 3, 4];
        let mic = [9i16; 4];
        let mut out = [0i16; 4];
        apply_sidetone(&incoming, &mic, &mut out, 0.3, false);
        assert_eq!(out, incoming);

        apply_sidetone(&incoming, &mic, &mut out, 0.0, true);
        assert_eq!(out, incoming);
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0; 320]), 0.0);

        let square: Vec<i16> = (0..320).map(|i| if i % 2 == 0 { 16384 } else { -16384 }).collect();
        assert!((rms(&square) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dc_offset_detection() {
        assert!(!dc_offset_detected(&[0; 320]));
        assert!(!dc_offset_detected(&[3276; 320]));
        assert!(dc_offset_detected(&[3277; 320]));
        assert!(dc_offset_detected(&[-4000; 320]));

        // Large but balanced signal has no offset
        let sine: Vec<i16> = (0..320).map(|i| if i % 2 == 0 { 20000 } else { -20000 }).collect();
        assert!(!dc_offset_detected(&sine));
    }

    proptest! {
        #[test]
        fn prop_limit_never_grows(samples in proptest::collection::vec(any::<i16>(), 1..64), t in 0.0f32..=1.0) {
            let mut out = samples.clone();
            limit(&mut out, t);
            let knee = (FULL_SCALE * t) as i32;
            for (&before, &after) in samples.iter().zip(&out) {
                prop_assert!((after as i32).abs() <= (before as i32).abs());
                if (before as i32).abs() > knee {
                    prop_assert!((after as i32).abs() >= knee);
                }
            }
        }

        #[test]
        fn prop_mix_half_identity(samples in proptest::collection::vec(any::<i16>(), 1..64)) {
            let mut out = vec![0i16; samples.len()];
            mix(&samples, &samples, &mut out, 0.5, 0.5);
            prop_assert_eq!(out, samples);
        }
    }
}
