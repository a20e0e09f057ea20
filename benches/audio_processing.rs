//! Per-frame DSP and codec cost at the default 16 kHz / 20 ms frame

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use wireless_partyline::audio::processor::{apply_sidetone, limit, mix, rms};
use wireless_partyline::audio::tones::{Notification, TonePlayer};
use wireless_partyline::codec::{FrameDecoder, FrameEncoder, OpusDecoder, OpusEncoder};
use wireless_partyline::config::AudioConfig;
use wireless_partyline::constants::SAMPLES_PER_FRAME;

fn speech_like() -> Vec<i16> {
    (0..SAMPLES_PER_FRAME)
        .map(|i| {
            let t = i as f32 / 16_000.0;
            let s = (t * 220.0 * std::f32::consts::TAU).sin() * 0.6
                + (t * 1330.0 * std::f32::consts::TAU).sin() * 0.3;
            (s * 32767.0) as i16
        })
        .collect()
}

fn bench_dsp(c: &mut Criterion) {
    let mic = speech_like();
    let incoming: Vec<i16> = mic.iter().rev().copied().collect();
    let mut out = vec![0i16; SAMPLES_PER_FRAME];

    c.bench_function("mix", |b| {
        b.iter(|| mix(black_box(&incoming), black_box(&mic), &mut out, 1.0, 0.3))
    });

    c.bench_function("sidetone", |b| {
        b.iter(|| apply_sidetone(black_box(&incoming), black_box(&mic), &mut out, 0.3, true))
    });

    c.bench_function("limit", |b| {
        b.iter(|| {
            out.copy_from_slice(&mic);
            limit(black_box(&mut out), 0.5);
        })
    });

    c.bench_function("rms", |b| b.iter(|| rms(black_box(&mic))));

    let mut player = TonePlayer::new(16_000, 0.25);
    c.bench_function("tone_fill", |b| {
        b.iter(|| {
            if !player.is_playing() {
                player.notify(Notification::BatteryCritical);
            }
            player.fill(black_box(&mut out))
        })
    });
}

fn bench_codec(c: &mut Criterion) {
    let config = AudioConfig::default();
    let mut encoder = match OpusEncoder::new(&config) {
        Ok(encoder) => encoder,
        Err(e) => panic!("encoder: {}", e),
    };
    let mut decoder = match OpusDecoder::new(&config) {
        Ok(decoder) => decoder,
        Err(e) => panic!("decoder: {}", e),
    };
    let mic = speech_like();
    let mut pcm = vec![0i16; SAMPLES_PER_FRAME];

    c.bench_function("opus_encode", |b| b.iter(|| encoder.encode(black_box(&mic))));

    let encoded = encoder.encode(&mic).unwrap_or_default();
    c.bench_function("opus_decode", |b| {
        b.iter(|| decoder.decode(Some(black_box(&encoded[..])), &mut pcm, false))
    });
    c.bench_function("opus_conceal", |b| b.iter(|| decoder.decode(None, &mut pcm, false)));
}

criterion_group!(benches, bench_dsp, bench_codec);
criterion_main!(benches);
