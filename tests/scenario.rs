use gc_media::{dsp, hps, wav::Wave, Sound};

const SAMPLE_RATE: u32 = 48000;
const LOOP_SAMPLE: usize = 12000;

fn tone(len: usize, period: f64, phase: f64) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f64 * std::f64::consts::TAU;
            (9000.0 * (t / period + phase).sin() + 4000.0 * (t / (period * 3.7)).sin()) as i16
        })
        .collect()
}

fn snr_db(reference: &[i16], test: &[i16]) -> f64 {
    let signal: f64 = reference.iter().map(|&s| (s as f64).powi(2)).sum();
    let noise: f64 = reference.iter().zip(test).map(|(&a, &b)| (a as f64 - b as f64).powi(2)).sum();
    10.0 * (signal / noise.max(1.0)).log10()
}

fn check(sound: &Sound, source: &Wave, expected_loop: usize) {
    assert_eq!(sound.sample_rate, SAMPLE_RATE);
    assert_eq!(sound.channels.len(), 2);
    assert_eq!(sound.sample_count(), source.channels[0].len());
    assert_eq!(sound.loop_sample(), Some(expected_loop));

    let decoded = sound.to_wave();
    for (pcm, original) in decoded.channels.iter().zip(&source.channels) {
        let snr = snr_db(original, pcm);
        assert!(snr > 20.0, "snr {snr:.1} dB");
    }
}

#[test]
fn ten_seconds_of_stereo_through_dsp_and_hps() {
    let len = SAMPLE_RATE as usize * 10;
    let source = Wave {
        sample_rate: SAMPLE_RATE,
        channels: vec![tone(len, 109.0, 0.0), tone(len, 151.0, 1.0)],
        loop_point: Some(LOOP_SAMPLE),
    };

    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("music.wav");
    std::fs::write(&wav_path, source.to_bytes().unwrap()).unwrap();

    let sound = Sound::open(&wav_path).unwrap();
    assert_eq!(sound.loop_sample(), Some(LOOP_SAMPLE));

    // Raw channels keep the exact loop point.
    sound.save(dir.path().join("music.dsp")).unwrap();
    let from_dsp = dsp::open_channels(&[
        dir.path().join("music_channel_0.dsp"),
        dir.path().join("music_channel_1.dsp"),
    ])
    .unwrap();
    assert_eq!(from_dsp, sound);
    check(&from_dsp, &source, LOOP_SAMPLE);

    // The streaming container moves the loop to the next 56 sample boundary.
    let hps_path = dir.path().join("music.hps");
    sound.save(&hps_path).unwrap();
    let from_hps = Sound::open(&hps_path).unwrap();
    let aligned = hps::aligned_loop_sample(LOOP_SAMPLE, sound.sample_count());
    assert_eq!(aligned, 12040);
    check(&from_hps, &source, aligned);

    for channel in &from_hps.channels {
        let full = channel.decode();
        assert_eq!(channel.decode_loop(), full[aligned..]);
    }
}
