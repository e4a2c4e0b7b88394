//! Synthetic signals shared by unit tests.

pub fn sine(len: usize, period: f64, amplitude: f64) -> Vec<i16> {
    (0..len)
        .map(|i| (amplitude * (2.0 * std::f64::consts::PI * i as f64 / period).sin()) as i16)
        .collect()
}

/// Two tones plus a slow sweep, closer to real program material than a pure sine.
pub fn music(len: usize, seed: u32) -> Vec<i16> {
    let mut state = seed.max(1);
    (0..len)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let t = i as f64;
            let noise = (state % 512) as f64 - 256.0;
            let value = 6000.0 * (t / 23.0).sin()
                + 3000.0 * (t / 7.3).sin()
                + 2000.0 * (t * t / 2.0e6).sin()
                + noise;
            value as i16
        })
        .collect()
}

pub fn snr_db(reference: &[i16], test: &[i16]) -> f64 {
    assert_eq!(reference.len(), test.len());

    let signal: f64 = reference.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let noise: f64 = reference
        .iter()
        .zip(test)
        .map(|(&a, &b)| {
            let d = a as f64 - b as f64;
            d * d
        })
        .sum();

    if noise == 0.0 {
        return f64::INFINITY;
    }

    10.0 * (signal / noise).log10()
}
