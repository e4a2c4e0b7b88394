use crate::{
    math::{
        byte_count_to_sample_count, clamp_16, high_nibble, high_nibble_signed, low_nibble,
        low_nibble_signed,
    },
    CodecParameters, History, BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};

/// Decodes a whole buffer starting from silence.
pub fn decode_gc_adpcm(adpcm: &[u8], coefficients: &[i16; 16]) -> Vec<i16> {
    let config = CodecParameters::new(byte_count_to_sample_count(adpcm.len()));
    decode_gc_adpcm_with(adpcm, coefficients, &config).0
}

/// Decodes `config.sample_count` samples seeded with `config.history` and returns the
/// history after the last decoded sample.
pub fn decode_gc_adpcm_with(
    adpcm: &[u8],
    coefficients: &[i16; 16],
    config: &CodecParameters,
) -> (Vec<i16>, History) {
    decode_gc_adpcm_from(adpcm, coefficients, 0, config)
}

/// Resumes decoding at `start_sample`, which may sit in the middle of a frame.
/// `config.history` must be the decoder state just before `start_sample`, e.g. a loop context.
pub fn decode_gc_adpcm_from(
    adpcm: &[u8],
    coefficients: &[i16; 16],
    start_sample: usize,
    config: &CodecParameters,
) -> (Vec<i16>, History) {
    let available = byte_count_to_sample_count(adpcm.len()).saturating_sub(start_sample);
    let sample_count = config.sample_count.min(available);
    let end_sample = start_sample + sample_count;

    let mut pcm = Vec::with_capacity(sample_count);
    let mut history = config.history;
    let mut current_sample = start_sample;

    while current_sample < end_sample {
        let frame = current_sample / SAMPLES_PER_FRAME;
        let frame_start = frame * BYTES_PER_FRAME;
        let predictor_scale = adpcm[frame_start];

        let scale: i32 = (1 << low_nibble(predictor_scale)) * 2048;
        let predictor = (high_nibble(predictor_scale) & 0x7) as usize;
        let coef_1 = coefficients[predictor * 2];
        let coef_2 = coefficients[predictor * 2 + 1];

        let first = current_sample % SAMPLES_PER_FRAME;
        let last = SAMPLES_PER_FRAME.min(end_sample - frame * SAMPLES_PER_FRAME);

        for s in first..last {
            let byte = adpcm[frame_start + 1 + s / 2];
            let adpcm_sample = if s % 2 == 0 {
                high_nibble_signed(byte) as i32
            } else {
                low_nibble_signed(byte) as i32
            };

            let sample = reconstruct(coef_1, coef_2, history, scale * adpcm_sample);
            history.push(sample);
            pcm.push(sample);
        }

        current_sample = frame * SAMPLES_PER_FRAME + last;
    }

    (pcm, history)
}

/// One step of the console's predictor. The encoder uses the same routine so that
/// both sides agree on every history value.
pub(crate) fn reconstruct(coef_1: i16, coef_2: i16, history: History, distance: i32) -> i16 {
    let predicted_sample = (coef_1 as i32 * history.hist_1 as i32)
        .wrapping_add(coef_2 as i32 * history.hist_2 as i32);
    let corrected_sample = predicted_sample.wrapping_add(distance);

    clamp_16(corrected_sample.wrapping_add(1024) >> 11)
}

#[cfg(test)]
mod test {
    use super::*;

    const FLAT: [i16; 16] = [0; 16];

    #[test]
    fn residuals_without_prediction() {
        let frame = [0x00, 0x12, 0x34, 0x56, 0x70, 0xF8, 0x00, 0x00];
        let pcm = decode_gc_adpcm(&frame, &FLAT);

        assert_eq!(pcm, vec![1, 2, 3, 4, 5, 6, 7, 0, -1, -8, 0, 0, 0, 0]);
    }

    #[test]
    fn prediction_accumulates() {
        let mut coefficients = FLAT;
        coefficients[0] = 2048;
        let frame = [0x00, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11];

        let (pcm, history) = decode_gc_adpcm_with(&frame, &coefficients, &CodecParameters::new(14));

        assert_eq!(pcm, (1..=14).collect::<Vec<i16>>());
        assert_eq!(history, History::new(14, 13));
    }

    #[test]
    fn scale_and_seed_history() {
        let mut coefficients = FLAT;
        coefficients[2] = 2048;
        // Predictor 1, scale exponent 2.
        let frame = [0x12, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let config = CodecParameters { sample_count: 2, history: History::new(100, 50) };

        let (pcm, history) = decode_gc_adpcm_with(&frame, &coefficients, &config);

        assert_eq!(pcm, vec![104, 104]);
        assert_eq!(history, History::new(104, 104));
    }

    #[test]
    fn partial_frames_are_floored() {
        let data = [0x00, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x00];
        assert_eq!(decode_gc_adpcm(&data, &FLAT).len(), 14);

        let data = [0x00, 0x77];
        assert_eq!(decode_gc_adpcm(&data, &FLAT), vec![7, 7]);
        assert!(decode_gc_adpcm(&[], &FLAT).is_empty());
    }

    #[test]
    fn resume_matches_full_decode() {
        let mut coefficients = FLAT;
        coefficients[0] = 1024;
        coefficients[1] = -512;
        let data: Vec<u8> = (0..64u8).map(|i| if i % 8 == 0 { 0x01 } else { i.wrapping_mul(37) }).collect();

        let full = decode_gc_adpcm(&data, &coefficients);
        for start in [0usize, 5, 14, 20, 41] {
            let history = History::new(
                if start >= 1 { full[start - 1] } else { 0 },
                if start >= 2 { full[start - 2] } else { 0 },
            );
            let config = CodecParameters { sample_count: full.len(), history };
            let (tail, _) = decode_gc_adpcm_from(&data, &coefficients, start, &config);

            assert_eq!(tail, full[start..]);
        }
    }
}
