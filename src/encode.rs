use crate::{
    decode::reconstruct,
    math::{clamp_4, combine_nibbles, sample_count_to_byte_count, DivideByRoundUp},
    History, BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};

const MAX_SCALE_POWER: i32 = 12;

struct AdpcmEncodeBuffers {
    coefficients: [[i16; 2]; 8],
    pcm_out: [[i32; 2 + SAMPLES_PER_FRAME]; 8],
    adpcm_out: [[i32; SAMPLES_PER_FRAME]; 8],
    scale: [i32; 8],
    total_distance: [f64; 8],
}

impl AdpcmEncodeBuffers {
    fn new(coefficients_in: &[i16; 16]) -> Self {
        let mut coefficients = [[0; 2]; 8];
        for (i, pair) in coefficients.iter_mut().enumerate() {
            *pair = [coefficients_in[i * 2], coefficients_in[i * 2 + 1]];
        }

        Self {
            coefficients,
            pcm_out: [[0; 2 + SAMPLES_PER_FRAME]; 8],
            adpcm_out: [[0; SAMPLES_PER_FRAME]; 8],
            scale: [0; 8],
            total_distance: [0.0; 8],
        }
    }
}

/// Encodes a whole channel starting from silence.
pub fn encode_gc_adpcm(pcm: &[i16], coefficients: &[i16; 16]) -> Vec<u8> {
    encode_gc_adpcm_with(pcm, coefficients, History::default()).0
}

/// Encodes `pcm` seeded with `history` and returns the encoder state after the last
/// input sample. Decoding the output with the same seed ends in that same state.
pub fn encode_gc_adpcm_with(
    pcm: &[i16],
    coefficients: &[i16; 16],
    history: History,
) -> (Vec<u8>, History) {
    let sample_count = pcm.len();
    let mut adpcm = vec![0; sample_count_to_byte_count(sample_count)];

    let mut pcm_buffer = [0i16; 2 + SAMPLES_PER_FRAME];
    let mut adpcm_buffer = [0u8; BYTES_PER_FRAME];

    pcm_buffer[0] = history.hist_2;
    pcm_buffer[1] = history.hist_1;

    let mut history = history;
    let frame_count = sample_count.divide_by_round_up(SAMPLES_PER_FRAME);
    let mut buffers = AdpcmEncodeBuffers::new(coefficients);

    for frame in 0..frame_count {
        let src_index = frame * SAMPLES_PER_FRAME;
        let samples_to_copy = (sample_count - src_index).min(SAMPLES_PER_FRAME);
        pcm_buffer[2..(2 + samples_to_copy)]
            .copy_from_slice(&pcm[src_index..(src_index + samples_to_copy)]);
        pcm_buffer[(2 + samples_to_copy)..].fill(0);

        dsp_encode_frame(&mut pcm_buffer, SAMPLES_PER_FRAME, &mut adpcm_buffer, &mut buffers);

        let bytes_to_copy = sample_count_to_byte_count(samples_to_copy);
        let dst_index = frame * BYTES_PER_FRAME;
        adpcm[dst_index..(dst_index + bytes_to_copy)]
            .copy_from_slice(&adpcm_buffer[0..bytes_to_copy]);

        // The last real sample, not the zero padding of a short final frame.
        history = History::new(pcm_buffer[1 + samples_to_copy], pcm_buffer[samples_to_copy]);

        pcm_buffer[0] = pcm_buffer[14];
        pcm_buffer[1] = pcm_buffer[15];
    }

    (adpcm, history)
}

fn dsp_encode_frame(
    pcm_in_out: &mut [i16; 2 + SAMPLES_PER_FRAME],
    sample_count: usize,
    adpcm_out: &mut [u8; BYTES_PER_FRAME],
    b: &mut AdpcmEncodeBuffers,
) {
    for i in 0..8 {
        let (scale, distance) = dsp_encode_coefficient(
            pcm_in_out,
            sample_count,
            b.coefficients[i],
            &mut b.pcm_out[i],
            &mut b.adpcm_out[i],
        );
        b.scale[i] = scale;
        b.total_distance[i] = distance;
    }

    let mut best_coefficient = 0;
    let mut min = f64::MAX;
    for (i, &distance) in b.total_distance.iter().enumerate() {
        if distance < min {
            min = distance;
            best_coefficient = i;
        }
    }

    for s in 0..sample_count {
        pcm_in_out[s + 2] = b.pcm_out[best_coefficient][s + 2] as i16;
    }

    adpcm_out[0] = combine_nibbles(best_coefficient as i32, b.scale[best_coefficient]);

    let best = &mut b.adpcm_out[best_coefficient];
    best[sample_count..].fill(0);

    for i in 0..7 {
        adpcm_out[i + 1] = combine_nibbles(best[i * 2], best[i * 2 + 1]);
    }
}

/// Encodes one frame with a single predictor pair and returns the chosen scale
/// exponent together with the squared reconstruction error.
fn dsp_encode_coefficient(
    pcm_in: &[i16; 2 + SAMPLES_PER_FRAME],
    sample_count: usize,
    coefficients: [i16; 2],
    pcm_out: &mut [i32; 2 + SAMPLES_PER_FRAME],
    adpcm_out: &mut [i32; SAMPLES_PER_FRAME],
) -> (i32, f64) {
    let [coef_1, coef_2] = coefficients;
    let mut max_distance: i32 = 0;

    pcm_out[0] = pcm_in[0] as i32;
    pcm_out[1] = pcm_in[1] as i32;

    // Encode the frame with a scale of 1
    for s in 0..sample_count {
        let input_sample = pcm_in[s + 2] as i64;
        let predicted_sample =
            (pcm_in[s] as i64 * coef_2 as i64 + pcm_in[s + 1] as i64 * coef_1 as i64) / 2048;
        let distance = (input_sample - predicted_sample).clamp(i16::MIN as i64, i16::MAX as i64);

        if distance.abs() > (max_distance as i64).abs() {
            max_distance = distance as i32;
        }
    }

    // Use the maximum distance of the encoded frame to find a scale that will fit the current frame.
    let mut scale_power = 0;
    while scale_power <= MAX_SCALE_POWER && (max_distance > 7 || max_distance < -8) {
        max_distance /= 2;
        scale_power += 1;
    }

    scale_power = if scale_power <= 1 { -1 } else { scale_power - 2 };

    let mut total_distance;
    loop {
        scale_power += 1;
        let scale: i32 = (1 << scale_power) * 2048;
        let mut max_overflow = 0;
        total_distance = 0.0;

        for s in 0..sample_count {
            let input_sample = pcm_in[s + 2] as i64 * 2048;
            let predicted_sample =
                pcm_out[s] as i64 * coef_2 as i64 + pcm_out[s + 1] as i64 * coef_1 as i64;
            let distance = input_sample - predicted_sample;

            let quotient = (distance as f32 / scale as f32) as f64;
            let unclamped_adpcm_sample = if distance > 0 {
                (quotient + 0.4999999) as i32
            } else {
                (quotient - 0.4999999) as i32
            };

            let adpcm_sample = clamp_4(unclamped_adpcm_sample) as i32;
            if adpcm_sample != unclamped_adpcm_sample {
                max_overflow = max_overflow.max((unclamped_adpcm_sample - adpcm_sample).abs());
            }

            adpcm_out[s] = adpcm_sample;

            // Decode sample to use as history
            let history = History::new(pcm_out[s + 1] as i16, pcm_out[s] as i16);
            let decoded = reconstruct(coef_1, coef_2, history, adpcm_sample * scale);
            pcm_out[s + 2] = decoded as i32;

            let actual_distance = pcm_in[s + 2] as f64 - decoded as f64;
            total_distance += actual_distance * actual_distance;
        }

        if scale_power >= MAX_SCALE_POWER || max_overflow <= 1 {
            break;
        }

        let mut x = max_overflow + 8;
        while x > 256 {
            scale_power = (scale_power + 1).min(MAX_SCALE_POWER - 1);
            x >>= 1;
        }
    }

    (scale_power, total_distance)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        coefficients::calculate_coefficients,
        decode::{decode_gc_adpcm, decode_gc_adpcm_with},
        test_util::{music, sine, snr_db},
        CodecParameters,
    };

    #[test]
    fn silence_encodes_to_zero() {
        let pcm = vec![0i16; 100];
        let adpcm = encode_gc_adpcm(&pcm, &[0; 16]);

        assert_eq!(adpcm.len(), sample_count_to_byte_count(100));
        assert!(adpcm.iter().all(|&b| b == 0));
    }

    #[test]
    fn roundtrip_within_quantization() {
        let pcm = music(14 * 400 + 5, 7);
        let coefs = calculate_coefficients(&pcm);

        let (adpcm, encoder_history) = encode_gc_adpcm_with(&pcm, &coefs, History::default());
        let (decoded, decoder_history) =
            decode_gc_adpcm_with(&adpcm, &coefs, &CodecParameters::new(pcm.len()));

        assert_eq!(decoded.len(), pcm.len());
        assert_eq!(encoder_history, decoder_history);
        assert!(snr_db(&pcm, &decoded) > 20.0, "snr {}", snr_db(&pcm, &decoded));
    }

    #[test]
    fn history_matches_for_every_tail_length() {
        let source = sine(60, 17.0, 9000.0);
        let coefs = calculate_coefficients(&source);

        for len in [1, 2, 13, 14, 15, 27, 28, 29, 60] {
            let pcm = &source[..len];
            let (adpcm, encoder_history) = encode_gc_adpcm_with(pcm, &coefs, History::default());
            let (decoded, decoder_history) =
                decode_gc_adpcm_with(&adpcm, &coefs, &CodecParameters::new(len));

            assert_eq!(adpcm.len(), sample_count_to_byte_count(len));
            assert_eq!(decoded.len(), len);
            assert_eq!(encoder_history, decoder_history, "length {len}");
            assert_eq!(decoder_history.hist_1, decoded[len - 1]);
        }
    }

    #[test]
    fn seeded_history_carries_across_calls() {
        let pcm = sine(14 * 20, 33.0, 12000.0);
        let coefs = calculate_coefficients(&pcm);
        let (first, second) = pcm.split_at(14 * 8);

        let (head, history) = encode_gc_adpcm_with(first, &coefs, History::default());
        let (tail, end_history) = encode_gc_adpcm_with(second, &coefs, history);

        let mut joined = head;
        joined.extend_from_slice(&tail);
        assert_eq!(joined, encode_gc_adpcm(&pcm, &coefs));

        let config = CodecParameters { sample_count: second.len(), history };
        let (decoded_tail, decoded_history) = decode_gc_adpcm_with(&tail, &coefs, &config);
        assert_eq!(decoded_tail, decode_gc_adpcm(&joined, &coefs)[14 * 8..]);
        assert_eq!(decoded_history, end_history);
    }

    #[test]
    fn extreme_input_terminates() {
        let pcm: Vec<i16> = (0..280).map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN }).collect();
        let coefs = [i16::MIN; 16];

        let adpcm = encode_gc_adpcm(&pcm, &coefs);
        assert_eq!(decode_gc_adpcm(&adpcm, &coefs).len(), pcm.len());
    }
}
