use crate::{BYTES_PER_FRAME, NIBBLES_PER_FRAME, SAMPLES_PER_FRAME};

pub trait DivideByRoundUp {
    fn divide_by_round_up(&self, divisor: usize) -> usize;
    fn divide_by_2_round_up(&self) -> usize;
}

impl DivideByRoundUp for usize {
    fn divide_by_round_up(&self, divisor: usize) -> usize {
        self.div_ceil(divisor)
    }

    fn divide_by_2_round_up(&self) -> usize {
        (*self / 2) + (*self & 1)
    }
}

pub fn clamp_16(value: i32) -> i16 {
    if value > i16::MAX as i32 {
        return i16::MAX;
    }

    if value < i16::MIN as i32 {
        return i16::MIN;
    }

    value as i16
}

pub fn clamp_4(value: i32) -> i8 {
    if value > 7 {
        return 7;
    }

    if value < -8 {
        return -8;
    }

    value as i8
}

const SIGNED_NIBBLES: [i8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, -8, -7, -6, -5, -4, -3, -2, -1];

pub fn low_nibble(byte: u8) -> u8 {
    byte & 0xF
}

pub fn high_nibble(byte: u8) -> u8 {
    (byte >> 4) & 0xF
}

pub fn low_nibble_signed(byte: u8) -> i8 {
    SIGNED_NIBBLES[(byte & 0xF) as usize]
}

pub fn high_nibble_signed(byte: u8) -> i8 {
    SIGNED_NIBBLES[((byte >> 4) & 0xF) as usize]
}

pub fn combine_nibbles(high: i32, low: i32) -> u8 {
    (((high & 0xF) << 4) | (low & 0xF)) as u8
}

pub fn byte_count_to_sample_count(byte_count: usize) -> usize {
    nibble_count_to_sample_count(byte_count * 2)
}

pub fn sample_count_to_byte_count(sample_count: usize) -> usize {
    sample_count_to_nibble_count(sample_count).divide_by_2_round_up()
}

pub fn nibble_count_to_sample_count(nibble_count: usize) -> usize {
    let frames = nibble_count / NIBBLES_PER_FRAME;
    let extra_nibbles = nibble_count % NIBBLES_PER_FRAME;
    let extra_samples = extra_nibbles.saturating_sub(2);

    SAMPLES_PER_FRAME * frames + extra_samples
}

pub fn sample_count_to_nibble_count(sample_count: usize) -> usize {
    let frames = sample_count / SAMPLES_PER_FRAME;
    let extra_samples = sample_count % SAMPLES_PER_FRAME;
    let extra_nibbles = if extra_samples == 0 { 0 } else { extra_samples + 2 };

    NIBBLES_PER_FRAME * frames + extra_nibbles
}

/// Nibble address of a sample, counting the two header nibbles of its frame.
pub fn sample_to_nibble(sample: usize) -> usize {
    let frames = sample / SAMPLES_PER_FRAME;
    let extra_nibbles = sample % SAMPLES_PER_FRAME;

    NIBBLES_PER_FRAME * frames + extra_nibbles + 2
}

/// Inverse of [`sample_to_nibble`]. Header nibbles map to the first sample of their frame.
pub fn nibble_to_sample(nibble: usize) -> usize {
    let frames = nibble / NIBBLES_PER_FRAME;
    let extra_nibbles = nibble % NIBBLES_PER_FRAME;

    SAMPLES_PER_FRAME * frames + extra_nibbles.saturating_sub(2)
}

/// The predictor/scale byte of the frame holding `sample`.
pub fn predictor_scale_at(adpcm: &[u8], sample: usize) -> Option<u8> {
    adpcm.get(sample / SAMPLES_PER_FRAME * BYTES_PER_FRAME).copied()
}

pub fn align_up(value: usize, multiple: usize) -> usize {
    if multiple == 0 || value % multiple == 0 {
        value
    } else {
        value + multiple - value % multiple
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn count_conversions_invert() {
        for n in 0..2000 {
            assert_eq!(nibble_count_to_sample_count(sample_count_to_nibble_count(n)), n);
        }
    }

    #[test]
    fn count_conversions_match_frame_geometry() {
        assert_eq!(sample_count_to_nibble_count(14), 16);
        assert_eq!(sample_count_to_nibble_count(15), 19);
        assert_eq!(sample_count_to_byte_count(15), 10);
        assert_eq!(nibble_count_to_sample_count(17), 14);
        assert_eq!(byte_count_to_sample_count(8), 14);
        assert_eq!(byte_count_to_sample_count(0), 0);
    }

    #[test]
    fn sample_addresses() {
        assert_eq!(sample_to_nibble(0), 2);
        assert_eq!(sample_to_nibble(13), 15);
        assert_eq!(sample_to_nibble(14), 18);
        for sample in 0..500 {
            assert_eq!(nibble_to_sample(sample_to_nibble(sample)), sample);
        }
    }

    #[test]
    fn nibbles() {
        assert_eq!(high_nibble_signed(0x8F), -8);
        assert_eq!(low_nibble_signed(0x8F), -1);
        assert_eq!(combine_nibbles(-1, 7), 0xF7);
        assert_eq!(clamp_4(9), 7);
        assert_eq!(clamp_16(-40000), i16::MIN);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 0x20), 0);
        assert_eq!(align_up(1, 0x20), 0x20);
        assert_eq!(align_up(0x40, 0x20), 0x40);
        assert_eq!(7usize.divide_by_round_up(2), 4);
    }
}
