//! Derives the eight predictor pairs a channel is encoded with.
//!
//! Each 14-sample frame contributes one record of reflection coefficients
//! (autocorrelation over the frame and the one before it). The records are then
//! clustered into 1, 2, 4 and finally 8 groups, and every group's average filter
//! becomes one coefficient pair in 4.11 fixed point.

use crate::{math::DivideByRoundUp, SAMPLES_PER_FRAME};

type Vector = [f64; 3];
type Matrix = [[f64; 3]; 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coefficients {
    pub coefs: [i16; 16],
}

impl std::ops::Deref for Coefficients {
    type Target = [i16; 16];

    fn deref(&self) -> &Self::Target {
        &self.coefs
    }
}

impl<T: AsRef<[i16]>> From<T> for Coefficients {
    fn from(source: T) -> Self {
        Self { coefs: calculate_coefficients(source.as_ref()) }
    }
}

pub fn calculate_coefficients(source: &[i16]) -> [i16; 16] {
    let frame_count = source.len().divide_by_round_up(SAMPLES_PER_FRAME);
    let mut pcm_hist = [0i16; SAMPLES_PER_FRAME * 2];
    let mut vec1: Vector = [0.0; 3];
    let mut buffer: Vector = [0.0; 3];
    let mut mtx: Matrix = [[0.0; 3]; 3];
    let mut vec_idxs = [0usize; 3];
    let mut records: Vec<Vector> = Vec::with_capacity(frame_count);
    let mut vec_best: [Vector; 8] = [[0.0; 3]; 8];

    for frame in source.chunks(SAMPLES_PER_FRAME) {
        // A short final frame keeps the previous frame's samples past its end.
        pcm_hist[SAMPLES_PER_FRAME..SAMPLES_PER_FRAME + frame.len()].copy_from_slice(frame);

        inner_product_merge(&mut vec1, &pcm_hist);
        if vec1[0].abs() > 10.0 {
            outer_product_merge(&mut mtx, &pcm_hist);
            if !analyze_ranges(&mut mtx, &mut vec_idxs, &mut buffer) {
                bidirectional_filter(&mtx, &vec_idxs, &mut vec1);
                if !quadratic_merge(&mut vec1) {
                    let mut record = [0.0; 3];
                    finish_record(&mut vec1, &mut record);
                    records.push(record);
                }
            }
        }

        pcm_hist.copy_within(SAMPLES_PER_FRAME.., 0);
    }

    // Nothing but near-silence: every predictor stays at zero.
    if records.is_empty() {
        return [0; 16];
    }

    vec1 = [1.0, 0.0, 0.0];
    for record in &records {
        matrix_filter(record, &mut vec_best[0], &mut mtx);
        for y in 1..=2 {
            vec1[y] += vec_best[0][y];
        }
    }

    for value in &mut vec1[1..] {
        *value /= records.len() as f64;
    }

    let mut merged = [0.0; 3];
    merge_finish_record(&vec1, &mut merged);
    vec_best[0] = merged;

    let split: Vector = [0.0, -1.0, 0.0];
    let mut exp = 1;
    for w in 1..=3 {
        for i in 0..exp {
            for y in 0..=2 {
                vec_best[exp + i][y] = (0.01 * split[y]) + vec_best[i][y];
            }
        }
        exp = 1 << w;
        filter_records(&mut vec_best, exp, &records);
    }

    let mut coefs = [0i16; 16];
    for (z, best) in vec_best.iter().enumerate() {
        coefs[z * 2] = to_fixed_point(-best[1] * 2048.0);
        coefs[z * 2 + 1] = to_fixed_point(-best[2] * 2048.0);
    }

    coefs
}

fn to_fixed_point(value: f64) -> i16 {
    if value > i16::MAX as f64 {
        i16::MAX
    } else if value < i16::MIN as f64 {
        i16::MIN
    } else {
        value.round() as i16
    }
}

fn inner_product_merge(out: &mut Vector, pcm: &[i16; 28]) {
    for i in 0..=2 {
        out[i] = 0.0;
        for x in 0..SAMPLES_PER_FRAME {
            out[i] -= pcm[14 + x - i] as f64 * pcm[14 + x] as f64;
        }
    }
}

fn outer_product_merge(mtx: &mut Matrix, pcm: &[i16; 28]) {
    for x in 1..=2 {
        for y in 1..=2 {
            mtx[x][y] = 0.0;
            for z in 0..SAMPLES_PER_FRAME {
                mtx[x][y] += pcm[14 + z - x] as f64 * pcm[14 + z - y] as f64;
            }
        }
    }
}

/// LU-decomposes `mtx` in place with partial pivoting. Returns true when the
/// system is too ill-conditioned to yield a usable record.
fn analyze_ranges(mtx: &mut Matrix, vec_idxs: &mut [usize; 3], recips: &mut Vector) -> bool {
    for x in 1..=2 {
        let val = mtx[x][1].abs().max(mtx[x][2].abs());
        if val < f64::EPSILON {
            return true;
        }

        recips[x] = 1.0 / val;
    }

    let mut max_index = 0;
    for i in 1..=2 {
        for x in 1..i {
            let mut tmp = mtx[x][i];
            for y in 1..x {
                tmp -= mtx[x][y] * mtx[y][i];
            }
            mtx[x][i] = tmp;
        }

        let mut val = 0.0;
        for x in i..=2 {
            let mut tmp = mtx[x][i];
            for y in 1..i {
                tmp -= mtx[x][y] * mtx[y][i];
            }

            mtx[x][i] = tmp;
            let scaled = tmp.abs() * recips[x];
            if scaled >= val {
                val = scaled;
                max_index = x;
            }
        }

        if max_index != i {
            for y in 1..=2 {
                let tmp = mtx[max_index][y];
                mtx[max_index][y] = mtx[i][y];
                mtx[i][y] = tmp;
            }
            recips[max_index] = recips[i];
        }
        vec_idxs[i] = max_index;

        if i != 2 {
            let tmp = 1.0 / mtx[i][i];
            for x in (i + 1)..=2 {
                mtx[x][i] *= tmp;
            }
        }
    }

    let mut min = 1.0e10;
    let mut max = 0.0;
    for i in 1..=2 {
        let tmp = mtx[i][i].abs();
        if tmp < min {
            min = tmp;
        }
        if tmp > max {
            max = tmp;
        }
    }

    min / max < 1.0e-10
}

fn bidirectional_filter(mtx: &Matrix, vec_idxs: &[usize; 3], vec_out: &mut Vector) {
    let mut x = 0;
    for i in 1..=2 {
        let index = vec_idxs[i];
        let mut tmp = vec_out[index];
        vec_out[index] = vec_out[i];
        if x != 0 {
            for y in x..i {
                tmp -= vec_out[y] * mtx[i][y];
            }
        } else if tmp != 0.0 {
            x = i;
        }
        vec_out[i] = tmp;
    }

    for i in (1..=2).rev() {
        let mut tmp = vec_out[i];
        for y in (i + 1)..=2 {
            tmp -= vec_out[y] * mtx[i][y];
        }
        vec_out[i] = tmp / mtx[i][i];
    }

    vec_out[0] = 1.0;
}

fn quadratic_merge(in_out: &mut Vector) -> bool {
    let v2 = in_out[2];
    let tmp = 1.0 - (v2 * v2);

    if tmp == 0.0 {
        return true;
    }

    let v0 = (in_out[0] - (v2 * v2)) / tmp;
    let v1 = (in_out[1] - (in_out[1] * v2)) / tmp;

    in_out[0] = v0;
    in_out[1] = v1;

    v1.abs() > 1.0
}

fn finish_record(in_r: &mut Vector, out_r: &mut Vector) {
    for z in 1..=2 {
        in_r[z] = in_r[z].clamp(-0.9999999999, 0.9999999999);
    }

    out_r[0] = 1.0;
    out_r[1] = (in_r[2] * in_r[1]) + in_r[1];
    out_r[2] = in_r[2];
}

fn matrix_filter(src: &Vector, dst: &mut Vector, mtx: &mut Matrix) {
    mtx[2][0] = 1.0;
    for i in 1..=2 {
        mtx[2][i] = -src[i];
    }

    for i in (1..=2).rev() {
        let val = 1.0 - (mtx[i][i] * mtx[i][i]);
        for y in 1..=i {
            mtx[i - 1][y] = ((mtx[i][i] * mtx[i][y]) + mtx[i][y]) / val;
        }
    }

    dst[0] = 1.0;
    for i in 1..=2 {
        dst[i] = 0.0;
        for y in 1..=i {
            dst[i] += mtx[i][y] * dst[i - y];
        }
    }
}

fn merge_finish_record(src: &Vector, dst: &mut Vector) {
    let mut tmp = [0.0; 3];
    let mut val = src[0];

    dst[0] = 1.0;
    for i in 1..=2 {
        let mut v2 = 0.0;
        for y in 1..i {
            v2 += dst[y] * src[i - y];
        }

        dst[i] = if val > 0.0 { -(v2 + src[i]) / val } else { 0.0 };
        tmp[i] = dst[i];

        for y in 1..i {
            dst[y] += dst[i] * dst[i - y];
        }

        val *= 1.0 - (dst[i] * dst[i]);
    }

    finish_record(&mut tmp, dst);
}

fn contrast_vectors(source1: &Vector, source2: &Vector) -> f64 {
    let val = (source2[2] * source2[1] + -source2[1]) / (1.0 - source2[2] * source2[2]);
    let val1 = (source1[0] * source1[0]) + (source1[1] * source1[1]) + (source1[2] * source1[2]);
    let val2 = (source1[0] * source1[1]) + (source1[1] * source1[2]);
    let val3 = source1[0] * source1[2];
    val1 + (2.0 * val * val2) + (2.0 * (-source2[1] * val + -source2[2]) * val3)
}

/// Two rounds of nearest-centroid clustering of `records` onto the first `exp` entries.
fn filter_records(vec_best: &mut [Vector; 8], exp: usize, records: &[Vector]) {
    let mut mtx: Matrix = [[0.0; 3]; 3];
    let mut filtered: Vector = [0.0; 3];

    for _ in 0..2 {
        let mut sums: [Vector; 8] = [[0.0; 3]; 8];
        let mut counts = [0usize; 8];

        for record in records {
            let mut index = 0;
            let mut value = 1.0e30;
            for (i, best) in vec_best.iter().enumerate().take(exp) {
                let distance = contrast_vectors(best, record);
                if distance < value {
                    value = distance;
                    index = i;
                }
            }

            counts[index] += 1;
            matrix_filter(record, &mut filtered, &mut mtx);
            for i in 0..=2 {
                sums[index][i] += filtered[i];
            }
        }

        for i in 0..exp {
            if counts[i] > 0 {
                for value in &mut sums[i] {
                    *value /= counts[i] as f64;
                }
            }
        }

        for i in 0..exp {
            merge_finish_record(&sums[i], &mut vec_best[i]);
        }
    }
}
