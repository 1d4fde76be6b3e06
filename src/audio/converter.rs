//! PCM sample conversion between fixed point and the `f32` the pipeline runs on

pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|x| *x as f32 / i16::MAX as f32).collect()
}

pub fn u16_to_f32(samples: &[u16]) -> Vec<f32> {
    samples
        .iter()
        .map(|x| (*x as f32 - 32_768.0) / 32_768.0)
        .collect()
}

/// signed integer samples of any width up to 32 bits, as decoded from a wav file
pub fn int_to_f32(samples: &[i32], bits: u16) -> Vec<f32> {
    let scale = (1u64 << (bits.clamp(1, 32) - 1)) as f32;
    samples.iter().map(|x| *x as f32 / scale).collect()
}

/// clips to [-1, 1]
pub fn f32_to_i16(samples: &[f32], out: &mut [i16]) {
    for (o, s) in out.iter_mut().zip(samples) {
        *o = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
    }
}

/// clips to [-1, 1]
pub fn f32_to_u16(samples: &[f32], out: &mut [u16]) {
    for (o, s) in out.iter_mut().zip(samples) {
        *o = (s.clamp(-1.0, 1.0) * 32_767.0 + 32_768.0) as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_to_float() {
        assert_eq!(i16_to_f32(&[0, i16::MAX, -i16::MAX]), vec![0.0, 1.0, -1.0]);
        assert_eq!(u16_to_f32(&[32_768, 0]), vec![0.0, -1.0]);
        assert_eq!(int_to_f32(&[1 << 23, -(1 << 23)], 24), vec![1.0, -1.0]);
    }

    #[test]
    fn float_to_fixed_point_clips() {
        let mut out = [0i16; 3];
        f32_to_i16(&[0.5, 2.0, -2.0], &mut out);
        assert_eq!(out, [16_383, i16::MAX, -i16::MAX]);

        let mut out = [0u16; 2];
        f32_to_u16(&[0.0, -1.0], &mut out);
        assert_eq!(out, [32_768, 1]);
    }
}
