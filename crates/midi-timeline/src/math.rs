//! Small numeric helpers: histogram blurs, sample statistics and arg-max/arg-min.

use crate::{Error, Result};

/// Sliding-window mean of odd width `size` (even sizes are widened by one).
///
/// Samples outside the slice are replaced by the mean of the first or last
/// `size` samples. Slices shorter than two samples are left unchanged.
pub fn box_blur(values: &mut [f64], size: usize) {
    let len = values.len();
    if len < 2 || size == 0 {
        return;
    }
    let size = if size % 2 == 0 { size + 1 } else { size };
    let half = (size / 2) as isize;
    let edge = size.min(len);

    let start_pad = values[..edge].iter().sum::<f64>() / edge as f64;
    let end_pad = values[len - edge..].iter().sum::<f64>() / edge as f64;
    let sample = |i: isize| -> f64 {
        if i < 0 {
            start_pad
        } else if i as usize >= len {
            end_pad
        } else {
            values[i as usize]
        }
    };

    let mut sum: f64 = (-half..=half).map(sample).sum();
    let mut blurred = Vec::with_capacity(len);
    for i in 0..len as isize {
        blurred.push(sum / size as f64);
        sum -= sample(i - half);
        sum += sample(i + half + 1);
    }
    values.copy_from_slice(&blurred);
}

/// Three box passes approximating a gaussian kernel.
pub fn gaussian_blur(values: &mut [f64], size: usize) {
    for _ in 0..3 {
        box_blur(values, size);
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0 for no samples and the sample itself for one.
pub fn standard_deviation(values: &[f64]) -> f64 {
    match values.len() {
        0 => 0.0,
        1 => values[0],
        n => {
            let mean = mean(values);
            let squares: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
            (squares / (n - 1) as f64).sqrt()
        }
    }
}

fn check_lengths(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Pearson correlation; 0 for empty input or when either side has no variance.
pub fn correlation(a: &[f64], b: &[f64]) -> Result<f64> {
    check_lengths(a, b)?;
    if a.is_empty() {
        return Ok(0.0);
    }
    let (mean_a, mean_b) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        return Ok(0.0);
    }
    Ok(cov / denom)
}

/// Index and value of the maximum; the first one wins on ties.
pub fn max_with_index<T: PartialOrd + Copy>(values: &[T]) -> Option<(usize, T)> {
    let (first, rest) = values.split_first()?;
    let mut best = (0, *first);
    for (i, value) in rest.iter().enumerate() {
        if *value > best.1 {
            best = (i + 1, *value);
        }
    }
    Some(best)
}

/// Index and value of the minimum; the first one wins on ties.
pub fn min_with_index<T: PartialOrd + Copy>(values: &[T]) -> Option<(usize, T)> {
    let (first, rest) = values.split_first()?;
    let mut best = (0, *first);
    for (i, value) in rest.iter().enumerate() {
        if *value < best.1 {
            best = (i + 1, *value);
        }
    }
    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn box_blur_of_constant_is_constant() {
        let mut values = vec![2.0; 7];
        box_blur(&mut values, 3);
        assert!(values.iter().all(|v| close(*v, 2.0)));
    }

    #[test]
    fn box_blur_averages_neighbours() {
        let mut values = vec![0.0, 0.0, 3.0, 0.0, 0.0];
        box_blur(&mut values, 3);
        assert!(close(values[1], 1.0));
        assert!(close(values[2], 1.0));
        assert!(close(values[3], 1.0));
        // edges pad with the mean of the first three samples
        assert!(close(values[0], (1.0 + 0.0 + 0.0) / 3.0));
    }

    #[test]
    fn box_blur_widens_even_sizes() {
        let mut even = vec![0.0, 0.0, 3.0, 0.0, 0.0];
        let mut odd = even.clone();
        box_blur(&mut even, 2);
        box_blur(&mut odd, 3);
        assert_eq!(even, odd);
    }

    #[test]
    fn gaussian_blur_spreads_a_spike() {
        let mut values = vec![0.0; 9];
        values[4] = 27.0;
        gaussian_blur(&mut values, 3);
        assert!(close(values[4], 7.0));
        assert!(close(values[3], 6.0) && close(values[5], 6.0));
        assert!(close(values[2], 3.0));
        assert_eq!(max_with_index(&values), Some((4, values[4])));
    }

    #[test]
    fn standard_deviation_edge_cases() {
        assert_eq!(standard_deviation(&[]), 0.0);
        assert_eq!(standard_deviation(&[4.5]), 4.5);
        assert!(close(standard_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.138089935299395));
    }

    #[test]
    fn correlation_of_identical_and_opposite() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [4.0, 3.0, 2.0, 1.0];
        assert!(close(correlation(&a, &a).unwrap(), 1.0));
        assert!(close(correlation(&a, &b).unwrap(), -1.0));
    }

    #[test]
    fn correlation_degenerate_inputs() {
        assert_eq!(correlation(&[], &[]).unwrap(), 0.0);
        assert_eq!(correlation(&[1.0, 1.0], &[1.0, 2.0]).unwrap(), 0.0);
        assert!(matches!(
            correlation(&[1.0], &[1.0, 2.0]),
            Err(Error::LengthMismatch { left: 1, right: 2 })
        ));
    }

    #[test]
    fn arg_extremes_prefer_first() {
        assert_eq!(max_with_index(&[1.0, 3.0, 3.0, 2.0]), Some((1, 3.0)));
        assert_eq!(min_with_index(&[2, 1, 1, 5]), Some((1, 1)));
        assert_eq!(max_with_index::<f64>(&[]), None);
    }
}
