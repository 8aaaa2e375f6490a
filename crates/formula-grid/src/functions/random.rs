use rand::Rng;

/// Uniformly distributed random number in `[min, max)`.
///
/// Swapped bounds are accepted (the interval is just walked the other way) and non-finite
/// bounds propagate as NaN/inf instead of panicking like `gen_range` would.
pub(crate) fn uniform(min: f64, max: f64) -> f64 {
    let u: f64 = rand::thread_rng().gen();
    min + (max - min) * u
}

/// Normally distributed random number (Marsaglia polar method).
pub(crate) fn gaussian(mean: f64, stdv: f64) -> f64 {
    let mut rng = rand::thread_rng();
    loop {
        let x = 2.0 * rng.gen::<f64>() - 1.0;
        let y = 2.0 * rng.gen::<f64>() - 1.0;
        let r = x * x + y * y;
        if r > 0.0 && r < 1.0 {
            let scale = (-2.0 * r.ln() / r).sqrt();
            return mean + stdv * x * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stays_within_bounds() {
        for _ in 0..1_000 {
            let v = uniform(-3.0, 5.0);
            assert!((-3.0..5.0).contains(&v), "got {v}");
        }
    }

    #[test]
    fn uniform_with_equal_bounds_is_constant() {
        assert_eq!(uniform(2.5, 2.5), 2.5);
    }

    #[test]
    fn gaussian_sample_mean_is_close_to_mean() {
        let n = 20_000;
        let sum: f64 = (0..n).map(|_| gaussian(10.0, 2.0)).sum();
        let mean = sum / n as f64;
        assert!((mean - 10.0).abs() < 0.1, "sample mean {mean}");
    }

    #[test]
    fn gaussian_with_zero_spread_returns_mean() {
        assert_eq!(gaussian(4.0, 0.0), 4.0);
    }
}
