//! Lag-polynomial helpers
//!
//! Polynomials are coefficient vectors in the backshift operator B, lowest
//! degree first, so `[1.0, -0.5]` is `1 - 0.5B`.

/// Product of two lag polynomials
pub fn multiply(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// `1 - c1 B^step - c2 B^(2 step) - ...`
pub fn ar_factor(coefficients: &[f64], step: usize) -> Vec<f64> {
    let mut poly = vec![0.0; coefficients.len() * step + 1];
    poly[0] = 1.0;
    for (i, c) in coefficients.iter().enumerate() {
        poly[(i + 1) * step] = -c;
    }
    poly
}

/// `1 + c1 B^step + c2 B^(2 step) + ...`
pub fn ma_factor(coefficients: &[f64], step: usize) -> Vec<f64> {
    let mut poly = vec![0.0; coefficients.len() * step + 1];
    poly[0] = 1.0;
    for (i, c) in coefficients.iter().enumerate() {
        poly[(i + 1) * step] = *c;
    }
    poly
}

/// `(1 - B)^d (1 - B^s)^D`
pub fn differencing(d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..d {
        poly = multiply(&poly, &[1.0, -1.0]);
    }
    let mut seasonal = vec![0.0; period + 1];
    seasonal[0] = 1.0;
    seasonal[period] = -1.0;
    for _ in 0..seasonal_d {
        poly = multiply(&poly, &seasonal);
    }
    poly
}

/// Filter `y` through `poly`, dropping the first `poly.len() - 1` values
pub fn apply(poly: &[f64], y: &[f64]) -> Vec<f64> {
    let lag = poly.len().saturating_sub(1);
    if y.len() <= lag {
        return Vec::new();
    }
    (lag..y.len())
        .map(|t| poly.iter().enumerate().map(|(i, c)| c * y[t - i]).sum())
        .collect()
}

/// Whether the AR recursion `x_t = a1 x_{t-1} + ... + ap x_{t-p}` is stationary.
///
/// Uses the Levinson step-down recursion: the model is stationary iff every
/// implied partial autocorrelation lies strictly inside (-1, 1).
pub fn is_stationary(coefficients: &[f64]) -> bool {
    let mut a = coefficients.to_vec();
    while let Some(&kappa) = a.last() {
        if !kappa.is_finite() || kappa.abs() >= 1.0 {
            return false;
        }
        let k = a.len();
        let denom = 1.0 - kappa * kappa;
        let prev: Vec<f64> = (0..k - 1)
            .map(|j| (a[j] + kappa * a[k - 2 - j]) / denom)
            .collect();
        a = prev;
    }
    true
}

/// Whether `1 + c1 B + ... + cq B^q` has all roots outside the unit circle
pub fn is_invertible(coefficients: &[f64]) -> bool {
    let negated: Vec<f64> = coefficients.iter().map(|c| -c).collect();
    is_stationary(&negated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiply_seasonal_factors() {
        // (1 - 0.5B)(1 - 0.3B^2) = 1 - 0.5B - 0.3B^2 + 0.15B^3
        let poly = multiply(&ar_factor(&[0.5], 1), &ar_factor(&[0.3], 2));
        assert_eq!(poly.len(), 4);
        assert!((poly[1] + 0.5).abs() < 1e-12);
        assert!((poly[2] + 0.3).abs() < 1e-12);
        assert!((poly[3] - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_differencing_polynomial() {
        assert_eq!(differencing(0, 0, 12), vec![1.0]);
        assert_eq!(differencing(2, 0, 12), vec![1.0, -2.0, 1.0]);

        let seasonal = differencing(1, 1, 4);
        assert_eq!(seasonal, vec![1.0, -1.0, 0.0, 0.0, -1.0, 1.0]);
    }

    #[test]
    fn test_apply_first_difference() {
        let w = apply(&differencing(1, 0, 12), &[1.0, 3.0, 6.0, 10.0]);
        assert_eq!(w, vec![2.0, 3.0, 4.0]);
        assert!(apply(&[1.0, -1.0], &[5.0]).is_empty());
    }

    #[test]
    fn test_stationarity_step_down() {
        assert!(is_stationary(&[]));
        assert!(is_stationary(&[0.5]));
        assert!(!is_stationary(&[1.0]));
        assert!(!is_stationary(&[-1.2]));
        assert!(is_stationary(&[0.5, 0.3]));
        assert!(!is_stationary(&[0.5, 0.6]));
        assert!(is_stationary(&[1.2, -0.5]));
        assert!(!is_stationary(&[f64::NAN]));
    }

    #[test]
    fn test_invertibility() {
        assert!(is_invertible(&[0.4]));
        assert!(is_invertible(&[-0.9]));
        assert!(!is_invertible(&[1.5]));
        assert!(!is_invertible(&[0.5, 1.0]));
    }
}
