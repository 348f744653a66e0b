use num::Float;

/// Return ln(exp(a) + exp(b)) without overflow
///
pub fn ln_sum_exp<F: Float>(a: F, b: F) -> F {
    if a == F::neg_infinity() {
        return b;
    }
    if b == F::neg_infinity() {
        return a;
    }
    let (max, min) = if a > b { (a, b) } else { (b, a) };
    max + (min - max).exp().ln_1p()
}

/// Return ln(sum(exp(x))) over all input values
///
pub fn ln_sum_exp_slice<F: Float>(x: &[F]) -> F {
    x.iter()
        .fold(F::neg_infinity(), |acc, &v| ln_sum_exp(acc, v))
}

/// ln(1 + exp(x)), stable for large |x|
///
pub fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// ln(sigmoid(x))
///
pub fn ln_sigmoid(x: f64) -> f64 {
    -softplus(-x)
}

/// Standardize ln-transformed unnormalized prob distro input
///
/// Returns the index of the most probable component. Ties resolve to the lowest index.
///
pub fn normalize_ln_distro<F: Float>(x: &mut [F]) -> Option<usize> {
    if x.is_empty() {
        return None;
    }

    let mut max_index = 0;
    let mut max_p = x[0];
    for (index, p) in x.iter().skip(1).enumerate() {
        if *p > max_p {
            max_p = *p;
            max_index = index + 1;
        }
    }

    let mut sum = F::zero();
    for p in x.iter_mut() {
        *p = (*p - max_p).exp();
        sum = sum + *p;
    }

    for p in x.iter_mut() {
        *p = *p / sum;
    }

    Some(max_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ln_sum_exp() {
        let x = ln_sum_exp(0.2f64.ln(), 0.3f64.ln());
        approx::assert_ulps_eq!(x, 0.5f64.ln(), max_ulps = 4);

        let x = ln_sum_exp(f64::NEG_INFINITY, 0.3f64.ln());
        approx::assert_ulps_eq!(x, 0.3f64.ln(), max_ulps = 4);

        let x = ln_sum_exp_slice(&[0.1f64.ln(), 0.2f64.ln(), 0.3f64.ln()]);
        approx::assert_ulps_eq!(x, 0.6f64.ln(), max_ulps = 4);
    }

    #[test]
    fn test_sigmoid() {
        approx::assert_ulps_eq!(sigmoid(0.0), 0.5);
        approx::assert_abs_diff_eq!(sigmoid(2.0) + sigmoid(-2.0), 1.0, epsilon = 1e-15);
        approx::assert_abs_diff_eq!(ln_sigmoid(1.5), sigmoid(1.5).ln(), epsilon = 1e-14);
        approx::assert_abs_diff_eq!(ln_sigmoid(-800.0), -800.0, epsilon = 1e-9);
        assert!(softplus(800.0).is_finite());
    }

    #[test]
    fn test_normalize_ln_distro() {
        let x = [0.001, 0.001, 0.002, 0.001];
        let mut x = x.into_iter().map(|x: f64| x.ln()).collect::<Vec<_>>();

        let max_index = normalize_ln_distro(&mut x);
        assert_eq!(max_index, Some(2));
        approx::assert_ulps_eq!(x[0], 0.2, max_ulps = 4);
        approx::assert_ulps_eq!(x[2], 0.4, max_ulps = 4);
    }

    #[test]
    fn test_normalize_ln_distro_tie() {
        let mut x = vec![-1.0f64, -1.0];
        assert_eq!(normalize_ln_distro(&mut x), Some(0));
        approx::assert_ulps_eq!(x[1], 0.5, max_ulps = 4);
    }
}
