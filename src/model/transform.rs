//! Transforms from unconstrained parameter space to constrained model parameters
//!

use crate::prob_utils::{ln_sigmoid, sigmoid};

/// Map `y` (length C-1) onto a C-component simplex by stick breaking
///
/// Returns the simplex and the log absolute determinant of the transform Jacobian. The offset
/// `ln(C-1-k)` centers `y = 0` on the uniform simplex.
///
pub fn stick_breaking_constrain(y: &[f64]) -> (Vec<f64>, f64) {
    let c = y.len() + 1;
    let mut simplex = Vec::with_capacity(c);
    let mut ln_remainder = 0.0;
    let mut ln_jacobian = 0.0;
    for (k, &yk) in y.iter().enumerate() {
        let x = yk - ((c - 1 - k) as f64).ln();
        let ln_z = ln_sigmoid(x);
        let ln_one_minus_z = ln_sigmoid(-x);
        ln_jacobian += ln_z + ln_one_minus_z + ln_remainder;
        simplex.push((ln_remainder + ln_z).exp());
        ln_remainder += ln_one_minus_z;
    }
    simplex.push(ln_remainder.exp());
    (simplex, ln_jacobian)
}

/// Gradient of `f(simplex(y)) + ln|J(y)|` with respect to `y`
///
/// # Arguments
/// * `simplex_grad` - gradient of `f` with respect to each simplex component
///
pub fn stick_breaking_gradient(y: &[f64], simplex: &[f64], simplex_grad: &[f64]) -> Vec<f64> {
    let c = simplex.len();
    assert_eq!(y.len() + 1, c);
    assert_eq!(simplex_grad.len(), c);

    // tail[k] = sum_{j >= k} simplex_grad[j] * simplex[j]
    let mut tail = vec![0.0; c + 1];
    for j in (0..c).rev() {
        tail[j] = tail[j + 1] + simplex_grad[j] * simplex[j];
    }

    y.iter()
        .enumerate()
        .map(|(k, &yk)| {
            let z = sigmoid(yk - ((c - 1 - k) as f64).ln());
            let density_term = simplex_grad[k] * simplex[k] * (1.0 - z) - z * tail[k + 1];
            let jacobian_term = 1.0 - 2.0 * z - (c - 2 - k) as f64 * z;
            density_term + jacobian_term
        })
        .collect()
}
