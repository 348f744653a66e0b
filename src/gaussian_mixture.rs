//! One-dimensional Gaussian mixture fit by expectation maximization
//!
//! Initialization follows the usual k-means++ seeding followed by Lloyd iterations, after which
//! component indices are ordered by ascending k-means center. Given the same seed and input, the fit
//! is fully reproducible.
//!

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::prob_utils::{ln_sum_exp_slice, normalize_ln_distro};

const LN_2PI: f64 = 1.8378770664093453;

pub struct MixtureFitSettings {
    pub component_count: usize,

    /// Convergence threshold on the change in mean per-observation log likelihood
    pub tolerance: f64,

    /// Non-negative regularization added to each component variance
    pub reg_variance: f64,

    pub max_iterations: usize,

    pub seed: u64,
}

impl MixtureFitSettings {
    pub fn new(component_count: usize, seed: u64) -> Self {
        Self {
            component_count,
            tolerance: 1e-3,
            reg_variance: 1e-6,
            max_iterations: 100,
            seed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GaussianComponent {
    pub weight: f64,
    pub mean: f64,
    pub variance: f64,
}

impl GaussianComponent {
    fn ln_weighted_pdf(&self, x: f64) -> f64 {
        let d = x - self.mean;
        self.weight.ln() - 0.5 * (LN_2PI + self.variance.ln() + d * d / self.variance)
    }
}

#[derive(Clone, Debug)]
pub struct GaussianMixture {
    pub components: Vec<GaussianComponent>,

    /// Total log likelihood of the fitted data
    pub ln_likelihood: f64,

    pub converged: bool,
}

impl GaussianMixture {
    /// Number of free parameters in a 1-D mixture with this many components
    pub fn parameter_count(&self) -> usize {
        3 * self.components.len() - 1
    }

    /// Bayesian information criterion of the fit over `n` observations
    pub fn bic(&self, n: usize) -> f64 {
        -2.0 * self.ln_likelihood + self.parameter_count() as f64 * (n as f64).ln()
    }

    /// Return the most probable component for each value
    ///
    /// Ties resolve to the lowest component index.
    ///
    pub fn predict(&self, values: &[f64]) -> Vec<usize> {
        let mut ln_probs = vec![0.0; self.components.len()];
        values
            .iter()
            .map(|&x| {
                for (p, c) in ln_probs.iter_mut().zip(self.components.iter()) {
                    *p = c.ln_weighted_pdf(x);
                }
                normalize_ln_distro(&mut ln_probs).unwrap_or(0)
            })
            .collect()
    }
}

/// Simple 1-D k-means used to initialize the mixture fit
///
/// Returns cluster assignments, with cluster indices ordered by ascending center value
///
fn kmeans_labels(values: &[f64], k: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    let n = values.len();

    // k-means++ seeding
    let mut centers = vec![values[rng.gen_range(0..n)]];
    while centers.len() < k {
        let d2 = values
            .iter()
            .map(|&x| {
                centers
                    .iter()
                    .map(|c| (x - c) * (x - c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect::<Vec<_>>();
        let total = d2.iter().sum::<f64>();
        let next_center = if total > 0.0 {
            let target = rng.gen_range(0.0..total);
            let mut acc = 0.0;
            let mut index = n - 1;
            for (i, d) in d2.iter().enumerate() {
                acc += d;
                if acc > target {
                    index = i;
                    break;
                }
            }
            values[index]
        } else {
            centers[0]
        };
        centers.push(next_center);
    }
    centers.sort_by(|a, b| a.total_cmp(b));

    let nearest = |x: f64, centers: &[f64]| {
        let mut best = 0;
        for (i, c) in centers.iter().enumerate().skip(1) {
            if (x - c).abs() < (x - centers[best]).abs() {
                best = i;
            }
        }
        best
    };

    let mut labels = values.iter().map(|&x| nearest(x, &centers)).collect::<Vec<_>>();
    let max_lloyd_iterations = 300;
    for _ in 0..max_lloyd_iterations {
        for (cluster_index, center) in centers.iter_mut().enumerate() {
            let (sum, count) = values
                .iter()
                .zip(labels.iter())
                .filter(|&(_, &label)| label == cluster_index)
                .fold((0.0, 0usize), |(s, c), (&x, _)| (s + x, c + 1));
            if count > 0 {
                *center = sum / count as f64;
            }
        }
        let updated = values.iter().map(|&x| nearest(x, &centers)).collect::<Vec<_>>();
        if updated == labels {
            break;
        }
        labels = updated;
    }
    labels
}

/// Update mixture parameters from responsibilities, stored as `resp[obs][component]`
///
fn maximization_step(
    values: &[f64],
    resp: &[Vec<f64>],
    reg_variance: f64,
) -> Vec<GaussianComponent> {
    let k = resp[0].len();
    let n = values.len() as f64;
    (0..k)
        .map(|j| {
            let nk = resp.iter().map(|r| r[j]).sum::<f64>() + 10.0 * f64::EPSILON;
            let mean = values
                .iter()
                .zip(resp.iter())
                .map(|(x, r)| r[j] * x)
                .sum::<f64>()
                / nk;
            let variance = values
                .iter()
                .zip(resp.iter())
                .map(|(x, r)| r[j] * (x - mean) * (x - mean))
                .sum::<f64>()
                / nk
                + reg_variance;
            GaussianComponent {
                weight: nk / n,
                mean,
                variance,
            }
        })
        .collect()
}

/// Fill in responsibilities for the current components
///
/// Returns the total log likelihood
///
fn expectation_step(
    values: &[f64],
    components: &[GaussianComponent],
    resp: &mut [Vec<f64>],
) -> f64 {
    let mut total = 0.0;
    for (&x, r) in values.iter().zip(resp.iter_mut()) {
        for (p, c) in r.iter_mut().zip(components.iter()) {
            *p = c.ln_weighted_pdf(x);
        }
        let ln_norm = ln_sum_exp_slice(r);
        for p in r.iter_mut() {
            *p = (*p - ln_norm).exp();
        }
        total += ln_norm;
    }
    total
}

/// Fit a Gaussian mixture to `values`
///
/// Returns None if there are fewer values than components.
///
pub fn fit_gaussian_mixture(values: &[f64], settings: &MixtureFitSettings) -> Option<GaussianMixture> {
    let k = settings.component_count;
    let n = values.len();
    if k == 0 || n < k {
        return None;
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(settings.seed);
    let labels = kmeans_labels(values, k, &mut rng);

    let mut resp = labels
        .iter()
        .map(|&label| {
            let mut r = vec![0.0; k];
            r[label] = 1.0;
            r
        })
        .collect::<Vec<_>>();
    let mut components = maximization_step(values, &resp, settings.reg_variance);

    let mut ln_likelihood = f64::NEG_INFINITY;
    let mut converged = false;
    for _ in 0..settings.max_iterations {
        let prev_mean_ln_likelihood = ln_likelihood / n as f64;
        ln_likelihood = expectation_step(values, &components, &mut resp);
        components = maximization_step(values, &resp, settings.reg_variance);
        if (ln_likelihood / n as f64 - prev_mean_ln_likelihood).abs() < settings.tolerance {
            converged = true;
            break;
        }
    }

    // Report the likelihood of the final parameter set
    ln_likelihood = expectation_step(values, &components, &mut resp);

    Some(GaussianMixture {
        components,
        ln_likelihood,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmeans_labels() {
        let values = [10.0, 0.1, 10.2, 0.0, 9.8, -0.1];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let labels = kmeans_labels(&values, 2, &mut rng);
        assert_eq!(labels, vec![1, 0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_fit_two_clusters() {
        let mut values = Vec::new();
        for i in 0..100 {
            values.push(1.0 + 0.01 * ((i % 10) as f64 - 4.5));
        }
        for i in 0..20 {
            values.push(3.0 + 0.5 * ((i % 5) as f64 - 2.0));
        }

        let settings = MixtureFitSettings::new(2, 42);
        let gmm = fit_gaussian_mixture(&values, &settings).unwrap();
        assert!(gmm.converged);
        assert_eq!(gmm.components.len(), 2);

        let low = &gmm.components[0];
        let high = &gmm.components[1];
        approx::assert_abs_diff_eq!(low.mean, 1.0, epsilon = 1e-3);
        approx::assert_abs_diff_eq!(high.mean, 3.0, epsilon = 1e-2);
        approx::assert_abs_diff_eq!(low.weight, 100.0 / 120.0, epsilon = 1e-2);
        assert!(low.variance < high.variance);

        let labels = gmm.predict(&values);
        assert!(labels[..100].iter().all(|&x| x == 0));
        assert!(labels[100..].iter().all(|&x| x == 1));
    }

    #[test]
    fn test_fit_is_reproducible() {
        let values = (0..60)
            .map(|i| ((i * 37) % 17) as f64 * 0.1)
            .collect::<Vec<_>>();
        let settings = MixtureFitSettings::new(2, 7);
        let a = fit_gaussian_mixture(&values, &settings).unwrap();
        let b = fit_gaussian_mixture(&values, &settings).unwrap();
        for (x, y) in a.components.iter().zip(b.components.iter()) {
            assert_eq!(x.mean.to_bits(), y.mean.to_bits());
            assert_eq!(x.variance.to_bits(), y.variance.to_bits());
        }
    }

    #[test]
    fn test_fit_constant_values() {
        let values = vec![0.5; 50];
        let gmm = fit_gaussian_mixture(&values, &MixtureFitSettings::new(2, 1)).unwrap();
        let labels = gmm.predict(&values);
        assert!(labels.iter().all(|&x| x == 0));
    }

    #[test]
    fn test_too_few_values() {
        assert!(fit_gaussian_mixture(&[1.0], &MixtureFitSettings::new(2, 1)).is_none());
    }
}
