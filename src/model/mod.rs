//! Joint density of clone prevalence, coverage noise scale and the observed data
//!
//! The model is expressed over an unconstrained parameter vector, laid out as the C-1 stick
//! breaking coordinates of the clone prevalence simplex followed by the log of the coverage noise
//! scale `tau`.
//!

mod transform;

use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_binomial;
use statrs::function::gamma::ln_gamma;

use self::transform::{stick_breaking_constrain, stick_breaking_gradient};
use crate::genome_bins::GenomicBin;
use crate::prob_utils::ln_sigmoid;
use crate::snv_harmonizer::CountMatrix;

/// Degrees of freedom of the coverage ratio Student-t likelihood
const COVERAGE_DF: f64 = 4.0;

/// Inverse gamma prior shape and scale for tau
const TAU_PRIOR_SHAPE: f64 = 3.0;
const TAU_PRIOR_SCALE: f64 = 1.0;

/// SNV mutant fractions are clamped to [XI_EPSILON, 1 - XI_EPSILON]
const XI_EPSILON: f64 = 1e-9;

/// Registry of the supported models
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum, strum::Display,
)]
pub enum ModelKind {
    /// Coverage ratios only
    #[value(name = "cn")]
    #[serde(rename = "cn")]
    #[strum(serialize = "cn")]
    Cn,

    /// Coverage ratios and liquid sample SNV allele counts
    #[value(name = "cn_snv")]
    #[serde(rename = "cn_snv")]
    #[strum(serialize = "cn_snv")]
    CnSnv,
}

impl ModelKind {
    pub fn requires_snv_counts(&self) -> bool {
        match self {
            ModelKind::Cn => false,
            ModelKind::CnSnv => true,
        }
    }
}

/// A differentiable log density over an unconstrained parameter vector
///
pub trait LogDensity {
    /// Dimension of the unconstrained parameter vector
    fn dim(&self) -> usize;

    /// Return the log density at `theta`, and write its gradient into `grad`
    ///
    /// Normalizing constants may be omitted. Non-finite values are allowed and are treated as
    /// zero density by the sampler.
    ///
    fn ln_density_and_gradient(&self, theta: &[f64], grad: &mut [f64]) -> f64;

    /// Names and dimensions of the constrained parameters, in the order written by [Self::constrain]
    fn parameter_layout(&self) -> Vec<(String, usize)>;

    /// Map `theta` to the flattened constrained parameter values
    fn constrain(&self, theta: &[f64]) -> Vec<f64>;
}

struct SnvTerm {
    ref_counts: Vec<f64>,
    alt_counts: Vec<f64>,

    /// Per-locus tumor clone mutant copies, excluding the normal clone
    mutant_copies: Vec<Vec<f64>>,

    ln_binomial_sum: f64,
}

/// Clone prevalence model of liquid biopsy coverage ratios, with an optional SNV allele count term
///
/// - rho ~ Dirichlet(1, ..., 1)
/// - tau ~ InverseGamma(3, 1)
/// - coverage_i ~ StudentT(4, ln(w_i) - ln(mean(w)), tau), where w_i = sum_j cn_ij * rho_j
/// - alt_l ~ Binomial(ref_l + alt_l, xi_l), where xi_l = sum_{j<K} mutant_copies_lj * rho_j
///
pub struct GenerativeModel {
    /// Number of clones including the normal clone
    clone_count: usize,

    coverage: Vec<f64>,
    copy_numbers: Vec<Vec<f64>>,

    /// Mean copy number of each clone over all bins
    mean_copy_numbers: Vec<f64>,

    /// Per-observation constant of the Student-t log density
    student_t_ln_norm: f64,

    snv_term: Option<SnvTerm>,
}

impl GenerativeModel {
    /// Build the model from genome bins, and optionally the SNV count matrix
    ///
    /// All bins must have the same clone count.
    ///
    pub fn new(bins: &[GenomicBin], snv_counts: Option<&CountMatrix>) -> Self {
        let clone_count = bins.first().map(|x| x.copy_numbers.len()).unwrap_or(1);
        let coverage = bins.iter().map(|x| x.coverage).collect::<Vec<_>>();
        let copy_numbers = bins
            .iter()
            .map(|x| x.copy_numbers.iter().map(|&cn| cn as f64).collect::<Vec<_>>())
            .collect::<Vec<_>>();

        let mut mean_copy_numbers = vec![0.0; clone_count];
        for cn in copy_numbers.iter() {
            for (m, x) in mean_copy_numbers.iter_mut().zip(cn.iter()) {
                *m += x;
            }
        }
        let bin_count = std::cmp::max(bins.len(), 1) as f64;
        for m in mean_copy_numbers.iter_mut() {
            *m /= bin_count;
        }

        let nu = COVERAGE_DF;
        let student_t_ln_norm = ln_gamma((nu + 1.0) / 2.0)
            - ln_gamma(nu / 2.0)
            - 0.5 * (nu * std::f64::consts::PI).ln();

        let snv_term = snv_counts.map(|counts| SnvTerm {
            ref_counts: counts.rows.iter().map(|x| x.ref_count as f64).collect(),
            alt_counts: counts.rows.iter().map(|x| x.alt_count as f64).collect(),
            mutant_copies: counts.rows.iter().map(|x| x.mutant_copies.clone()).collect(),
            ln_binomial_sum: counts
                .rows
                .iter()
                .map(|x| ln_binomial(x.depth() as u64, x.alt_count as u64))
                .sum(),
        });

        Self {
            clone_count,
            coverage,
            copy_numbers,
            mean_copy_numbers,
            student_t_ln_norm,
            snv_term,
        }
    }

    pub fn clone_count(&self) -> usize {
        self.clone_count
    }

    /// Coverage likelihood, accumulating gradients with respect to rho and ln(tau)
    ///
    fn coverage_ln_likelihood(
        &self,
        rho: &[f64],
        tau: f64,
        rho_grad: &mut [f64],
        ln_tau_grad: &mut f64,
    ) -> f64 {
        let nu = COVERAGE_DF;
        let n = self.coverage.len() as f64;

        let w = self
            .copy_numbers
            .iter()
            .map(|cn| cn.iter().zip(rho.iter()).map(|(c, r)| c * r).sum::<f64>())
            .collect::<Vec<_>>();
        let mean_w = w.iter().sum::<f64>() / n;
        let ln_mean_w = mean_w.ln();

        let mut ln_likelihood = n * (self.student_t_ln_norm - tau.ln());
        let mut mu_grad_sum = 0.0;
        for ((&x, &wi), cn) in self.coverage.iter().zip(w.iter()).zip(self.copy_numbers.iter()) {
            let mu = wi.ln() - ln_mean_w;
            let r = (x - mu) / tau;
            let r2 = r * r;
            ln_likelihood -= 0.5 * (nu + 1.0) * (r2 / nu).ln_1p();

            let mu_grad = (nu + 1.0) * r / (tau * (nu + r2));
            *ln_tau_grad += -1.0 + (nu + 1.0) * r2 / (nu + r2);
            mu_grad_sum += mu_grad;
            for (g, c) in rho_grad.iter_mut().zip(cn.iter()) {
                *g += mu_grad * c / wi;
            }
        }
        for (g, c) in rho_grad.iter_mut().zip(self.mean_copy_numbers.iter()) {
            *g -= mu_grad_sum * c / mean_w;
        }
        ln_likelihood
    }

    /// SNV allele count likelihood, accumulating gradients with respect to rho
    ///
    fn snv_ln_likelihood(&self, snv_term: &SnvTerm, rho: &[f64], rho_grad: &mut [f64]) -> f64 {
        let mut ln_likelihood = snv_term.ln_binomial_sum;
        for ((&ref_count, &alt_count), mutant_copies) in snv_term
            .ref_counts
            .iter()
            .zip(snv_term.alt_counts.iter())
            .zip(snv_term.mutant_copies.iter())
        {
            let xi = mutant_copies
                .iter()
                .zip(rho.iter())
                .map(|(m, r)| m * r)
                .sum::<f64>();
            let is_clamped = !(XI_EPSILON..=(1.0 - XI_EPSILON)).contains(&xi);
            let xi = xi.clamp(XI_EPSILON, 1.0 - XI_EPSILON);
            let logit = xi.ln() - (-xi).ln_1p();
            ln_likelihood += alt_count * ln_sigmoid(logit) + ref_count * ln_sigmoid(-logit);

            if !is_clamped {
                let xi_grad = alt_count / xi - ref_count / (1.0 - xi);
                for (g, m) in rho_grad.iter_mut().zip(mutant_copies.iter()) {
                    *g += xi_grad * m;
                }
            }
        }
        ln_likelihood
    }
}

impl LogDensity for GenerativeModel {
    fn dim(&self) -> usize {
        self.clone_count
    }

    fn ln_density_and_gradient(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        let k = self.clone_count - 1;
        let (y, ln_tau) = (&theta[..k], theta[k]);

        let (rho, simplex_ln_jacobian) = stick_breaking_constrain(y);
        let tau = ln_tau.exp();

        let mut rho_grad = vec![0.0; self.clone_count];

        // InverseGamma prior on tau with the log transform Jacobian
        let mut ln_density = -(TAU_PRIOR_SHAPE + 1.0) * ln_tau - TAU_PRIOR_SCALE / tau + ln_tau;
        let mut ln_tau_grad = -TAU_PRIOR_SHAPE + TAU_PRIOR_SCALE / tau;

        ln_density += simplex_ln_jacobian;
        ln_density += self.coverage_ln_likelihood(&rho, tau, &mut rho_grad, &mut ln_tau_grad);
        if let Some(snv_term) = &self.snv_term {
            ln_density += self.snv_ln_likelihood(snv_term, &rho, &mut rho_grad);
        }

        let y_grad = stick_breaking_gradient(y, &rho, &rho_grad);
        grad[..k].copy_from_slice(&y_grad);
        grad[k] = ln_tau_grad;

        ln_density
    }

    fn parameter_layout(&self) -> Vec<(String, usize)> {
        vec![("rho".to_string(), self.clone_count), ("tau".to_string(), 1)]
    }

    fn constrain(&self, theta: &[f64]) -> Vec<f64> {
        let k = self.clone_count - 1;
        let (mut values, _) = stick_breaking_constrain(&theta[..k]);
        values.push(theta[k].exp());
        values
    }
}
