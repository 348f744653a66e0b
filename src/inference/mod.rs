//! Posterior sampling of a [LogDensity] with an adaptive No-U-Turn sampler
//!

mod adaptation;
mod nuts;

use std::collections::BTreeMap;

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};

use self::adaptation::{MetricAdaptation, StepSizeAdaptation};
use self::nuts::{PhasePoint, find_reasonable_step_size, transition};
use crate::model::LogDensity;

/// Maximum attempts to find a finite initial state
const MAX_INIT_ATTEMPTS: usize = 100;

/// Unconstrained initial values are drawn from uniform(-INIT_RADIUS, INIT_RADIUS)
const INIT_RADIUS: f64 = 2.0;

pub struct InferenceSettings {
    pub num_warmup: usize,
    pub num_samples: usize,
    pub seed: u64,
    pub target_accept_prob: f64,
    pub max_tree_depth: usize,

    /// Log sampling progress at info level
    pub progress: bool,
}

impl InferenceSettings {
    pub fn new(num_warmup: usize, num_samples: usize, seed: u64) -> Self {
        Self {
            num_warmup,
            num_samples,
            seed,
            target_accept_prob: 0.95,
            max_tree_depth: 10,
            progress: false,
        }
    }
}

/// Sampler diagnostics for a single draw
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SampleStats {
    pub accept_stat: f64,
    pub step_size: f64,
    pub tree_depth: usize,
    pub leapfrog_count: usize,
    pub divergent: bool,
    pub energy: f64,
    pub ln_density: f64,
}

/// One joint posterior draw of all constrained parameters
#[derive(Clone, Debug)]
pub struct PosteriorSample {
    /// Constrained parameter values, flattened in parameter layout order
    pub values: Vec<f64>,
    pub stats: SampleStats,
}

/// All post-warmup draws of one sampler run
///
pub struct Chain {
    /// Name and dimension of each parameter
    pub parameter_layout: Vec<(String, usize)>,

    pub samples: Vec<PosteriorSample>,

    /// Adapted step size used for all draws
    pub step_size: f64,

    /// Adapted diagonal inverse metric used for all draws
    pub inv_metric: Vec<f64>,
}

impl Chain {
    pub fn divergence_count(&self) -> usize {
        self.samples.iter().filter(|x| x.stats.divergent).count()
    }

    pub fn mean_accept_stat(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|x| x.stats.accept_stat).sum::<f64>() / self.samples.len() as f64
    }

    /// Column labels of the flattened parameter values, such as 'rho.0'
    pub fn value_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for (name, dim) in self.parameter_layout.iter() {
            if *dim == 1 {
                labels.push(name.clone());
            } else {
                labels.extend((0..*dim).map(|i| format!("{name}.{i}")));
            }
        }
        labels
    }

    /// Map from each parameter name to its draws, each draw holding the parameter's values
    ///
    pub fn to_draw_map(&self) -> BTreeMap<String, Vec<Vec<f64>>> {
        let mut draw_map = BTreeMap::new();
        let mut offset = 0;
        for (name, dim) in self.parameter_layout.iter() {
            let draws = self
                .samples
                .iter()
                .map(|x| x.values[offset..offset + dim].to_vec())
                .collect();
            draw_map.insert(name.clone(), draws);
            offset += dim;
        }
        draw_map
    }
}

/// Find a random initial state with finite log density and gradient
///
fn initialize_state<M: LogDensity>(
    model: &M,
    rng: &mut Xoshiro256PlusPlus,
) -> SimpleResult<PhasePoint> {
    for _ in 0..MAX_INIT_ATTEMPTS {
        let q = (0..model.dim())
            .map(|_| rng.gen_range(-INIT_RADIUS..INIT_RADIUS))
            .collect::<Vec<_>>();
        let z = PhasePoint::new(model, q);
        if z.is_finite() {
            return Ok(z);
        }
    }
    bail!("Failed to find a finite initial sampler state after {MAX_INIT_ATTEMPTS} attempts");
}

/// Log progress at roughly every 10% of total iterations
///
fn log_progress(iteration: usize, total: usize, num_warmup: usize) {
    let interval = std::cmp::max(total / 10, 1);
    let iteration = iteration + 1;
    if iteration == 1 || iteration % interval == 0 || iteration == total {
        let phase = if iteration <= num_warmup {
            "Warmup"
        } else {
            "Sampling"
        };
        info!(
            "Iteration: {iteration} / {total} [{:3.0}%] ({phase})",
            100.0 * iteration as f64 / total as f64
        );
    }
}

/// Draw posterior samples from `model`
///
/// Warmup iterations adapt the step size and diagonal metric and are not returned. Given the same
/// model and settings the returned draws are identical between runs.
///
pub fn sample_posterior<M: LogDensity>(
    model: &M,
    settings: &InferenceSettings,
) -> SimpleResult<Chain> {
    info!(
        "Starting NUTS sampler with {} warmup iterations and {} samples",
        settings.num_warmup, settings.num_samples
    );

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(settings.seed);
    let mut z = initialize_state(model, &mut rng)?;

    let mut inv_metric = vec![1.0; model.dim()];
    let mut step_size = match find_reasonable_step_size(model, &z, &inv_metric, 1.0, &mut rng) {
        Some(x) => x,
        None => bail!("Unable to find a usable initial sampler step size"),
    };

    let mut step_size_adaptation = StepSizeAdaptation::new(settings.target_accept_prob);
    step_size_adaptation.restart(step_size);
    let mut metric_adaptation = MetricAdaptation::new(model.dim(), settings.num_warmup);

    let total_iterations = settings.num_warmup + settings.num_samples;
    for iteration in 0..settings.num_warmup {
        let (next, stats) = transition(
            model,
            &z,
            &inv_metric,
            step_size,
            settings.max_tree_depth,
            &mut rng,
        );
        z = next;

        step_size = step_size_adaptation.learn_step_size(stats.accept_stat);
        if metric_adaptation.learn_inv_metric(&mut inv_metric, &z.q) {
            step_size = match find_reasonable_step_size(model, &z, &inv_metric, step_size, &mut rng)
            {
                Some(x) => x,
                None => bail!("Unable to find a usable sampler step size after metric update"),
            };
            step_size_adaptation.restart(step_size);
            debug!("Updated inverse metric at warmup iteration {iteration}: {inv_metric:?}");
        }

        if settings.progress {
            log_progress(iteration, total_iterations, settings.num_warmup);
        }
    }
    if settings.num_warmup > 0 {
        step_size = step_size_adaptation.final_step_size();
    }
    info!("Completed warmup with step size {step_size:.4}");

    let parameter_layout = model.parameter_layout();
    let mut samples = Vec::with_capacity(settings.num_samples);
    for iteration in 0..settings.num_samples {
        let (next, stats) = transition(
            model,
            &z,
            &inv_metric,
            step_size,
            settings.max_tree_depth,
            &mut rng,
        );
        z = next;

        samples.push(PosteriorSample {
            values: model.constrain(&z.q),
            stats: SampleStats {
                accept_stat: stats.accept_stat,
                step_size,
                tree_depth: stats.tree_depth,
                leapfrog_count: stats.leapfrog_count,
                divergent: stats.divergent,
                energy: stats.energy,
                ln_density: z.ln_density(),
            },
        });

        if settings.progress {
            log_progress(
                settings.num_warmup + iteration,
                total_iterations,
                settings.num_warmup,
            );
        }
    }

    let chain = Chain {
        parameter_layout,
        samples,
        step_size,
        inv_metric,
    };

    info!(
        "Completed sampling. Mean accept stat: {:.3} Divergent transitions: {}",
        chain.mean_accept_stat(),
        chain.divergence_count()
    );

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome_bins::GenomicBin;
    use crate::model::GenerativeModel;
    use statrs::distribution::{ContinuousCDF, StudentsT};

    struct StandardNormal2d;

    impl LogDensity for StandardNormal2d {
        fn dim(&self) -> usize {
            2
        }

        fn ln_density_and_gradient(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
            for (g, x) in grad.iter_mut().zip(theta.iter()) {
                *g = -x;
            }
            -0.5 * theta.iter().map(|x| x * x).sum::<f64>()
        }

        fn parameter_layout(&self) -> Vec<(String, usize)> {
            vec![("x".to_string(), 2)]
        }

        fn constrain(&self, theta: &[f64]) -> Vec<f64> {
            theta.to_vec()
        }
    }

    /// Simulate coverage ratios for the given clone prevalence
    ///
    /// Bins cycle through three copy number configurations.
    fn simulate_bins(rho: &[f64], tau: f64, bin_count: usize, seed: u64) -> Vec<GenomicBin> {
        let configs = [[1, 3, 2], [4, 3, 2], [2, 2, 2]];
        let noise = StudentsT::new(0.0, tau, 4.0).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

        let w = configs
            .iter()
            .map(|cn| cn.iter().zip(rho.iter()).map(|(&c, r)| c as f64 * r).sum::<f64>())
            .collect::<Vec<_>>();
        let ln_mean_w = ((0..bin_count).map(|i| w[i % configs.len()]).sum::<f64>()
            / bin_count as f64)
            .ln();

        let mut bins = Vec::new();
        for i in 0..bin_count {
            let config_index = i % configs.len();
            let mu = w[config_index].ln() - ln_mean_w;
            let u: f64 = rng.gen_range(0.0..1.0);
            bins.push(GenomicBin {
                chrom_index: 0,
                start: i as i64 * 1000,
                end: (i as i64 + 1) * 1000,
                copy_numbers: configs[config_index].to_vec(),
                coverage: mu + noise.inverse_cdf(u),
            });
        }
        bins
    }

    #[test]
    fn test_standard_normal_moments() {
        let settings = InferenceSettings::new(200, 2000, 17);
        let chain = sample_posterior(&StandardNormal2d, &settings).unwrap();
        assert_eq!(chain.samples.len(), 2000);
        assert_eq!(chain.divergence_count(), 0);

        let draws = &chain.to_draw_map()["x"];
        for dim in 0..2 {
            let n = draws.len() as f64;
            let mean = draws.iter().map(|x| x[dim]).sum::<f64>() / n;
            let var = draws.iter().map(|x| (x[dim] - mean).powi(2)).sum::<f64>() / n;
            approx::assert_abs_diff_eq!(mean, 0.0, epsilon = 0.15);
            approx::assert_abs_diff_eq!(var, 1.0, epsilon = 0.25);
        }
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let bins = simulate_bins(&[0.3, 0.5, 0.2], 0.1, 90, 4);
        let model = GenerativeModel::new(&bins, None);
        let settings = InferenceSettings::new(50, 50, 99);
        let a = sample_posterior(&model, &settings).unwrap();
        let b = sample_posterior(&model, &settings).unwrap();
        for (x, y) in a.samples.iter().zip(b.samples.iter()) {
            assert_eq!(x.values, y.values);
            assert_eq!(x.stats.leapfrog_count, y.stats.leapfrog_count);
        }

        let mut progress_settings = InferenceSettings::new(50, 50, 99);
        progress_settings.progress = true;
        let c = sample_posterior(&model, &progress_settings).unwrap();
        for (x, y) in a.samples.iter().zip(c.samples.iter()) {
            assert_eq!(x.values, y.values);
        }
    }

    #[test]
    fn test_draw_map_layout() {
        let bins = simulate_bins(&[0.3, 0.5, 0.2], 0.1, 60, 2);
        let model = GenerativeModel::new(&bins, None);
        let chain = sample_posterior(&model, &InferenceSettings::new(30, 40, 1)).unwrap();

        assert_eq!(chain.value_labels(), vec!["rho.0", "rho.1", "rho.2", "tau"]);
        let draw_map = chain.to_draw_map();
        assert_eq!(draw_map["rho"].len(), 40);
        for rho in draw_map["rho"].iter() {
            assert_eq!(rho.len(), 3);
            approx::assert_abs_diff_eq!(rho.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
        }
        assert!(draw_map["tau"].iter().all(|x| x.len() == 1 && x[0] > 0.0));
    }

    #[test]
    fn test_recover_clone_prevalence() {
        let rho = [0.3, 0.5, 0.2];
        let bins = simulate_bins(&rho, 0.1, 1000, 7);
        assert_eq!(bins.len(), 1000);

        let model = GenerativeModel::new(&bins, None);
        let chain = sample_posterior(&model, &InferenceSettings::new(100, 3000, 1)).unwrap();
        assert_eq!(chain.samples.len(), 3000);

        let draws = &chain.to_draw_map()["rho"];
        for (j, expected) in rho.iter().enumerate() {
            let mean = draws.iter().map(|x| x[j]).sum::<f64>() / draws.len() as f64;
            approx::assert_abs_diff_eq!(mean, *expected, epsilon = 0.05);
        }
        let tau = &chain.to_draw_map()["tau"];
        let tau_mean = tau.iter().map(|x| x[0]).sum::<f64>() / tau.len() as f64;
        approx::assert_abs_diff_eq!(tau_mean, 0.1, epsilon = 0.03);
    }
}
