//! Remove coverage observations inconsistent with the dominant mode of their copy number configuration
//!

use std::collections::BTreeMap;

use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::gaussian_mixture::{MixtureFitSettings, fit_gaussian_mixture};
use crate::genome_bins::GenomicBin;

/// Copy number configurations with fewer bins than this are not filtered
pub const MIN_CONFIG_BIN_COUNT: usize = 50;

/// A mixture component below this weight can't be selected as the signal component
const MIN_SIGNAL_COMPONENT_WEIGHT: f64 = 0.1;

/// Controls when a copy number configuration is split into signal and outlier components
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
pub enum MixtureSelection {
    /// Always fit two components and discard the higher variance component
    Always,

    /// Only discard the higher variance component when two components fit the configuration
    /// better than one, according to BIC
    Bic,
}

pub struct OutlierFilterSettings {
    pub min_config_bin_count: usize,
    pub mixture_selection: MixtureSelection,
    pub fit_seed: u64,
    pub thread_count: usize,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum ConfigFilterStatus {
    /// Too few bins to fit reliably
    Skipped,

    /// One component was preferred, nothing removed
    Unimodal,

    Filtered {
        signal_variance: f64,
        outlier_variance: f64,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConfigFilterSummary {
    pub copy_numbers: Vec<u32>,
    pub bin_count: usize,
    pub removed_bin_count: usize,
    pub status: ConfigFilterStatus,
}

pub struct OutlierFilterResult {
    pub bins: Vec<GenomicBin>,
    pub config_summaries: Vec<ConfigFilterSummary>,
}

/// Log likelihood of a single normal fit by maximum likelihood
///
fn single_normal_ln_likelihood(values: &[f64], reg_variance: f64) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n + reg_variance;
    values
        .iter()
        .map(|x| {
            let d = x - mean;
            -0.5 * ((2.0 * std::f64::consts::PI * variance).ln() + d * d / variance)
        })
        .sum()
}

/// Find which values of a single copy number configuration are outliers
///
/// Returns the filter status and a flag for each value which is true for outliers
///
fn find_config_outliers(
    values: &[f64],
    settings: &OutlierFilterSettings,
) -> (ConfigFilterStatus, Vec<bool>) {
    let no_outliers = vec![false; values.len()];
    if values.len() < settings.min_config_bin_count {
        return (ConfigFilterStatus::Skipped, no_outliers);
    }

    let fit_settings = MixtureFitSettings::new(2, settings.fit_seed);
    let gmm = match fit_gaussian_mixture(values, &fit_settings) {
        Some(x) => x,
        None => return (ConfigFilterStatus::Skipped, no_outliers),
    };
    if !gmm.converged {
        debug!("Mixture fit did not converge on {} bins", values.len());
    }

    if settings.mixture_selection == MixtureSelection::Bic {
        let n = values.len();
        let single_bic = -2.0 * single_normal_ln_likelihood(values, fit_settings.reg_variance)
            + 2.0 * (n as f64).ln();
        if gmm.bic(n) >= single_bic {
            return (ConfigFilterStatus::Unimodal, no_outliers);
        }
    }

    // Equal variances resolve to component 0 as the signal
    let mut signal_index = if gmm.components[1].variance < gmm.components[0].variance {
        1
    } else {
        0
    };
    if gmm.components[signal_index].weight < MIN_SIGNAL_COMPONENT_WEIGHT {
        debug!(
            "Lower variance component has weight {:.4} on {} bins, using the higher variance component as signal",
            gmm.components[signal_index].weight,
            values.len()
        );
        signal_index = 1 - signal_index;
    }

    let outliers = gmm
        .predict(values)
        .into_iter()
        .map(|label| label != signal_index)
        .collect();

    let status = ConfigFilterStatus::Filtered {
        signal_variance: gmm.components[signal_index].variance,
        outlier_variance: gmm.components[1 - signal_index].variance,
    };
    (status, outliers)
}

/// Remove outlier bins from each copy number configuration
///
/// Bins are grouped by their exact copy number configuration and each group is filtered
/// independently. Row order of the retained bins is unchanged.
///
pub fn filter_outlier_bins(
    bins: &[GenomicBin],
    settings: &OutlierFilterSettings,
) -> OutlierFilterResult {
    use rayon::prelude::*;

    info!("Filtering coverage outliers within copy number configurations");

    let mut config_bin_indices: BTreeMap<&[u32], Vec<usize>> = BTreeMap::new();
    for (bin_index, bin) in bins.iter().enumerate() {
        config_bin_indices
            .entry(bin.copy_numbers.as_slice())
            .or_default()
            .push(bin_index);
    }
    let configs = config_bin_indices.into_iter().collect::<Vec<_>>();

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.thread_count)
        .build()
        .unwrap();

    let config_results = worker_pool.install(|| {
        configs
            .par_iter()
            .map(|(_, bin_indices)| {
                let values = bin_indices
                    .iter()
                    .map(|&i| bins[i].coverage)
                    .collect::<Vec<_>>();
                find_config_outliers(&values, settings)
            })
            .collect::<Vec<_>>()
    });

    let mut is_outlier = vec![false; bins.len()];
    let mut config_summaries = Vec::new();
    for ((copy_numbers, bin_indices), (status, outliers)) in configs.iter().zip(config_results) {
        let mut removed_bin_count = 0;
        for (&bin_index, &outlier) in bin_indices.iter().zip(outliers.iter()) {
            if outlier {
                is_outlier[bin_index] = true;
                removed_bin_count += 1;
            }
        }
        debug!(
            "Copy number configuration [{}]: {} bins, {} removed, status {:?}",
            copy_numbers.iter().join(","),
            bin_indices.len(),
            removed_bin_count,
            status
        );
        config_summaries.push(ConfigFilterSummary {
            copy_numbers: copy_numbers.to_vec(),
            bin_count: bin_indices.len(),
            removed_bin_count,
            status,
        });
    }

    let filtered_bins = bins
        .iter()
        .zip(is_outlier.iter())
        .filter(|&(_, &outlier)| !outlier)
        .map(|(bin, _)| bin.clone())
        .collect::<Vec<_>>();

    info!(
        "Removed {} outlier bins from {} copy number configurations, {} bins remain",
        bins.len() - filtered_bins.len(),
        config_summaries.len(),
        filtered_bins.len()
    );

    OutlierFilterResult {
        bins: filtered_bins,
        config_summaries,
    }
}
