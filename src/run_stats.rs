//! Track stats for the whole liquidbayes estimate run
//!

use std::fs::File;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use unwrap::unwrap;

use crate::estimate::RUN_STATS_FILENAME;
use crate::model::ModelKind;
use crate::outlier_filter::ConfigFilterSummary;

#[derive(Default, Deserialize, Serialize)]
pub struct OutlierFilterStats {
    pub input_bin_count: usize,
    pub retained_bin_count: usize,

    /// Filter outcome for each copy number configuration, empty if the filter is disabled
    pub config_summaries: Vec<ConfigFilterSummary>,
}

#[derive(Default, Deserialize, Serialize)]
pub struct SnvStats {
    pub liquid_input_locus_count: usize,

    /// Loci used in the SNV model term, zero if SNV signal was not found
    pub used_locus_count: usize,
}

#[derive(Default, Deserialize, Serialize)]
pub struct SamplerStats {
    pub num_warmup: usize,
    pub num_samples: usize,
    pub step_size: f64,
    pub mean_accept_stat: f64,
    pub divergence_count: usize,

    /// Diagonal inverse metric at the end of warmup
    pub inv_metric: Vec<f64>,

    pub total_sampling_time_secs: f64,
}

#[derive(Deserialize, Serialize)]
pub struct EstimateRunStats {
    pub outlier_filter_stats: OutlierFilterStats,
    pub snv_stats: Option<SnvStats>,

    /// Model requested on the command line
    pub requested_model: ModelKind,

    /// Model actually run, which differs from the requested model after a fallback to the
    /// coverage-only model
    pub model: ModelKind,

    pub sampler_stats: SamplerStats,
    pub total_runtime_secs: f64,
}

/// Write run_stats structure out in json format
pub fn write_estimate_run_stats(output_dir: &Utf8Path, run_stats: &EstimateRunStats) {
    let filename = output_dir.join(RUN_STATS_FILENAME);

    info!("Writing run statistics to file: '{filename}'");

    let f = unwrap!(
        File::create(&filename),
        "Unable to create run statistics json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &run_stats).unwrap();
}
