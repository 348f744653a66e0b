use std::time::Instant;

use log::{info, warn};
use simple_error::{SimpleResult, bail};

use crate::cli;
use crate::genome_bins::{BinnedCoverage, read_binned_coverage};
use crate::inference::{InferenceSettings, sample_posterior};
use crate::model::{GenerativeModel, ModelKind};
use crate::outlier_filter::{MIN_CONFIG_BIN_COUNT, OutlierFilterSettings, filter_outlier_bins};
use crate::posterior_summary::{summarize_draws, write_posterior_draws, write_posterior_summary};
use crate::run_stats::{
    EstimateRunStats, OutlierFilterStats, SamplerStats, SnvStats, write_estimate_run_stats,
};
use crate::snv_counts::read_snv_count_table;
use crate::snv_harmonizer::{CountMatrix, HarmonizedSnvCounts, harmonize_snv_counts};

pub const RUN_STATS_FILENAME: &str = "run.stats.json";
pub const SETTINGS_FILENAME: &str = "estimate.settings.json";

/// Remove coverage outliers unless the filter is disabled
///
fn get_filtered_coverage(
    shared_settings: &cli::SharedSettings,
    settings: &cli::EstimateSettings,
    binned_coverage: BinnedCoverage,
) -> SimpleResult<(BinnedCoverage, OutlierFilterStats)> {
    let input_bin_count = binned_coverage.bins.len();
    if settings.no_outlier_filter {
        info!("Skipping coverage outlier filter");
        let stats = OutlierFilterStats {
            input_bin_count,
            retained_bin_count: input_bin_count,
            config_summaries: Vec::new(),
        };
        return Ok((binned_coverage, stats));
    }

    let filter_settings = OutlierFilterSettings {
        min_config_bin_count: MIN_CONFIG_BIN_COUNT,
        mixture_selection: settings.outlier_mixture_selection,
        fit_seed: settings.outlier_fit_seed,
        thread_count: shared_settings.thread_count,
    };
    let filter_result = filter_outlier_bins(&binned_coverage.bins, &filter_settings);
    if filter_result.bins.is_empty() {
        bail!("No coverage bins remain after outlier filtering");
    }

    let stats = OutlierFilterStats {
        input_bin_count,
        retained_bin_count: filter_result.bins.len(),
        config_summaries: filter_result.config_summaries,
    };
    let filtered_coverage = BinnedCoverage {
        chrom_list: binned_coverage.chrom_list,
        bins: filter_result.bins,
    };
    Ok((filtered_coverage, stats))
}

/// Read and harmonize SNV counts for the SNV model term
///
/// Returns None if SNV counts are not given or no usable SNV signal is found
///
fn get_snv_count_matrix(
    shared_settings: &cli::SharedSettings,
    settings: &cli::EstimateSettings,
    binned_coverage: &BinnedCoverage,
) -> SimpleResult<(Option<CountMatrix>, Option<SnvStats>)> {
    let liquid_filename = match &settings.liquid_snv_counts_filename {
        Some(x) => x,
        None => return Ok((None, None)),
    };

    let liquid_counts = read_snv_count_table(liquid_filename, "liquid")?;
    let clone_counts = settings
        .clone_snv_counts_filenames
        .iter()
        .enumerate()
        .map(|(i, filename)| read_snv_count_table(filename, &format!("clone {}", i + 1)))
        .collect::<SimpleResult<Vec<_>>>()?;

    let harmonized = harmonize_snv_counts(
        &liquid_counts,
        &clone_counts,
        binned_coverage,
        settings.snv_merge_policy,
        shared_settings.thread_count,
    )?;

    let mut stats = SnvStats {
        liquid_input_locus_count: liquid_counts.counts.len(),
        used_locus_count: 0,
    };
    let count_matrix = match harmonized {
        HarmonizedSnvCounts::Counts(x) => {
            stats.used_locus_count = x.rows.len();
            Some(x)
        }
        HarmonizedSnvCounts::NoSignal => None,
    };
    Ok((count_matrix, Some(stats)))
}

/// Select the model to run, falling back to the coverage-only model without SNV signal
///
fn get_run_model_kind(requested_model: ModelKind, count_matrix: Option<&CountMatrix>) -> ModelKind {
    if requested_model.requires_snv_counts() && count_matrix.is_none() {
        warn!(
            "No usable SNV signal found, falling back from model '{requested_model}' to model '{}'",
            ModelKind::Cn
        );
        ModelKind::Cn
    } else {
        requested_model
    }
}

/// Estimate clone prevalence in the liquid sample and write all results to the output directory
///
pub fn run_estimate(
    shared_settings: &cli::SharedSettings,
    settings: &cli::EstimateSettings,
) -> SimpleResult<()> {
    let start = Instant::now();

    cli::write_estimate_settings(&settings.output_dir, settings);

    let binned_coverage = read_binned_coverage(
        &settings.coverage_filename,
        &settings.cn_profiles_filename,
        &settings.target_chroms,
    )?;

    let (binned_coverage, outlier_filter_stats) =
        get_filtered_coverage(shared_settings, settings, binned_coverage)?;

    let (count_matrix, snv_stats) = if settings.model.requires_snv_counts() {
        get_snv_count_matrix(shared_settings, settings, &binned_coverage)?
    } else {
        if settings.has_snv_counts() {
            warn!("SNV counts are not used by model '{}'", settings.model);
        }
        (None, None)
    };

    let model_kind = get_run_model_kind(settings.model, count_matrix.as_ref());
    let model = GenerativeModel::new(&binned_coverage.bins, count_matrix.as_ref());
    info!(
        "Running model '{model_kind}' with {} clones on {} bins",
        model.clone_count(),
        binned_coverage.bins.len()
    );

    let mut inference_settings =
        InferenceSettings::new(settings.num_warmup, settings.num_samples, settings.seed);
    inference_settings.target_accept_prob = settings.target_accept_prob;
    inference_settings.max_tree_depth = settings.max_tree_depth;
    inference_settings.progress = settings.progress;
    let sampling_start = Instant::now();
    let chain = sample_posterior(&model, &inference_settings)?;
    let total_sampling_time_secs = sampling_start.elapsed().as_secs_f64();

    let summary = summarize_draws(&chain.to_draw_map())?;
    for (label, mean) in summary.labels.iter().zip(summary.means.iter()) {
        info!("Posterior mean {label}: {mean:.4}");
    }
    write_posterior_summary(&settings.output_dir, &summary)?;

    if settings.write_draws {
        write_posterior_draws(&settings.output_dir, &chain)?;
    }

    let run_stats = EstimateRunStats {
        outlier_filter_stats,
        snv_stats,
        requested_model: settings.model,
        model: model_kind,
        sampler_stats: SamplerStats {
            num_warmup: settings.num_warmup,
            num_samples: settings.num_samples,
            step_size: chain.step_size,
            mean_accept_stat: chain.mean_accept_stat(),
            divergence_count: chain.divergence_count(),
            inv_metric: chain.inv_metric.clone(),
            total_sampling_time_secs,
        },
        total_runtime_secs: start.elapsed().as_secs_f64(),
    };
    write_estimate_run_stats(&settings.output_dir, &run_stats);

    Ok(())
}
