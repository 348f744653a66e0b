use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use const_format::concatcp;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};
use unwrap::unwrap;

use super::utils::{check_input_filename, check_snv_count_filenames};
use crate::estimate::SETTINGS_FILENAME;
use crate::model::ModelKind;
use crate::outlier_filter::MixtureSelection;
use crate::snv_harmonizer::SnvMergePolicy;

#[derive(Args, Deserialize, Serialize)]
pub struct EstimateSettings {
    /// Directory for all estimate command output (must not already exist)
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_output"))]
    pub output_dir: Utf8PathBuf,

    /// Corrected coverage ratio table for the liquid sample
    ///
    /// Tab-delimited columns are chromosome, start, end and any further columns, with the
    /// corrected coverage ratio in the last column. Bins with a non-numeric coverage value such as
    /// 'NA' are skipped.
    ///
    #[arg(long = "coverage", value_name = "FILE")]
    pub coverage_filename: String,

    /// Copy number profile table of the tumor clones
    ///
    /// Tab-delimited columns are chromosome, start, end, one copy number column per tumor clone,
    /// and a final copy number column for the normal clone.
    ///
    #[arg(long = "cn-profiles", value_name = "FILE")]
    pub cn_profiles_filename: String,

    /// Model used to estimate clone prevalence
    #[arg(long, value_enum, default_value_t = ModelKind::Cn)]
    pub model: ModelKind,

    /// Number of posterior samples to draw after warmup
    #[arg(long, default_value_t = 3000)]
    pub num_samples: usize,

    /// Number of warmup iterations used to tune the sampler
    #[arg(long, default_value_t = 100)]
    pub num_warmup: usize,

    /// Random seed for the sampler
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Target acceptance probability for sampler step size adaptation
    #[arg(long = "target-accept-prob", default_value_t = 0.95)]
    pub target_accept_prob: f64,

    /// Maximum depth of each sampler trajectory tree
    #[arg(hide = true, long, default_value_t = 10)]
    pub max_tree_depth: usize,

    /// Restrict analysis to these chromosomes. May be given multiple times. All chromosomes are
    /// used by default.
    #[arg(long = "chrom", value_name = "NAME")]
    pub target_chroms: Vec<String>,

    /// SNV count table of the liquid sample, as written by the count-snvs command
    #[arg(long = "liquid-snv-counts", value_name = "FILE")]
    pub liquid_snv_counts_filename: Option<String>,

    /// SNV count table of each tumor clone sample, in the same order as the clone columns of the
    /// copy number profile table
    #[arg(long = "clone-snv-counts", value_name = "FILE", num_args = 1..)]
    pub clone_snv_counts_filenames: Vec<String>,

    /// Policy used to combine SNV loci across the clone samples
    #[arg(long = "snv-merge", value_enum, default_value_t = SnvMergePolicy::Inner)]
    pub snv_merge_policy: SnvMergePolicy,

    /// Policy used to decide when a copy number configuration has outlier coverage bins
    #[arg(long = "outlier-mixture", value_enum, default_value_t = MixtureSelection::Bic)]
    pub outlier_mixture_selection: MixtureSelection,

    /// Skip coverage outlier filtering
    #[arg(long)]
    pub no_outlier_filter: bool,

    /// Random seed for the outlier filter mixture fits
    #[arg(hide = true, long, default_value_t = 0)]
    pub outlier_fit_seed: u64,

    /// Log sampler progress
    #[arg(long)]
    pub progress: bool,

    /// Write all posterior draws and sampler diagnostics to 'posterior.draws.csv'
    #[arg(long)]
    pub write_draws: bool,
}

impl EstimateSettings {
    pub fn has_snv_counts(&self) -> bool {
        self.liquid_snv_counts_filename.is_some()
    }
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_estimate_settings(
    settings: EstimateSettings,
) -> SimpleResult<EstimateSettings> {
    check_input_filename(&settings.coverage_filename, "coverage")?;
    check_input_filename(&settings.cn_profiles_filename, "copy number profile")?;
    check_snv_count_filenames(
        settings.liquid_snv_counts_filename.as_ref(),
        &settings.clone_snv_counts_filenames,
    )?;

    if settings.model.requires_snv_counts() && !settings.has_snv_counts() {
        bail!(
            "--model {} requires SNV counts from --liquid-snv-counts and --clone-snv-counts",
            settings.model
        );
    }

    if settings.num_samples == 0 {
        bail!("--num-samples argument must be greater than 0");
    }

    if !(settings.target_accept_prob > 0.0 && settings.target_accept_prob < 1.0) {
        bail!(
            "--target-accept-prob argument must be in (0,1), found {}",
            settings.target_accept_prob
        );
    }

    if settings.max_tree_depth == 0 {
        bail!("--max-tree-depth argument must be greater than 0");
    }

    Ok(settings)
}

/// Write estimate settings out in json format
pub fn write_estimate_settings(output_dir: &Utf8Path, settings: &EstimateSettings) {
    use log::info;

    let filename = output_dir.join(SETTINGS_FILENAME);

    info!("Writing estimate settings to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create estimate settings json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &settings).unwrap();
}
