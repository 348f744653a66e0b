use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use const_format::concatcp;
use serde::{Deserialize, Serialize};
use simple_error::SimpleResult;
use unwrap::unwrap;

use super::utils::check_input_filename;
use crate::count_snvs::SETTINGS_FILENAME;

#[derive(Args, Deserialize, Serialize)]
pub struct CountSnvsSettings {
    /// Directory for all count-snvs command output (must not already exist)
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_count_snvs_output"))]
    pub output_dir: Utf8PathBuf,

    /// Indexed alignment file for the sample in BAM or CRAM format
    #[arg(long = "bam", value_name = "FILE")]
    pub bam_filename: String,

    /// SNV calls to count in VCF or BCF format
    ///
    /// Only passing biallelic single-base substitutions are counted.
    ///
    #[arg(long = "vcf", value_name = "FILE")]
    pub vcf_filename: String,

    /// Sample label used in log messages
    #[arg(long, default_value = "sample")]
    pub sample_label: String,

    /// Reads with MAPQ below this value are not counted
    #[arg(long, default_value_t = 60)]
    pub min_mapq: u8,

    /// Bases with quality below this value are not counted
    #[arg(long, default_value_t = 20)]
    pub min_base_qual: u8,

    /// Restrict counting to SNVs on these chromosomes. May be given multiple times.
    #[arg(long = "chrom", value_name = "NAME")]
    pub target_chroms: Vec<String>,
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_count_snvs_settings(
    settings: CountSnvsSettings,
) -> SimpleResult<CountSnvsSettings> {
    check_input_filename(&settings.bam_filename, "alignment")?;
    check_input_filename(&settings.vcf_filename, "variant")?;
    Ok(settings)
}

/// Write count-snvs settings out in json format
pub fn write_count_snvs_settings(output_dir: &Utf8Path, settings: &CountSnvsSettings) {
    use log::info;

    let filename = output_dir.join(SETTINGS_FILENAME);

    info!("Writing count-snvs settings to file: '{filename}'");

    let f = unwrap!(
        std::fs::File::create(&filename),
        "Unable to create count-snvs settings json file: '{filename}'"
    );

    serde_json::to_writer_pretty(&f, &settings).unwrap();
}
