use simple_error::SimpleResult;

use crate::cli;
use crate::snv_counter::{SnvCounterSettings, count_snv_alleles};
use crate::snv_counts::write_snv_count_table;

pub const SETTINGS_FILENAME: &str = "count_snvs.settings.json";
pub const SNV_COUNTS_FILENAME: &str = "snv.counts.tsv";

/// Count SNV allele support in one sample and write the counts table to the output directory
///
pub fn run_count_snvs(settings: &cli::CountSnvsSettings) -> SimpleResult<()> {
    cli::write_count_snvs_settings(&settings.output_dir, settings);

    let counter_settings = SnvCounterSettings {
        min_mapq: settings.min_mapq,
        min_base_qual: settings.min_base_qual,
        target_chroms: settings.target_chroms.clone(),
    };
    let sample_counts = count_snv_alleles(
        &settings.bam_filename,
        &settings.vcf_filename,
        &settings.sample_label,
        &counter_settings,
    )?;

    write_snv_count_table(
        &settings.output_dir.join(SNV_COUNTS_FILENAME),
        &sample_counts,
    )
}
