mod chrom_list;
mod cli;
mod count_snvs;
mod estimate;
mod gaussian_mixture;
mod genome_bins;
mod globals;
mod inference;
mod logger;
mod model;
mod os_utils;
mod outlier_filter;
mod posterior_summary;
mod prob_utils;
mod run_stats;
mod snv_counter;
mod snv_counts;
mod snv_harmonizer;

use std::{error, process};

use hhmmss::Hhmmss;
use log::info;

use crate::cli::Commands;
use crate::count_snvs::run_count_snvs;
use crate::estimate::run_estimate;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::logger::setup_output_dir_and_logger;

fn run(settings: &cli::Settings) -> Result<(), Box<dyn error::Error>> {
    info!("Starting {PROGRAM_NAME} {PROGRAM_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );
    info!("Running on {} threads", settings.shared.thread_count);

    let start = std::time::Instant::now();

    match &settings.command {
        Commands::Estimate(x) => {
            run_estimate(&settings.shared, x)?;
        }
        Commands::CountSnvs(x) => {
            run_count_snvs(x)?;
        }
    }

    info!(
        "{PROGRAM_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    let settings = cli::validate_and_fix_settings(cli::parse_settings());

    // Setup logger, including creation of the output directory for the log file:
    let log_filename = setup_output_dir_and_logger(
        settings.get_output_dir(),
        settings.shared.clobber,
        settings.shared.debug,
    );

    if let Err(err) = run(&settings) {
        log::error!("{err}");
        eprintln!("See log file for details: '{log_filename}'");
        process::exit(2);
    }
}
