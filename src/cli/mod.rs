mod count_snvs;
mod estimate;
mod shared;
mod utils;

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use simple_error::{SimpleResult, bail};

use self::count_snvs::validate_and_fix_count_snvs_settings;
pub use self::count_snvs::{CountSnvsSettings, write_count_snvs_settings};
use self::estimate::validate_and_fix_estimate_settings;
pub use self::estimate::{EstimateSettings, write_estimate_settings};
use self::shared::validate_and_fix_shared_settings;
pub use self::shared::SharedSettings;

#[derive(Subcommand)]
pub enum Commands {
    /// Estimate tumor clone prevalence in a liquid biopsy sample from coverage ratios and
    /// optional SNV counts
    Estimate(EstimateSettings),

    /// Count reference and alternate allele support in one sample at SNV loci
    CountSnvs(CountSnvsSettings),
}

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(propagate_version = true, rename_all = "kebab_case")]
pub struct Settings {
    #[command(flatten)]
    pub shared: SharedSettings,

    #[command(subcommand)]
    pub command: Commands,
}

impl Settings {
    pub fn get_output_dir(&self) -> &Utf8Path {
        match &self.command {
            Commands::Estimate(x) => &x.output_dir,
            Commands::CountSnvs(x) => &x.output_dir,
        }
    }
}

/// Checks if a directory does not exist
///
pub fn check_novel_dirname(dirname: &Utf8Path, label: &str) -> SimpleResult<()> {
    if dirname.exists() {
        bail!("{label} already exists: \"{dirname}\"");
    }
    Ok(())
}

/// Validate settings and update parameters that can't be processed by clap
///
fn validate_and_fix_settings_impl(mut settings: Settings) -> SimpleResult<Settings> {
    settings.shared = validate_and_fix_shared_settings(settings.shared)?;

    settings.command = match settings.command {
        Commands::Estimate(x) => {
            let x = validate_and_fix_estimate_settings(x)?;
            Commands::Estimate(x)
        }
        Commands::CountSnvs(x) => {
            let x = validate_and_fix_count_snvs_settings(x)?;
            Commands::CountSnvs(x)
        }
    };

    Ok(settings)
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
pub fn validate_and_fix_settings(settings: Settings) -> Settings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("Invalid command-line setting: {msg}");
            std::process::exit(exitcode::USAGE);
        }
    }
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}
