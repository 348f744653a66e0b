//! Log setup for liquidbayes runs
//!
//! Every run writes its log to stderr and to a copy in the output directory, next to the settings
//! and run statistics records.
//!

use camino::{Utf8Path, Utf8PathBuf};
use const_format::concatcp;

use crate::cli;
use crate::globals::PROGRAM_NAME;
use crate::os_utils::create_dir_all;

pub const LOG_FILENAME: &str = concatcp!(PROGRAM_NAME, ".log");

fn get_log_level(debug: bool) -> log::LevelFilter {
    if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    }
}

fn setup_logger(log_filename: &Utf8Path, debug: bool) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{PROGRAM_NAME}][{}] {message}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.level(),
            ))
        })
        .level(get_log_level(debug))
        .chain(std::io::stderr())
        .chain(fern::log_file(log_filename)?)
        .apply()?;
    Ok(())
}

/// Check and create the output directory, then setup the logger to write there
///
/// An existing output directory is reused. With `clobber` a path which exists but is not a
/// directory is also accepted, and is then handled by the directory creation step.
///
/// Returns the log filename
///
pub fn setup_output_dir_and_logger(output_dir: &Utf8Path, clobber: bool, debug: bool) -> Utf8PathBuf {
    // No logger is available yet, so errors follow the command-line settings error pattern
    if let Err(msg) = cli::check_novel_dirname(output_dir, "Output directory") {
        if !(clobber || output_dir.is_dir()) {
            eprintln!("Invalid command-line setting: {msg}");
            std::process::exit(exitcode::USAGE);
        }
    };
    create_dir_all(output_dir, "output");

    let log_filename = output_dir.join(LOG_FILENAME);
    if let Err(e) = setup_logger(&log_filename, debug) {
        eprintln!("Unable to setup log file '{log_filename}': {e}");
        std::process::exit(2);
    }
    log_filename
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_settings() {
        assert_eq!(LOG_FILENAME, "liquidbayes.log");
        assert_eq!(get_log_level(true), log::LevelFilter::Debug);
        assert_eq!(get_log_level(false), log::LevelFilter::Info);
    }
}
