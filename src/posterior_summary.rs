//! Reduce posterior draws to labeled posterior mean estimates, and write summary and draw tables
//!

use std::collections::BTreeMap;

use camino::Utf8Path;
use log::info;
use simple_error::{SimpleResult, bail};

use crate::inference::Chain;

pub const SUMMARY_FILENAME: &str = "posterior_summary.csv";
pub const DRAWS_FILENAME: &str = "posterior.draws.csv";

/// Label of the normal clone in all output
pub const NORMAL_CLONE_LABEL: &str = "normal";

/// Name of the clone prevalence parameter in the draw map
const PREVALENCE_PARAMETER: &str = "rho";

/// Posterior mean of every model parameter as a single labeled row
///
#[derive(Clone, Debug, PartialEq)]
pub struct PosteriorSummary {
    pub labels: Vec<String>,
    pub means: Vec<f64>,
}

#[cfg(test)]
impl PosteriorSummary {
    fn get(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|x| x == label)
            .map(|i| self.means[i])
    }
}

/// Labels for tumor clones A, B, C... followed by the normal clone
///
pub fn get_clone_labels(tumor_clone_count: usize) -> SimpleResult<Vec<String>> {
    if tumor_clone_count > 26 {
        bail!("Clone labels are only available for up to 26 tumor clones, found {tumor_clone_count}");
    }
    let mut labels = (0..tumor_clone_count)
        .map(|i| ((b'A' + i as u8) as char).to_string())
        .collect::<Vec<_>>();
    labels.push(NORMAL_CLONE_LABEL.to_string());
    Ok(labels)
}

fn column_means(draws: &[Vec<f64>]) -> Vec<f64> {
    let dim = draws.first().map(|x| x.len()).unwrap_or(0);
    let n = draws.len() as f64;
    (0..dim)
        .map(|j| draws.iter().map(|x| x[j]).sum::<f64>() / n)
        .collect()
}

/// Average all draws of each parameter
///
/// Clone prevalence columns come first, labeled by clone, followed by all other parameters in
/// name order. Vector-valued parameters other than the prevalence are labeled 'name.index'.
///
pub fn summarize_draws(draw_map: &BTreeMap<String, Vec<Vec<f64>>>) -> SimpleResult<PosteriorSummary> {
    let rho_draws = match draw_map.get(PREVALENCE_PARAMETER) {
        Some(x) => x,
        None => bail!("Posterior draws do not include the clone prevalence parameter"),
    };
    if rho_draws.is_empty() {
        bail!("No posterior draws to summarize");
    }

    let rho_means = column_means(rho_draws);
    let mut labels = get_clone_labels(rho_means.len() - 1)?;
    let mut means = rho_means;

    for (name, draws) in draw_map.iter() {
        if name == PREVALENCE_PARAMETER {
            continue;
        }
        let parameter_means = column_means(draws);
        if parameter_means.len() == 1 {
            labels.push(name.clone());
        } else {
            labels.extend((0..parameter_means.len()).map(|i| format!("{name}.{i}")));
        }
        means.extend(parameter_means);
    }

    Ok(PosteriorSummary { labels, means })
}

fn write_summary_records<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    summary: &PosteriorSummary,
) -> csv::Result<()> {
    writer.write_record(&summary.labels)?;
    writer.write_record(summary.means.iter().map(|x| x.to_string()))?;
    writer.flush()?;
    Ok(())
}

/// Write the summary as a csv file with one header row and one value row
///
pub fn write_posterior_summary(output_dir: &Utf8Path, summary: &PosteriorSummary) -> SimpleResult<()> {
    let filename = output_dir.join(SUMMARY_FILENAME);
    info!("Writing posterior summary to file: '{filename}'");

    let mut writer = match csv::Writer::from_path(&filename) {
        Ok(x) => x,
        Err(e) => bail!("Unable to create posterior summary file '{filename}': {e}"),
    };

    if let Err(e) = write_summary_records(&mut writer, summary) {
        bail!("Failed to write posterior summary file '{filename}': {e}");
    }
    Ok(())
}

fn write_draw_records<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    chain: &Chain,
) -> csv::Result<()> {
    let mut header = chain.value_labels();
    header.extend(
        [
            "accept_stat",
            "step_size",
            "tree_depth",
            "n_leapfrog",
            "divergent",
            "energy",
            "ln_density",
        ]
        .iter()
        .map(|x| x.to_string()),
    );
    writer.write_record(&header)?;

    for sample in chain.samples.iter() {
        let stats = &sample.stats;
        let mut record = sample
            .values
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>();
        record.extend([
            stats.accept_stat.to_string(),
            stats.step_size.to_string(),
            stats.tree_depth.to_string(),
            stats.leapfrog_count.to_string(),
            (stats.divergent as u8).to_string(),
            stats.energy.to_string(),
            stats.ln_density.to_string(),
        ]);
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write every posterior draw with its sampler diagnostics
///
pub fn write_posterior_draws(output_dir: &Utf8Path, chain: &Chain) -> SimpleResult<()> {
    let filename = output_dir.join(DRAWS_FILENAME);
    info!(
        "Writing {} posterior draws to file: '{filename}'",
        chain.samples.len()
    );

    let mut writer = match csv::Writer::from_path(&filename) {
        Ok(x) => x,
        Err(e) => bail!("Unable to create posterior draws file '{filename}': {e}"),
    };
    if let Err(e) = write_draw_records(&mut writer, chain) {
        bail!("Failed to write posterior draws file '{filename}': {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_clone_labels() {
        assert_eq!(get_clone_labels(2).unwrap(), vec!["A", "B", "normal"]);
        assert_eq!(get_clone_labels(0).unwrap(), vec!["normal"]);
        assert_eq!(get_clone_labels(26).unwrap()[25], "Z");
        assert!(get_clone_labels(27).is_err());
    }

    #[test]
    fn test_summarize_draws() {
        let mut draw_map = BTreeMap::new();
        draw_map.insert("tau".to_string(), vec![vec![0.1], vec![0.3]]);
        draw_map.insert(
            "rho".to_string(),
            vec![vec![0.2, 0.5, 0.3], vec![0.4, 0.3, 0.3]],
        );
        draw_map.insert("alpha".to_string(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let summary = summarize_draws(&draw_map).unwrap();
        assert_eq!(
            summary.labels,
            vec!["A", "B", "normal", "alpha.0", "alpha.1", "tau"]
        );
        approx::assert_ulps_eq!(summary.get("A").unwrap(), 0.3);
        approx::assert_ulps_eq!(summary.get("B").unwrap(), 0.4);
        approx::assert_ulps_eq!(summary.get("normal").unwrap(), 0.3);
        approx::assert_ulps_eq!(summary.get("tau").unwrap(), 0.2);
        approx::assert_ulps_eq!(summary.get("alpha.1").unwrap(), 3.0);
        approx::assert_abs_diff_eq!(summary.means[..3].iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_summarize_requires_prevalence() {
        let mut draw_map = BTreeMap::new();
        draw_map.insert("tau".to_string(), vec![vec![0.1]]);
        assert!(summarize_draws(&draw_map).is_err());
    }
}
