//! Genomic bin tables: corrected coverage ratios joined to per-clone copy number profiles
//!

use std::collections::HashMap;

use bio::data_structures::interval_tree::IntervalTree;
use log::info;
use simple_error::{SimpleResult, bail};

use crate::chrom_list::ChromList;

/// A single genome bin with its observed coverage and the copy number of every clone
///
/// The final entry of `copy_numbers` is the normal clone.
///
#[derive(Clone, Debug, PartialEq)]
pub struct GenomicBin {
    pub chrom_index: usize,
    pub start: i64,
    pub end: i64,
    pub copy_numbers: Vec<u32>,
    pub coverage: f64,
}

/// All bins used for one run, sorted by (chrom_index, start)
///
#[derive(Clone, Default)]
pub struct BinnedCoverage {
    pub chrom_list: ChromList,
    pub bins: Vec<GenomicBin>,
}

impl BinnedCoverage {
    /// Number of tumor clones, excluding the normal clone
    pub fn tumor_clone_count(&self) -> usize {
        self.bins
            .first()
            .map(|x| x.copy_numbers.len() - 1)
            .unwrap_or(0)
    }
}

struct CoverageRecord {
    chrom: String,
    start: i64,
    end: i64,
    coverage: f64,
}

struct CopyNumberRecord {
    chrom: String,
    start: i64,
    end: i64,
    copy_numbers: Vec<u32>,
}

/// Read all data lines of a tab-delimited table into split fields
///
/// Input may be plain or bgzip-compressed. Comment lines and empty lines are skipped. If the
/// first line does not have an integer in the second column it is treated as a header.
///
/// Returns a vector of (1-indexed line number, fields)
///
pub fn read_tab_delimited_table(
    filename: &str,
    label: &str,
    min_field_count: usize,
) -> SimpleResult<Vec<(usize, Vec<String>)>> {
    use rust_htslib::bgzf;
    use std::io::Read;

    let mut reader = match bgzf::Reader::from_path(filename) {
        Ok(x) => x,
        Err(e) => bail!("Unable to open {label} file '{filename}': {e}"),
    };

    let mut content = String::new();
    if let Err(e) = reader.read_to_string(&mut content) {
        bail!("Can't parse text from {label} file '{filename}': {e}");
    }

    let mut records = Vec::new();
    for (line_index, line) in content.lines().enumerate() {
        let line_number = line_index + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let words = line.split('\t').map(|x| x.to_string()).collect::<Vec<_>>();
        if line_index == 0 && words.len() > 1 && words[1].parse::<i64>().is_err() {
            continue;
        }
        if words.len() < min_field_count {
            bail!(
                "Expected at least {min_field_count} tab-delimited fields on line {line_number} of {label} file '{filename}', found {}",
                words.len()
            );
        }
        records.push((line_number, words));
    }
    Ok(records)
}

fn parse_field<T: std::str::FromStr>(
    word: &str,
    field_label: &str,
    line_number: usize,
    filename: &str,
) -> SimpleResult<T> {
    match word.trim().parse::<T>() {
        Ok(x) => Ok(x),
        Err(_) => bail!(
            "Can't parse {field_label} value '{word}' on line {line_number} of file '{filename}'"
        ),
    }
}

/// Coverage values which can't be parsed as finite numbers (such as 'NA') are skipped
///
fn read_coverage_table(filename: &str) -> SimpleResult<Vec<CoverageRecord>> {
    let mut records = Vec::new();
    let mut skipped = 0;
    for (line_number, words) in read_tab_delimited_table(filename, "coverage", 4)? {
        let coverage = match words[words.len() - 1].trim().parse::<f64>() {
            Ok(x) if x.is_finite() => x,
            _ => {
                skipped += 1;
                continue;
            }
        };
        records.push(CoverageRecord {
            chrom: words[0].clone(),
            start: parse_field(&words[1], "start", line_number, filename)?,
            end: parse_field(&words[2], "end", line_number, filename)?,
            coverage,
        });
    }
    if skipped > 0 {
        info!("Skipped {skipped} coverage bins without a finite coverage value");
    }
    Ok(records)
}

fn read_copy_number_table(filename: &str) -> SimpleResult<Vec<CopyNumberRecord>> {
    let mut records: Vec<CopyNumberRecord> = Vec::new();
    for (line_number, words) in read_tab_delimited_table(filename, "copy number profile", 5)? {
        let copy_numbers = words[3..]
            .iter()
            .map(|x| parse_field::<u32>(x, "copy number", line_number, filename))
            .collect::<SimpleResult<Vec<_>>>()?;
        if let Some(first) = records.first() {
            if first.copy_numbers.len() != copy_numbers.len() {
                bail!(
                    "Inconsistent clone count on line {line_number} of copy number profile file '{filename}'. Expected {} copy number columns but found {}",
                    first.copy_numbers.len(),
                    copy_numbers.len()
                );
            }
        }
        records.push(CopyNumberRecord {
            chrom: words[0].clone(),
            start: parse_field(&words[1], "start", line_number, filename)?,
            end: parse_field(&words[2], "end", line_number, filename)?,
            copy_numbers,
        });
    }
    Ok(records)
}

/// Join coverage bins to every overlapping copy number bin
///
/// Each output bin spans the overlap of the two input bins. Chromosome order follows the first
/// appearance of each chromosome in the copy number records.
///
/// # Arguments
/// * `target_chroms` - If non-empty, only these chromosomes are included
///
fn join_coverage_to_copy_number(
    coverage_records: &[CoverageRecord],
    copy_number_records: &[CopyNumberRecord],
    target_chroms: &[String],
) -> BinnedCoverage {
    let is_target =
        |chrom: &str| target_chroms.is_empty() || target_chroms.iter().any(|x| x == chrom);

    let mut chrom_list = ChromList::default();
    let mut chrom_trees: HashMap<usize, IntervalTree<i64, usize>> = HashMap::new();
    for (record_index, record) in copy_number_records.iter().enumerate() {
        if !is_target(&record.chrom) || record.end <= record.start {
            continue;
        }
        let chrom_index = chrom_list.add_chrom(&record.chrom);
        chrom_trees
            .entry(chrom_index)
            .or_insert_with(IntervalTree::new)
            .insert(record.start..record.end, record_index);
    }

    let mut bins = Vec::new();
    for coverage_record in coverage_records {
        let chrom_index = match chrom_list.index(&coverage_record.chrom) {
            Some(x) => x,
            None => continue,
        };
        if coverage_record.end <= coverage_record.start {
            continue;
        }
        let tree = &chrom_trees[&chrom_index];
        for entry in tree.find(coverage_record.start..coverage_record.end) {
            let cn_record = &copy_number_records[*entry.data()];
            bins.push(GenomicBin {
                chrom_index,
                start: std::cmp::max(coverage_record.start, cn_record.start),
                end: std::cmp::min(coverage_record.end, cn_record.end),
                copy_numbers: cn_record.copy_numbers.clone(),
                coverage: coverage_record.coverage,
            });
        }
    }

    bins.sort_by(|a, b| (a.chrom_index, a.start, a.end).cmp(&(b.chrom_index, b.start, b.end)));

    BinnedCoverage { chrom_list, bins }
}

/// Read the corrected coverage and copy number profile tables and join them into genome bins
///
/// An empty join result is an error, there is nothing to model.
///
pub fn read_binned_coverage(
    coverage_filename: &str,
    copy_number_filename: &str,
    target_chroms: &[String],
) -> SimpleResult<BinnedCoverage> {
    info!("Reading corrected coverage from file '{coverage_filename}'");
    let coverage_records = read_coverage_table(coverage_filename)?;

    info!("Reading copy number profiles from file '{copy_number_filename}'");
    let copy_number_records = read_copy_number_table(copy_number_filename)?;

    let binned_coverage =
        join_coverage_to_copy_number(&coverage_records, &copy_number_records, target_chroms);

    if binned_coverage.bins.is_empty() {
        bail!(
            "No overlap found between coverage bins in '{coverage_filename}' and copy number bins in '{copy_number_filename}'"
        );
    }

    info!(
        "Joined {} coverage bins to {} copy number bins, producing {} genome bins for {} tumor clones",
        coverage_records.len(),
        copy_number_records.len(),
        binned_coverage.bins.len(),
        binned_coverage.tumor_clone_count()
    );

    Ok(binned_coverage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cov(chrom: &str, start: i64, end: i64, coverage: f64) -> CoverageRecord {
        CoverageRecord {
            chrom: chrom.to_string(),
            start,
            end,
            coverage,
        }
    }

    fn cn(chrom: &str, start: i64, end: i64, copy_numbers: &[u32]) -> CopyNumberRecord {
        CopyNumberRecord {
            chrom: chrom.to_string(),
            start,
            end,
            copy_numbers: copy_numbers.to_vec(),
        }
    }

    #[test]
    fn test_join_coverage_to_copy_number() {
        let coverage_records = vec![
            cov("2", 0, 100, 0.1),
            cov("1", 0, 100, 0.2),
            cov("1", 100, 200, 0.3),
            cov("3", 0, 100, 0.4),
        ];
        let copy_number_records = vec![
            cn("1", 0, 150, &[1, 2]),
            cn("1", 150, 300, &[3, 2]),
            cn("2", 50, 100, &[2, 2]),
        ];

        let result = join_coverage_to_copy_number(&coverage_records, &copy_number_records, &[]);
        assert_eq!(result.chrom_list.labels, vec!["1", "2"]);
        assert_eq!(result.tumor_clone_count(), 1);

        let spans = result
            .bins
            .iter()
            .map(|x| (x.chrom_index, x.start, x.end, x.copy_numbers[0]))
            .collect::<Vec<_>>();
        assert_eq!(
            spans,
            vec![(0, 0, 100, 1), (0, 100, 150, 1), (0, 150, 200, 3), (1, 50, 100, 2)]
        );
        approx::assert_ulps_eq!(result.bins[3].coverage, 0.1);
    }

    #[test]
    fn test_join_target_chroms() {
        let coverage_records = vec![cov("1", 0, 100, 0.2), cov("2", 0, 100, 0.1)];
        let copy_number_records = vec![cn("1", 0, 100, &[1, 2]), cn("2", 0, 100, &[2, 2])];

        let result = join_coverage_to_copy_number(
            &coverage_records,
            &copy_number_records,
            &["2".to_string()],
        );
        assert_eq!(result.bins.len(), 1);
        assert_eq!(result.chrom_list.labels, vec!["2"]);
    }

    #[test]
    fn test_empty_join() {
        let coverage_records = vec![cov("1", 0, 100, 0.2)];
        let copy_number_records = vec![cn("1", 100, 200, &[1, 2])];
        let result = join_coverage_to_copy_number(&coverage_records, &copy_number_records, &[]);
        assert!(result.bins.is_empty());
    }
}
