//! Combine liquid and clone sample SNV counts into per-locus mutant copy estimates
//!
//! Clone SNV allele frequencies are merged across clone samples, joined to the liquid sample
//! counts and scaled by the copy number of the genome bin containing each locus.
//!

use std::collections::{HashMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail};

use crate::genome_bins::{BinnedCoverage, GenomicBin};
use crate::snv_counts::{SampleSnvCounts, SnvCount, SnvLocus};

/// Controls how clone SNV loci are combined across clone samples
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
pub enum SnvMergePolicy {
    /// Only keep loci found in every clone sample
    Inner,

    /// Keep loci found in any clone sample, with a VAF of 0 in clone samples missing the locus
    ZeroFill,
}

/// Liquid sample counts and clone mutant copy estimates for one SNV locus
#[derive(Clone, Debug, PartialEq)]
pub struct SnvCountRow {
    pub locus: SnvLocus,
    pub ref_count: u32,
    pub alt_count: u32,

    /// Mutant copy estimate for each tumor clone, the normal clone is excluded
    pub mutant_copies: Vec<f64>,
}

impl SnvCountRow {
    pub fn depth(&self) -> u32 {
        self.ref_count + self.alt_count
    }
}

#[derive(Clone, Debug, Default)]
pub struct CountMatrix {
    pub rows: Vec<SnvCountRow>,
}

#[derive(Debug)]
pub enum HarmonizedSnvCounts {
    Counts(CountMatrix),

    /// No locus survived the intersection and filtering steps
    NoSignal,
}

/// Remove duplicate loci and loci without any supporting reads
///
/// The first occurrence of a duplicated locus is kept.
///
fn clean_sample_counts(sample_counts: &SampleSnvCounts) -> Vec<SnvCount> {
    let mut observed = HashSet::new();
    let mut duplicate_count = 0;
    let mut counts = Vec::new();
    for count in sample_counts.counts.iter() {
        if !observed.insert(&count.locus) {
            debug!(
                "Skipping duplicate SNV locus {} in sample {}",
                count.locus, sample_counts.sample_label
            );
            duplicate_count += 1;
            continue;
        }
        if count.depth() == 0 {
            continue;
        }
        counts.push(count.clone());
    }
    if duplicate_count > 0 {
        debug!(
            "Removed {duplicate_count} duplicate SNV loci from sample {}",
            sample_counts.sample_label
        );
    }
    counts
}

/// Span of the genome bins on each chromosome, indexed by chrom_index
///
fn get_chrom_bin_spans(binned_coverage: &BinnedCoverage) -> Vec<Option<(i64, i64)>> {
    let mut spans = vec![None; binned_coverage.chrom_list.len()];
    for bin in binned_coverage.bins.iter() {
        let span = &mut spans[bin.chrom_index];
        *span = match *span {
            Some((start, end)) => Some((std::cmp::min(start, bin.start), std::cmp::max(end, bin.end))),
            None => Some((bin.start, bin.end)),
        };
    }
    spans
}

/// Restrict counts to loci within the bin span of a chromosome covered by the genome bins
///
fn restrict_to_bin_spans(
    counts: Vec<SnvCount>,
    binned_coverage: &BinnedCoverage,
    spans: &[Option<(i64, i64)>],
) -> Vec<SnvCount> {
    counts
        .into_iter()
        .filter(|count| {
            let chrom_index = match binned_coverage.chrom_list.index(&count.locus.chrom) {
                Some(x) => x,
                None => return false,
            };
            match spans[chrom_index] {
                Some((start, end)) => count.locus.pos >= start && count.locus.pos <= end,
                None => false,
            }
        })
        .collect()
}

fn get_vafs(counts: &[SnvCount]) -> HashMap<SnvLocus, f64> {
    counts
        .iter()
        .map(|x| (x.locus.clone(), x.alt_count as f64 / x.depth() as f64))
        .collect()
}

/// Merge VAFs from each clone sample into one VAF vector per locus
///
fn merge_clone_vafs(
    clone_vafs: &[HashMap<SnvLocus, f64>],
    merge_policy: SnvMergePolicy,
) -> HashMap<SnvLocus, Vec<f64>> {
    let mut loci = HashSet::new();
    for vafs in clone_vafs.iter() {
        loci.extend(vafs.keys());
    }

    let mut merged = HashMap::new();
    for locus in loci {
        let vafs = clone_vafs
            .iter()
            .map(|x| x.get(locus).copied())
            .collect::<Vec<_>>();
        let vafs = match merge_policy {
            SnvMergePolicy::Inner => {
                if vafs.iter().any(|x| x.is_none()) {
                    continue;
                }
                vafs.into_iter().flatten().collect()
            }
            SnvMergePolicy::ZeroFill => vafs.into_iter().map(|x| x.unwrap_or(0.0)).collect(),
        };
        merged.insert(locus.clone(), vafs);
    }
    merged
}

/// Find the index of the genome bin containing each locus
///
/// Both `bins` and `loci` must be sorted. `loci` is given as (chrom_index, pos). The bin pointer
/// is advanced until the bin is on the locus chromosome and the bin end reaches the locus position.
///
fn assign_loci_to_bins(bins: &[GenomicBin], loci: &[(usize, i64)]) -> SimpleResult<Vec<usize>> {
    let mut bin_index = 0;
    let mut bin_indices = Vec::with_capacity(loci.len());
    let mut last_locus: Option<(usize, i64)> = None;
    for &(chrom_index, pos) in loci.iter() {
        if let Some(last_locus) = last_locus {
            if (chrom_index, pos) < last_locus {
                bail!(
                    "SNV loci are not sorted, locus at chrom index {chrom_index} position {pos} follows chrom index {} position {}",
                    last_locus.0,
                    last_locus.1
                );
            }
        }
        last_locus = Some((chrom_index, pos));

        loop {
            if bin_index >= bins.len() {
                bail!(
                    "No genome bin found for SNV locus at chrom index {chrom_index} position {pos}"
                );
            }
            let bin = &bins[bin_index];
            if bin_index > 0 {
                let prev_bin = &bins[bin_index - 1];
                if (bin.chrom_index, bin.start) < (prev_bin.chrom_index, prev_bin.start) {
                    bail!(
                        "Genome bins are not sorted, bin at chrom index {} start {} follows chrom index {} start {}",
                        bin.chrom_index,
                        bin.start,
                        prev_bin.chrom_index,
                        prev_bin.start
                    );
                }
            }
            if bin.chrom_index == chrom_index && bin.end >= pos {
                break;
            }
            if bin.chrom_index > chrom_index {
                bail!(
                    "Genome bins are out of order with SNV loci at chrom index {chrom_index} position {pos}"
                );
            }
            bin_index += 1;
        }
        bin_indices.push(bin_index);
    }
    Ok(bin_indices)
}

/// Build the SNV count matrix used by the SNV model term
///
/// # Arguments
/// * `clone_counts` - One entry per tumor clone, in the same order as the copy number columns
///
/// Returns [HarmonizedSnvCounts::NoSignal] if no SNV locus survives the intersection. Errors are
/// returned for a clone sample count that does not match the tumor clone count, or for a sort order
/// violation while assigning loci to bins.
///
pub fn harmonize_snv_counts(
    liquid_counts: &SampleSnvCounts,
    clone_counts: &[SampleSnvCounts],
    binned_coverage: &BinnedCoverage,
    merge_policy: SnvMergePolicy,
    thread_count: usize,
) -> SimpleResult<HarmonizedSnvCounts> {
    use rayon::prelude::*;

    let clone_count = binned_coverage.tumor_clone_count();
    if clone_counts.len() != clone_count {
        bail!(
            "Found {} clone SNV count samples, but the copy number profiles include {clone_count} tumor clones",
            clone_counts.len()
        );
    }

    info!("Harmonizing SNV counts across the liquid sample and {clone_count} clone samples");

    let spans = get_chrom_bin_spans(binned_coverage);

    let worker_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .unwrap();

    let samples = std::iter::once(liquid_counts)
        .chain(clone_counts.iter())
        .collect::<Vec<_>>();
    let mut cleaned_samples = worker_pool.install(|| {
        samples
            .par_iter()
            .map(|x| restrict_to_bin_spans(clean_sample_counts(x), binned_coverage, &spans))
            .collect::<Vec<_>>()
    });
    let cleaned_clones = cleaned_samples.split_off(1);
    let cleaned_liquid = cleaned_samples.pop().unwrap_or_default();

    let clone_vafs = cleaned_clones
        .iter()
        .map(|x| get_vafs(x))
        .collect::<Vec<_>>();
    let merged_clone_vafs = merge_clone_vafs(&clone_vafs, merge_policy);

    let mut joined = cleaned_liquid
        .into_iter()
        .filter_map(|x| {
            let vafs = merged_clone_vafs.get(&x.locus)?;
            let chrom_index = binned_coverage.chrom_list.index(&x.locus.chrom)?;
            Some((chrom_index, x, vafs))
        })
        .collect::<Vec<_>>();
    joined.sort_by(|a, b| (a.0, &a.1.locus).cmp(&(b.0, &b.1.locus)));

    let loci = joined
        .iter()
        .map(|(chrom_index, x, _)| (*chrom_index, x.locus.pos))
        .collect::<Vec<_>>();
    let bin_indices = assign_loci_to_bins(&binned_coverage.bins, &loci)?;

    let joined_count = joined.len();
    let rows = joined
        .into_iter()
        .zip(bin_indices)
        .map(|((_, count, vafs), bin_index)| {
            let bin = &binned_coverage.bins[bin_index];
            let mutant_copies = vafs
                .iter()
                .zip(bin.copy_numbers.iter())
                .map(|(vaf, &cn)| vaf * cn as f64)
                .collect();
            SnvCountRow {
                locus: count.locus,
                ref_count: count.ref_count,
                alt_count: count.alt_count,
                mutant_copies,
            }
        })
        .filter(|x| x.mutant_copies.iter().any(|&m| m != 0.0))
        .collect::<Vec<_>>();

    info!(
        "Found {joined_count} SNV loci shared by the liquid and clone samples, {} loci retained with clone mutant copies",
        rows.len()
    );

    if rows.is_empty() {
        Ok(HarmonizedSnvCounts::NoSignal)
    } else {
        Ok(HarmonizedSnvCounts::Counts(CountMatrix { rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chrom_list::ChromList;

    fn locus(chrom: &str, pos: i64) -> SnvLocus {
        SnvLocus {
            chrom: chrom.to_string(),
            pos,
            ref_allele: b'C',
            alt_allele: b'T',
        }
    }

    fn count(chrom: &str, pos: i64, ref_count: u32, alt_count: u32) -> SnvCount {
        SnvCount {
            locus: locus(chrom, pos),
            ref_count,
            alt_count,
        }
    }

    fn sample(label: &str, counts: Vec<SnvCount>) -> SampleSnvCounts {
        SampleSnvCounts {
            sample_label: label.to_string(),
            counts,
        }
    }

    fn bin(chrom_index: usize, start: i64, end: i64, copy_numbers: &[u32]) -> GenomicBin {
        GenomicBin {
            chrom_index,
            start,
            end,
            copy_numbers: copy_numbers.to_vec(),
            coverage: 0.0,
        }
    }

    fn get_binned_coverage() -> BinnedCoverage {
        let mut chrom_list = ChromList::default();
        chrom_list.add_chrom("1");
        chrom_list.add_chrom("2");
        BinnedCoverage {
            chrom_list,
            bins: vec![
                bin(0, 1000, 2000, &[2, 1, 2]),
                bin(0, 2000, 3000, &[3, 0, 2]),
                bin(1, 500, 1500, &[1, 4, 2]),
            ],
        }
    }

    fn unwrap_counts(result: HarmonizedSnvCounts) -> CountMatrix {
        match result {
            HarmonizedSnvCounts::Counts(x) => x,
            HarmonizedSnvCounts::NoSignal => panic!("Expected SNV counts"),
        }
    }

    #[test]
    fn test_mutant_copies_from_clone_vaf() {
        let binned_coverage = get_binned_coverage();
        let liquid = sample("liquid", vec![count("1", 1500, 10, 10)]);
        let clones = vec![
            sample("A", vec![count("1", 1500, 0, 20)]),
            sample("B", vec![count("1", 1500, 15, 5)]),
        ];

        let result = harmonize_snv_counts(
            &liquid,
            &clones,
            &binned_coverage,
            SnvMergePolicy::Inner,
            2,
        )
        .unwrap();
        let matrix = unwrap_counts(result);
        assert_eq!(matrix.rows.len(), 1);
        assert_eq!(matrix.rows[0].mutant_copies[0], 2.0);
        approx::assert_ulps_eq!(matrix.rows[0].mutant_copies[1], 0.25);
        assert_eq!(matrix.rows[0].depth(), 20);
    }

    #[test]
    fn test_disjoint_loci_give_no_signal() {
        let binned_coverage = get_binned_coverage();
        let liquid = sample("liquid", vec![count("1", 1100, 10, 10)]);
        let clones = vec![
            sample("A", vec![count("1", 1500, 0, 20)]),
            sample("B", vec![count("1", 1500, 15, 5)]),
        ];
        let result = harmonize_snv_counts(
            &liquid,
            &clones,
            &binned_coverage,
            SnvMergePolicy::ZeroFill,
            1,
        )
        .unwrap();
        assert!(matches!(result, HarmonizedSnvCounts::NoSignal));
    }

    #[test]
    fn test_clone_sample_count_mismatch() {
        let binned_coverage = get_binned_coverage();
        let liquid = sample("liquid", vec![count("1", 1500, 10, 10)]);
        let clones = vec![sample("A", vec![count("1", 1500, 0, 20)])];
        let result =
            harmonize_snv_counts(&liquid, &clones, &binned_coverage, SnvMergePolicy::Inner, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_policy() {
        let binned_coverage = get_binned_coverage();
        let liquid = sample(
            "liquid",
            vec![count("1", 1500, 10, 10), count("2", 1000, 8, 2)],
        );
        let clones = vec![
            sample("A", vec![count("1", 1500, 10, 10)]),
            sample("B", vec![count("1", 1500, 10, 10), count("2", 1000, 5, 5)]),
        ];

        let inner = unwrap_counts(
            harmonize_snv_counts(&liquid, &clones, &binned_coverage, SnvMergePolicy::Inner, 1)
                .unwrap(),
        );
        assert_eq!(inner.rows.len(), 1);
        assert_eq!(inner.rows[0].locus, locus("1", 1500));

        let zero_fill = unwrap_counts(
            harmonize_snv_counts(
                &liquid,
                &clones,
                &binned_coverage,
                SnvMergePolicy::ZeroFill,
                1,
            )
            .unwrap(),
        );
        assert_eq!(zero_fill.rows.len(), 2);
        assert_eq!(zero_fill.rows[1].locus, locus("2", 1000));
        assert_eq!(zero_fill.rows[1].mutant_copies, vec![0.0, 2.0]);
    }

    #[test]
    fn test_cleaning_and_span_restriction() {
        let binned_coverage = get_binned_coverage();
        let liquid = sample(
            "liquid",
            vec![
                count("1", 1500, 10, 10),
                // Duplicate, first occurrence is used
                count("1", 1500, 0, 50),
                // Zero depth
                count("1", 2500, 0, 0),
                // Outside bin span
                count("1", 5000, 3, 3),
                // Chromosome without bins
                count("3", 1000, 3, 3),
            ],
        );
        let clone_loci = [("1", 1500), ("1", 2500), ("1", 5000), ("3", 1000)];
        let clones = vec![
            sample(
                "A",
                clone_loci.iter().map(|(c, p)| count(c, *p, 1, 1)).collect(),
            ),
            sample(
                "B",
                clone_loci.iter().map(|(c, p)| count(c, *p, 1, 1)).collect(),
            ),
        ];
        let matrix = unwrap_counts(
            harmonize_snv_counts(&liquid, &clones, &binned_coverage, SnvMergePolicy::Inner, 2)
                .unwrap(),
        );
        assert_eq!(matrix.rows.len(), 1);
        assert_eq!(matrix.rows[0].alt_count, 10);
    }

    #[test]
    fn test_all_zero_rows_removed() {
        let binned_coverage = get_binned_coverage();
        let liquid = sample("liquid", vec![count("1", 1200, 5, 5), count("1", 2500, 5, 5)]);
        let clones = vec![
            sample("A", vec![count("1", 1200, 10, 0), count("1", 2500, 5, 5)]),
            sample("B", vec![count("1", 1200, 10, 0), count("1", 2500, 5, 5)]),
        ];
        let matrix = unwrap_counts(
            harmonize_snv_counts(&liquid, &clones, &binned_coverage, SnvMergePolicy::Inner, 1)
                .unwrap(),
        );
        assert_eq!(matrix.rows.len(), 1);
        assert_eq!(matrix.rows[0].locus, locus("1", 2500));
        // Clone B has copy number 0 in this bin
        assert_eq!(matrix.rows[0].mutant_copies, vec![1.5, 0.0]);
    }

    #[test]
    fn test_assign_loci_to_bins() {
        let binned_coverage = get_binned_coverage();
        let bins = &binned_coverage.bins;
        let loci = vec![(0, 1000), (0, 2000), (0, 2001), (1, 200), (1, 1500)];
        assert_eq!(assign_loci_to_bins(bins, &loci).unwrap(), vec![0, 0, 1, 2, 2]);
    }

    #[test]
    fn test_assign_loci_to_bins_order_violation() {
        let binned_coverage = get_binned_coverage();
        let loci = vec![(0, 2500), (0, 1500)];
        assert!(assign_loci_to_bins(&binned_coverage.bins, &loci).is_err());

        let mut bins = binned_coverage.bins.clone();
        bins.swap(0, 1);
        let loci = vec![(1, 200)];
        assert!(assign_loci_to_bins(&bins, &loci).is_err());
    }
}
