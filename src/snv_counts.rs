//! Per-sample allele counts at SNV loci, and their tab-delimited table format
//!

use std::fmt;

use camino::Utf8Path;
use log::info;
use simple_error::{SimpleResult, bail};

use crate::genome_bins::read_tab_delimited_table;

/// Identity of an SNV event
///
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnvLocus {
    pub chrom: String,

    /// 1-indexed position
    pub pos: i64,

    pub ref_allele: u8,
    pub alt_allele: u8,
}

impl fmt::Display for SnvLocus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chrom, self.pos, self.ref_allele as char, self.alt_allele as char
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SnvCount {
    pub locus: SnvLocus,
    pub ref_count: u32,
    pub alt_count: u32,
}

impl SnvCount {
    pub fn depth(&self) -> u32 {
        self.ref_count + self.alt_count
    }
}

/// All SNV allele counts from one sample
///
#[derive(Clone, Debug, Default)]
pub struct SampleSnvCounts {
    pub sample_label: String,
    pub counts: Vec<SnvCount>,
}

fn parse_allele(word: &str, line_number: usize, filename: &str) -> SimpleResult<u8> {
    let bytes = word.trim().as_bytes();
    if bytes.len() != 1 {
        bail!(
            "Expected a single base allele on line {line_number} of SNV count file '{filename}', found '{word}'"
        );
    }
    Ok(bytes[0].to_ascii_uppercase())
}

/// Read an SNV count table
///
/// Columns are: chrom, pos, ref, alt, ref_count, alt_count
///
pub fn read_snv_count_table(filename: &str, sample_label: &str) -> SimpleResult<SampleSnvCounts> {
    info!("Reading {sample_label} SNV counts from file '{filename}'");

    let mut counts = Vec::new();
    for (line_number, words) in read_tab_delimited_table(filename, "SNV count", 6)? {
        let parse_count = |word: &str, label: &str| -> SimpleResult<u32> {
            match word.trim().parse::<u32>() {
                Ok(x) => Ok(x),
                Err(_) => bail!(
                    "Can't parse {label} '{word}' on line {line_number} of SNV count file '{filename}'"
                ),
            }
        };
        let pos = match words[1].trim().parse::<i64>() {
            Ok(x) => x,
            Err(_) => bail!(
                "Can't parse position '{}' on line {line_number} of SNV count file '{filename}'",
                words[1]
            ),
        };
        counts.push(SnvCount {
            locus: SnvLocus {
                chrom: words[0].clone(),
                pos,
                ref_allele: parse_allele(&words[2], line_number, filename)?,
                alt_allele: parse_allele(&words[3], line_number, filename)?,
            },
            ref_count: parse_count(&words[4], "ref count")?,
            alt_count: parse_count(&words[5], "alt count")?,
        });
    }

    Ok(SampleSnvCounts {
        sample_label: sample_label.to_string(),
        counts,
    })
}

fn write_snv_count_records<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    sample_counts: &SampleSnvCounts,
) -> csv::Result<()> {
    writer.write_record(["#chrom", "pos", "ref", "alt", "ref_count", "alt_count"])?;
    for count in sample_counts.counts.iter() {
        writer.write_record([
            count.locus.chrom.clone(),
            count.locus.pos.to_string(),
            (count.locus.ref_allele.to_ascii_uppercase() as char).to_string(),
            (count.locus.alt_allele.to_ascii_uppercase() as char).to_string(),
            count.ref_count.to_string(),
            count.alt_count.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write SNV counts in the same format read by [read_snv_count_table]
///
/// Alleles are written in upper case.
///
pub fn write_snv_count_table(
    filename: &Utf8Path,
    sample_counts: &SampleSnvCounts,
) -> SimpleResult<()> {
    info!(
        "Writing {} SNV counts to file: '{filename}'",
        sample_counts.counts.len()
    );

    let mut writer = match csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(filename)
    {
        Ok(x) => x,
        Err(e) => bail!("Unable to create SNV count file '{filename}': {e}"),
    };

    let write_result = write_snv_count_records(&mut writer, sample_counts);

    if let Err(e) = write_result {
        bail!("Failed to write SNV count file '{filename}': {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locus_display() {
        let locus = SnvLocus {
            chrom: "7".to_string(),
            pos: 140453136,
            ref_allele: b'A',
            alt_allele: b'T',
        };
        assert_eq!(locus.to_string(), "7:140453136:A:T");
    }

    #[test]
    fn test_snv_count_table_read_back() {
        let dir = camino::Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .unwrap()
            .join(format!("liquidbayes_snv_counts_test_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let filename = dir.join("sample.snv.tsv");

        let count = |chrom: &str, pos, ref_allele, alt_allele, ref_count, alt_count| SnvCount {
            locus: SnvLocus {
                chrom: chrom.to_string(),
                pos,
                ref_allele,
                alt_allele,
            },
            ref_count,
            alt_count,
        };
        let sample_counts = SampleSnvCounts {
            sample_label: "liquid".to_string(),
            counts: vec![
                count("1", 1500, b'A', b'G', 30, 10),
                count("1", 2600, b'c', b't', 12, 4),
                count("chrX", 100, b'G', b'T', 0, 0),
            ],
        };
        write_snv_count_table(&filename, &sample_counts).unwrap();

        let content = std::fs::read_to_string(&filename).unwrap();
        assert!(content.starts_with("#chrom\tpos\tref\talt\tref_count\talt_count\n"));

        let result = read_snv_count_table(filename.as_str(), "liquid").unwrap();
        assert_eq!(result.sample_label, "liquid");
        let expected = vec![
            count("1", 1500, b'A', b'G', 30, 10),
            count("1", 2600, b'C', b'T', 12, 4),
            count("chrX", 100, b'G', b'T', 0, 0),
        ];
        assert_eq!(result.counts, expected);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_locus_order() {
        let a = SnvLocus {
            chrom: "1".to_string(),
            pos: 200,
            ref_allele: b'A',
            alt_allele: b'C',
        };
        let mut b = a.clone();
        b.pos = 100;
        assert!(b < a);
    }
}
