//! Count reference and alternate allele support at SNV loci from an alignment file
//!

use log::info;
use rust_htslib::bam::{self, Read as BamRead, record::Cigar};
use rust_htslib::bcf::{self, Read as BcfRead};
use simple_error::{SimpleResult, bail};

use crate::snv_counts::{SampleSnvCounts, SnvCount, SnvLocus};

pub struct SnvCounterSettings {
    pub min_mapq: u8,
    pub min_base_qual: u8,

    /// If non-empty, only SNVs on these chromosomes are counted
    pub target_chroms: Vec<String>,
}

/// Candidate SNV from the variant file, with a 0-indexed position
struct SnvCandidate {
    chrom: String,
    pos: i64,
    ref_allele: u8,
    alt_allele: u8,
}

/// Return true if the read should be used for allele counting
fn is_countable_read(record: &bam::Record, min_mapq: u8) -> bool {
    !(record.is_unmapped()
        || record.is_secondary()
        || record.is_supplementary()
        || record.is_quality_check_failed()
        || record.is_duplicate()
        || record.mapq() < min_mapq)
}

/// Find the read position aligned to reference position `target_pos`
///
/// Returns None if the position is deleted or outside the alignment
///
fn get_read_pos_at_ref_pos(ref_pos: i64, cigar: &[Cigar], target_pos: i64) -> Option<usize> {
    let mut ref_pos = ref_pos;
    let mut read_pos = 0usize;
    for c in cigar.iter() {
        match c {
            Cigar::Match(len) | Cigar::Equal(len) | Cigar::Diff(len) => {
                let len = *len as i64;
                if target_pos >= ref_pos && target_pos < ref_pos + len {
                    return Some(read_pos + (target_pos - ref_pos) as usize);
                }
                ref_pos += len;
                read_pos += len as usize;
            }
            Cigar::Ins(len) | Cigar::SoftClip(len) => {
                read_pos += *len as usize;
            }
            Cigar::Del(len) | Cigar::RefSkip(len) => {
                let len = *len as i64;
                if target_pos >= ref_pos && target_pos < ref_pos + len {
                    return None;
                }
                ref_pos += len;
            }
            Cigar::HardClip(_) | Cigar::Pad(_) => {}
        }
    }
    None
}

/// Read passing biallelic single-base substitutions from the variant file
///
fn read_snv_candidates(
    vcf_filename: &str,
    settings: &SnvCounterSettings,
) -> SimpleResult<Vec<SnvCandidate>> {
    let mut reader = match bcf::Reader::from_path(vcf_filename) {
        Ok(x) => x,
        Err(e) => bail!("Unable to open variant file '{vcf_filename}': {e}"),
    };

    let header = reader.header();
    let mut rid_to_chrom_name = Vec::new();
    for rid in 0..header.contig_count() {
        let chrom_bytes = match header.rid2name(rid) {
            Ok(x) => x,
            Err(e) => bail!("Can't read contig names from variant file '{vcf_filename}': {e}"),
        };
        rid_to_chrom_name.push(String::from_utf8_lossy(chrom_bytes).to_string());
    }
    let pass_filter_id = header.name_to_id(b"PASS");

    let mut candidates = Vec::new();
    let mut rec = reader.empty_record();
    while let Some(r) = reader.read(&mut rec) {
        if let Err(e) = r {
            bail!("Failed to parse variant record from '{vcf_filename}': {e}");
        }

        // Only use passing variant calls
        let is_pass = match &pass_filter_id {
            Ok(id) => rec.has_filter(id),
            Err(_) => rec.filters().next().is_none(),
        } || rec.filters().next().is_none();
        if !is_pass {
            continue;
        }

        let alleles = rec.alleles();
        if alleles.len() != 2 || alleles[0].len() != 1 || alleles[1].len() != 1 {
            continue;
        }
        let ref_allele = alleles[0][0].to_ascii_uppercase();
        let alt_allele = alleles[1][0].to_ascii_uppercase();

        let chrom = match rec.rid() {
            Some(rid) => rid_to_chrom_name[rid as usize].clone(),
            None => continue,
        };
        if !settings.target_chroms.is_empty() && !settings.target_chroms.contains(&chrom) {
            continue;
        }

        candidates.push(SnvCandidate {
            chrom,
            pos: rec.pos(),
            ref_allele,
            alt_allele,
        });
    }
    Ok(candidates)
}

/// Count reads supporting the reference and alternate allele of one candidate
///
/// Returns a 2-tuple of (ref_count, alt_count)
///
fn count_candidate_alleles(
    bam_reader: &mut bam::IndexedReader,
    candidate: &SnvCandidate,
    settings: &SnvCounterSettings,
) -> SimpleResult<(u32, u32)> {
    if let Err(e) = bam_reader.fetch((candidate.chrom.as_str(), candidate.pos, candidate.pos + 1)) {
        bail!(
            "Failed to fetch alignments at {}:{}: {e}",
            candidate.chrom,
            candidate.pos + 1
        );
    }

    let mut ref_count = 0;
    let mut alt_count = 0;
    let mut record = bam::Record::new();
    while let Some(r) = bam_reader.read(&mut record) {
        if let Err(e) = r {
            bail!(
                "Failed to read alignment record at {}:{}: {e}",
                candidate.chrom,
                candidate.pos + 1
            );
        }
        if !is_countable_read(&record, settings.min_mapq) {
            continue;
        }
        let read_pos = match get_read_pos_at_ref_pos(record.pos(), &record.cigar(), candidate.pos)
        {
            Some(x) => x,
            None => continue,
        };
        if record.qual()[read_pos] < settings.min_base_qual {
            continue;
        }
        let base = record.seq()[read_pos].to_ascii_uppercase();
        if base == candidate.ref_allele {
            ref_count += 1;
        } else if base == candidate.alt_allele {
            alt_count += 1;
        }
    }
    Ok((ref_count, alt_count))
}

/// Count allele support in `bam_filename` for every passing SNV in `vcf_filename`
///
/// Candidates on chromosomes missing from the alignment file are skipped.
///
pub fn count_snv_alleles(
    bam_filename: &str,
    vcf_filename: &str,
    sample_label: &str,
    settings: &SnvCounterSettings,
) -> SimpleResult<SampleSnvCounts> {
    info!("Getting {sample_label} SNV counts from '{bam_filename}' at SNV positions in '{vcf_filename}'");

    let candidates = read_snv_candidates(vcf_filename, settings)?;

    let mut bam_reader = match bam::IndexedReader::from_path(bam_filename) {
        Ok(x) => x,
        Err(e) => bail!("Failed to open indexed alignment file '{bam_filename}': {e}"),
    };

    let mut counts = Vec::new();
    let mut skipped_chrom_count = 0;
    for candidate in candidates.iter() {
        if bam_reader.header().tid(candidate.chrom.as_bytes()).is_none() {
            skipped_chrom_count += 1;
            continue;
        }
        let (ref_count, alt_count) = count_candidate_alleles(&mut bam_reader, candidate, settings)?;
        counts.push(SnvCount {
            locus: SnvLocus {
                chrom: candidate.chrom.clone(),
                pos: candidate.pos + 1,
                ref_allele: candidate.ref_allele,
                alt_allele: candidate.alt_allele,
            },
            ref_count,
            alt_count,
        });
    }

    if skipped_chrom_count > 0 {
        info!(
            "Skipped {skipped_chrom_count} SNVs on chromosomes not found in alignment file '{bam_filename}'"
        );
    }
    info!(
        "Counted alleles at {} of {} candidate SNVs",
        counts.len(),
        candidates.len()
    );

    Ok(SampleSnvCounts {
        sample_label: sample_label.to_string(),
        counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_read_pos_at_ref_pos() {
        use Cigar::*;

        // 2S5M2D3M1I4M
        let cigar = vec![SoftClip(2), Match(5), Del(2), Match(3), Ins(1), Match(4)];
        let ref_start = 100;

        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 99), None);
        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 100), Some(2));
        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 104), Some(6));
        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 105), None);
        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 107), Some(7));
        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 110), Some(11));
        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 113), Some(14));
        assert_eq!(get_read_pos_at_ref_pos(ref_start, &cigar, 114), None);
    }
}
