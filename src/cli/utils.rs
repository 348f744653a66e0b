use std::collections::HashSet;

use camino::Utf8Path;
use simple_error::{SimpleResult, bail};

/// Check that an input table or alignment file exists
///
/// Assumes no logger has been configured yet
///
pub fn check_input_filename(filename: &str, label: &str) -> SimpleResult<()> {
    if filename.is_empty() {
        bail!("Must specify {label} file");
    }
    let path = Utf8Path::new(filename);
    if !path.exists() {
        bail!("Can't find specified {label} file: '{filename}'");
    }
    if !path.is_file() {
        bail!("Specified {label} file path does not appear to be a file: '{filename}'");
    }
    Ok(())
}

/// Check the liquid and per-clone SNV count inputs
///
/// The liquid and clone tables are either all absent or all present, and no table may be used
/// twice, since each clone table is matched to a copy number profile column by position.
///
pub fn check_snv_count_filenames(
    liquid_filename: Option<&String>,
    clone_filenames: &[String],
) -> SimpleResult<()> {
    match (liquid_filename, clone_filenames.is_empty()) {
        (None, true) => return Ok(()),
        (Some(_), false) => {}
        _ => bail!("--liquid-snv-counts and --clone-snv-counts must be specified together"),
    }

    let mut observed = HashSet::new();
    for (filename, label) in liquid_filename
        .into_iter()
        .map(|x| (x, "liquid SNV count".to_string()))
        .chain(
            clone_filenames
                .iter()
                .enumerate()
                .map(|(i, x)| (x, format!("clone {} SNV count", i + 1))),
        )
    {
        check_input_filename(filename, &label)?;
        if !observed.insert(filename) {
            bail!("SNV count file '{filename}' is specified more than once");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_input_filename() {
        assert!(check_input_filename("", "coverage").is_err());
        assert!(check_input_filename("/liquidbayes/missing/coverage.tsv", "coverage").is_err());

        let dir = std::env::temp_dir();
        assert!(check_input_filename(dir.to_str().unwrap(), "coverage").is_err());
    }

    #[test]
    fn test_check_snv_count_filenames() {
        assert!(check_snv_count_filenames(None, &[]).is_ok());

        let liquid = "liquid.tsv".to_string();
        let err = check_snv_count_filenames(Some(&liquid), &[]).unwrap_err();
        assert!(err.to_string().contains("together"));
        assert!(check_snv_count_filenames(None, &["a.tsv".to_string()]).is_err());

        let dir = camino::Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .unwrap()
            .join(format!("liquidbayes_cli_utils_test_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = |x: &str| {
            let filename = dir.join(x);
            std::fs::write(&filename, "").unwrap();
            filename.to_string()
        };
        let liquid = path("liquid.tsv");
        let clone_a = path("clone_a.tsv");
        let clone_b = path("clone_b.tsv");

        assert!(check_snv_count_filenames(Some(&liquid), &[clone_a.clone(), clone_b]).is_ok());
        let err =
            check_snv_count_filenames(Some(&liquid), &[clone_a.clone(), clone_a]).unwrap_err();
        assert!(err.to_string().contains("more than once"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
