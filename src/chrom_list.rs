use std::collections::HashMap;

/// Chromosome order for a run, taken from the order of first appearance in the copy number table
///
/// All (chromosome, position) sorting in liquidbayes is defined relative to this order.
///
#[derive(Clone, Default)]
pub struct ChromList {
    pub labels: Vec<String>,
    pub label_to_index: HashMap<String, usize>,
}

impl ChromList {
    /// Return the index of `label`, adding it to the end of the list if it is not already present
    ///
    pub fn add_chrom(&mut self, label: &str) -> usize {
        if let Some(&index) = self.label_to_index.get(label) {
            return index;
        }
        let index = self.labels.len();
        self.labels.push(label.to_string());
        self.label_to_index.insert(label.to_string(), index);
        index
    }

    pub fn index(&self, label: &str) -> Option<usize> {
        self.label_to_index.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_chrom() {
        let mut chrom_list = ChromList::default();
        assert_eq!(chrom_list.add_chrom("2"), 0);
        assert_eq!(chrom_list.add_chrom("10"), 1);
        assert_eq!(chrom_list.add_chrom("2"), 0);
        assert_eq!(chrom_list.len(), 2);
        assert_eq!(chrom_list.index("10"), Some(1));
        assert_eq!(chrom_list.index("X"), None);
    }
}
