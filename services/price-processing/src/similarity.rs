//! Fuzzy similarity index of canonical product names, partitioned by category.
//!
//! Similarity is the Dice coefficient over character trigrams of the padded, cleaned name.

use std::collections::{HashMap, HashSet};

use pricebook_utils::clean_name;

const UNCATEGORIZED: &str = "";

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    grams: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct FuzzyIndex {
    partitions: HashMap<String, Vec<Entry>>,
}

impl FuzzyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a canonical name under `category`. Names already present are ignored.
    pub fn insert(&mut self, category: Option<&str>, canonical: &str) {
        let name = clean_name(canonical);
        if name.is_empty() {
            return;
        }
        let partition = self.partitions.entry(partition_key(category)).or_default();
        if partition.iter().any(|entry| entry.name == name) {
            return;
        }
        partition.push(Entry {
            grams: trigrams(&name),
            name,
        });
    }

    /// Closest canonical name in the category at or above `threshold`.
    pub fn best_match(&self, category: Option<&str>, query: &str, threshold: f64) -> Option<SimilarityMatch> {
        let query = clean_name(query);
        if query.is_empty() {
            return None;
        }
        let grams = trigrams(&query);

        self.partitions
            .get(&partition_key(category))?
            .iter()
            .map(|entry| SimilarityMatch {
                name: entry.name.clone(),
                score: dice(&grams, &entry.grams),
            })
            .filter(|m| m.score >= threshold)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Categories that differ only in case, punctuation or spacing share a partition.
pub(crate) fn partition_key(category: Option<&str>) -> String {
    category.map(clean_name).unwrap_or_else(|| UNCATEGORIZED.to_string())
}

fn trigrams(text: &str) -> HashSet<String> {
    let padded: Vec<char> = format!("  {} ", text).chars().collect();
    padded.windows(3).map(|w| w.iter().collect()).collect()
}

pub fn dice(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    2.0 * shared as f64 / (a.len() + b.len()) as f64
}

/// Trigram similarity of two names, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    dice(&trigrams(&clean_name(a)), &trigrams(&clean_name(b)))
}
