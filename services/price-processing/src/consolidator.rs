//! Product Consolidator
//!
//! Groups standardized records by `(standardized_name, standardized_unit)` and keeps the
//! cheapest positive-priced member of each group as its representative. Groups come out in the
//! order their key was first seen.

use indexmap::IndexMap;
use serde::Serialize;

use pricebook_models::{ConsolidatedProductGroup, ProductKey, StandardizedProductRecord};

/// How many records were folded into one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeLogEntry {
    pub key: ProductKey,
    pub merged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Consolidation {
    pub groups: Vec<ConsolidatedProductGroup>,
    pub merge_log: Vec<MergeLogEntry>,
    /// Records discarded for a missing or non-positive price.
    pub discarded: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProductConsolidator;

impl ProductConsolidator {
    pub fn new() -> Self {
        Self
    }

    pub fn consolidate(&self, records: Vec<StandardizedProductRecord>) -> Consolidation {
        let mut buckets: IndexMap<ProductKey, Vec<StandardizedProductRecord>> = IndexMap::new();
        let mut discarded = 0;

        for record in records {
            if !matches!(record.price(), Some(p) if p > 0.0) {
                discarded += 1;
                continue;
            }
            buckets.entry(record.key()).or_default().push(record);
        }

        let mut consolidation = Consolidation {
            discarded,
            ..Consolidation::default()
        };

        for (key, members) in buckets {
            let Some(representative) = cheapest(&members).cloned() else {
                continue;
            };
            if members.len() > 1 {
                tracing::debug!(
                    product = %key,
                    merged = members.len(),
                    price = representative.price().unwrap_or_default(),
                    "Merged duplicate records"
                );
            }
            consolidation.merge_log.push(MergeLogEntry {
                key: key.clone(),
                merged: members.len(),
            });
            consolidation.groups.push(ConsolidatedProductGroup {
                key,
                representative,
                members,
            });
        }

        tracing::info!(
            groups = consolidation.groups.len(),
            merged = consolidation.merge_log.iter().filter(|e| e.merged > 1).count(),
            discarded = consolidation.discarded,
            "Consolidation finished"
        );
        consolidation
    }
}

/// Minimum price, first-seen member wins ties.
fn cheapest(members: &[StandardizedProductRecord]) -> Option<&StandardizedProductRecord> {
    let mut best: Option<(&StandardizedProductRecord, f64)> = None;
    for member in members {
        let Some(price) = member.price() else { continue };
        if best.map_or(true, |(_, lowest)| price < lowest) {
            best = Some((member, price));
        }
    }
    best.map(|(member, _)| member)
}
