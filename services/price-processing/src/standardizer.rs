//! Product Standardizer
//!
//! Maps supplier product names onto one canonical English vocabulary. Each record is resolved
//! from the run's memo cache, then the similarity index of names seen in earlier runs, and only
//! then sent to the text model in ID-indexed batches. Any id the model leaves out, and every
//! batch that cannot be sent, falls back to local naive normalization.

use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use pricebook_database::PriceStore;
use pricebook_models::{ProcessingStep, RunError, StandardizedProductRecord, ValidatedProductRecord};
use pricebook_utils::{naive_normalize, standardize_unit, StandardizationConfig};

use crate::ai_client::{AiError, AiRequest};
use crate::context::RunContext;
use crate::gateway::AiGateway;
use crate::response::decode_standardization;
use crate::similarity::{partition_key, FuzzyIndex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StandardizationStats {
    pub cache_hits: usize,
    pub similarity_hits: usize,
    pub ai_resolved: usize,
    pub naive_fallbacks: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StandardizationOutcome {
    pub records: Vec<StandardizedProductRecord>,
    pub errors: Vec<RunError>,
    pub stats: StandardizationStats,
}

#[derive(Default)]
struct SharedIndex {
    index: FuzzyIndex,
    seeded: HashSet<String>,
}

#[derive(Debug, Clone)]
struct PendingName {
    memo_key: String,
    name: String,
    category: Option<String>,
}

pub struct ProductStandardizer {
    gateway: Arc<AiGateway>,
    store: Arc<dyn PriceStore>,
    shared: RwLock<SharedIndex>,
    config: StandardizationConfig,
    model: String,
}

impl ProductStandardizer {
    pub fn new(
        gateway: Arc<AiGateway>,
        store: Arc<dyn PriceStore>,
        config: StandardizationConfig,
        model: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            shared: RwLock::new(SharedIndex::default()),
            config,
            model: model.into(),
        }
    }

    pub async fn standardize(&self, records: Vec<ValidatedProductRecord>, ctx: &RunContext) -> StandardizationOutcome {
        let mut outcome = StandardizationOutcome::default();
        let mut memo: HashMap<String, String> = HashMap::new();
        let mut pending: Vec<PendingName> = Vec::new();
        let mut queued: HashSet<String> = HashSet::new();

        for record in &records {
            let key = memo_key(record);
            if memo.contains_key(&key) || queued.contains(&key) {
                outcome.stats.cache_hits += 1;
                continue;
            }

            let category = record.raw.category.clone();
            if let Some(canonical) = self.lookup_similar(category.as_deref(), record.name()).await {
                outcome.stats.similarity_hits += 1;
                memo.insert(key, canonical);
                continue;
            }

            queued.insert(key.clone());
            pending.push(PendingName {
                memo_key: key,
                name: record.name().to_string(),
                category,
            });
        }

        tracing::info!(
            upload_id = %ctx.upload_id,
            records = records.len(),
            cache_hits = outcome.stats.cache_hits,
            similarity_hits = outcome.stats.similarity_hits,
            pending = pending.len(),
            "Standardization lookup finished"
        );

        self.resolve_pending(pending, &mut memo, &mut outcome, ctx).await;

        outcome.records = records
            .into_iter()
            .map(|validated| {
                let standardized_name = memo
                    .get(&memo_key(&validated))
                    .cloned()
                    .unwrap_or_else(|| local_canonical(validated.name()));
                let standardized_unit = standardize_unit(&validated.raw.unit);
                StandardizedProductRecord {
                    validated,
                    standardized_name,
                    standardized_unit,
                }
            })
            .collect();

        outcome
    }

    async fn resolve_pending(
        &self,
        pending: Vec<PendingName>,
        memo: &mut HashMap<String, String>,
        outcome: &mut StandardizationOutcome,
        ctx: &RunContext,
    ) {
        if pending.is_empty() {
            return;
        }

        let batch_size = self.config.batch_size.max(1);
        let total_batches = pending.len().div_ceil(batch_size);
        let mut ai_available = true;

        for (batch_index, batch) in pending.chunks(batch_size).enumerate() {
            if batch_index > 0 && ai_available && self.config.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }

            if ai_available && ctx.is_cancelled() {
                ai_available = false;
            }

            let resolved = if ai_available {
                outcome.stats.batches += 1;
                match self.standardize_batch(batch, ctx).await {
                    Ok(resolved) => resolved,
                    Err(error) => {
                        tracing::warn!(
                            upload_id = %ctx.upload_id,
                            batch = batch_index + 1,
                            error = %error,
                            "Standardization batch failed, using local normalization"
                        );
                        outcome
                            .errors
                            .push(error.to_run_error().at(format!("standardization batch {}", batch_index + 1)));
                        if error.stops_ai_work() {
                            ai_available = false;
                        }
                        HashMap::new()
                    }
                }
            } else {
                HashMap::new()
            };

            for (id, item) in batch.iter().enumerate() {
                let canonical = match resolved.get(&id) {
                    Some(name) => {
                        outcome.stats.ai_resolved += 1;
                        name.clone()
                    }
                    None => {
                        outcome.stats.naive_fallbacks += 1;
                        local_canonical(&item.name)
                    }
                };
                self.remember(item.category.as_deref(), &canonical).await;
                memo.insert(item.memo_key.clone(), canonical);
            }

            ctx.report(
                ProcessingStep::AiStandardizing,
                (batch_index + 1) as f64 / total_batches as f64,
                Some(json!({ "batch": batch_index + 1, "batches": total_batches })),
            )
            .await;
        }
    }

    /// One ID-indexed request. Returns the canonical names by batch-local id.
    async fn standardize_batch(&self, batch: &[PendingName], ctx: &RunContext) -> Result<HashMap<usize, String>, AiError> {
        let items: Vec<serde_json::Value> = batch
            .iter()
            .enumerate()
            .map(|(id, item)| json!({ "id": id, "name": item.name, "category": item.category }))
            .collect();

        let request = AiRequest::text(&self.model, STANDARDIZATION_PROMPT, json!({ "items": items }).to_string());
        let response = self.gateway.invoke(request, ctx, "standardization").await?;
        let results = decode_standardization(&response.raw_text)
            .map_err(|e| AiError::Fatal(format!("malformed standardization response: {}", e)))?;

        let mut resolved = HashMap::new();
        for item in results {
            if item.id >= batch.len() {
                tracing::debug!(id = item.id, "Ignoring standardization result with unknown id");
                continue;
            }
            let canonical = naive_normalize(&item.standardized_name);
            if !canonical.is_empty() {
                resolved.entry(item.id).or_insert(canonical);
            }
        }

        if resolved.len() < batch.len() {
            tracing::warn!(
                upload_id = %ctx.upload_id,
                expected = batch.len(),
                returned = resolved.len(),
                "Standardization response is missing ids, falling back locally for those"
            );
        }
        Ok(resolved)
    }

    async fn lookup_similar(&self, category: Option<&str>, name: &str) -> Option<String> {
        self.ensure_seeded(category).await;
        let threshold = self.config.threshold_for(category.unwrap_or_default());
        let shared = self.shared.read().await;
        shared
            .index
            .best_match(category, &naive_normalize(name), threshold)
            .map(|found| found.name)
    }

    /// Load stored names for the category's partition once per standardizer. A failed load is
    /// not retried; the partition fills from this process's own results instead.
    async fn ensure_seeded(&self, category: Option<&str>) {
        let partition = partition_key(category);
        if self.shared.read().await.seeded.contains(&partition) {
            return;
        }

        let mut shared = self.shared.write().await;
        if shared.seeded.contains(&partition) {
            return;
        }
        match self.store.known_product_names(category).await {
            Ok(names) => {
                for name in &names {
                    shared.index.insert(category, name);
                }
                tracing::debug!(category = ?category, names = names.len(), "Seeded similarity index");
            }
            Err(e) => {
                tracing::warn!(category = ?category, error = %e, "Could not seed similarity index");
            }
        }
        shared.seeded.insert(partition);
    }

    async fn remember(&self, category: Option<&str>, canonical: &str) {
        self.shared.write().await.index.insert(category, canonical);
    }
}

fn memo_key(record: &ValidatedProductRecord) -> String {
    format!(
        "{}|{}",
        record.name().trim().to_lowercase(),
        record.raw.category.as_deref().unwrap_or_default().to_lowercase()
    )
}

fn local_canonical(name: &str) -> String {
    let canonical = naive_normalize(name);
    if canonical.is_empty() {
        name.trim().to_lowercase()
    } else {
        canonical
    }
}

const STANDARDIZATION_PROMPT: &str = r#"
You standardize product names from supplier price lists so that the same product from different suppliers gets the same name.

For every input item produce a standardized name:
1. Translate to English
2. Use the singular form
3. Put the noun first, then qualifiers ("tomato red", "rice premium")
4. Remove brand names, package sizes and prices
5. Use lowercase

Input is {"items": [{"id": 0, "name": "...", "category": "..."}]}.
Return {"results": [{"id": 0, "standardized_name": "..."}]} with exactly one result per input id.

Return ONLY valid JSON, no additional text.
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use pricebook_database::{InMemoryProgressStore, InMemoryStore};
    use pricebook_models::{ProductUpsert, RawProductRecord, SourceLocation};

    use crate::ai_client::{AiClient, AiResponse, TokenUsage};
    use crate::cost::CostMonitor;
    use crate::progress::ProgressTracker;
    use crate::retry::{QuotaCooldown, RetryPolicy};

    type Responder = dyn Fn(&serde_json::Value) -> String + Send + Sync;

    /// Answers standardization requests from a closure over the request's `items` array.
    struct ScriptedAi {
        responder: Box<Responder>,
        calls: AtomicUsize,
    }

    impl ScriptedAi {
        fn new(responder: impl Fn(&serde_json::Value) -> String + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                responder: Box::new(responder),
                calls: AtomicUsize::new(0),
            })
        }

        fn echo() -> Arc<Self> {
            Self::new(|items| {
                let results: Vec<serde_json::Value> = items
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|item| json!({ "id": item["id"], "standardized_name": item["name"] }))
                    .collect();
                json!({ "results": results }).to_string()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AiClient for ScriptedAi {
        async fn invoke(&self, request: AiRequest) -> Result<AiResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body: serde_json::Value = serde_json::from_str(request.text.as_deref().unwrap_or("{}"))
                .map_err(|e| AiError::Fatal(e.to_string()))?;
            Ok(AiResponse {
                raw_text: (self.responder)(&body["items"]),
                usage: TokenUsage::default(),
            })
        }
    }

    fn standardizer(ai: Arc<ScriptedAi>, store: Arc<InMemoryStore>, batch_size: usize) -> ProductStandardizer {
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let gateway = AiGateway::new(ai, retry, Arc::new(QuotaCooldown::new(Duration::from_secs(60))));
        let config = StandardizationConfig {
            batch_size,
            batch_delay_ms: 0,
            ..StandardizationConfig::default()
        };
        ProductStandardizer::new(Arc::new(gateway), store, config, "test-model")
    }

    fn run_context() -> RunContext {
        let progress = ProgressTracker::new(Arc::new(InMemoryProgressStore::new()), Duration::from_secs(60));
        RunContext::new(
            Uuid::new_v4(),
            CancellationToken::new(),
            Arc::new(CostMonitor::new(HashMap::new(), None)),
            Arc::new(progress),
        )
    }

    fn names(outcome: &StandardizationOutcome) -> Vec<&str> {
        outcome.records.iter().map(|r| r.standardized_name.as_str()).collect()
    }

    fn validated(name: &str, category: Option<&str>) -> ValidatedProductRecord {
        ValidatedProductRecord::new(
            RawProductRecord::new(name, Some(1000.0), "Kilo", SourceLocation::sheet("S", 0))
                .with_category(category.map(str::to_string)),
        )
    }

    #[test]
    fn test_memo_key_is_case_insensitive_per_category() {
        assert_eq!(
            memo_key(&validated("Tomat Merah", Some("Sayur"))),
            memo_key(&validated("tomat merah ", Some("sayur")))
        );
        assert_ne!(
            memo_key(&validated("Tomat", Some("sayur"))),
            memo_key(&validated("Tomat", None))
        );
    }

    #[test]
    fn test_local_canonical_never_empty() {
        assert_eq!(local_canonical("Tomat"), "tomato");
        assert_eq!(local_canonical("!!!"), "!!!");
    }

    #[tokio::test]
    async fn test_omitted_id_falls_back_for_that_item_only() {
        let ai = ScriptedAi::new(|_| {
            json!({ "results": [
                { "id": 0, "standardized_name": "carrot baby" },
                { "id": 2, "standardized_name": "apple fuji" }
            ]})
            .to_string()
        });
        let standardizer = standardizer(ai.clone(), Arc::new(InMemoryStore::new()), 10);
        let records = vec![
            validated("Wortel Baby", Some("Sayur")),
            validated("Tomat", Some("Sayur")),
            validated("Apel Fuji", Some("Buah")),
        ];

        let outcome = standardizer.standardize(records, &run_context()).await;

        assert_eq!(names(&outcome), vec!["carrot baby", "tomato", "apple fuji"]);
        assert_eq!(outcome.stats.ai_resolved, 2);
        assert_eq!(outcome.stats.naive_fallbacks, 1);
        assert_eq!(outcome.stats.batches, 1);
        assert!(outcome.errors.is_empty());
        assert_eq!(ai.calls(), 1);
    }

    #[tokio::test]
    async fn test_pending_names_are_split_into_batches() {
        let ai = ScriptedAi::echo();
        let standardizer = standardizer(ai.clone(), Arc::new(InMemoryStore::new()), 2);
        let records = ["Wortel", "Tomat", "Kentang", "Jahe", "Cabai"]
            .iter()
            .map(|name| validated(name, Some("Sayur")))
            .collect();

        let outcome = standardizer.standardize(records, &run_context()).await;

        assert_eq!(outcome.stats.batches, 3);
        assert_eq!(outcome.stats.ai_resolved, 5);
        assert_eq!(ai.calls(), 3);
        assert_eq!(names(&outcome), vec!["carrot", "tomato", "potato", "ginger", "chili"]);
    }

    #[tokio::test]
    async fn test_repeated_names_hit_the_run_cache() {
        let ai = ScriptedAi::echo();
        let standardizer = standardizer(ai.clone(), Arc::new(InMemoryStore::new()), 10);
        let records = vec![
            validated("Tomat", Some("Sayur")),
            validated("TOMAT ", Some("sayur")),
            validated("Wortel", Some("Sayur")),
        ];

        let outcome = standardizer.standardize(records, &run_context()).await;

        assert_eq!(outcome.stats.cache_hits, 1);
        assert_eq!(outcome.stats.ai_resolved, 2);
        assert_eq!(ai.calls(), 1);
        assert_eq!(names(&outcome), vec!["tomato", "tomato", "carrot"]);
    }

    #[tokio::test]
    async fn test_stored_names_resolve_without_ai() {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_product(&ProductUpsert {
                standardized_name: "tomato".into(),
                standardized_unit: "kg".into(),
                display_name: "Tomato".into(),
                raw_name: "Tomat".into(),
                category: Some("Sayur".into()),
                unit_variant: "kilo".into(),
            })
            .await
            .unwrap();
        let ai = ScriptedAi::echo();
        let standardizer = standardizer(ai.clone(), store, 10);

        let outcome = standardizer
            .standardize(vec![validated("Tomat", Some("Sayur"))], &run_context())
            .await;

        assert_eq!(outcome.stats.similarity_hits, 1);
        assert_eq!(ai.calls(), 0);
        assert_eq!(names(&outcome), vec!["tomato"]);
    }

    #[tokio::test]
    async fn test_category_spellings_share_one_seed() {
        let store = Arc::new(InMemoryStore::new());
        let standardizer = standardizer(ScriptedAi::echo(), store.clone(), 10);
        let records = vec![
            validated("Wortel", Some("Sayur-Buah")),
            validated("Tomat", Some("sayur buah")),
            validated("Jahe", Some("SAYUR  BUAH")),
        ];

        standardizer.standardize(records, &run_context()).await;

        assert_eq!(store.name_lookups().await, 1);
    }

    #[tokio::test]
    async fn test_failed_seed_is_not_retried_per_record() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_name_lookups().await;
        let ai = ScriptedAi::echo();
        let standardizer = standardizer(ai.clone(), store.clone(), 10);
        let records = vec![
            validated("Wortel", Some("Sayur")),
            validated("Tomat", Some("Sayur")),
            validated("Kentang", Some("Sayur")),
        ];

        let outcome = standardizer.standardize(records, &run_context()).await;

        assert_eq!(store.name_lookups().await, 1);
        assert_eq!(outcome.stats.ai_resolved, 3);
        assert_eq!(names(&outcome), vec!["carrot", "tomato", "potato"]);
    }
}
