//! End-to-end runs of `process_file` against the in-memory store and scripted AI.

mod common;

use serde_json::json;
use std::time::Duration;

use common::*;
use pricebook_models::{ErrorKind, ProgressStatus, RunStatus};
use pricebook_price_processing::AiError;
use pricebook_utils::PricebookError;

#[tokio::test]
async fn test_csv_scenario_saves_two_products() {
    let harness = Harness::new(test_config(), ScriptedAi::echo());
    let upload_id = harness.upload("prices.csv", Some("text/csv"), SCENARIO_CSV).await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.metrics.extracted_products, 2);
    assert_eq!(report.metrics.saved_products, 2);
    assert_eq!(report.metrics.detected_rows, 2);
    assert_eq!(report.metrics.completeness, 1.0);
    assert!(!report.metrics.fallback_used);
    assert!(report.metrics.errors.is_empty());
    assert_eq!(report.metrics.supplier_name.as_deref(), Some("prices"));
    assert!(report.metrics.content_sha256.is_some());

    let names: Vec<String> = harness
        .store
        .products()
        .await
        .into_iter()
        .map(|p| p.standardized_name)
        .collect();
    assert_eq!(names, vec!["onion".to_string(), "tomato".to_string()]);
    assert_eq!(harness.active_prices().await, 2);

    let upload = harness.upload_record(upload_id).await;
    assert_eq!(upload.status, RunStatus::Completed);
    assert!(upload.supplier_id.is_some());

    let progress = harness.pipeline.get_progress(upload_id).await.unwrap();
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.progress, 100);
}

#[tokio::test]
async fn test_duplicate_rows_consolidate_to_cheapest() {
    let harness = Harness::new(test_config(), ScriptedAi::echo());
    let csv = b"Name,Price,Unit\ntomato red,6000,kg\nTomato Red,5500,kg\n";
    let upload_id = harness.upload("segar.csv", None, csv).await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(report.metrics.extracted_products, 2);
    assert_eq!(report.metrics.consolidated_products, 1);
    let prices = harness.store.prices().await;
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].amount, 5500.0);
}

#[tokio::test]
async fn test_reprocessing_identical_content_is_idempotent() {
    let harness = Harness::new(test_config(), ScriptedAi::echo());
    let upload_id = harness.upload("prices.csv", None, SCENARIO_CSV).await;

    let first = harness.pipeline.process_file(upload_id).await.unwrap();
    let second = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.metrics.saved_products, 2);
    assert_eq!(second.metrics.unchanged_prices, 2);
    assert_eq!(first.metrics.content_sha256, second.metrics.content_sha256);
    assert_eq!(harness.store.prices().await.len(), 2);
    assert_eq!(harness.active_prices().await, 2);
}

#[tokio::test]
async fn test_quota_on_page_three_keeps_first_two_pages() {
    let ai = ScriptedAi::new(|request| {
        if let Some(page) = vision_page(request) {
            if page == 3 {
                return Err(AiError::QuotaExhausted("insufficient_quota".to_string()));
            }
            let (first, second) = [("Cabbage", "Carrot"), ("Potato", "Spinach")][page - 1];
            return Ok(json!({
                "supplier": "CV Tani Makmur",
                "products": [
                    { "name": first, "price": 8000, "unit": "kg" },
                    { "name": second, "price": "Rp 9.000", "unit": "kg" }
                ]
            })
            .to_string());
        }
        Ok(echo_standardization(request).unwrap_or_default())
    });
    let harness = Harness::with_pages(test_config(), ai, 5);
    let upload_id = harness.upload("list.pdf", Some("application/pdf"), b"%PDF-1.4").await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.metrics.extracted_products, 4);
    assert_eq!(report.metrics.saved_products, 4);
    assert_eq!(report.metrics.skipped_pages, vec![3, 4, 5]);
    assert!(report.metrics.quota_exhausted());
    assert!(report
        .metrics
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::QuotaExhausted && e.location.as_deref() == Some("page 3")));
    assert_eq!(report.metrics.supplier_name.as_deref(), Some("CV Tani Makmur"));
    // page 4 and 5 are never sent, and standardization is skipped during the cooldown
    assert_eq!(harness.ai.vision_calls(), 3);
    assert_eq!(harness.ai.call_count(), 3);
}

#[tokio::test]
async fn test_page_cap_reports_coverage_gap() {
    let ai = ScriptedAi::new(|request| match vision_page(request) {
        Some(page) => {
            let names = [["Rice", "Sugar", "Salt"], ["Flour", "Coffee", "Garlic"]][page - 1];
            Ok(json!({ "products": [
                { "name": names[0], "price": 12000, "unit": "kg" },
                { "name": names[1], "price": 15000, "unit": "kg" },
                { "name": names[2], "price": 5000, "unit": "kg" }
            ]})
            .to_string())
        }
        None => Ok(echo_standardization(request).unwrap_or_default()),
    });
    let mut config = test_config();
    config.extraction.max_pages = 2;
    let harness = Harness::with_pages(config, ai, 4);
    let upload_id = harness.upload("catalogue.pdf", None, b"%PDF-1.4").await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.metrics.saved_products, 6);
    assert_eq!(report.metrics.skipped_pages, vec![3, 4]);
    assert_eq!(report.metrics.detected_rows, 4);
    assert_eq!(report.metrics.processed_rows, 2);
    assert_eq!(harness.ai.vision_calls(), 2);
}

#[tokio::test]
async fn test_fallback_replaces_sparse_structural_result() {
    let ai = ScriptedAi::new(|request| {
        if let Some(standardized) = echo_standardization(request) {
            return Ok(standardized);
        }
        Ok(json!({ "products": [
            { "name": "Tomato", "price": 5000, "unit": "kg" },
            { "name": "Onion", "price": 3000, "unit": "kg" },
            { "name": "Carrot", "price": 4000, "unit": "kg" },
            { "name": "Potato", "price": 2000, "unit": "kg" }
        ]})
        .to_string())
    });
    let harness = Harness::new(test_config(), ai);
    let csv = b"Name,Price\nTomato,5000\nOnion,tiga ribu\nCarrot,empat ribu\nPotato,dua ribu\n";
    let upload_id = harness.upload("sparse.csv", None, csv).await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert!(report.metrics.fallback_used);
    assert_eq!(report.metrics.extraction_method.as_deref(), Some("tabular+fallback"));
    assert_eq!(report.metrics.saved_products, 4);
    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.metrics.completeness <= 1.0);
}

#[tokio::test]
async fn test_oversized_document_is_too_large() {
    let mut config = test_config();
    config.pipeline.max_tabular_bytes = 16;
    let harness = Harness::new(config, ScriptedAi::echo());
    let upload_id = harness.upload("prices.csv", None, SCENARIO_CSV).await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(report.status, RunStatus::TooLarge);
    assert_eq!(report.metrics.extracted_products, 0);
    assert_eq!(harness.ai.call_count(), 0);
    assert_eq!(harness.upload_record(upload_id).await.status, RunStatus::TooLarge);
    let progress = harness.pipeline.get_progress(upload_id).await.unwrap();
    assert_eq!(progress.status, ProgressStatus::Failed);
}

#[tokio::test]
async fn test_unsupported_document_fails_with_structural_error() {
    let harness = Harness::new(test_config(), ScriptedAi::echo());
    let upload_id = harness.upload("notes.docx", None, b"PK\x03\x04").await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.metrics.errors.len(), 1);
    assert_eq!(report.metrics.errors[0].kind, ErrorKind::Structural);
}

#[tokio::test]
async fn test_persistence_failure_on_one_product_keeps_the_rest() {
    let harness = Harness::new(test_config(), ScriptedAi::echo());
    harness.store.fail_product("onion").await;
    let upload_id = harness.upload("prices.csv", None, SCENARIO_CSV).await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert_eq!(report.metrics.saved_products, 1);
    let persistence: Vec<_> = report
        .metrics
        .errors
        .iter()
        .filter(|e| e.kind == ErrorKind::Persistence)
        .collect();
    assert_eq!(persistence.len(), 1);
    assert_eq!(persistence[0].location.as_deref(), Some("onion (kg)"));
}

#[tokio::test]
async fn test_review_flow_approve_commits_staged_groups() {
    let mut config = test_config();
    config.pipeline.auto_approve = false;
    let harness = Harness::new(config, ScriptedAi::echo());
    let upload_id = harness.upload("prices.csv", None, SCENARIO_CSV).await;

    let staged = harness.pipeline.process_file(upload_id).await.unwrap();
    assert_eq!(staged.status, RunStatus::PendingReview);
    assert!(harness.store.prices().await.is_empty());
    assert_eq!(harness.upload_record(upload_id).await.staged_groups.map(|g| g.len()), Some(2));

    let reprocess = harness.pipeline.process_file(upload_id).await;
    assert!(matches!(reprocess, Err(PricebookError::Conflict { .. })));

    let approved = harness.pipeline.approve_upload(upload_id).await.unwrap();
    assert_eq!(approved.status, RunStatus::Completed);
    assert_eq!(approved.metrics.saved_products, 2);
    assert_eq!(harness.active_prices().await, 2);

    let again = harness.pipeline.approve_upload(upload_id).await;
    assert!(matches!(again, Err(PricebookError::Conflict { .. })));
}

#[tokio::test]
async fn test_review_flow_reject_discards_staging() {
    let mut config = test_config();
    config.pipeline.auto_approve = false;
    let harness = Harness::new(config, ScriptedAi::echo());
    let upload_id = harness.upload("prices.csv", None, SCENARIO_CSV).await;

    harness.pipeline.process_file(upload_id).await.unwrap();
    let rejected = harness.pipeline.reject_upload(upload_id).await.unwrap();

    assert_eq!(rejected.status, RunStatus::Rejected);
    let upload = harness.upload_record(upload_id).await;
    assert_eq!(upload.status, RunStatus::Rejected);
    assert!(upload.staged_groups.is_none());
    assert!(harness.store.prices().await.is_empty());
    assert!(matches!(
        harness.pipeline.approve_upload(upload_id).await,
        Err(PricebookError::Conflict { .. })
    ));
}

#[tokio::test]
async fn test_cancellation_stops_at_stage_boundary() {
    let fetcher = MemoryFetcher::with_delay(Duration::from_millis(200));
    let harness = Harness::build(test_config(), ScriptedAi::echo(), 1, fetcher);
    let upload_id = harness.upload("prices.csv", None, SCENARIO_CSV).await;

    let pipeline = harness.pipeline.clone();
    let run = tokio::spawn(async move { pipeline.process_file(upload_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.pipeline.cancel(upload_id).await);

    let outcome = run.await.unwrap();
    assert!(matches!(outcome, Err(PricebookError::Cancelled { .. })));
    assert_eq!(harness.upload_record(upload_id).await.status, RunStatus::Failed);
    assert_eq!(harness.ai.call_count(), 0);
    assert!(!harness.pipeline.cancel(upload_id).await);
}

#[tokio::test]
async fn test_cost_is_recorded_on_the_upload() {
    let harness = Harness::new(test_config(), ScriptedAi::echo());
    let upload_id = harness.upload("prices.csv", None, SCENARIO_CSV).await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();
    assert_eq!(report.metrics.prompt_tokens, 1_000);
    assert_eq!(report.metrics.completion_tokens, 200);
    assert!(report.metrics.cost_usd > 0.0);

    let summary = harness.pipeline.cost_summary(upload_id).await.unwrap();
    assert_eq!(summary.total.prompt_tokens, 1_000);
    assert!((summary.total.cost_usd - report.metrics.cost_usd).abs() < 1e-12);
}

#[tokio::test]
async fn test_exhausted_budget_falls_back_to_local_normalization() {
    let mut config = test_config();
    config.ai.budget_usd = Some(0.0);
    let harness = Harness::new(config, ScriptedAi::echo());
    let csv = b"Name,Price,Unit\nTomat,5000,kg\nBawang,3000,kg\nKentang,2000,kg\n";
    let upload_id = harness.upload("pasar.csv", None, csv).await;

    let report = harness.pipeline.process_file(upload_id).await.unwrap();

    assert_eq!(harness.ai.call_count(), 0);
    assert_eq!(report.metrics.saved_products, 3);
    assert_eq!(report.status, RunStatus::CompletedWithErrors);
    assert!(report
        .metrics
        .errors
        .iter()
        .any(|e| e.location.as_deref() == Some("standardization batch 1")));
    let names: Vec<String> = harness.store.products().await.into_iter().map(|p| p.standardized_name).collect();
    assert!(names.contains(&"potato".to_string()));
}
