//! Property-based tests for the Pricebook domain models
//! 
//! Invariants of price versioning and progress tracking that must hold for any
//! sequence of observations.

use chrono::{Duration, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use crate::{
    PriceLedger, PriceObservation, ProcessingStep, UploadProgress, ChangeReason,
};

fn observation(product_id: Uuid, supplier_id: Uuid, amount: u32) -> PriceObservation {
    PriceObservation {
        product_id,
        supplier_id,
        upload_id: Some(Uuid::new_v4()),
        amount: amount as f64,
        unit: "kg".to_string(),
    }
}

fn arb_step() -> impl Strategy<Value = ProcessingStep> {
    prop_oneof![
        Just(ProcessingStep::Queued),
        Just(ProcessingStep::Uploading),
        Just(ProcessingStep::Extracting),
        Just(ProcessingStep::AiStandardizing),
        Just(ProcessingStep::Saving),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// N distinct consecutive observations give N history rows and exactly one active price.
    #[test]
    fn prop_versioning_invariant(amounts in prop::collection::vec(1u32..1_000_000, 1..20)) {
        let product = Uuid::new_v4();
        let supplier = Uuid::new_v4();
        let mut ledger = PriceLedger::new();
        let start = Utc::now();

        let mut distinct = 0usize;
        let mut last: Option<u32> = None;
        for (i, amount) in amounts.iter().enumerate() {
            if last != Some(*amount) {
                distinct += 1;
            }
            last = Some(*amount);
            ledger.observe(&observation(product, supplier, *amount), start + Duration::seconds(i as i64));
        }

        let history = ledger.history_for(product, supplier);
        prop_assert_eq!(history.len(), distinct);
        prop_assert_eq!(ledger.active_prices(product, supplier).len(), 1);
        prop_assert_eq!(history[0].change_reason, ChangeReason::Initial);
        prop_assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    /// Re-observing the active price never writes anything.
    #[test]
    fn prop_duplicate_observation_is_noop(amount in 1u32..1_000_000, repeats in 1usize..5) {
        let product = Uuid::new_v4();
        let supplier = Uuid::new_v4();
        let mut ledger = PriceLedger::new();
        ledger.observe(&observation(product, supplier, amount), Utc::now());

        for _ in 0..repeats {
            let transition = ledger.observe(&observation(product, supplier, amount), Utc::now());
            prop_assert!(transition.is_unchanged());
        }
        prop_assert_eq!(ledger.prices.len(), 1);
        prop_assert_eq!(ledger.history.len(), 1);
    }

    /// Reported progress is monotonic non-decreasing whatever order stages report in.
    #[test]
    fn prop_progress_is_monotonic(reports in prop::collection::vec((arb_step(), 0u8..=100), 1..30)) {
        let mut progress = UploadProgress::new(Uuid::new_v4());
        let mut seen = 0u8;
        for (step, value) in reports {
            progress.advance(step, value, None);
            prop_assert!(progress.progress >= seen);
            seen = progress.progress;
        }
    }
}
