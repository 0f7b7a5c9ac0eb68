//! Price versioning models.
//!
//! Each `(product, supplier)` pair has at most one active [`Price`] (one with no `valid_to`).
//! Every change appends a [`PriceHistory`] entry; history is never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Amounts closer than this are the same price.
const AMOUNT_EPSILON: f64 = 0.005;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Price {
    pub id: Uuid,
    pub product_id: Uuid,
    pub supplier_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub amount: f64,
    pub unit: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Price {
    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }

    /// Same amount and unit as the observation.
    pub fn matches(&self, observation: &PriceObservation) -> bool {
        (self.amount - observation.amount).abs() < AMOUNT_EPSILON
            && self.unit.trim().eq_ignore_ascii_case(observation.unit.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// First price ever seen for the pair.
    Initial,
    /// Replaces an active price from an ingested upload.
    Api,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initial" => Some(Self::Initial),
            "api" => Some(Self::Api),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub id: Uuid,
    pub product_id: Uuid,
    pub supplier_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub price: f64,
    pub unit: String,
    pub changed_from: Option<f64>,
    pub change_percentage: Option<f64>,
    pub change_reason: ChangeReason,
    pub created_at: DateTime<Utc>,
}

/// A freshly consolidated price to be versioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub product_id: Uuid,
    pub supplier_id: Uuid,
    pub upload_id: Option<Uuid>,
    pub amount: f64,
    pub unit: String,
}

/// What has to happen to the store for one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceTransition {
    /// An identical active price exists; nothing is written.
    Unchanged { active_price_id: Uuid },
    /// Expire `deactivate`, append `history`, insert `insert` as the new active price.
    Changed {
        deactivate: Vec<Uuid>,
        history: Vec<PriceHistory>,
        insert: Price,
    },
}

impl PriceTransition {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged { .. })
    }
}

/// Percentage change from `old` to `new`, rounded to two decimals. Zero when `old` is zero.
pub fn change_percentage(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        return 0.0;
    }
    (((new - old) / old) * 100.0 * 100.0).round() / 100.0
}

/// Plan the transition for `observation` given the currently active prices of its pair.
pub fn plan_price_transition(
    active: &[Price],
    observation: &PriceObservation,
    now: DateTime<Utc>,
) -> PriceTransition {
    if let Some(same) = active.iter().find(|p| p.matches(observation)) {
        return PriceTransition::Unchanged {
            active_price_id: same.id,
        };
    }

    let history_entry = |changed_from: Option<f64>, reason: ChangeReason| PriceHistory {
        id: Uuid::new_v4(),
        product_id: observation.product_id,
        supplier_id: observation.supplier_id,
        upload_id: observation.upload_id,
        price: observation.amount,
        unit: observation.unit.clone(),
        changed_from,
        change_percentage: changed_from.map(|old| change_percentage(old, observation.amount)),
        change_reason: reason,
        created_at: now,
    };

    let history = if active.is_empty() {
        vec![history_entry(None, ChangeReason::Initial)]
    } else {
        active
            .iter()
            .map(|old| history_entry(Some(old.amount), ChangeReason::Api))
            .collect()
    };

    PriceTransition::Changed {
        deactivate: active.iter().map(|p| p.id).collect(),
        history,
        insert: Price {
            id: Uuid::new_v4(),
            product_id: observation.product_id,
            supplier_id: observation.supplier_id,
            upload_id: observation.upload_id,
            amount: observation.amount,
            unit: observation.unit.clone(),
            valid_from: now,
            valid_to: None,
        },
    }
}

/// In-memory price table and history, applying transitions the same way the database does.
#[derive(Debug, Clone, Default)]
pub struct PriceLedger {
    pub prices: Vec<Price>,
    pub history: Vec<PriceHistory>,
}

impl PriceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_prices(&self, product_id: Uuid, supplier_id: Uuid) -> Vec<Price> {
        self.prices
            .iter()
            .filter(|p| p.product_id == product_id && p.supplier_id == supplier_id && p.is_active())
            .cloned()
            .collect()
    }

    pub fn history_for(&self, product_id: Uuid, supplier_id: Uuid) -> Vec<PriceHistory> {
        self.history
            .iter()
            .filter(|h| h.product_id == product_id && h.supplier_id == supplier_id)
            .cloned()
            .collect()
    }

    pub fn observe(&mut self, observation: &PriceObservation, now: DateTime<Utc>) -> PriceTransition {
        let active = self.active_prices(observation.product_id, observation.supplier_id);
        let transition = plan_price_transition(&active, observation, now);
        self.apply(&transition, now);
        transition
    }

    pub fn apply(&mut self, transition: &PriceTransition, now: DateTime<Utc>) {
        if let PriceTransition::Changed {
            deactivate,
            history,
            insert,
        } = transition
        {
            for price in self.prices.iter_mut().filter(|p| deactivate.contains(&p.id)) {
                price.valid_to = Some(now);
            }
            self.history.extend(history.iter().cloned());
            self.prices.push(insert.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(product_id: Uuid, supplier_id: Uuid, amount: f64) -> PriceObservation {
        PriceObservation {
            product_id,
            supplier_id,
            upload_id: None,
            amount,
            unit: "kg".to_string(),
        }
    }

    #[test]
    fn test_first_observation_is_initial() {
        let obs = observation(Uuid::new_v4(), Uuid::new_v4(), 5000.0);
        match plan_price_transition(&[], &obs, Utc::now()) {
            PriceTransition::Changed { deactivate, history, insert } => {
                assert!(deactivate.is_empty());
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].change_reason, ChangeReason::Initial);
                assert_eq!(history[0].changed_from, None);
                assert!(insert.is_active());
            }
            other => panic!("unexpected transition: {:?}", other),
        }
    }

    #[test]
    fn test_identical_price_is_suppressed() {
        let mut ledger = PriceLedger::new();
        let obs = observation(Uuid::new_v4(), Uuid::new_v4(), 5000.0);
        ledger.observe(&obs, Utc::now());

        let second = ledger.observe(&obs, Utc::now());
        assert!(second.is_unchanged());
        assert_eq!(ledger.prices.len(), 1);
        assert_eq!(ledger.history.len(), 1);
    }

    #[test]
    fn test_changed_price_records_delta() {
        let mut ledger = PriceLedger::new();
        let product = Uuid::new_v4();
        let supplier = Uuid::new_v4();
        ledger.observe(&observation(product, supplier, 5000.0), Utc::now());
        ledger.observe(&observation(product, supplier, 5500.0), Utc::now());

        let history = ledger.history_for(product, supplier);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].change_reason, ChangeReason::Api);
        assert_eq!(history[1].changed_from, Some(5000.0));
        assert_eq!(history[1].change_percentage, Some(10.0));
        assert_eq!(ledger.active_prices(product, supplier).len(), 1);
    }

    #[test]
    fn test_unit_change_is_a_new_version() {
        let mut ledger = PriceLedger::new();
        let product = Uuid::new_v4();
        let supplier = Uuid::new_v4();
        ledger.observe(&observation(product, supplier, 5000.0), Utc::now());

        let mut per_pack = observation(product, supplier, 5000.0);
        per_pack.unit = "pack".to_string();
        assert!(!ledger.observe(&per_pack, Utc::now()).is_unchanged());
    }

    #[test]
    fn test_change_percentage_from_zero() {
        assert_eq!(change_percentage(0.0, 100.0), 0.0);
        assert_eq!(change_percentage(200.0, 150.0), -25.0);
    }
}
