//! Cost Monitor
//!
//! Accumulates token usage and USD cost per model and per operation for one run. It never
//! affects extraction results; the pipeline only consults it to stop AI work once a configured
//! budget has been spent.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use pricebook_utils::ModelPricing;

use crate::ai_client::TokenUsage;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    fn add(&mut self, usage: TokenUsage, cost: f64) {
        self.calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.cost_usd += cost;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostSummary {
    pub total: UsageTotals,
    pub by_model: BTreeMap<String, UsageTotals>,
    pub by_operation: BTreeMap<String, UsageTotals>,
    pub budget_usd: Option<f64>,
}

pub struct CostMonitor {
    pricing: HashMap<String, ModelPricing>,
    budget_usd: Option<f64>,
    summary: Mutex<CostSummary>,
}

impl CostMonitor {
    pub fn new(pricing: HashMap<String, ModelPricing>, budget_usd: Option<f64>) -> Self {
        Self {
            pricing,
            budget_usd,
            summary: Mutex::new(CostSummary {
                budget_usd,
                ..CostSummary::default()
            }),
        }
    }

    /// Price of `usage` on `model`; unknown models cost nothing.
    pub fn cost_of(&self, model: &str, usage: TokenUsage) -> f64 {
        match self.pricing.get(model) {
            Some(p) => {
                (usage.prompt_tokens as f64 * p.prompt_per_million
                    + usage.completion_tokens as f64 * p.completion_per_million)
                    / 1_000_000.0
            }
            None => {
                tracing::debug!(model, "No pricing configured for model");
                0.0
            }
        }
    }

    /// Record one call and return its cost.
    pub fn record(&self, model: &str, operation: &str, usage: TokenUsage) -> f64 {
        let cost = self.cost_of(model, usage);
        if let Ok(mut summary) = self.summary.lock() {
            summary.total.add(usage, cost);
            summary.by_model.entry(model.to_string()).or_default().add(usage, cost);
            summary.by_operation.entry(operation.to_string()).or_default().add(usage, cost);
        }
        cost
    }

    pub fn total_cost(&self) -> f64 {
        self.summary.lock().map(|s| s.total.cost_usd).unwrap_or_default()
    }

    pub fn budget_exceeded(&self) -> bool {
        self.budget_usd.map_or(false, |budget| self.total_cost() >= budget)
    }

    pub fn summary(&self) -> CostSummary {
        self.summary.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(budget: Option<f64>) -> CostMonitor {
        let mut pricing = HashMap::new();
        pricing.insert(
            "gpt-4o-mini".to_string(),
            ModelPricing {
                prompt_per_million: 0.15,
                completion_per_million: 0.60,
            },
        );
        CostMonitor::new(pricing, budget)
    }

    #[test]
    fn test_cost_accumulates_per_model_and_operation() {
        let monitor = monitor(None);
        let usage = TokenUsage {
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
        };
        let cost = monitor.record("gpt-4o-mini", "standardization", usage);
        assert!((cost - 0.45).abs() < 1e-9);

        monitor.record("unknown-model", "vision", usage);
        let summary = monitor.summary();
        assert_eq!(summary.total.calls, 2);
        assert_eq!(summary.by_operation["vision"].cost_usd, 0.0);
        assert_eq!(summary.by_model["gpt-4o-mini"].prompt_tokens, 1_000_000);
    }

    #[test]
    fn test_budget_gate() {
        let monitor = monitor(Some(0.10));
        assert!(!monitor.budget_exceeded());
        monitor.record(
            "gpt-4o-mini",
            "fallback",
            TokenUsage {
                prompt_tokens: 1_000_000,
                completion_tokens: 0,
            },
        );
        assert!(monitor.budget_exceeded());
    }
}
