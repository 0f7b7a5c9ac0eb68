//! AI Gateway
//!
//! The single path every AI call takes: budget and cooldown gates, the retry wrapper, cooldown
//! tripping on quota exhaustion, and cost metering.

use std::sync::Arc;

use crate::ai_client::{AiClient, AiError, AiRequest, AiResponse};
use crate::context::RunContext;
use crate::retry::{QuotaCooldown, RetryPolicy};

pub struct AiGateway {
    client: Arc<dyn AiClient>,
    retry: RetryPolicy,
    cooldown: Arc<QuotaCooldown>,
}

impl AiGateway {
    pub fn new(client: Arc<dyn AiClient>, retry: RetryPolicy, cooldown: Arc<QuotaCooldown>) -> Self {
        Self { client, retry, cooldown }
    }

    /// Whether AI work may be scheduled for the run right now.
    pub fn check_available(&self, ctx: &RunContext) -> Result<(), AiError> {
        if let Some(left) = self.cooldown.remaining() {
            return Err(AiError::QuotaExhausted(format!(
                "AI paused for another {}s after quota exhaustion",
                left.as_secs()
            )));
        }
        if ctx.cost.budget_exceeded() {
            return Err(AiError::BudgetExceeded(format!(
                "run spent ${:.4}, AI work skipped",
                ctx.cost.total_cost()
            )));
        }
        Ok(())
    }

    pub async fn invoke(&self, request: AiRequest, ctx: &RunContext, operation: &str) -> Result<AiResponse, AiError> {
        self.check_available(ctx)?;

        let client = &self.client;
        let result = self
            .retry
            .run(operation, || {
                let request = request.clone();
                async move { client.invoke(request).await }
            })
            .await;

        match result {
            Ok(response) => {
                let cost = ctx.cost.record(&request.model, operation, response.usage);
                tracing::debug!(
                    upload_id = %ctx.upload_id,
                    operation,
                    model = %request.model,
                    cost_usd = cost,
                    "AI call metered"
                );
                Ok(response)
            }
            Err(error) => {
                if matches!(error, AiError::QuotaExhausted(_)) {
                    self.cooldown.trip();
                }
                Err(error)
            }
        }
    }
}
