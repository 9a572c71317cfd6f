use std::sync::Arc;

use super::PipelineError;
use crate::managers::guardrails::GUARDRAILS_RESULT;
use crate::managers::{Engine, ManagerFilter, ManagerId, ProcessOptions};
use crate::types::{ConversationState, ModerationVerdict, ViolationCode};

const GUARDRAILS_ONLY: ProcessOptions = ProcessOptions {
    filter: ManagerFilter::Only(&[ManagerId::Guardrails]),
    store: false,
};

/// Runs the guardrails manager on a copy of the state and turns its
/// verdict into allow or deny.
pub struct GuardrailGate {
    engine: Arc<Engine>,
}

impl GuardrailGate {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn check(&self, state: &ConversationState) -> Result<(), PipelineError> {
        let mut scratch = state.clone();
        self.engine.process(&mut scratch, GUARDRAILS_ONLY).await?;

        let value = scratch
            .manager_data(GUARDRAILS_RESULT)
            .ok_or(PipelineError::GuardrailVerdictMissing)?;
        let verdict: ModerationVerdict =
            serde_json::from_value(value.clone()).map_err(|_| PipelineError::GuardrailVerdictMissing)?;

        if verdict.allowed {
            return Ok(());
        }
        if verdict.reasons.contains(&ViolationCode::Unclassified) {
            tracing::warn!(reasons = ?verdict.reasons, "moderation returned codes outside the policy");
        }
        Err(PipelineError::GuardrailDenied { reasons: verdict.reasons })
    }
}
