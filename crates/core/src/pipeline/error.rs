use crate::compose::ComposeError;
use crate::managers::EngineError;
use crate::platform::PlatformError;
use crate::store::StoreError;
use crate::types::ViolationCode;
use hana_llm::provider::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] PlatformError),
    #[error("fragment already exists for event {0}")]
    FragmentExists(String),
    #[error("guardrails denied the input: {}", join_codes(reasons))]
    GuardrailDenied { reasons: Vec<ViolationCode> },
    #[error("guardrails produced no verdict")]
    GuardrailVerdictMissing,
    #[error("no answer found in model output")]
    NoAnswerFound,
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("cancelled")]
    Cancelled,
}

fn join_codes(codes: &[ViolationCode]) -> String {
    codes.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(", ")
}

impl PipelineError {
    /// True for events that were already handled; not a real failure.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::FragmentExists(_))
    }
}

impl From<ComposeError> for PipelineError {
    fn from(e: ComposeError) -> Self {
        match e {
            ComposeError::Llm(e) => Self::Llm(e),
            ComposeError::NoAnswerFound => Self::NoAnswerFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fragment_exists_is_a_duplicate() {
        assert!(PipelineError::FragmentExists("1".into()).is_duplicate());
        assert!(!PipelineError::NoAnswerFound.is_duplicate());
        assert!(!PipelineError::GuardrailDenied { reasons: vec![] }.is_duplicate());
    }

    #[test]
    fn denial_lists_reasons() {
        let e = PipelineError::GuardrailDenied {
            reasons: vec![ViolationCode::ShillOtherCa, ViolationCode::Hinting],
        };
        assert_eq!(e.to_string(), "guardrails denied the input: SHILL_OTHER_CA, HINTING");
    }

    #[test]
    fn compose_errors_map_to_pipeline_classes() {
        assert!(matches!(PipelineError::from(ComposeError::NoAnswerFound), PipelineError::NoAnswerFound));
        assert!(matches!(
            PipelineError::from(ComposeError::Llm(LlmError::RateLimited)),
            PipelineError::Llm(LlmError::RateLimited)
        ));
    }
}
