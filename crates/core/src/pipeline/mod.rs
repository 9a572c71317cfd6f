//! Per-event processing shared by both control loops.

mod dispatch;
mod error;
mod gate;
mod inbound;
mod outbound;

pub use dispatch::{POST_DISPATCH, PublishDispatcher, REPLY_DISPATCH};
pub use error::PipelineError;
pub use gate::GuardrailGate;
pub use inbound::{BatchReport, EventOutcome, InboundPipeline, InboundSettings};
pub use outbound::OutboundPipeline;
