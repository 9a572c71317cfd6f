pub mod interval;
mod orchestrator;
mod post_loop;
mod reply_loop;
mod shutdown;

pub use interval::{IntervalScheduler, IntervalWindow, InvalidWindow, Wake};
pub use orchestrator::{BuildError, Orchestrator, OrchestratorBuilder};
pub use post_loop::PostLoop;
pub use reply_loop::ReplyLoop;
pub use shutdown::ShutdownGuard;
