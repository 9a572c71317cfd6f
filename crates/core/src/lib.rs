//! Orchestration core for an autonomous social-media agent: two long-running
//! loops that answer replies and publish unprompted posts, with jittered
//! timing, dedup, a content-safety gate and templated composition.

pub mod compose;
pub mod config;
pub mod managers;
pub mod pipeline;
pub mod platform;
pub mod runtime;
pub mod store;
pub mod types;
