//! Host side of a talking-avatar session: configuration, microphone capture
//! and the orchestrator that keeps the avatar and the voice agent in step.

pub mod capture;
pub mod config;
pub mod session;
