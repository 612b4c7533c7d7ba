//! Avatar rendering channel: one metered rendering session fed with PCM16 audio.

pub mod channel;
pub mod client;
pub mod sink;
pub mod ws;

pub use channel::AvatarChannel;
pub use client::{AvatarClient, AvatarClientEvent, AvatarClientFactory, AvatarConfig, AvatarError};
pub use sink::{FileSink, MediaSink, NullSink, SharedSink};
pub use ws::{WsAvatarClient, WsAvatarClientFactory};
