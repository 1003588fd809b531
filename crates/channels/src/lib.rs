//! Channel adapters and the manager that runs them.
//!
//! Adapters are registered by plugins and looked up through a
//! [`ChannelDirectory`]. The [`ChannelManager`] starts each configured channel
//! independently, gates inbound senders against `allowFrom`, and forwards
//! accepted messages to an [`AgentInbox`].

pub mod adapter;
pub mod error;
pub mod gating;
pub mod loopback;
pub mod manager;
pub mod types;

pub use {
    adapter::{ChannelAdapter, ChannelDirectory, InboundSink},
    error::{Error, Result},
    gating::is_sender_allowed,
    loopback::LoopbackAdapter,
    manager::{AgentInbox, ChannelFailure, ChannelManager, ChannelStatus, StartReport},
    types::{ChannelMessage, ChannelReply},
};
