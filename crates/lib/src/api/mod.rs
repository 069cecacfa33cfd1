//! Webhook API: wire types, client traits, and the reqwest-backed client.
//!
//! Views and flows depend on the [`CatalogApi`], [`ChatApi`] and [`HistoryApi`] traits, so they
//! can be exercised against fakes; [`ApiClient`] implements all three over HTTP.

mod client;
mod types;

pub use client::{ApiClient, ApiError, CatalogApi, ChatApi, HistoryApi};
pub use types::{
    id_string, sort_tabs, Agent, AgentDetail, ChatHistory, ChatHistoryEntry, CreatedChat,
    HistoryBucket, Message, NewChat, OutgoingMessage, Role, Tab,
};
