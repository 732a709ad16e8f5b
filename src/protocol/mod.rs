//! Protocol module - captured events, outbound messages and cross-test data
//!
//! The engine never touches sockets. Protocol listeners push normalized
//! [`MsgEvent`]s, trigger states hand [`Message`]s to a [`MessageInvoker`],
//! and captured data is shared across runs through a [`TestDataStore`].

pub mod message;
pub mod models;
pub mod scripted;
pub mod store;

// Re-export key types
pub use message::{Message, MessageInvoker, SentMessage};
pub use models::{Content, ContentFormat, Headers, MsgEvent, Protocol};
pub use scripted::{NoopInvoker, ScriptedInvoker};
pub use store::{InMemoryTestStore, TestDataStore};
