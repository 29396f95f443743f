//! Durable state: one actor owning a [`taskstore::Store`] per collection,
//! reached through a command channel so every mutation (including the
//! optimistic-concurrency check on task updates) is serialized.

mod manager;
mod messages;

pub use manager::StateManager;
pub use messages::{JobFilter, StateCommand, StateError, StateResponse, TaskFilter};
