//! taskstore - generic persistent state management
//!
//! A small, collection-oriented store used by `orchd` to persist jobs,
//! tasks, task events, and memory records. Every record type implements
//! [`Record`]; the store is generic over it rather than hard-coding any
//! particular schema.
//!
//! # Durability model
//!
//! Each collection is backed by an append-only `{collection}.jsonl` file
//! (the durable log, locked with `fs2` during writes) and mirrored into a
//! SQLite table used for point lookups and listing. The SQLite state is a
//! cache: [`Store::rebuild_indexes`] replays a collection's JSONL file and
//! repopulates it, which is how a process recovers after a crash or a
//! manual edit to the log.
//!
//! `put` upserts a record by id; `append` is the same but refuses to
//! overwrite an existing id, which is how append-only collections like
//! task events enforce "never mutated" at the API boundary.

mod error;
mod filter;
mod record;
mod store;
mod time;

pub use error::{StoreError, StoreResult};
pub use filter::{Filter, FilterOp};
pub use record::{IndexValue, Record};
pub use store::{Cursor, Store};
pub use time::now_ms;
