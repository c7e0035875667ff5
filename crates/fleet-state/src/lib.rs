//! fleet-state — embedded job state store for Fleet.
//!
//! Backed by [redb](https://docs.rs/redb), persists rollout job states and
//! the per-component build/deploy commit hashes.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Jobs are keyed by job id; hashes by component name.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
