//! Fleet rollouts — push one commit across every cluster of a component.
//!
//! A deploy job resolves the component's layout, points every unit at the
//! image built from the commit, then polls until the whole layout runs it.
//!
//! # Components
//!
//! - **`platform`** — Raw container platform contract
//! - **`orchestrator`** — Per-unit update, check and launch semantics
//! - **`memory`** — In-process platform for tests and dry runs
//! - **`driver`** — Applies an image to a whole layout, checks convergence
//! - **`job`** — Deploy job state machine (Queued → Started → Completed/Failed)
//! - **`runner`** — Periodically advances active jobs

pub mod driver;
pub mod error;
pub mod job;
pub mod memory;
pub mod notify;
pub mod orchestrator;
pub mod platform;
pub mod runner;
pub mod store;

pub use driver::ClusterDriver;
pub use error::{RolloutError, RolloutResult};
pub use job::{DeployJob, JobContext};
pub use memory::MemoryPlatform;
pub use notify::{LogNotifier, Notifier};
pub use orchestrator::{Orchestrator, PlatformOrchestrator};
pub use platform::ContainerPlatform;
pub use runner::JobRunner;
pub use store::{HashRecorder, JobStore};
