//! fleet-core — topology model and environment configuration for Fleet.
//!
//! A rollout targets a [`Layout`]: clusters holding long-running service
//! units and one-off task units, each resolving to an image repository.
//! The [`TopologyResolver`] builds the layout for a named component from
//! the environment's naming conventions.

pub mod config;
pub mod topology;
pub mod types;

pub use config::FleetConfig;
pub use topology::{Component, EnvType, TopologyResolver, UnknownComponent, UnknownEnv};
pub use types::*;
