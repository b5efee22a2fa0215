//! # stevedore-core
//!
//! The executor runtime: one instance supervises exactly one task for the
//! cluster scheduler.
//!
//! This crate provides:
//! - The orchestrator event loop and the agent subscription (`executor`)
//! - Buffered, acknowledged status reporting (`state`)
//! - Health check scheduling (`health`)
//! - Child process control and tree-wide termination (`command`, `kill`)
//! - Lifecycle hook dispatch (`hook`)
//! - Certificate expiry watchdogs (`cert`)
//!
//! Collaborator implementations (log scraping, concrete hooks) live in
//! `stevedore-adapters`; the binary wiring lives in `stevedore-cli`.

pub mod agent;
pub mod cert;
pub mod command;
mod config;
mod error;
mod event;
pub mod executor;
pub mod health;
pub mod hook;
pub mod kill;
pub mod runenv;
mod runtime;
pub mod state;

pub use config::{AgentSettings, Config, ENVIRONMENT_PREFIX};
pub use error::{Error, Result};
pub use event::{ExecutorEvent, EVENT_CHANNEL_CAPACITY};
pub use executor::{Executor, ScrapePipeline};
pub use runtime::{Clock, Random, Runtime, SystemClock, SystemRandom};
