//! Error types for the executor runtime.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running the executor.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to re-establish subscription with agent within {0:?}, aborting")]
    RecoveryTimeout(Duration),

    #[error("received abort signal from agent, will attempt to re-subscribe")]
    AgentAbort,

    #[error("agent transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Protocol(#[from] stevedore_proto::Error),

    #[error("problem with certificate: {0}")]
    Certificate(String),

    #[error("{hook} hook failed to handle {event}: {message}")]
    Hook {
        hook: &'static str,
        event: String,
        message: String,
    },

    #[error("cannot launch task: {0}")]
    Launch(String),

    #[error(
        "timeout during state update buffer cleaning, \
         {buffered} events remained, {unacknowledged} events unacknowledged"
    )]
    DrainDeadline {
        buffered: usize,
        unacknowledged: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the runtime [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
