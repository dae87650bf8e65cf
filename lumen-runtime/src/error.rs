//! Error types for the lumen runtime

use crate::component::LifecycleState;
use crate::config::ConfigError;
use lumen_reactive::MutationError;
use lumen_types::{ComponentId, RootId};
use thiserror::Error;

/// Errors raised while registering, rendering or tearing down roots
#[derive(Debug, Error)]
pub enum RenderError {
    /// The loop guard tripped; the listed roots were destroyed
    #[error("infinite rendering invalidation detected after {passes} passes (roots: {roots:?})")]
    InfiniteInvalidation { passes: usize, roots: Vec<RootId> },

    #[error("root {0} is already registered")]
    DuplicateRoot(RootId),

    #[error("root {0} is not registered")]
    UnknownRoot(RootId),

    #[error("scheduler has been shut down")]
    SchedulerShutdown,

    /// A component manager was registered without its required operations
    #[error("component manager `{manager}` is missing required capabilities: {}", missing.join(", "))]
    IncompleteManager {
        manager: String,
        missing: Vec<&'static str>,
    },

    #[error("no component manager named `{0}`")]
    UnknownManager(String),

    #[error("{component} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        component: ComponentId,
        from: LifecycleState,
        to: LifecycleState,
    },

    /// A lifecycle hook failed; the error aborts the current pass
    #[error("{hook} hook failed for {component}: {source}")]
    Hook {
        component: ComponentId,
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid key mode: {0:?}")]
    InvalidKeyMode(String),

    /// Failure raised by a root renderer or batch callback
    #[error(transparent)]
    Host(#[from] anyhow::Error),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type using RenderError
pub type Result<T> = std::result::Result<T, RenderError>;
