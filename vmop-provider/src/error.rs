//! Error types and retry classification.
//!
//! Every stage of a reconcile returns [`Result`], whose error side is a
//! [`ProviderError`]. The entry point hands that error to a [`Classifier`]
//! which turns it into the [`ReconcileError`] the control loop acts on.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency or uniqueness conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Collaborator could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// Result type for collaborator calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors raised by reconcile stages.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Malformed desired declaration.
    #[error("{0}")]
    Validation(String),

    /// A referenced object is absent. It may appear later.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A prerequisite exists but is not usable yet.
    #[error("{0}")]
    NotReady(String),

    /// Live state cannot be matched to the declaration without guessing.
    #[error("{0}")]
    Ambiguous(String),

    /// A collaborator call failed.
    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: ClientError,
    },

    /// Independent prerequisite failures, reported together.
    #[error("{}", join_messages(.0))]
    Prerequisites(Vec<ProviderError>),

    /// Another stage error with added context.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ProviderError>,
    },
}

/// Result type for reconcile stages.
pub type Result<T> = std::result::Result<T, ProviderError>;

fn join_messages(errs: &[ProviderError]) -> String {
    errs.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProviderError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn remote(context: impl Into<String>, source: ClientError) -> Self {
        Self::Remote {
            context: context.into(),
            source,
        }
    }

    /// Collapse independent failures into one error, or `None` if there were none.
    pub fn aggregate(mut errs: Vec<ProviderError>) -> Option<Self> {
        match errs.len() {
            0 => None,
            1 => errs.pop(),
            _ => Some(Self::Prerequisites(errs)),
        }
    }
}

/// Attach context to stage and collaborator results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| ProviderError::Context {
            context: context.into(),
            source: Box::new(source),
        })
    }
}

impl<T> ResultExt<T> for ClientResult<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| ProviderError::remote(context, source))
    }
}

/// Outcome signal handed back to the control loop when a reconcile fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("requeue after {0:?}")]
    RequeueAfter(Duration),

    #[error("requeue immediately")]
    RequeueImmediate,

    #[error("{}", terminal_message(.0))]
    Terminal(String),
}

fn terminal_message(msg: &str) -> &str {
    if msg.is_empty() { "no requeue" } else { msg }
}

impl ReconcileError {
    /// Delay before the next attempt, if one should be made.
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::RequeueAfter(d) => Some(*d),
            Self::RequeueImmediate => Some(Duration::ZERO),
            Self::Terminal(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Maps stage errors to control-loop outcomes.
///
/// `NotFound` and `NotReady` carry a requeue marker with their configured
/// delay. `Validation` and `Ambiguous` carry a terminal marker. A requeue
/// marker anywhere in the error tree wins over a terminal marker. Errors with
/// neither marker fall back to the default backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    pub not_found_delay: Duration,
    pub not_ready_delay: Duration,
    pub default_backoff: Duration,
}

impl Classifier {
    pub fn classify(&self, err: &ProviderError) -> ReconcileError {
        if let Some(delay) = self.requeue_marker(err) {
            return if delay.is_zero() {
                ReconcileError::RequeueImmediate
            } else {
                ReconcileError::RequeueAfter(delay)
            };
        }
        if has_terminal_marker(err) {
            return ReconcileError::Terminal(err.to_string());
        }
        ReconcileError::RequeueAfter(self.default_backoff)
    }

    fn requeue_marker(&self, err: &ProviderError) -> Option<Duration> {
        match err {
            ProviderError::NotFound { .. } => Some(self.not_found_delay),
            ProviderError::NotReady(_) => Some(self.not_ready_delay),
            ProviderError::Prerequisites(errs) => {
                errs.iter().find_map(|e| self.requeue_marker(e))
            }
            ProviderError::Context { source, .. } => self.requeue_marker(source),
            ProviderError::Validation(_)
            | ProviderError::Ambiguous(_)
            | ProviderError::Remote { .. } => None,
        }
    }
}

fn has_terminal_marker(err: &ProviderError) -> bool {
    match err {
        ProviderError::Validation(_) | ProviderError::Ambiguous(_) => true,
        ProviderError::Prerequisites(errs) => errs.iter().any(has_terminal_marker),
        ProviderError::Context { source, .. } => has_terminal_marker(source),
        ProviderError::NotFound { .. }
        | ProviderError::NotReady(_)
        | ProviderError::Remote { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier {
            not_found_delay: Duration::from_secs(10),
            not_ready_delay: Duration::from_secs(5),
            default_backoff: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_validation_is_terminal() {
        let err = ProviderError::Validation("unsupported image kind: \"Foo\"".into());
        assert_eq!(
            classifier().classify(&err),
            ReconcileError::Terminal("unsupported image kind: \"Foo\"".into())
        );
    }

    #[test]
    fn test_not_found_requeues_after_delay() {
        let err = ProviderError::not_found("VirtualMachineClass", "small");
        assert_eq!(
            classifier().classify(&err),
            ReconcileError::RequeueAfter(Duration::from_secs(10))
        );
        assert_eq!(err.to_string(), "VirtualMachineClass small not found");
    }

    #[test]
    fn test_remote_uses_default_backoff() {
        let err = ProviderError::remote("create VM", ClientError::Unavailable("backend".into()));
        assert_eq!(
            classifier().classify(&err),
            ReconcileError::RequeueAfter(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_zero_delay_requeue_beats_terminal() {
        let c = Classifier {
            not_ready_delay: Duration::ZERO,
            ..classifier()
        };
        let err = ProviderError::Prerequisites(vec![
            ProviderError::Validation("bad".into()),
            ProviderError::NotReady("cluster module is not ready".into()),
        ]);
        assert_eq!(c.classify(&err), ReconcileError::RequeueImmediate);
    }

    #[test]
    fn test_marker_found_through_context() {
        let err: Result<()> = Err(ProviderError::Ambiguous("duplicate backing".into()));
        let err = err.context("allocate CD-ROMs").unwrap_err();
        assert_eq!(err.to_string(), "allocate CD-ROMs: duplicate backing");
        assert!(classifier().classify(&err).is_terminal());
    }

    #[test]
    fn test_aggregate() {
        assert!(ProviderError::aggregate(vec![]).is_none());

        let single = ProviderError::aggregate(vec![ProviderError::NotReady("a".into())]);
        assert!(matches!(single, Some(ProviderError::NotReady(_))));

        let many = ProviderError::aggregate(vec![
            ProviderError::NotReady("a".into()),
            ProviderError::Validation("b".into()),
        ])
        .unwrap();
        assert_eq!(many.to_string(), "a; b");
    }

    #[test]
    fn test_terminal_display_defaults() {
        assert_eq!(ReconcileError::Terminal(String::new()).to_string(), "no requeue");
        assert_eq!(ReconcileError::RequeueImmediate.requeue_after(), Some(Duration::ZERO));
        assert_eq!(ReconcileError::Terminal("x".into()).requeue_after(), None);
    }
}
