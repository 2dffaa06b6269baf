#![forbid(unsafe_code)]

//! Reversible commands, the leaves of the history tree.
//!
//! A [`Command`] pairs a forward callback with its inverse. The history
//! never inspects the document those callbacks touch; it only stores the
//! pair and replays it in the right order.
//!
//! # Invariants
//!
//! - `apply()` followed by `revert()` restores prior state exactly
//! - `revert()` followed by `apply()` restores the applied state exactly
//! - A command is immutable once built; only its position in the history moves
//!
//! Neither invariant is checked. Correctness of each pair is the caller's
//! responsibility.

use std::fmt;
use std::sync::{Arc, Mutex};

use web_time::Instant;

/// Result of running one side of a command.
pub type CommandResult = Result<(), CommandError>;

/// Boxed forward or inverse callback.
pub type CommandFn = Box<dyn Fn() -> CommandResult + Send + Sync>;

/// Errors a command callback can report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The command cannot run against the current document state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The document changed underneath the command since it was recorded.
    #[error("state drift: expected '{expected}', got '{actual}'")]
    StateDrift { expected: String, actual: String },
    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

/// Key that lets consecutive commands collapse into one undo step.
///
/// Two commands coalesce only when both carry a key and the keys are equal.
/// Keys built through [`CommandFactory`](super::CommandFactory) carry a time
/// bucket suffix, so equal caller keys in different buckets stay apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalesceKey(String);

impl CoalesceKey {
    /// Use `key` verbatim. An empty key means "no key".
    #[must_use]
    pub fn exact(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    /// Append a time bucket to `key`, producing `"{key}__{bucket}"`.
    #[must_use]
    pub fn bucketed(key: &str, bucket: u64) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        Some(Self(format!("{key}__{bucket}")))
    }

    /// The full key, including any bucket suffix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoalesceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata attached to every command for UI display and tracing.
#[derive(Debug, Clone)]
pub struct CommandMetadata {
    /// Human-readable description (e.g., "Move cell").
    pub description: String,
    /// When the command was built.
    pub created_at: Instant,
}

impl CommandMetadata {
    /// Create new metadata with the given description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            created_at: Instant::now(),
        }
    }
}

impl Default for CommandMetadata {
    fn default() -> Self {
        Self::new("Edit")
    }
}

/// An atomic forward/inverse pair with an optional coalescing key.
pub struct Command {
    forward: CommandFn,
    inverse: CommandFn,
    key: Option<CoalesceKey>,
    metadata: CommandMetadata,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("description", &self.metadata.description)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Build an unkeyed command. Neither callback runs until the command is
    /// added to a history.
    pub fn new<F, I>(forward: F, inverse: I) -> Self
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
        I: Fn() -> CommandResult + Send + Sync + 'static,
    {
        Self {
            forward: Box::new(forward),
            inverse: Box::new(inverse),
            key: None,
            metadata: CommandMetadata::default(),
        }
    }

    /// Command that writes `new` into `target` and restores `old` on undo.
    ///
    /// The edit is plain data, so the pair is inverse by construction.
    pub fn assign<T>(target: Arc<Mutex<T>>, old: T, new: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let restore = Arc::clone(&target);
        Self::new(
            move || store(&target, new.clone()),
            move || store(&restore, old.clone()),
        )
    }

    /// Set the description shown in undo/redo menus.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Coalesce on `key` as given, without a time bucket.
    ///
    /// Use this when the caller tracks gesture boundaries itself, e.g. a key
    /// that embeds a drag id.
    #[must_use]
    pub fn with_exact_key(mut self, key: impl Into<String>) -> Self {
        self.key = CoalesceKey::exact(key);
        self
    }

    pub(crate) fn with_key(mut self, key: Option<CoalesceKey>) -> Self {
        self.key = key;
        self
    }

    /// The coalescing key, if any.
    #[must_use]
    pub fn key(&self) -> Option<&CoalesceKey> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    #[must_use]
    pub fn metadata(&self) -> &CommandMetadata {
        &self.metadata
    }

    /// Run the forward callback.
    pub fn apply(&self) -> CommandResult {
        (self.forward)()
    }

    /// Run the inverse callback.
    pub fn revert(&self) -> CommandResult {
        (self.inverse)()
    }
}

fn store<T>(target: &Mutex<T>, value: T) -> CommandResult {
    let mut slot = target
        .lock()
        .map_err(|_| CommandError::InvalidState("assign target lock poisoned".to_string()))?;
    *slot = value;
    Ok(())
}
