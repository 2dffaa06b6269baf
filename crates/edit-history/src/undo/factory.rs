#![forbid(unsafe_code)]

//! Command factory with time-bucketed coalescing keys.
//!
//! A caller key such as `"scale-cell-7"` becomes `"scale-cell-7__{bucket}"`
//! where `bucket = floor(elapsed / window)`. Two keyed commands coalesce
//! only when they land in the same bucket, so a drag that crosses a bucket
//! boundary produces two undo steps. Callers that know their gesture
//! boundaries should use [`CommandFactory::gesture_keyed`] instead.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, MonotonicClock, bucket_index};
use super::command::{CoalesceKey, Command, CommandResult};

/// Default coalescing window.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_secs(1);

/// Builds commands and derives their coalescing keys.
#[derive(Clone)]
pub struct CommandFactory {
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl fmt::Debug for CommandFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandFactory")
            .field("window", &self.window)
            .field("elapsed", &self.clock.elapsed())
            .finish()
    }
}

impl Default for CommandFactory {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::process()), DEFAULT_COALESCE_WINDOW)
    }
}

impl CommandFactory {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, window: Duration) -> Self {
        Self { clock, window }
    }

    /// Width of one coalescing bucket.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Key for `key` in the current bucket. `None` for an empty key.
    #[must_use]
    pub fn bucket_key(&self, key: &str) -> Option<CoalesceKey> {
        CoalesceKey::bucketed(key, bucket_index(self.clock.elapsed(), self.window))
    }

    /// Unkeyed command.
    pub fn command<F, I>(&self, forward: F, inverse: I) -> Command
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
        I: Fn() -> CommandResult + Send + Sync + 'static,
    {
        Command::new(forward, inverse)
    }

    /// Command keyed on `key` within the current time bucket.
    pub fn keyed<F, I>(&self, forward: F, inverse: I, key: &str) -> Command
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
        I: Fn() -> CommandResult + Send + Sync + 'static,
    {
        Command::new(forward, inverse).with_key(self.bucket_key(key))
    }

    /// Command keyed on `gesture_key` verbatim, with no time bucket.
    pub fn gesture_keyed<F, I>(&self, forward: F, inverse: I, gesture_key: &str) -> Command
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
        I: Fn() -> CommandResult + Send + Sync + 'static,
    {
        Command::new(forward, inverse).with_exact_key(gesture_key)
    }

    /// `keyed` when a key is given, `command` otherwise.
    pub fn make<F, I>(&self, forward: F, inverse: I, key: Option<&str>) -> Command
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
        I: Fn() -> CommandResult + Send + Sync + 'static,
    {
        match key {
            Some(key) => self.keyed(forward, inverse, key),
            None => self.command(forward, inverse),
        }
    }
}

/// Build a command using the process clock and a one-second window.
pub fn make_command<F, I>(forward: F, inverse: I, key: Option<&str>) -> Command
where
    F: Fn() -> CommandResult + Send + Sync + 'static,
    I: Fn() -> CommandResult + Send + Sync + 'static,
{
    CommandFactory::default().make(forward, inverse, key)
}
