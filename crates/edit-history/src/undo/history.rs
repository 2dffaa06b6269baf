#![forbid(unsafe_code)]

//! Layered undo/redo history.
//!
//! [`History`] keeps a stack of [`Layer`]s: the base layer, which lives as
//! long as the document, plus one layer per open transaction. Every
//! operation works on the top layer.
//!
//! # Invariants
//!
//! 1. The layer stack is never empty; the base layer cannot be popped.
//! 2. `applied <= timeline.len()` on every layer; the pointer is `applied - 1`.
//! 3. Entries past the pointer are dropped the moment a new entry is recorded.
//! 4. Entries are never mutated after insertion, except that a trailing
//!    [`CoalescedGroup`](super::CoalescedGroup) may gain members.
//! 5. Pointer and timeline move only after an entry applied or reverted
//!    completely.
//!
//! # Memory Model
//!
//! ```text
//! add(a) add(b) add(c)
//! ┌───────────────────────────────────────┐
//! │ timeline: [a, b, c]      pointer: 2   │
//! └───────────────────────────────────────┘
//!
//! undo() x2
//! ┌───────────────────────────────────────┐
//! │ timeline: [a, b, c]      pointer: 0   │
//! └───────────────────────────────────────┘
//!
//! add(d)  <-- drops b and c
//! ┌───────────────────────────────────────┐
//! │ timeline: [a, d]         pointer: 1   │
//! └───────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, MonotonicClock};
use super::command::{CoalesceKey, Command, CommandError, CommandResult};
use super::entry::{Batch, CoalescedGroup, Composite, CompositeKind, Entry, flatten};
use super::factory::CommandFactory;
use crate::config::{ConfigError, HistoryConfig};

/// Errors surfaced by history operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// A forward or inverse callback failed.
    #[error("command failed: {0}")]
    Command(#[from] CommandError),
    /// A nested list passed to `add` exceeded the configured depth.
    #[error("Nested too many levels (limit {max_depth})")]
    NestedTooDeep { max_depth: usize },
    /// Attempted to pop the base layer.
    #[error("No layers left in history")]
    NoLayers,
    /// The pointer refers to a slot that does not exist.
    #[error("No action to undo at index {index}")]
    MissingEntry { index: usize },
    /// An operation failed and undoing its partial effects failed too.
    #[error("{source}; rollback also failed: {rollback}")]
    RollbackFailed {
        source: Box<HistoryError>,
        rollback: CommandError,
    },
}

/// A timeline plus a pointer to the most recently applied entry.
#[derive(Debug, Default)]
pub struct Layer {
    timeline: Vec<Entry>,
    applied: usize,
}

impl Layer {
    /// All entries, applied and undone.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.timeline
    }

    /// Index of the most recently applied entry, `None` when fully undone.
    #[must_use]
    pub fn pointer(&self) -> Option<usize> {
        self.applied.checked_sub(1)
    }

    fn truncate_future(&mut self) {
        self.timeline.truncate(self.applied);
    }

    fn push(&mut self, entry: Entry) -> usize {
        self.timeline.push(entry);
        self.applied = self.timeline.len();
        self.applied - 1
    }

    /// Append `command` to a trailing group with the same key, or start one.
    fn coalesce(&mut self, key: CoalesceKey, command: Command) -> Recorded {
        if let Some(Entry::Group(group)) = self.timeline.last_mut() {
            if *group.key() == key {
                group.push(command);
                let (len, gesture) = (group.len(), group.elapsed());
                self.applied = self.timeline.len();
                return Recorded::Coalesced {
                    index: self.applied - 1,
                    len,
                    gesture,
                };
            }
        }
        let index = self.push(Entry::Group(CoalescedGroup::start(key, command)));
        Recorded::Added { index }
    }

    /// Wrap the applied entries in one transaction composite.
    ///
    /// Batch composites are spliced in; nested transactions stay nested.
    /// Entries the callback undid and never redid are dropped.
    fn into_composite(mut self, label: Option<String>) -> Option<Composite> {
        self.truncate_future();
        let mut entries = Vec::with_capacity(self.timeline.len());
        for entry in self.timeline {
            match entry {
                Entry::Composite(c) if c.kind() == CompositeKind::Batch => {
                    entries.extend(c.into_entries());
                }
                other => entries.push(other),
            }
        }
        if entries.is_empty() {
            None
        } else {
            Some(Composite::transaction(label, entries))
        }
    }

    /// Revert everything applied in this layer, newest first.
    ///
    /// Keeps going past an entry whose inverse fails. Returns the first
    /// failure and, oldest first, the entries that rollback restored to
    /// their applied state.
    fn discard(self, rollback: bool) -> (Option<HistoryError>, Vec<Entry>) {
        let mut first_failure = None;
        let mut stranded = Vec::new();
        let applied = self.applied;
        for entry in self.timeline.into_iter().take(applied).rev() {
            if let Err(err) = entry.revert(rollback) {
                // A failed compensation leaves the entry half reverted.
                if rollback && !matches!(err, HistoryError::RollbackFailed { .. }) {
                    stranded.push(entry);
                }
                first_failure.get_or_insert(err);
            }
        }
        stranded.reverse();
        (first_failure, stranded)
    }
}

enum Recorded {
    Added { index: usize },
    Coalesced {
        index: usize,
        len: usize,
        gesture: Duration,
    },
}

/// Change notification for base-layer listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEvent {
    /// A new entry was appended at `index`.
    Added { index: usize },
    /// A keyed command joined the group at `index`, now `len` long.
    Coalesced { index: usize, len: usize },
    /// A transaction committed as one entry at `index`.
    Committed { index: usize, leaves: usize },
    /// The entry at `index` was undone.
    Undone { index: usize },
    /// The entry at `index` was redone.
    Redone { index: usize },
    /// All entries were dropped.
    Cleared,
    /// The `count` oldest entries were evicted by `max_entries`.
    Evicted { count: usize },
}

/// Handle returned by [`History::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&HistoryEvent) + Send>;

/// Undo/redo history for one open document.
pub struct History {
    base: Layer,
    /// One layer per open transaction, innermost last.
    open: Vec<Layer>,
    config: HistoryConfig,
    factory: CommandFactory,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("transaction_depth", &self.open.len())
            .field("len", &self.len())
            .field("pointer", &self.pointer())
            .field("listeners", &self.listeners.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl History {
    /// Create a history keyed on the process-wide monotonic clock.
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::process()))
    }

    /// Create a history whose coalescing buckets read `clock`.
    #[must_use]
    pub fn with_clock(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        let factory = CommandFactory::new(clock, config.coalesce_window());
        Self {
            base: Layer::default(),
            open: Vec::new(),
            config,
            factory,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    /// Validate `config` before building the history.
    pub fn try_new(config: HistoryConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.validated()?))
    }

    // ========================================================================
    // Command factory
    // ========================================================================

    #[must_use]
    pub fn factory(&self) -> &CommandFactory {
        &self.factory
    }

    /// Build a command, bucketing `key` with this history's clock.
    pub fn make_command<F, I>(&self, forward: F, inverse: I, key: Option<&str>) -> Command
    where
        F: Fn() -> CommandResult + Send + Sync + 'static,
        I: Fn() -> CommandResult + Send + Sync + 'static,
    {
        self.factory.make(forward, inverse, key)
    }

    // ========================================================================
    // Core Operations
    // ========================================================================

    /// Apply a command or nested list and record it as one step.
    ///
    /// A single keyed command joins the trailing group when the keys match.
    /// An empty list records nothing. On failure nothing is recorded and the
    /// redo future is kept.
    pub fn add(&mut self, batch: impl Into<Batch>) -> Result<(), HistoryError> {
        let entry = match batch.into() {
            Batch::Command(cmd) => Entry::Command(cmd),
            Batch::List(items) => {
                let entries = flatten(items, self.config.max_nesting_depth)?;
                if entries.is_empty() {
                    tracing::trace!(target: "edit_history.undo", "empty batch ignored");
                    return Ok(());
                }
                Entry::Composite(Composite::batch(entries))
            }
        };
        entry.apply(self.config.rollback_on_failure)?;
        self.record(entry);
        Ok(())
    }

    /// Run `f` inside a new layer and record its work as one step.
    ///
    /// Everything `f` adds lands in the new layer. When `f` returns `Ok`,
    /// the applied entries become one composite on the layer below, without
    /// running them again. When `f` returns `Err`, its recorded work is
    /// reverted and the error is returned. A transaction that records
    /// nothing leaves no trace.
    ///
    /// Reverting continues past an entry whose inverse fails. If rollback
    /// restored such entries, they are recorded as one step on the layer
    /// below. A panic in `f` is handled the same way, then resumed, so the
    /// history never stays inside an abandoned transaction.
    pub fn transaction<R, F>(&mut self, f: F) -> Result<R, HistoryError>
    where
        F: FnOnce(&mut Self) -> Result<R, HistoryError>,
    {
        self.run_transaction(None, f)
    }

    /// [`transaction`](Self::transaction) with a label for undo menus.
    pub fn labeled_transaction<R, F>(
        &mut self,
        label: impl Into<String>,
        f: F,
    ) -> Result<R, HistoryError>
    where
        F: FnOnce(&mut Self) -> Result<R, HistoryError>,
    {
        self.run_transaction(Some(label.into()), f)
    }

    /// Undo the entry at the pointer.
    ///
    /// Returns `Ok(false)` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, HistoryError> {
        let layer = self.top();
        let Some(index) = layer.pointer() else {
            tracing::trace!(target: "edit_history.undo", "undo at start of history");
            return Ok(false);
        };
        let entry = layer
            .timeline
            .get(index)
            .ok_or(HistoryError::MissingEntry { index })?;
        entry.revert(self.config.rollback_on_failure)?;
        tracing::debug!(
            target: "edit_history.undo",
            index,
            description = %entry.description(),
            leaves = entry.leaf_count(),
            "undo"
        );
        self.top_mut().applied = index;
        self.notify(HistoryEvent::Undone { index });
        Ok(true)
    }

    /// Redo the entry after the pointer.
    ///
    /// Returns `Ok(false)` when there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, HistoryError> {
        let layer = self.top();
        let index = layer.applied;
        let Some(entry) = layer.timeline.get(index) else {
            tracing::trace!(target: "edit_history.undo", "redo at head of history");
            return Ok(false);
        };
        entry.apply(self.config.rollback_on_failure)?;
        tracing::debug!(
            target: "edit_history.undo",
            index,
            description = %entry.description(),
            leaves = entry.leaf_count(),
            "redo"
        );
        self.top_mut().applied = index + 1;
        self.notify(HistoryEvent::Redone { index });
        Ok(true)
    }

    // ========================================================================
    // Info
    // ========================================================================

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.top().applied > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.top().applied < self.top().timeline.len()
    }

    /// Number of entries that can be undone.
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.top().applied
    }

    /// Number of entries that can be redone.
    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.top().timeline.len() - self.top().applied
    }

    /// Entries in the active timeline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.top().timeline.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.top().timeline.is_empty()
    }

    /// Pointer of the active layer.
    #[must_use]
    pub fn pointer(&self) -> Option<usize> {
        self.top().pointer()
    }

    /// Active timeline, for inspection.
    #[must_use]
    pub fn timeline(&self) -> &[Entry] {
        &self.top().timeline
    }

    /// The active layer.
    #[must_use]
    pub fn layer(&self) -> &Layer {
        self.top()
    }

    /// Number of open transactions.
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        self.open.len()
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        !self.open.is_empty()
    }

    #[must_use]
    pub fn next_undo_description(&self) -> Option<&str> {
        let layer = self.top();
        layer
            .pointer()
            .and_then(|i| layer.timeline.get(i))
            .map(Entry::description)
    }

    #[must_use]
    pub fn next_redo_description(&self) -> Option<&str> {
        let layer = self.top();
        layer.timeline.get(layer.applied).map(Entry::description)
    }

    /// Descriptions of undoable entries, most recent first.
    pub fn undo_descriptions(&self, limit: usize) -> Vec<&str> {
        let layer = self.top();
        layer.timeline[..layer.applied]
            .iter()
            .rev()
            .take(limit)
            .map(Entry::description)
            .collect()
    }

    /// Descriptions of redoable entries, next redo first.
    pub fn redo_descriptions(&self, limit: usize) -> Vec<&str> {
        let layer = self.top();
        layer.timeline[layer.applied..]
            .iter()
            .take(limit)
            .map(Entry::description)
            .collect()
    }

    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Drop every entry of the active layer without running anything.
    pub fn clear(&mut self) {
        let layer = self.top_mut();
        layer.timeline.clear();
        layer.applied = 0;
        tracing::debug!(target: "edit_history.undo", "history cleared");
        self.notify(HistoryEvent::Cleared);
    }

    /// Register a listener for base-layer changes.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&HistoryEvent) + Send + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn top(&self) -> &Layer {
        self.open.last().unwrap_or(&self.base)
    }

    fn top_mut(&mut self) -> &mut Layer {
        self.open.last_mut().unwrap_or(&mut self.base)
    }

    fn pop_layer(&mut self) -> Result<Layer, HistoryError> {
        self.open.pop().ok_or(HistoryError::NoLayers)
    }

    fn run_transaction<R, F>(&mut self, label: Option<String>, f: F) -> Result<R, HistoryError>
    where
        F: FnOnce(&mut Self) -> Result<R, HistoryError>,
    {
        self.open.push(Layer::default());
        let depth = self.transaction_depth();
        let outcome = {
            let _span = tracing::debug_span!(
                "history.transaction",
                depth,
                label = label.as_deref().unwrap_or("")
            )
            .entered();
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(self)))
        };
        let layer = self.pop_layer()?;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                tracing::warn!(
                    target: "edit_history.undo",
                    depth,
                    "transaction panicked, reverting its entries"
                );
                if let Some(failure) = self.abandon(layer, label) {
                    tracing::warn!(
                        target: "edit_history.undo",
                        error = %failure,
                        "failed to revert panicked transaction"
                    );
                }
                std::panic::resume_unwind(payload);
            }
        };

        match outcome {
            Ok(value) => {
                match layer.into_composite(label) {
                    Some(composite) => self.record(Entry::Composite(composite)),
                    None => {
                        tracing::trace!(
                            target: "edit_history.undo",
                            depth,
                            "empty transaction left no entry"
                        );
                    }
                }
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(
                    target: "edit_history.undo",
                    depth,
                    error = %err,
                    "transaction failed, reverting its entries"
                );
                match self.abandon(layer, label) {
                    None => Err(err),
                    Some(HistoryError::Command(rollback))
                    | Some(HistoryError::RollbackFailed { rollback, .. }) => {
                        tracing::warn!(
                            target: "edit_history.undo",
                            error = %err,
                            rollback_error = %rollback,
                            "failed to revert aborted transaction"
                        );
                        Err(HistoryError::RollbackFailed {
                            source: Box::new(err),
                            rollback,
                        })
                    }
                    Some(other) => Err(other),
                }
            }
        }
    }

    /// Revert a popped transaction layer.
    ///
    /// Entries that refused to revert are still applied; they are recorded
    /// on the active layer as one transaction so `undo` can reach them.
    fn abandon(&mut self, layer: Layer, label: Option<String>) -> Option<HistoryError> {
        let (failure, stranded) = layer.discard(self.config.rollback_on_failure);
        if !stranded.is_empty() {
            tracing::warn!(
                target: "edit_history.undo",
                count = stranded.len(),
                "entries that could not be reverted stay in history"
            );
            self.record(Entry::Composite(Composite::transaction(label, stranded)));
        }
        failure
    }

    /// Append an already-applied entry to the active layer.
    fn record(&mut self, entry: Entry) {
        let committed = match &entry {
            Entry::Composite(c) if c.kind() == CompositeKind::Transaction => {
                Some(entry.leaf_count())
            }
            _ => None,
        };
        let description = entry.description().to_string();
        let layer = self.top_mut();
        layer.truncate_future();
        let recorded = match entry {
            Entry::Command(cmd) => {
                let key = cmd.key().cloned();
                match key {
                    Some(key) => layer.coalesce(key, cmd),
                    None => Recorded::Added {
                        index: layer.push(Entry::Command(cmd)),
                    },
                }
            }
            other => Recorded::Added {
                index: layer.push(other),
            },
        };

        let depth = self.transaction_depth();
        let event = match (recorded, committed) {
            (Recorded::Coalesced { index, len, gesture }, _) => {
                tracing::debug!(
                    target: "edit_history.undo",
                    index,
                    len,
                    gesture_ms = u64::try_from(gesture.as_millis()).unwrap_or(u64::MAX),
                    depth,
                    description = %description,
                    "coalesced into group"
                );
                HistoryEvent::Coalesced { index, len }
            }
            (Recorded::Added { index }, Some(leaves)) => {
                tracing::debug!(
                    target: "edit_history.undo",
                    index,
                    leaves,
                    depth,
                    description = %description,
                    "transaction committed"
                );
                HistoryEvent::Committed { index, leaves }
            }
            (Recorded::Added { index }, None) => {
                tracing::debug!(
                    target: "edit_history.undo",
                    index,
                    depth,
                    description = %description,
                    "entry added"
                );
                HistoryEvent::Added { index }
            }
        };
        self.notify(event);
        self.enforce_limits();
    }

    /// Evict the oldest base-layer entries beyond `max_entries`.
    fn enforce_limits(&mut self) {
        let max = self.config.max_entries;
        if max == 0 || self.in_transaction() {
            return;
        }
        let layer = self.top_mut();
        let excess = layer.timeline.len().saturating_sub(max);
        if excess == 0 {
            return;
        }
        layer.timeline.drain(..excess);
        layer.applied = layer.applied.saturating_sub(excess);
        tracing::debug!(target: "edit_history.undo", count = excess, "evicted oldest entries");
        self.notify(HistoryEvent::Evicted { count: excess });
    }

    /// Deliver `event` to listeners when it concerns the base layer.
    fn notify(&mut self, event: HistoryEvent) {
        if self.in_transaction() {
            return;
        }
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
