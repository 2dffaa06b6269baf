#![forbid(unsafe_code)]

//! Timeline entries and nested-list input.
//!
//! An [`Entry`] is one undo step. It is either a single [`Command`], a
//! [`CoalescedGroup`] of same-key commands, or a [`Composite`] built from a
//! batch or a transaction. Composites nest to any depth.
//!
//! ```text
//! Composite (Transaction)
//! ├── Group "mult-2__0" [Command, Command]
//! ├── Composite (Transaction)
//! │   └── Group "mult-8__0" [Command]
//! ├── Command
//! └── Group "mult-3__0" [Command]
//! ```
//!
//! Applying an entry runs its leaves in pre-order; reverting runs the same
//! leaves in reverse. Both walk the tree with an explicit stack, so nesting
//! depth never grows the call stack.

use std::fmt::Write as _;
use std::time::Duration;

use super::command::{CoalesceKey, Command, CommandError, CommandResult};
use super::history::HistoryError;

/// A run of commands sharing one coalescing key. Never empty.
#[derive(Debug)]
pub struct CoalescedGroup {
    key: CoalesceKey,
    commands: Vec<Command>,
}

impl CoalescedGroup {
    pub(crate) fn start(key: CoalesceKey, command: Command) -> Self {
        Self {
            key,
            commands: vec![command],
        }
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn key(&self) -> &CoalesceKey {
        &self.key
    }

    /// Members in insertion order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Time between building the first and the last member.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match (self.commands.first(), self.commands.last()) {
            (Some(first), Some(last)) => last
                .metadata()
                .created_at
                .duration_since(first.metadata().created_at),
            _ => Duration::ZERO,
        }
    }
}

/// Where a composite came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    /// A nested list passed to `add`.
    Batch,
    /// A committed transaction.
    Transaction,
}

/// An ordered sequence of entries treated as one step. Never empty.
#[derive(Debug)]
pub struct Composite {
    kind: CompositeKind,
    label: Option<String>,
    entries: Vec<Entry>,
}

impl Composite {
    pub(crate) fn batch(entries: Vec<Entry>) -> Self {
        Self {
            kind: CompositeKind::Batch,
            label: None,
            entries,
        }
    }

    pub(crate) fn transaction(label: Option<String>, entries: Vec<Entry>) -> Self {
        Self {
            kind: CompositeKind::Transaction,
            label,
            entries,
        }
    }

    #[must_use]
    pub fn kind(&self) -> CompositeKind {
        self.kind
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Children in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn description(&self) -> &str {
        match (&self.label, self.kind) {
            (Some(label), _) => label.as_str(),
            (None, CompositeKind::Batch) => "Batch",
            (None, CompositeKind::Transaction) => "Transaction",
        }
    }
}

/// One slot in a history timeline.
#[derive(Debug)]
pub enum Entry {
    Command(Command),
    Group(CoalescedGroup),
    Composite(Composite),
}

impl Entry {
    /// Description for undo/redo menus.
    ///
    /// A group reports its first command's description.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::Command(cmd) => cmd.description(),
            Self::Group(group) => group
                .commands
                .first()
                .map_or("Edit", Command::description),
            Self::Composite(composite) => composite.description(),
        }
    }

    /// Coalescing key of a group or keyed command.
    #[must_use]
    pub fn key(&self) -> Option<&CoalesceKey> {
        match self {
            Self::Command(cmd) => cmd.key(),
            Self::Group(group) => Some(group.key()),
            Self::Composite(_) => None,
        }
    }

    /// Leaf commands in application order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Command> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(entry) = stack.pop() {
            match entry {
                Self::Command(cmd) => out.push(cmd),
                Self::Group(group) => out.extend(group.commands.iter()),
                Self::Composite(composite) => stack.extend(composite.entries.iter().rev()),
            }
        }
        out
    }

    #[must_use]
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(entry) = stack.pop() {
            match entry {
                Self::Command(_) => count += 1,
                Self::Group(group) => count += group.len(),
                Self::Composite(composite) => stack.extend(composite.entries.iter()),
            }
        }
        count
    }

    /// Indented text rendering of the tree. Runs no callbacks.
    #[must_use]
    pub fn outline(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self, 0usize)];
        while let Some((entry, depth)) = stack.pop() {
            let indent = "  ".repeat(depth);
            match entry {
                Self::Command(cmd) => {
                    let _ = write!(out, "{indent}command \"{}\"", cmd.description());
                    if let Some(key) = cmd.key() {
                        let _ = write!(out, " key={key}");
                    }
                    out.push('\n');
                }
                Self::Group(group) => {
                    let _ = writeln!(
                        out,
                        "{indent}group key={} ({} commands)",
                        group.key,
                        group.len()
                    );
                }
                Self::Composite(composite) => {
                    let kind = match composite.kind {
                        CompositeKind::Batch => "batch",
                        CompositeKind::Transaction => "transaction",
                    };
                    let _ = writeln!(
                        out,
                        "{indent}{kind} \"{}\" ({} entries)",
                        composite.description(),
                        composite.len()
                    );
                    stack.extend(composite.entries.iter().rev().map(|e| (e, depth + 1)));
                }
            }
        }
        out
    }

    /// Run every leaf forward. With `rollback`, a failure reverts the
    /// leaves already applied before the error is returned.
    pub(crate) fn apply(&self, rollback: bool) -> Result<(), HistoryError> {
        let leaves = self.leaves();
        for (done, leaf) in leaves.iter().enumerate() {
            if let Err(err) = leaf.apply() {
                if !rollback {
                    return Err(err.into());
                }
                return Err(settle(
                    err,
                    leaves[..done].iter().rev().map(|cmd| cmd.revert()),
                ));
            }
        }
        Ok(())
    }

    /// Run every leaf inverse, newest first. With `rollback`, a failure
    /// re-applies the leaves already reverted.
    pub(crate) fn revert(&self, rollback: bool) -> Result<(), HistoryError> {
        let leaves = self.leaves();
        for (done, leaf) in leaves.iter().rev().enumerate() {
            if let Err(err) = leaf.revert() {
                if !rollback {
                    return Err(err.into());
                }
                let reverted = &leaves[leaves.len() - done..];
                return Err(settle(err, reverted.iter().map(|cmd| cmd.apply())));
            }
        }
        Ok(())
    }
}

/// Run compensations for a failed leaf and fold the outcome into one error.
fn settle(
    err: CommandError,
    compensations: impl Iterator<Item = CommandResult>,
) -> HistoryError {
    let mut first_failure = None;
    for result in compensations {
        if let Err(rollback) = result {
            tracing::warn!(
                target: "edit_history.undo",
                error = %err,
                rollback_error = %rollback,
                "compensation failed while rolling back a partially applied entry"
            );
            first_failure.get_or_insert(rollback);
        }
    }
    match first_failure {
        None => HistoryError::Command(err),
        Some(rollback) => HistoryError::RollbackFailed {
            source: Box::new(HistoryError::Command(err)),
            rollback,
        },
    }
}

/// Input to `add`: a command or an arbitrarily nested list of them.
#[derive(Debug)]
pub enum Batch {
    Command(Command),
    List(Vec<Batch>),
}

impl From<Command> for Batch {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl<T: Into<Batch>> From<Vec<T>> for Batch {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl FromIterator<Command> for Batch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self::List(iter.into_iter().map(Self::Command).collect())
    }
}

/// Flatten nested lists into one ordered run of entries.
///
/// `items` sits at depth 0; each inner list is one level deeper. A list
/// deeper than `max_depth` fails with [`HistoryError::NestedTooDeep`]
/// before anything runs. `max_depth == 0` disables the check.
pub(crate) fn flatten(items: Vec<Batch>, max_depth: usize) -> Result<Vec<Entry>, HistoryError> {
    let mut out = Vec::new();
    let mut stack = vec![(items.into_iter(), 0usize)];
    while let Some((iter, depth)) = stack.last_mut() {
        let depth = *depth;
        match iter.next() {
            Some(Batch::Command(cmd)) => out.push(Entry::Command(cmd)),
            Some(Batch::List(inner)) => {
                if max_depth != 0 && depth + 1 > max_depth {
                    return Err(HistoryError::NestedTooDeep { max_depth });
                }
                stack.push((inner.into_iter(), depth + 1));
            }
            None => {
                stack.pop();
            }
        }
    }
    Ok(out)
}
