#![forbid(unsafe_code)]

//! Edit history for document editors.
//!
//! This crate records document mutations as reversible commands and replays
//! them for undo and redo. It supports nested transactions, coalescing of
//! bursts of same-key edits, and nested command lists, while never
//! inspecting the document being edited.
//!
//! # Key Components
//!
//! - [`History`] - Layered timeline with `add`, `transaction`, `undo`, `redo`
//! - [`Command`] - Forward/inverse pair, optionally keyed for coalescing
//! - [`CommandFactory`] - Builds commands with time-bucketed keys
//! - [`Entry`] - Inspectable tree of recorded steps
//! - [`HistoryConfig`] - Limits and policies, loadable from TOML/JSON
//!
//! # Feature Flags
//!
//! - `config`: `HistoryConfig::from_toml_*` / `from_json_*` loaders

pub mod config;
pub mod undo;

pub use config::{ConfigError, ConfigFormat, HistoryConfig};
pub use undo::{
    Batch, Clock, CoalesceKey, CoalescedGroup, Command, CommandError, CommandFactory,
    CommandMetadata, CommandResult, Composite, CompositeKind, Entry, History, HistoryError,
    HistoryEvent, Layer, ListenerId, ManualClock, MonotonicClock, make_command,
};
