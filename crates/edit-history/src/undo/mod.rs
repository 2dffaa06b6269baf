#![forbid(unsafe_code)]

//! Undo/redo history engine.
//!
//! Every document mutation is recorded as a [`Command`]: a forward callback
//! and its inverse. The history stores and replays those pairs; it never
//! looks at the document itself.
//!
//! - **Coalescing**: consecutive commands with the same key collapse into
//!   one [`CoalescedGroup`], so a drag undoes in one step
//! - **Transactions**: everything recorded inside
//!   [`History::transaction`] becomes one [`Composite`]; transactions nest
//! - **Batches**: nested lists of commands passed to [`History::add`] are
//!   flattened into one step
//! - **Atomicity**: a failing callback rolls back the partial entry
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ History                                                   │
//! │  open layers (transactions)     ┌──────────────────────┐ │
//! │  ┌────────────────────────┐     │ Layer 2 [c]  ptr 0   │ │
//! │  │ Layer 1 [a, b]  ptr 1  │ ◄── │  popped on commit →  │ │
//! │  └────────────────────────┘     │  Composite[c] in L1  │ │
//! │  base layer                     └──────────────────────┘ │
//! │  ┌────────────────────────────────────────────────┐      │
//! │  │ timeline [Command, Group, Composite, …] ptr n  │      │
//! │  └────────────────────────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use edit_history::{Command, History};
//!
//! let width = Arc::new(Mutex::new(10));
//! let mut history = History::default();
//!
//! history.add(Command::assign(Arc::clone(&width), 10, 40))?;
//! assert_eq!(*width.lock().unwrap(), 40);
//!
//! history.undo()?;
//! assert_eq!(*width.lock().unwrap(), 10);
//! # Ok::<(), edit_history::HistoryError>(())
//! ```
//!
//! # Design Notes
//!
//! ## Transactions Take `&mut History`
//!
//! The transaction callback receives the history it must record into. It
//! is a synchronous `FnOnce`, so nothing else can touch the history while
//! the transaction layer is open.
//!
//! ## Coalescing Buckets
//!
//! Keys from [`CommandFactory::keyed`] carry a time bucket suffix. Keys from
//! [`CommandFactory::gesture_keyed`] do not, for callers that know where a
//! gesture starts and ends.

pub mod clock;
pub mod command;
pub mod entry;
pub mod factory;
pub mod history;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use command::{CoalesceKey, Command, CommandError, CommandMetadata, CommandResult};
pub use entry::{Batch, CoalescedGroup, Composite, CompositeKind, Entry};
pub use factory::{CommandFactory, DEFAULT_COALESCE_WINDOW, make_command};
pub use history::{History, HistoryError, HistoryEvent, Layer, ListenerId};
