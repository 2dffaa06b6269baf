#![forbid(unsafe_code)]

//! End-to-end checks of the history contract.
//!
//! `V` is a numeric probe mutated only by command callbacks.
//!
//! # Invariants
//!
//! 1. **Round-trip**: add/undo/redo move `V` between exact states.
//! 2. **Coalescing**: same-key commands in one bucket undo as one step.
//! 3. **Atomicity**: a transaction undoes and redoes as one step.
//! 4. **Nesting**: nested lists and nested transactions undo in reverse.
//! 5. **Branching**: a new add after undo discards the redo future.
//!
//! Run: `cargo test -p edit-history --test history_properties`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use edit_history::{
    Batch, Command, CommandError, CommandResult, Entry, History, HistoryConfig, HistoryError,
    ManualClock, make_command,
};

// ---------------------------------------------------------------------------
// Probe helpers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Probe(Arc<Mutex<f64>>);

impl Probe {
    fn new(v: f64) -> Self {
        Self(Arc::new(Mutex::new(v)))
    }

    fn get(&self) -> f64 {
        *self.0.lock().unwrap()
    }

    fn pair(
        &self,
        n: f64,
        forward: fn(f64, f64) -> f64,
        inverse: fn(f64, f64) -> f64,
    ) -> (
        impl Fn() -> CommandResult + Send + Sync + 'static,
        impl Fn() -> CommandResult + Send + Sync + 'static,
    ) {
        let (a, b) = (self.clone(), self.clone());
        (
            move || {
                let mut v = a.0.lock().unwrap();
                *v = forward(*v, n);
                Ok(())
            },
            move || {
                let mut v = b.0.lock().unwrap();
                *v = inverse(*v, n);
                Ok(())
            },
        )
    }

    fn set(&self, to: f64, from: f64) -> Command {
        Command::assign(Arc::clone(&self.0), from, to)
    }

    fn plus(&self, n: f64) -> Command {
        let (f, i) = self.pair(n, |v, n| v + n, |v, n| v - n);
        Command::new(f, i)
    }

    fn times(&self, n: f64) -> Command {
        let (f, i) = self.pair(n, |v, n| v * n, |v, n| v / n);
        Command::new(f, i)
    }

    fn keyed_plus(&self, history: &History, n: f64, key: &str) -> Command {
        let (f, i) = self.pair(n, |v, n| v + n, |v, n| v - n);
        history.make_command(f, i, Some(key))
    }

    fn keyed_times(&self, history: &History, n: f64, key: &str) -> Command {
        let (f, i) = self.pair(n, |v, n| v * n, |v, n| v / n);
        history.make_command(f, i, Some(key))
    }
}

fn manual_history() -> (ManualClock, History) {
    let clock = ManualClock::new();
    let history = History::with_clock(HistoryConfig::default(), Arc::new(clock.clone()));
    (clock, history)
}

// ===========================================================================
// 1. Basic undo/redo
// ===========================================================================

#[test]
fn single_round_trip() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history.add(v.set(1.0, 0.0)).unwrap();
    assert_eq!(v.get(), 1.0);
    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);
    history.redo().unwrap();
    assert_eq!(v.get(), 1.0);
}

#[test]
fn sequential_composition() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history.add(v.plus(1.0)).unwrap();
    assert_eq!(v.get(), 1.0);
    history.add(v.times(2.0)).unwrap();
    assert_eq!(v.get(), 2.0);

    history.undo().unwrap();
    assert_eq!(v.get(), 1.0);
    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);

    history.redo().unwrap();
    assert_eq!(v.get(), 1.0);
    history.redo().unwrap();
    assert_eq!(v.get(), 2.0);
}

// ===========================================================================
// 2. Coalescing
// ===========================================================================

#[test]
fn same_key_same_second_is_one_step() {
    let v = Probe::new(0.0);
    let (_clock, mut history) = manual_history();

    history.add(v.keyed_plus(&history, 1.0, "k")).unwrap();
    history.add(v.keyed_plus(&history, 1.0, "k")).unwrap();
    assert_eq!(v.get(), 2.0);

    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);
    history.redo().unwrap();
    assert_eq!(v.get(), 2.0);
}

#[test]
fn free_factory_coalesces_within_a_bucket() {
    // The process clock may tick over a bucket between the two calls; retry
    // until both land in the same bucket.
    for _ in 0..5 {
        let v = Probe::new(0.0);
        let mut history = History::default();
        let (f1, i1) = v.pair(1.0, |v, n| v + n, |v, n| v - n);
        let (f2, i2) = v.pair(1.0, |v, n| v + n, |v, n| v - n);
        let a = make_command(f1, i1, Some("k"));
        let b = make_command(f2, i2, Some("k"));
        if a.key() != b.key() {
            continue;
        }
        history.add(a).unwrap();
        history.add(b).unwrap();
        history.undo().unwrap();
        assert_eq!(v.get(), 0.0);
        return;
    }
    panic!("could not build two commands in the same bucket");
}

#[test]
fn drag_straddling_bucket_boundary_is_two_steps() {
    let v = Probe::new(0.0);
    let (clock, mut history) = manual_history();

    clock.set(Duration::from_millis(800));
    history.add(v.keyed_plus(&history, 1.0, "drag")).unwrap();
    clock.advance(Duration::from_millis(100));
    history.add(v.keyed_plus(&history, 1.0, "drag")).unwrap();
    clock.advance(Duration::from_millis(200));
    history.add(v.keyed_plus(&history, 1.0, "drag")).unwrap();

    assert_eq!(history.len(), 2);
    history.undo().unwrap();
    assert_eq!(v.get(), 2.0);
    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);
}

#[test]
fn gesture_key_spans_bucket_boundary() {
    let v = Probe::new(0.0);
    let (clock, mut history) = manual_history();

    for _ in 0..4 {
        let (f, i) = v.pair(1.0, |v, n| v + n, |v, n| v - n);
        let cmd = history.factory().gesture_keyed(f, i, "drag-17");
        history.add(cmd).unwrap();
        clock.advance(Duration::from_millis(700));
    }

    assert_eq!(history.len(), 1);
    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);
}

// ===========================================================================
// 3. Transactions
// ===========================================================================

#[test]
fn transaction_atomicity() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history
        .transaction(|h| {
            h.add(v.plus(1.0))?;
            h.add(v.times(2.0))
        })
        .unwrap();
    assert_eq!(v.get(), 2.0);

    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);
    history.redo().unwrap();
    assert_eq!(v.get(), 2.0);
}

#[test]
fn recursive_transaction_arithmetic() {
    let v = Probe::new(2.0);
    let (_clock, mut history) = manual_history();

    let mult = |h: &mut History, m: f64| -> Result<(), HistoryError> {
        let cmd = v.keyed_times(h, m, &format!("mult-{m}"));
        h.add(cmd)
    };
    let add = |h: &mut History, n: f64| h.add(v.plus(n));
    let pow = |h: &mut History, exponent: u32| {
        h.transaction(|h| {
            let base = v.get();
            for _ in 1..exponent {
                mult(h, base)?;
            }
            Ok(())
        })
    };

    history
        .transaction(|h| {
            mult(h, 2.0)?;
            mult(h, 2.0)?;
            pow(h, 2)?;
            add(h, 3.0)?;
            mult(h, 3.0)
        })
        .unwrap();
    assert_eq!(v.get(), 201.0);
    assert_eq!(history.len(), 1);

    history.undo().unwrap();
    assert_eq!(v.get(), 2.0);
    history.redo().unwrap();
    assert_eq!(v.get(), 201.0);
}

#[test]
fn nested_transactions_are_nested_composites() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history
        .transaction(|h| {
            h.add(v.plus(1.0))?;
            h.transaction(|h| {
                h.add(v.times(10.0))?;
                h.transaction(|h| h.add(v.plus(5.0)))
            })
        })
        .unwrap();
    assert_eq!(v.get(), 15.0);

    let outline = history.timeline()[0].outline();
    assert_eq!(
        outline,
        "transaction \"Transaction\" (2 entries)\n\
         \x20 command \"Edit\"\n\
         \x20 transaction \"Transaction\" (2 entries)\n\
         \x20   command \"Edit\"\n\
         \x20   transaction \"Transaction\" (1 entries)\n\
         \x20     command \"Edit\"\n"
    );

    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);
}

#[test]
fn transaction_after_undo_truncates_future() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history.add(v.plus(1.0)).unwrap();
    history.add(v.plus(2.0)).unwrap();
    history.undo().unwrap();
    history.transaction(|h| h.add(v.plus(10.0))).unwrap();

    assert_eq!(v.get(), 11.0);
    assert!(!history.redo().unwrap());
    assert_eq!(history.len(), 2);
}

#[test]
fn empty_transaction_keeps_redo_future() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history.add(v.plus(1.0)).unwrap();
    history.undo().unwrap();
    history.transaction(|_| Ok(())).unwrap();

    assert!(history.redo().unwrap());
    assert_eq!(v.get(), 1.0);
}

// ===========================================================================
// 4. Nested lists
// ===========================================================================

#[test]
fn nested_list_composition() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history
        .add(vec![
            Batch::from(v.plus(1.0)),
            Batch::from(vec![v.times(2.0), v.plus(3.0)]),
        ])
        .unwrap();
    assert_eq!(v.get(), 5.0);
    assert_eq!(history.len(), 1);

    history.undo().unwrap();
    assert_eq!(v.get(), 0.0);
    history.redo().unwrap();
    assert_eq!(v.get(), 5.0);
}

#[test]
fn keyed_commands_inside_list_do_not_coalesce() {
    let v = Probe::new(0.0);
    let (_clock, mut history) = manual_history();

    history.add(v.keyed_plus(&history, 1.0, "k")).unwrap();
    let keyed = v.keyed_plus(&history, 1.0, "k");
    history.add(vec![keyed]).unwrap();
    assert_eq!(history.len(), 2);
    assert!(matches!(history.timeline()[1], Entry::Composite(_)));
}

#[test]
fn list_deeper_than_limit_is_rejected() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    let mut batch = Batch::from(vec![v.plus(1.0)]);
    for _ in 0..21 {
        batch = Batch::List(vec![batch]);
    }
    let err = history.add(batch).unwrap_err();
    assert_eq!(err.to_string(), "Nested too many levels (limit 20)");
    assert_eq!(v.get(), 0.0);
    assert!(history.is_empty());
}

#[test]
fn list_at_limit_is_accepted() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    let mut batch = Batch::from(vec![v.plus(1.0)]);
    for _ in 0..20 {
        batch = Batch::List(vec![batch]);
    }
    history.add(batch).unwrap();
    assert_eq!(v.get(), 1.0);
}

// ===========================================================================
// 5. Branching and boundaries
// ===========================================================================

#[test]
fn future_truncation() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    history.add(v.set(1.0, 0.0)).unwrap();
    history.add(v.set(2.0, 1.0)).unwrap();
    history.undo().unwrap();
    history.add(v.set(3.0, 1.0)).unwrap();

    assert_eq!(v.get(), 3.0);
    assert!(!history.redo().unwrap());
    assert_eq!(v.get(), 3.0);
}

#[test]
fn boundary_noops() {
    let v = Probe::new(0.0);
    let mut history = History::default();

    assert!(!history.undo().unwrap());
    assert!(!history.redo().unwrap());
    assert_eq!(v.get(), 0.0);

    history.add(v.set(1.0, 0.0)).unwrap();
    assert!(!history.redo().unwrap());
    assert_eq!(v.get(), 1.0);

    history.undo().unwrap();
    assert!(!history.undo().unwrap());
    assert_eq!(v.get(), 0.0);
}

// ===========================================================================
// 6. Failure handling
// ===========================================================================

#[test]
fn failing_redo_leaves_pointer_and_state() {
    let v = Probe::new(0.0);
    let armed = Arc::new(Mutex::new(false));
    let trigger = Arc::clone(&armed);
    let mut history = History::default();

    let flaky = Command::new(
        move || {
            if *trigger.lock().unwrap() {
                Err(CommandError::InvalidState("node deleted".into()))
            } else {
                Ok(())
            }
        },
        || Ok(()),
    );
    history.add(vec![v.plus(1.0), flaky, v.plus(2.0)]).unwrap();
    history.undo().unwrap();
    *armed.lock().unwrap() = true;

    let err = history.redo().unwrap_err();
    assert!(matches!(err, HistoryError::Command(CommandError::InvalidState(_))));
    assert_eq!(v.get(), 0.0);
    assert_eq!(history.pointer(), None);
    assert!(history.can_redo());
}

#[test]
fn without_rollback_partial_effects_remain() {
    let v = Probe::new(0.0);
    let mut history = History::new(HistoryConfig::default().with_rollback(false));

    let err = history
        .add(vec![
            v.plus(1.0),
            Command::new(|| Err(CommandError::Other("boom".into())), || Ok(())),
        ])
        .unwrap_err();
    assert!(matches!(err, HistoryError::Command(_)));
    assert_eq!(v.get(), 1.0);
    assert!(history.is_empty());
}
