use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tessera_events::{NestingExceeded, ScopeContext};

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

fn push(log: &Log, entry: &str) {
    log.borrow_mut().push(entry.to_string());
}

// ── Activation ───────────────────────────────────────────────────

#[test]
fn begin_makes_scope_current_and_records_parent() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    assert!(ctx.current().is_none());

    let outer = ctx.begin();
    assert_eq!(ctx.current(), Some(outer.clone()));

    let inner = ctx.begin();
    assert_eq!(inner.parent(), Some(outer.clone()));
    assert_eq!(ctx.current(), Some(inner.clone()));

    inner.exit().unwrap();
    assert_eq!(ctx.current(), Some(outer.clone()));
    outer.exit().unwrap();
    assert!(ctx.current().is_none());
}

#[test]
fn on_exit_without_scope_runs_immediately() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let entries = log();
    let e = Rc::clone(&entries);
    ctx.on_exit(move || {
        push(&e, "now");
        Ok(())
    })
    .unwrap();
    assert_eq!(*entries.borrow(), vec!["now"]);
}

#[test]
fn exit_without_work_just_deactivates() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let scope = ctx.begin();
    scope.exit().unwrap();
    assert!(!scope.is_active());
    // Exiting twice is harmless.
    scope.exit().unwrap();
}

// ── Flush and transfer ───────────────────────────────────────────

#[test]
fn outermost_scope_runs_work_in_subscription_order() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let entries = log();

    let scope = ctx.begin();
    for name in ["a", "b", "c"] {
        let e = Rc::clone(&entries);
        ctx.on_exit(move || {
            push(&e, name);
            Ok(())
        })
        .unwrap();
    }
    assert!(entries.borrow().is_empty());
    scope.exit().unwrap();
    assert_eq!(*entries.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn nested_scope_transfers_work_to_parent() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let entries = log();

    let outer = ctx.begin();
    let inner = ctx.begin();
    let e = Rc::clone(&entries);
    ctx.on_exit(move || {
        push(&e, "inner work");
        Ok(())
    })
    .unwrap();

    inner.exit().unwrap();
    assert!(entries.borrow().is_empty());
    // Handed over during the outer body, so not part of a cascade.
    assert_eq!(outer.transfers(), 0);
    assert_eq!(outer.pending_exit_handlers(), 1);

    outer.exit().unwrap();
    assert_eq!(*entries.borrow(), vec!["inner work"]);
}

#[test]
fn work_added_while_flushing_runs_in_the_same_flush() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let entries = log();

    let scope = ctx.begin();
    let c = ctx.clone();
    let e = Rc::clone(&entries);
    ctx.on_exit(move || {
        push(&e, "first");
        let e2 = Rc::clone(&e);
        c.perform(|| {
            c.on_exit(move || {
                push(&e2, "cascade");
                Ok(())
            })
        })
    })
    .unwrap();

    scope.exit().unwrap();
    assert_eq!(*entries.borrow(), vec!["first", "cascade"]);
}

#[test]
fn only_work_produced_while_flushing_deepens_the_cascade() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let outer = ctx.begin();

    let c = ctx.clone();
    ctx.on_exit(move || {
        c.perform(|| c.on_exit(|| Ok(())))?;
        assert_eq!(c.current().map(|s| s.transfers()), Some(1));
        Ok(())
    })
    .unwrap();
    ctx.perform(|| ctx.on_exit(|| Ok(()))).unwrap();
    assert_eq!(outer.transfers(), 0);

    outer.exit().unwrap();
    assert_eq!(outer.transfers(), 1);
}

#[test]
fn wide_batches_stay_below_the_ceiling() {
    let ctx: ScopeContext<String> = ScopeContext::new(10);
    let runs = Rc::new(Cell::new(0usize));
    let exceeded = Rc::new(Cell::new(false));
    let x = Rc::clone(&exceeded);
    ctx.on_nesting_exceeded(move |_| x.set(true));

    ctx.perform(|| {
        for _ in 0..150 {
            let r = Rc::clone(&runs);
            ctx.perform(|| {
                ctx.on_exit(move || {
                    r.set(r.get() + 1);
                    Ok(())
                })
            })?;
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(runs.get(), 150);
    assert!(!exceeded.get());
}

// ── Perform ──────────────────────────────────────────────────────

#[test]
fn perform_exits_even_when_work_fails() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let entries = log();
    let e = Rc::clone(&entries);

    let result: Result<(), String> = ctx.perform(|| {
        ctx.on_exit(move || {
            push(&e, "flushed");
            Ok(())
        })?;
        Err("boom".into())
    });

    assert_eq!(result.unwrap_err(), "boom");
    assert_eq!(*entries.borrow(), vec!["flushed"]);
    assert!(ctx.current().is_none());
}

#[test]
fn error_in_exit_work_surfaces_from_perform_and_releases_the_rest() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let released = Rc::new(Cell::new(false));
    let ran_after = Rc::new(Cell::new(false));

    let r = Rc::clone(&released);
    let a = Rc::clone(&ran_after);
    let result = ctx.perform(|| {
        ctx.on_abort(move |_| r.set(true));
        ctx.on_exit(|| Err("rule failed".to_string()))?;
        ctx.on_exit(move || {
            a.set(true);
            Ok(())
        })
    });

    assert_eq!(result.unwrap_err(), "rule failed");
    assert!(released.get());
    assert!(!ran_after.get());
}

#[test]
fn perform_returns_work_value() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let value = ctx.perform(|| Ok::<_, String>(42)).unwrap();
    assert_eq!(value, 42);
}

// ── Abort ────────────────────────────────────────────────────────

#[test]
fn abort_runs_abort_handlers_and_discards_exit_work() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let entries = log();

    let scope = ctx.begin();
    let e = Rc::clone(&entries);
    ctx.on_exit(move || {
        push(&e, "exit");
        Ok(())
    })
    .unwrap();
    let e = Rc::clone(&entries);
    ctx.on_abort(move |ceiling| push(&e, &format!("abort {ceiling}")));

    scope.abort(false);
    assert_eq!(*entries.borrow(), vec!["abort false"]);
    assert!(!scope.is_active());
    assert!(ctx.current().is_none());
}

#[test]
fn aborting_inner_scope_restores_active_ancestor() {
    let ctx: ScopeContext<String> = ScopeContext::default();
    let outer = ctx.begin();
    let inner = ctx.begin();
    inner.abort(false);
    assert_eq!(ctx.current(), Some(outer.clone()));
    outer.exit().unwrap();
}

#[test]
fn transfer_ceiling_aborts_runaway_cascade() {
    let ctx: ScopeContext<String> = ScopeContext::new(10);
    let runs = Rc::new(Cell::new(0usize));
    let exceeded = Rc::new(RefCell::new(Vec::new()));

    let x = Rc::clone(&exceeded);
    ctx.on_nesting_exceeded(move |event| x.borrow_mut().push(*event));

    fn reschedule(ctx: &ScopeContext<String>, runs: &Rc<Cell<usize>>) -> Result<(), String> {
        let c = ctx.clone();
        let r = Rc::clone(runs);
        ctx.on_exit(move || {
            r.set(r.get() + 1);
            c.perform(|| reschedule(&c, &r))
        })
    }

    ctx.perform(|| reschedule(&ctx, &runs)).unwrap();

    // One run from the outer flush, then one per accepted transfer.
    assert_eq!(runs.get(), 10);
    assert_eq!(
        *exceeded.borrow(),
        vec![NestingExceeded {
            transfers: 10,
            ceiling: 10
        }]
    );
    assert!(ctx.current().is_none());
}
