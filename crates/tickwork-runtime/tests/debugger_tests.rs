// Integration tests for pausing a running script and controlling it from another thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tickwork_runtime::{
    DebugEvent, Debugger, ExecutionContext, PauseReason, ScopeContext, SourceLocation, Value,
};

/// One statement of a toy script: assign `value` to `name` on `line`
struct Statement {
    line: u32,
    name: &'static str,
    value: i64,
}

fn script() -> Vec<Statement> {
    (1..=6)
        .map(|line| Statement {
            line,
            name: ["a", "b", "c", "d", "e", "f"][line as usize - 1],
            value: line as i64 * 10,
        })
        .collect()
}

/// Interpret `statements`, consulting the debugger before each one
fn run(
    debugger: &Debugger,
    script_id: &str,
    ctx: &mut ScopeContext,
    statements: &[Statement],
) -> usize {
    let mut pauses = 0;
    for stmt in statements {
        let location = SourceLocation::line(stmt.line);
        ctx.set_location(location);
        if debugger.should_pause(script_id, location, ctx) {
            pauses += 1;
        }
        ctx.set(stmt.name, stmt.value);
    }
    pauses
}

fn wait_for_pause(debugger: &Debugger) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !debugger.is_paused() {
        assert!(Instant::now() < deadline, "debugger never paused");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_breakpoint_blocks_until_controller_resumes() {
    let debugger = Arc::new(Debugger::new());
    debugger.set_enabled(true);
    debugger.add_breakpoint("a", 5, None);

    let (tx, rx) = mpsc::channel();
    let controller = {
        let debugger = debugger.clone();
        thread::spawn(move || {
            wait_for_pause(&debugger);
            let state = debugger.current_state().unwrap();
            tx.send((state.location.line, debugger.inspect_all_variables()))
                .unwrap();
            debugger.resume().unwrap();
        })
    };

    let mut ctx = ScopeContext::new();
    ctx.push_frame("main", "a", SourceLocation::line(1));
    let pauses = run(&debugger, "a", &mut ctx, &script());
    controller.join().unwrap();

    let (line, vars) = rx.recv().unwrap();
    assert_eq!(line, 5);
    // Statements before line 5 have run; line 5 itself has not
    assert_eq!(vars.get("d"), Some(&Value::Int(40)));
    assert!(!vars.contains_key("e"));

    // The script ran to completion after resuming
    assert_eq!(pauses, 1);
    assert_eq!(ctx.lookup("f"), Some(Value::Int(60)));
    assert!(!debugger.is_paused());
    assert_eq!(debugger.breakpoints("a")[0].hit_count, 1);
}

#[test]
fn test_conditional_breakpoint_depends_on_scope() {
    let debugger = Arc::new(Debugger::new());
    debugger.set_enabled(true);
    debugger.add_breakpoint("cond", 1, Some("x".to_string()));
    let weak = Arc::downgrade(&debugger);
    debugger.add_listener(move |event: &DebugEvent| {
        if matches!(event, DebugEvent::Paused { .. }) {
            if let Some(debugger) = weak.upgrade() {
                debugger.resume().unwrap();
            }
        }
    });

    let mut ctx = ScopeContext::new();
    ctx.set("x", 0i64);
    assert!(!debugger.should_pause("cond", SourceLocation::line(1), &ctx));

    ctx.set("x", 1i64);
    assert!(debugger.should_pause("cond", SourceLocation::line(1), &ctx));
    assert_eq!(debugger.breakpoints("cond")[0].hit_count, 1);
}

#[test]
fn test_step_over_pauses_on_following_statement() {
    let debugger = Arc::new(Debugger::new());
    debugger.set_enabled(true);
    debugger.add_breakpoint("s", 2, None);

    let (tx, rx) = mpsc::channel();
    let controller = {
        let debugger = debugger.clone();
        thread::spawn(move || {
            // First pause at the breakpoint, then one step over
            wait_for_pause(&debugger);
            tx.send(debugger.current_state().unwrap().location.line).unwrap();
            debugger.step_over().unwrap();

            let deadline = Instant::now() + Duration::from_secs(2);
            loop {
                if let Some(state) = debugger.current_state() {
                    if state.location.line != 2 {
                        tx.send(state.location.line).unwrap();
                        debugger.resume().unwrap();
                        break;
                    }
                }
                assert!(Instant::now() < deadline, "step never paused");
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let mut ctx = ScopeContext::new();
    ctx.push_frame("main", "s", SourceLocation::line(1));
    let pauses = run(&debugger, "s", &mut ctx, &script());
    controller.join().unwrap();

    assert_eq!(pauses, 2);
    assert_eq!(rx.iter().collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn test_disabling_debug_mode_releases_pause() {
    let debugger = Arc::new(Debugger::new());
    debugger.set_enabled(true);
    debugger.add_breakpoint("d", 1, None);

    let finished = Arc::new(AtomicBool::new(false));
    let controller = {
        let debugger = debugger.clone();
        let finished = finished.clone();
        thread::spawn(move || {
            wait_for_pause(&debugger);
            assert!(!finished.load(Ordering::SeqCst));
            debugger.set_enabled(false);
        })
    };

    let ctx = ScopeContext::new();
    assert!(debugger.should_pause("d", SourceLocation::line(1), &ctx));
    finished.store(true, Ordering::SeqCst);
    controller.join().unwrap();

    assert!(!debugger.is_paused());
    // Breakpoints are ignored while disabled
    assert!(!debugger.should_pause("d", SourceLocation::line(1), &ctx));
}

#[tokio::test]
async fn test_event_stream_reports_pause_lifecycle() {
    let debugger = Arc::new(Debugger::new());
    debugger.set_enabled(true);
    let mut events = debugger.subscribe();

    debugger.add_breakpoint("ev", 3, None);
    debugger.add_watch("y");
    let weak = Arc::downgrade(&debugger);
    debugger.add_listener(move |event: &DebugEvent| {
        if matches!(event, DebugEvent::Paused { .. }) {
            if let Some(debugger) = weak.upgrade() {
                debugger.resume().unwrap();
            }
        }
    });

    let mut ctx = ScopeContext::new();
    ctx.set("y", 2i64);
    assert!(debugger.should_pause("ev", SourceLocation::line(3), &ctx));

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(matches!(received[0], DebugEvent::BreakpointAdded { line: 3, .. }));
    assert!(matches!(
        received[1],
        DebugEvent::BreakpointHit { line: 3, hit_count: 1, .. }
    ));
    match &received[2] {
        DebugEvent::WatchUpdated { expression, value, error, .. } => {
            assert_eq!(expression, "y");
            assert_eq!(value, &Some(Value::Int(2)));
            assert!(error.is_none());
        }
        other => panic!("expected WatchUpdated, got {:?}", other),
    }
    match &received[3] {
        DebugEvent::Paused { script_id, reason, .. } => {
            assert_eq!(script_id, "ev");
            assert_eq!(reason, &PauseReason::Breakpoint { line: 3 });
        }
        other => panic!("expected Paused, got {:?}", other),
    }
    assert!(matches!(received[4], DebugEvent::Resumed));
    assert_eq!(received.len(), 5);
}
