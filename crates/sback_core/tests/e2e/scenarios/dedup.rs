//! Near-duplicate session suppression scenarios.

use crate::harness::{MockClock, TestWorkspace};
use sback_core::{ChangeOp, HistoryEngine, Trigger};

const FILES: [&str; 6] = ["a.rs", "b.rs", "c.rs", "d.rs", "e.rs", "f.rs"];

fn track_six(ws: &TestWorkspace, engine: &mut HistoryEngine) {
    for name in FILES {
        ws.write_file(name, name.as_bytes()).unwrap();
        engine.track(&ws.abs(name), ChangeOp::Created, None).unwrap();
    }
}

#[test]
fn test_double_finalize_within_window_persists_once() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    track_six(&ws, &mut engine);
    let first = engine.finalize(&[Trigger::Manual]).unwrap();
    assert!(!first.deduplicated);

    clock.advance_minutes(1);
    track_six(&ws, &mut engine);
    let second = engine.finalize(&[Trigger::Manual]).unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.session_id, first.session_id);

    assert_eq!(engine.list(10).unwrap().len(), 1);
}

#[test]
fn test_identical_sessions_outside_window_both_persist() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    track_six(&ws, &mut engine);
    engine.finalize(&[Trigger::Manual]).unwrap();

    // Past the 5-minute dedup window.
    clock.advance_minutes(6);
    track_six(&ws, &mut engine);
    let second = engine.finalize(&[Trigger::Manual]).unwrap();
    assert!(!second.deduplicated);
    assert_eq!(engine.list(10).unwrap().len(), 2);
}

#[test]
fn test_different_content_is_not_deduplicated() {
    let ws = TestWorkspace::empty().unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    track_six(&ws, &mut engine);
    engine.finalize(&[Trigger::Manual]).unwrap();

    clock.advance_minutes(1);
    for name in FILES {
        ws.write_file(name, b"changed").unwrap();
        engine.track(&ws.abs(name), ChangeOp::Modified, None).unwrap();
    }
    let second = engine.finalize(&[Trigger::Manual]).unwrap();
    assert!(!second.deduplicated);
    assert_eq!(engine.list(10).unwrap().len(), 2);
}
