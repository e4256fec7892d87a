//! Crash-safety scenarios: a rollback interrupted at any point must leave
//! every touched file whole after recovery.

use crate::harness::{MockClock, TestWorkspace};
use sback_core::{
    invert_changes, BackupPair, ChangeOp, FinalizeOutcome, HistoryEngine, JournalEntry,
    JournalStatus, Trigger, JOURNAL_DIR,
};
use std::fs;
use std::path::PathBuf;

/// Records a 3-file modify session (v1 → v2) and returns its outcome.
fn record_three_file_session(
    ws: &TestWorkspace,
    engine: &mut HistoryEngine,
) -> FinalizeOutcome {
    for name in ["a.txt", "b.txt", "c.txt"] {
        engine.track(&ws.abs(name), ChangeOp::Modified, None).unwrap();
        ws.write_file(name, format!("{} v2", name).as_bytes()).unwrap();
    }
    engine.finalize(&[Trigger::Manual]).unwrap()
}

fn pending_journal_path(ws: &TestWorkspace, session_id: &str) -> PathBuf {
    ws.data_dir()
        .join(JOURNAL_DIR)
        .join("pending")
        .join(format!("{}.json", session_id))
}

#[test]
fn test_crash_after_one_swap_recovers_to_pre_session_state() {
    let ws = TestWorkspace::with_files(&[
        ("a.txt", b"a.txt v1"),
        ("b.txt", b"b.txt v1"),
        ("c.txt", b"c.txt v1"),
    ])
    .unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();
    let outcome = record_three_file_session(&ws, &mut engine);
    let manifest = engine.get_manifest(&outcome.session_id).unwrap();

    // Reproduce the on-disk state of a rollback killed after its first
    // swap: a.txt has been swapped to v1 (its displaced v2 copy renamed
    // aside and journaled), b.txt and c.txt were not reached.
    let backup = ws.root().join("a.txt.bak-".to_string() + &outcome.session_id);
    fs::rename(ws.abs("a.txt"), &backup).unwrap();
    ws.write_file("a.txt", b"a.txt v1").unwrap();
    let entry = JournalEntry {
        session_id: outcome.session_id.clone(),
        created_at: clock.now_ms(),
        workspace_root: ws.root(),
        changes: invert_changes(&manifest.changes),
        backups: vec![BackupPair {
            original: ws.abs("a.txt"),
            backup: backup.clone(),
        }],
        status: JournalStatus::Pending,
    };
    let journal_path = pending_journal_path(&ws, &outcome.session_id);
    fs::create_dir_all(journal_path.parent().unwrap()).unwrap();
    fs::write(&journal_path, serde_json::to_vec_pretty(&entry).unwrap()).unwrap();

    // Crash, then restart: opening the engine runs the sweeper.
    drop(engine);
    let _engine = ws.engine(&clock).unwrap();

    for name in ["a.txt", "b.txt", "c.txt"] {
        assert_eq!(
            ws.read_file(name).unwrap(),
            format!("{} v1", name).as_bytes(),
            "{} should be at pre-session content",
            name
        );
    }
    assert!(ws.backup_files().is_empty());
    assert!(!journal_path.exists());
}

#[test]
fn test_crash_before_any_swap_discards_journal() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"a.txt v1")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    engine.track(&ws.abs("a.txt"), ChangeOp::Modified, None).unwrap();
    ws.write_file("a.txt", b"a.txt v2").unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();
    let manifest = engine.get_manifest(&outcome.session_id).unwrap();

    // Journal written, no swap performed, no backups.
    let entry = JournalEntry {
        session_id: outcome.session_id.clone(),
        created_at: clock.now_ms(),
        workspace_root: ws.root(),
        changes: invert_changes(&manifest.changes),
        backups: vec![],
        status: JournalStatus::Pending,
    };
    let journal_path = pending_journal_path(&ws, &outcome.session_id);
    fs::create_dir_all(journal_path.parent().unwrap()).unwrap();
    fs::write(&journal_path, serde_json::to_vec_pretty(&entry).unwrap()).unwrap();

    drop(engine);
    let _engine = ws.engine(&clock).unwrap();

    // Nothing had been applied, so the workspace stays post-session.
    assert_eq!(ws.read_file("a.txt").unwrap(), b"a.txt v2");
    assert!(!journal_path.exists());
}

#[test]
fn test_committed_journals_pruned_after_retention_window() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"A")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    engine.track(&ws.abs("a.txt"), ChangeOp::Modified, None).unwrap();
    ws.write_file("a.txt", b"B").unwrap();
    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();
    engine
        .rollback(&outcome.session_id, &Default::default(), None)
        .unwrap();

    let committed = ws
        .data_dir()
        .join(JOURNAL_DIR)
        .join("committed")
        .join(format!("{}.json", outcome.session_id));
    assert!(committed.exists());

    // Inside the retention window the journal survives restarts.
    drop(engine);
    let engine = ws.engine(&clock).unwrap();
    assert!(committed.exists());

    // Eight days later it is pruned.
    drop(engine);
    clock.advance_hours(8 * 24);
    let _engine = ws.engine(&clock).unwrap();
    assert!(!committed.exists());
}

#[test]
fn test_crashed_session_buffer_survives_restart() {
    let ws = TestWorkspace::with_files(&[("a.txt", b"A")]).unwrap();
    let clock = MockClock::new();
    let mut engine = ws.engine(&clock).unwrap();

    engine.track(&ws.abs("a.txt"), ChangeOp::Modified, None).unwrap();
    ws.write_file("a.txt", b"B").unwrap();
    engine.flush().unwrap();
    let sid = engine.current().unwrap().session_id;

    // Crash without finalize; the scratch row brings the session back.
    drop(engine);
    let mut engine = ws.engine(&clock).unwrap();
    assert_eq!(engine.current().unwrap().session_id, sid);

    let outcome = engine.finalize(&[Trigger::Manual]).unwrap();
    assert_eq!(outcome.session_id, sid);

    // The shadow captured before the crash still resolves: rollback
    // restores the original content.
    engine
        .rollback(&outcome.session_id, &Default::default(), None)
        .unwrap();
    assert_eq!(ws.read_file("a.txt").unwrap(), b"A");
}
