//! Watcher error policy: the backoff/recovery schedule, cursor restart
//! semantics, and chunk arithmetic under the 1000-block cap.

use hub_agent::cursor::CursorStore;
use hub_agent::watcher::{
    backoff_poll_ms, chunk_ranges, scan_start, BACKOFF_ERROR_THRESHOLD,
    CURSOR_RESET_ERROR_THRESHOLD,
};

#[test]
fn backoff_doubles_at_three_errors_then_every_second_error() {
    // Three consecutive errors double 2s to 4s; two more reach 8s; the
    // next success restores the base (the schedule is a pure function of
    // the streak, so recovery is just streak = 0).
    let base = 2_000;
    let cap = 30_000;
    assert_eq!(backoff_poll_ms(base, 1, cap), 2_000);
    assert_eq!(backoff_poll_ms(base, 2, cap), 2_000);
    assert_eq!(backoff_poll_ms(base, BACKOFF_ERROR_THRESHOLD, cap), 4_000);
    assert_eq!(backoff_poll_ms(base, 5, cap), 8_000);
    assert_eq!(backoff_poll_ms(base, 0, cap), 2_000);
}

#[test]
fn backoff_respects_the_ceiling() {
    for streak in 9..64 {
        assert!(backoff_poll_ms(2_000, streak, 30_000) <= 30_000);
    }
    assert_eq!(backoff_poll_ms(2_000, 9, 30_000), 30_000);
}

#[test]
fn reset_threshold_is_beyond_the_backoff_threshold() {
    assert!(CURSOR_RESET_ERROR_THRESHOLD > BACKOFF_ERROR_THRESHOLD);
}

#[test]
fn cursor_restart_resumes_exactly_after_the_saved_block() {
    let dir = tempfile::tempdir().unwrap();
    let store = CursorStore::new(dir.path());

    // First run scans and persists block 5000.
    store.save("hub-watcher", 5_000).unwrap();

    // A restarted watcher resumes at 5001: no event at block <= 5000 is
    // re-dispatched.
    let resumed = CursorStore::new(dir.path());
    let cursor = resumed.load("hub-watcher");
    assert_eq!(scan_start(cursor, 5_010, 1_000), 5_001);
}

#[test]
fn fresh_install_scans_the_configured_lookback() {
    let dir = tempfile::tempdir().unwrap();
    let store = CursorStore::new(dir.path());
    let cursor = store.load("hub-watcher");
    assert_eq!(cursor, 0);

    // Head 20_000 with lookback 1000: scan [19_001, 20_000].
    let from = scan_start(cursor, 20_000, 1_000);
    assert_eq!(from, 19_001);
    let ranges = chunk_ranges(from, 20_000, 1_000);
    assert_eq!(ranges, vec![(19_001, 20_000)]);
}

#[test]
fn forced_rescan_after_reset_covers_the_lookback_window() {
    // After the error threshold resets the in-memory cursor to 0, the next
    // successful poll covers current - lookback + 1 .. current, chunked.
    let from = scan_start(0, 123_456, 1_000);
    assert_eq!(from, 122_457);
    let ranges = chunk_ranges(from, 123_456, 1_000);
    assert_eq!(ranges.len(), 1);
    for (chunk_from, chunk_to) in ranges {
        assert!(chunk_to - chunk_from < 1_000);
    }
}

#[test]
fn wide_ranges_chunk_without_gaps_or_overlap() {
    let ranges = chunk_ranges(1, 50_000, 1_000);
    assert_eq!(ranges.len(), 50);
    let mut expected_start = 1;
    for (from, to) in &ranges {
        assert_eq!(*from, expected_start);
        assert!(*to - *from < 1_000);
        expected_start = to + 1;
    }
    assert_eq!(ranges.last().unwrap().1, 50_000);
}
