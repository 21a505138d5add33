//! End-to-end reload scenarios against a real data directory.

use segstore_core::recovery::{inspect_reload_state, recover_data_dir};
use segstore_core::{CoreError, ErrorKind, LifecycleState, ReloadOutcome, ReloadStep, SkipReason};
use segstore_storage::format::column_path;
use segstore_storage::{layout, LocalFs};
use segstore_testkit::{snapshot_dir, TestInstance, OFFLINE_TABLE, REALTIME_TABLE, TEST_COLUMN};
use std::fs;

fn failed_step(err: &CoreError) -> Option<ReloadStep> {
    match err {
        CoreError::Reload { step, .. } => Some(*step),
        _ => None,
    }
}

fn corrupt_column(dir: &std::path::Path) {
    let path = column_path(dir, TEST_COLUMN);
    let mut data = fs::read(&path).unwrap();
    data[0] ^= 0xFF;
    fs::write(&path, data).unwrap();
}

#[test]
fn reload_is_byte_identical_and_swaps_handle() {
    let instance = TestInstance::new();
    let dir = instance.add_offline("s1", 100);
    let before = snapshot_dir(&dir);
    let old = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();

    let outcome = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap();
    match outcome {
        ReloadOutcome::Reloaded {
            total_docs,
            bytes_copied,
        } => {
            assert_eq!(total_docs, 100);
            assert!(bytes_copied > 0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(snapshot_dir(&dir), before);
    assert!(!layout::backup_dir(&dir).exists());
    assert!(!layout::temp_dir(&dir).exists());
    assert!(inspect_reload_state(&LocalFs::new(), &dir).is_stable());

    let new = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();
    assert!(!new.same_handle(&old));
    assert_eq!(new.total_docs(), 100);

    // Old handle stays usable until its last reader lets go.
    assert!(!old.is_destroyed());
    assert_eq!(old.total_docs(), 100);
    let disposed = instance.stats().segments_disposed();
    drop(old);
    assert_eq!(instance.stats().segments_disposed(), disposed + 1);
    assert_eq!(instance.stats().reloads_succeeded(), 1);
}

#[test]
fn consuming_segment_is_skipped() {
    let instance = TestInstance::new();
    instance
        .add_realtime_segment(REALTIME_TABLE, "clicks__0__0")
        .unwrap();

    let outcome = instance
        .reload_segment(REALTIME_TABLE, "clicks__0__0")
        .unwrap();
    assert_eq!(outcome, ReloadOutcome::Skipped(SkipReason::Consuming));
    assert!(!instance.segment_dir(REALTIME_TABLE, "clicks__0__0").exists());
}

#[test]
fn completed_realtime_segment_reloads() {
    let instance = TestInstance::new();
    instance.write_segment(REALTIME_TABLE, "clicks__0__1", 12);
    instance
        .add_realtime_segment(REALTIME_TABLE, "clicks__0__1")
        .unwrap();

    let segment = instance
        .acquire_segment(REALTIME_TABLE, "clicks__0__1")
        .unwrap();
    assert!(!segment.is_consuming());
    drop(segment);

    let outcome = instance
        .reload_segment(REALTIME_TABLE, "clicks__0__1")
        .unwrap();
    assert!(!outcome.is_skipped());
}

#[test]
fn unknown_segment_is_skipped() {
    let instance = TestInstance::new();
    instance.add_offline("s1", 4);

    assert_eq!(
        instance.reload_segment(OFFLINE_TABLE, "missing").unwrap(),
        ReloadOutcome::Skipped(SkipReason::NotLoaded)
    );
    assert_eq!(
        instance.reload_segment("other_OFFLINE", "s1").unwrap(),
        ReloadOutcome::Skipped(SkipReason::NotLoaded)
    );
}

#[test]
fn reload_all_reports_corrupt_segment_and_continues() {
    let instance = TestInstance::new();
    for name in ["s1", "s2", "s3"] {
        instance.add_offline(name, 16);
    }
    let s2_dir = instance.segment_dir(OFFLINE_TABLE, "s2");
    corrupt_column(&s2_dir);
    let old_s2 = instance.acquire_segment(OFFLINE_TABLE, "s2").unwrap();

    let summary = instance.reload_all_segments(OFFLINE_TABLE).unwrap();
    assert_eq!(summary.reloaded, vec!["s1".to_string(), "s3".to_string()]);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.failed.len(), 1);

    let (name, err) = &summary.failed[0];
    assert_eq!(name, "s2");
    assert_eq!(failed_step(err), Some(ReloadStep::Load));
    assert_eq!(err.kind(), ErrorKind::Load);

    // The previous handle keeps serving and the directory is stable.
    let served = instance.acquire_segment(OFFLINE_TABLE, "s2").unwrap();
    assert!(served.same_handle(&old_s2));
    assert!(inspect_reload_state(&LocalFs::new(), &s2_dir).is_stable());

    match summary.into_result() {
        Err(CoreError::ReloadIncomplete { table, failed }) => {
            assert_eq!(table, OFFLINE_TABLE);
            assert_eq!(failed, vec!["s2".to_string()]);
        }
        other => panic!("expected incomplete reload, got {other:?}"),
    }
}

#[test]
fn reload_is_idempotent() {
    let instance = TestInstance::new();
    let dir = instance.add_offline("s1", 20);
    let before = snapshot_dir(&dir);

    for _ in 0..3 {
        instance.reload_segment(OFFLINE_TABLE, "s1").unwrap();
        assert_eq!(snapshot_dir(&dir), before);
    }

    let sweep = recover_data_dir(&LocalFs::new(), instance.segment_data_dir(), true).unwrap();
    assert!(sweep.is_clean());
    assert!(sweep.reports.is_empty());
    assert_eq!(instance.stats().reloads_succeeded(), 3);
}

#[test]
fn missing_directory_fails_validation_and_keeps_handle() {
    let instance = TestInstance::new();
    let dir = instance.add_offline("s1", 8);
    let old = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();
    fs::remove_dir_all(&dir).unwrap();

    let err = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap_err();
    assert_eq!(failed_step(&err), Some(ReloadStep::Validate));
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let served = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();
    assert!(served.same_handle(&old));
    assert_eq!(instance.stats().reloads_failed(), 1);
}

#[test]
fn missing_catalog_entries_are_preconditions() {
    let instance = TestInstance::new();
    instance.add_offline("s1", 8);

    instance.catalog.remove_schema(OFFLINE_TABLE);
    let err = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap_err();
    assert!(matches!(err, CoreError::SchemaNotFound { .. }));

    instance.catalog.remove_table(OFFLINE_TABLE);
    let err = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap_err();
    assert!(matches!(err, CoreError::TableConfigNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::Precondition);
}

#[test]
fn remove_keeps_files_on_disk() {
    let instance = TestInstance::new();
    let dir = instance.add_offline("s1", 8);

    instance.remove_segment(OFFLINE_TABLE, "s1").unwrap();
    assert!(instance.acquire_segment(OFFLINE_TABLE, "s1").is_none());
    assert!(dir.is_dir());

    // Unknown tables and segments are a no-op.
    instance.remove_segment(OFFLINE_TABLE, "s1").unwrap();
    instance.remove_segment("nope_OFFLINE", "s1").unwrap();
}

#[test]
fn metadata_queries_follow_reloads() {
    let instance = TestInstance::new();
    instance.add_offline("b", 5);
    instance.add_offline("a", 3);

    let names: Vec<_> = instance
        .get_all_segments_metadata(OFFLINE_TABLE)
        .into_iter()
        .map(|m| m.segment_name)
        .collect();
    assert_eq!(names, vec!["a", "b"]);

    // Rewrite with more rows, then refresh through the offline add path.
    instance.write_segment(OFFLINE_TABLE, "a", 9);
    let dir = instance.segment_dir(OFFLINE_TABLE, "a");
    instance
        .add_offline_segment(OFFLINE_TABLE, "a", &dir)
        .unwrap();
    let metadata = instance.get_segment_metadata(OFFLINE_TABLE, "a").unwrap();
    assert_eq!(metadata.total_docs, 9);

    assert!(instance.get_all_tables().contains(OFFLINE_TABLE));
    assert!(instance.get_segment_metadata(OFFLINE_TABLE, "zzz").is_none());
}

#[test]
fn lifecycle_commands_fail_after_shutdown() {
    let instance = TestInstance::new();
    instance.start().unwrap();
    instance.add_offline("s1", 4);
    let held = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();

    instance.shut_down();
    assert_eq!(instance.state(), LifecycleState::ShutDown);
    assert!(!held.is_destroyed());
    drop(held);

    let err = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap_err();
    assert!(matches!(err, CoreError::InstanceShutDown));
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
    assert!(instance.start().is_err());
    assert!(instance.get_all_tables().is_empty());
}
