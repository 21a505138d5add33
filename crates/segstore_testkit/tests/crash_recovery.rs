//! Crash recovery across every point of the reload protocol.

use segstore_core::recovery::{inspect_reload_state, recover_segment_dir};
use segstore_core::{
    CoreError, DirectorySegmentLoader, RecoveryAction, ReloadOutcome, ReloadState, ReloadStep,
};
use segstore_storage::{layout, LocalFs};
use segstore_testkit::{
    sample_segment, snapshot_dir, stage_crash, CrashPoint, CrashRecoveryHarness, FaultPoint,
    FaultyFs, TestInstance, OFFLINE_TABLE,
};
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn injected_crash_at_every_point_recovers() {
    let mut harness = CrashRecoveryHarness::new();
    for point in CrashPoint::ALL {
        let result = harness.run(point);
        assert!(result.passed, "{}: {:?}", result.description, result.error);
        assert_eq!(result.state_after_crash, Some(point.expected_state()));
    }
}

#[test]
fn staged_crash_at_every_point_recovers() {
    let mut harness = CrashRecoveryHarness::new();
    for point in CrashPoint::ALL {
        let result = harness.run_staged(point);
        assert!(result.passed, "{}: {:?}", result.description, result.error);
    }
}

#[test]
fn run_all_passes() {
    let mut harness = CrashRecoveryHarness::new();
    let results = harness.run_all();
    assert_eq!(results.len(), CrashPoint::ALL.len() * 2);
    assert!(harness.all_passed());
}

#[test]
fn staged_shapes_match_states() {
    for point in CrashPoint::ALL {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("s1");
        sample_segment(OFFLINE_TABLE, "s1", 10).write(&dir).unwrap();

        stage_crash(&dir, point);
        assert_eq!(
            inspect_reload_state(&LocalFs::new(), &dir),
            point.expected_state(),
            "{point:?}"
        );
    }
}

#[test]
fn recovery_restores_backup_over_partial_primary() {
    let temp = tempdir().unwrap();
    let dir = temp.path().join("s1");
    sample_segment(OFFLINE_TABLE, "s1", 40).write(&dir).unwrap();
    let original = snapshot_dir(&dir);

    stage_crash(&dir, CrashPoint::InFlightPartialCopy);
    let report = recover_segment_dir(&LocalFs::new(), &dir, true).unwrap();

    assert_eq!(
        report.state,
        ReloadState::InFlight {
            primary_present: true
        }
    );
    assert!(report.actions.contains(&RecoveryAction::DiscardedPrimary));
    assert!(report.actions.contains(&RecoveryAction::RestoredBackup));
    assert_eq!(snapshot_dir(&dir), original);
    assert!(!layout::backup_dir(&dir).exists());
}

#[test]
fn recovery_without_verify_keeps_complete_primary() {
    let temp = tempdir().unwrap();
    let dir = temp.path().join("s1");
    sample_segment(OFFLINE_TABLE, "s1", 40).write(&dir).unwrap();
    let original = snapshot_dir(&dir);

    stage_crash(&dir, CrashPoint::InFlightAfterCopy);
    let report = recover_segment_dir(&LocalFs::new(), &dir, false).unwrap();

    assert_eq!(report.actions, vec![RecoveryAction::RemovedBackup]);
    assert_eq!(snapshot_dir(&dir), original);
}

#[test]
fn recovery_is_idempotent() {
    let temp = tempdir().unwrap();
    let dir = temp.path().join("s1");
    sample_segment(OFFLINE_TABLE, "s1", 8).write(&dir).unwrap();
    stage_crash(&dir, CrashPoint::Finalizing);

    let first = recover_segment_dir(&LocalFs::new(), &dir, true).unwrap();
    assert_eq!(first.actions, vec![RecoveryAction::RemovedTemp]);

    let second = recover_segment_dir(&LocalFs::new(), &dir, true).unwrap();
    assert!(second.is_noop());
}

#[test]
fn transient_fault_recovers_in_process() {
    let faulty = Arc::new(FaultyFs::new());
    let instance = TestInstance::with_components(
        |config| config,
        Arc::new(DirectorySegmentLoader::new()),
        faulty.clone(),
    );
    let dir = instance.add_offline("s1", 30);
    let original = snapshot_dir(&dir);
    let old = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();

    faulty.fail_once(FaultPoint::PartialCopy);
    let err = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap_err();
    assert!(matches!(
        err,
        CoreError::Reload {
            step: ReloadStep::Copy,
            ..
        }
    ));
    assert_eq!(faulty.faults(), 1);

    // The failed reload already put the directory back.
    assert!(inspect_reload_state(&LocalFs::new(), &dir).is_stable());
    assert_eq!(snapshot_dir(&dir), original);
    let served = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();
    assert!(served.same_handle(&old));
    drop(served);

    // The next attempt goes through.
    let outcome = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap();
    assert!(matches!(outcome, ReloadOutcome::Reloaded { total_docs: 30, .. }));
}

#[test]
fn failed_cleanup_still_swaps_and_leaves_stable_dir() {
    let faulty = Arc::new(FaultyFs::new());
    let instance = TestInstance::with_components(
        |config| config,
        Arc::new(DirectorySegmentLoader::new()),
        faulty.clone(),
    );
    let dir = instance.add_offline("s1", 30);
    let old = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();

    // Cleanup failures are logged and retried by the trailing recovery.
    faulty.fail_once(FaultPoint::Cleanup);
    let outcome = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap();
    assert!(!outcome.is_skipped());

    let served = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();
    assert!(!served.same_handle(&old));
    assert!(inspect_reload_state(&LocalFs::new(), &dir).is_stable());
    assert!(instance.stats().recoveries() >= 1);
}

#[test]
fn startup_sweep_recovers_every_segment() {
    let instance = TestInstance::new();
    let points = [
        CrashPoint::InFlightBeforeCopy,
        CrashPoint::InFlightPartialCopy,
        CrashPoint::Finalizing,
    ];
    let mut originals = Vec::new();
    for (i, point) in points.iter().enumerate() {
        let name = format!("s{i}");
        instance.write_segment(OFFLINE_TABLE, &name, 10 + i as u64);
        let dir = instance.segment_dir(OFFLINE_TABLE, &name);
        originals.push((dir.clone(), snapshot_dir(&dir)));
        stage_crash(&dir, *point);
    }

    let instance = instance.reopen();
    assert_eq!(instance.stats().recoveries(), points.len() as u64);
    for (dir, original) in originals {
        assert!(inspect_reload_state(&LocalFs::new(), &dir).is_stable());
        assert_eq!(snapshot_dir(&dir), original);
    }
}
