//! Concurrency guarantees of reload, serving, and admission.

use segstore_core::{CoreError, ErrorKind, LifecycleState, ReloadOutcome, SkipReason};
use segstore_storage::LocalFs;
use segstore_testkit::{
    stress_acquire_during_reload, stress_parallel_reloads, InstrumentedLoader, StressConfig,
    TestInstance, OFFLINE_TABLE, REALTIME_TABLE,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn instrumented(max_parallel_reloads: usize) -> (TestInstance, Arc<InstrumentedLoader>) {
    let loader = Arc::new(InstrumentedLoader::new());
    let instance = TestInstance::with_components(
        |config| config.max_parallel_reloads(max_parallel_reloads),
        loader.clone(),
        Arc::new(LocalFs::new()),
    );
    (instance, loader)
}

#[test]
fn same_segment_reloads_are_serialized() {
    let (instance, loader) = instrumented(4);
    instance.add_offline("s1", 16);
    loader.set_delay(Duration::from_millis(30));

    let barrier = Barrier::new(4);
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                barrier.wait();
                let outcome = instance.reload_segment(OFFLINE_TABLE, "s1").unwrap();
                assert!(!outcome.is_skipped());
            });
        }
    });

    assert_eq!(loader.peak_active_for("s1"), 1);
    assert_eq!(instance.stats().reloads_succeeded(), 4);
}

#[test]
fn different_segment_reloads_run_concurrently() {
    let (instance, loader) = instrumented(3);
    for name in ["s0", "s1", "s2"] {
        instance.add_offline(name, 16);
    }
    loader.set_delay(Duration::from_millis(150));

    let barrier = Barrier::new(3);
    thread::scope(|scope| {
        for name in ["s0", "s1", "s2"] {
            let barrier = &barrier;
            let instance = &instance;
            scope.spawn(move || {
                barrier.wait();
                instance.reload_segment(OFFLINE_TABLE, name).unwrap();
            });
        }
    });

    assert!(loader.peak_active() >= 2, "peak {}", loader.peak_active());
}

#[test]
fn admission_gate_bounds_parallel_reloads() {
    let (instance, loader) = instrumented(2);
    let segments: Vec<String> = (0..5).map(|i| format!("s{i}")).collect();
    for name in &segments {
        instance.add_offline(name, 8);
    }
    loader.set_delay(Duration::from_millis(40));

    let barrier = Barrier::new(segments.len());
    thread::scope(|scope| {
        for name in &segments {
            let barrier = &barrier;
            let instance = &instance;
            scope.spawn(move || {
                barrier.wait();
                instance.reload_segment(OFFLINE_TABLE, name).unwrap();
            });
        }
    });

    assert!(loader.peak_active() <= 2, "peak {}", loader.peak_active());
    assert!(instance.stats().admission_waits() >= 1);
    assert_eq!(instance.stats().reloads_succeeded(), 5);
}

#[test]
fn admission_times_out_when_slots_stay_busy() {
    let loader = Arc::new(InstrumentedLoader::new());
    let instance = TestInstance::with_components(
        |config| {
            config
                .max_parallel_reloads(1)
                .reload_admission_timeout(Some(Duration::from_millis(20)))
        },
        loader.clone(),
        Arc::new(LocalFs::new()),
    );
    instance.add_offline("s1", 8);
    instance.add_offline("s2", 8);
    loader.set_delay(Duration::from_millis(400));

    thread::scope(|scope| {
        let slow = scope.spawn(|| instance.reload_segment(OFFLINE_TABLE, "s1"));

        // Let the slow reload take the only slot.
        while loader.peak_active() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let err = instance.reload_segment(OFFLINE_TABLE, "s2").unwrap_err();
        assert!(matches!(err, CoreError::AdmissionTimeout { .. }));
        assert_eq!(err.kind(), ErrorKind::Admission);

        assert!(slow.join().unwrap().is_ok());
    });
}

#[test]
fn readers_never_see_torn_handles() {
    let instance = TestInstance::new();
    instance.add_offline("s1", 64);

    let config = StressConfig {
        reloads: 10,
        threads: 4,
    };
    let result = stress_acquire_during_reload(&instance, OFFLINE_TABLE, "s1", 64, &config);
    result.print_summary("acquire during reload");
    assert_eq!(result.failed_ops, 0);

    let stats = instance.stats().snapshot();
    assert_eq!(stats.live_acquisitions(), 0);
}

#[test]
fn parallel_reloads_of_a_table_succeed() {
    let (instance, _loader) = instrumented(2);
    let segments: Vec<String> = (0..4).map(|i| format!("s{i}")).collect();
    for name in &segments {
        instance.add_offline(name, 8);
    }

    let config = StressConfig {
        reloads: 6,
        threads: 4,
    };
    let result = stress_parallel_reloads(&instance, OFFLINE_TABLE, &segments, &config);
    assert_eq!(result.failed_ops, 0);
    assert_eq!(result.successful_ops, 24);
}

#[test]
fn removed_segment_lives_until_last_reader_releases() {
    let instance = TestInstance::new();
    instance.add_offline("s1", 8);
    let held = instance.acquire_segment(OFFLINE_TABLE, "s1").unwrap();

    thread::scope(|scope| {
        scope
            .spawn(|| instance.remove_segment(OFFLINE_TABLE, "s1").unwrap())
            .join()
            .unwrap();
    });

    assert!(instance.acquire_segment(OFFLINE_TABLE, "s1").is_none());
    assert!(!held.is_destroyed());
    assert_eq!(instance.stats().segments_disposed(), 0);

    drop(held);
    assert_eq!(instance.stats().segments_disposed(), 1);
}

#[test]
fn reload_racing_remove_ends_removed() {
    let (instance, loader) = instrumented(2);
    instance.add_offline("s1", 8);
    loader.set_delay(Duration::from_millis(30));

    thread::scope(|scope| {
        let reload = scope.spawn(|| instance.reload_segment(OFFLINE_TABLE, "s1"));
        thread::sleep(Duration::from_millis(5));
        instance.remove_segment(OFFLINE_TABLE, "s1").unwrap();
        assert!(reload.join().unwrap().is_ok());
    });

    // Whichever takes the segment lock first, the removal is not undone.
    assert!(instance.acquire_segment(OFFLINE_TABLE, "s1").is_none());

    assert_eq!(
        instance.reload_segment(OFFLINE_TABLE, "s1").unwrap(),
        ReloadOutcome::Skipped(SkipReason::NotLoaded)
    );
}

#[test]
fn shut_down_during_slow_add_is_not_undone() {
    let (instance, loader) = instrumented(2);
    instance.write_segment(OFFLINE_TABLE, "s1", 8);
    instance.write_segment(REALTIME_TABLE, "r1", 8);
    let offline_dir = instance.segment_dir(OFFLINE_TABLE, "s1");
    loader.set_delay(Duration::from_millis(200));

    thread::scope(|scope| {
        let offline = scope.spawn(|| instance.add_offline_segment(OFFLINE_TABLE, "s1", &offline_dir));
        let realtime = scope.spawn(|| instance.add_realtime_segment(REALTIME_TABLE, "r1"));
        thread::sleep(Duration::from_millis(50));
        instance.shut_down();

        for result in [offline.join().unwrap(), realtime.join().unwrap()] {
            let err = result.unwrap_err();
            assert!(matches!(err, CoreError::InstanceShutDown));
            assert_eq!(err.kind(), ErrorKind::Lifecycle);
        }
    });

    assert_eq!(loader.loads(), 2);
    assert_eq!(instance.state(), LifecycleState::ShutDown);
    assert!(instance.get_all_tables().is_empty());
    assert!(instance.acquire_segment(OFFLINE_TABLE, "s1").is_none());
}
