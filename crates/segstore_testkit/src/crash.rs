//! Crash recovery testing for segstore.
//!
//! This module provides utilities for testing how interrupted reloads are
//! recovered. A crash is simulated in two ways:
//!
//! 1. **Staged** - [`stage_crash`] rearranges a stable segment directory
//!    into the shape a crash at a given point would leave on disk.
//! 2. **Injected** - [`FaultyFs`] fails a chosen reload step. In crash mode
//!    every later mutation fails too, so in-process recovery cannot run and
//!    the on-disk shape is frozen as the crash left it.
//!
//! In both cases the instance is then reopened and the startup recovery
//! sweep must restore a stable directory with the original data.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segstore_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let result = CrashRecoveryHarness::new().run(CrashPoint::InFlightPartialCopy);
//! assert!(result.passed, "{:?}", result.error);
//! ```

use crate::fixtures::{snapshot_dir, TestInstance, OFFLINE_TABLE};
use parking_lot::Mutex;
use segstore_core::recovery::inspect_reload_state;
use segstore_core::{DirectorySegmentLoader, ReloadState};
use segstore_storage::{layout, LocalFs, SegmentFs, StorageError, StorageResult, MANIFEST_FILE};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Points of the reload protocol at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// Before the reload touched the disk.
    Stable,
    /// After the primary was renamed to the backup, before any copy.
    InFlightBeforeCopy,
    /// During the copy; the primary holds some files but no manifest.
    InFlightPartialCopy,
    /// After the copy completed, before the backup was finalized.
    InFlightAfterCopy,
    /// After the backup was renamed to the temp suffix.
    Finalizing,
}

impl CrashPoint {
    /// Every crash point, in protocol order.
    pub const ALL: [Self; 5] = [
        Self::Stable,
        Self::InFlightBeforeCopy,
        Self::InFlightPartialCopy,
        Self::InFlightAfterCopy,
        Self::Finalizing,
    ];

    /// Returns the shape [`inspect_reload_state`] must report for this
    /// crash point.
    #[must_use]
    pub const fn expected_state(self) -> ReloadState {
        match self {
            Self::Stable => ReloadState::Stable,
            Self::InFlightBeforeCopy => ReloadState::InFlight {
                primary_present: false,
            },
            Self::InFlightPartialCopy | Self::InFlightAfterCopy => ReloadState::InFlight {
                primary_present: true,
            },
            Self::Finalizing => ReloadState::Finalizing,
        }
    }

    /// Returns the reload step a [`FaultyFs`] must fail to freeze the disk
    /// at this crash point.
    #[must_use]
    pub const fn fault(self) -> FaultPoint {
        match self {
            Self::Stable => FaultPoint::BackupRename,
            Self::InFlightBeforeCopy => FaultPoint::Copy,
            Self::InFlightPartialCopy => FaultPoint::PartialCopy,
            Self::InFlightAfterCopy => FaultPoint::FinalizeRename,
            Self::Finalizing => FaultPoint::Cleanup,
        }
    }
}

/// Rearranges the stable segment directory `index_dir` into the shape a
/// crash at `point` leaves behind.
///
/// # Panics
///
/// Panics if `index_dir` is not a segment directory.
pub fn stage_crash(index_dir: &Path, point: CrashPoint) {
    let backup = layout::backup_dir(index_dir);
    let local = LocalFs::new();

    match point {
        CrashPoint::Stable => {}
        CrashPoint::InFlightBeforeCopy => {
            local.rename(index_dir, &backup).expect("Failed to stage backup");
        }
        CrashPoint::InFlightPartialCopy => {
            local.rename(index_dir, &backup).expect("Failed to stage backup");
            copy_partial(&backup, index_dir).expect("Failed to stage partial copy");
        }
        CrashPoint::InFlightAfterCopy => {
            local.rename(index_dir, &backup).expect("Failed to stage backup");
            local
                .copy_dir(&backup, index_dir)
                .expect("Failed to stage copy");
        }
        CrashPoint::Finalizing => {
            local
                .copy_dir(index_dir, &layout::temp_dir(index_dir))
                .expect("Failed to stage temp directory");
        }
    }
}

/// Copies every file except the manifest, then truncates one column file.
fn copy_partial(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir(to)?;
    let mut truncated = false;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_name() == MANIFEST_FILE {
            continue;
        }
        let data = fs::read(entry.path())?;
        let data = if truncated {
            data
        } else {
            truncated = true;
            data[..data.len() / 2].to_vec()
        };
        fs::write(to.join(entry.file_name()), data)?;
    }
    Ok(())
}

/// Filesystem operations a [`FaultyFs`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Renaming a primary to its backup path.
    BackupRename,
    /// Copying a backup back to the primary path, writing nothing.
    Copy,
    /// Copying a backup, leaving a partial primary behind.
    PartialCopy,
    /// Renaming a backup to its temp path.
    FinalizeRename,
    /// Deleting a temp directory.
    Cleanup,
}

/// A [`SegmentFs`] wrapper that fails a chosen operation.
///
/// In plain mode only the armed operation fails and the wrapper disarms
/// itself. In crash mode every mutation after the fault fails as well,
/// which models the process dying at that point.
#[derive(Debug)]
pub struct FaultyFs {
    inner: Arc<dyn SegmentFs>,
    armed: Mutex<Option<FaultPoint>>,
    crash_mode: AtomicBool,
    crashed: AtomicBool,
    faults: AtomicUsize,
}

impl FaultyFs {
    /// Wraps the local filesystem.
    pub fn new() -> Self {
        Self::wrap(Arc::new(LocalFs::new()))
    }

    /// Wraps another filesystem.
    pub fn wrap(inner: Arc<dyn SegmentFs>) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
            crash_mode: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            faults: AtomicUsize::new(0),
        }
    }

    /// Fails the next matching operation.
    pub fn fail_once(&self, point: FaultPoint) {
        *self.armed.lock() = Some(point);
        self.crash_mode.store(false, Ordering::SeqCst);
    }

    /// Fails the next matching operation and every mutation after it.
    pub fn crash_at(&self, point: FaultPoint) {
        *self.armed.lock() = Some(point);
        self.crash_mode.store(true, Ordering::SeqCst);
    }

    /// Disarms the wrapper and clears the crashed state.
    pub fn reset(&self) {
        *self.armed.lock() = None;
        self.crash_mode.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Returns whether a crash has been simulated.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns how many operations were failed.
    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    fn simulated(&self, what: &str) -> StorageError {
        self.faults.fetch_add(1, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated failure: {what}"),
        ))
    }

    /// Returns an error if the process is considered dead.
    fn check_alive(&self) -> StorageResult<()> {
        if self.has_crashed() {
            return Err(self.simulated("process crashed"));
        }
        Ok(())
    }

    /// Consumes the armed fault if `point` matches.
    fn trip(&self, point: FaultPoint) -> bool {
        let mut armed = self.armed.lock();
        if *armed != Some(point) {
            return false;
        }
        *armed = None;
        if self.crash_mode.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
        }
        true
    }

    fn trip_any(&self, points: &[FaultPoint]) -> Option<FaultPoint> {
        points.iter().copied().find(|p| self.trip(*p))
    }
}

impl Default for FaultyFs {
    fn default() -> Self {
        Self::new()
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(suffix))
}

impl SegmentFs for FaultyFs {
    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        self.check_alive()?;
        if has_suffix(to, layout::BACKUP_DIR_SUFFIX) && self.trip(FaultPoint::BackupRename) {
            return Err(self.simulated("rename to backup"));
        }
        if has_suffix(to, layout::TEMP_DIR_SUFFIX) && self.trip(FaultPoint::FinalizeRename) {
            return Err(self.simulated("rename to temp"));
        }
        self.inner.rename(from, to)
    }

    fn copy_dir(&self, from: &Path, to: &Path) -> StorageResult<u64> {
        self.check_alive()?;
        match self.trip_any(&[FaultPoint::Copy, FaultPoint::PartialCopy]) {
            Some(FaultPoint::PartialCopy) => {
                copy_partial(from, to)?;
                Err(self.simulated("partial copy"))
            }
            Some(_) => Err(self.simulated("copy")),
            None => self.inner.copy_dir(from, to),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
        self.check_alive()?;
        if has_suffix(path, layout::TEMP_DIR_SUFFIX) && self.trip(FaultPoint::Cleanup) {
            return Err(self.simulated("delete temp"));
        }
        self.inner.remove_dir_all(path)
    }

    fn sync_dir(&self, path: &Path) -> StorageResult<()> {
        self.check_alive()?;
        self.inner.sync_dir(path)
    }

    fn list_dir(&self, path: &Path) -> StorageResult<Vec<String>> {
        self.inner.list_dir(path)
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Shape found on disk after the crash.
    pub state_after_crash: Option<ReloadState>,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, state: ReloadState) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            state_after_crash: Some(state),
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, state: Option<ReloadState>, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            state_after_crash: state,
            error: Some(error.to_string()),
        }
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Segment name used by every scenario.
    pub segment: String,
    /// Row count of the segment.
    pub docs: u64,
    /// Results of the scenarios run so far.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness with default segment settings.
    pub fn new() -> Self {
        Self {
            segment: "events_crash_0".to_string(),
            docs: 64,
            results: Vec::new(),
        }
    }

    /// Injects a crash during a live reload at `point`, reopens the
    /// instance, and checks the segment recovered intact.
    pub fn run(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        let description = format!("crash at {point:?} recovers on reopen");
        let result = self.run_inner(point, &description);
        self.results.push(result.clone());
        result
    }

    fn run_inner(&self, point: CrashPoint, description: &str) -> CrashRecoveryResult {
        let faulty = Arc::new(FaultyFs::new());
        let instance = TestInstance::with_components(
            |config| config,
            Arc::new(DirectorySegmentLoader::new()),
            faulty.clone(),
        );
        let index_dir = instance.add_offline(&self.segment, self.docs);
        let original = snapshot_dir(&index_dir);

        faulty.crash_at(point.fault());
        let reload = instance.reload_segment(OFFLINE_TABLE, &self.segment);
        if reload.is_ok() {
            return CrashRecoveryResult::fail(description, None, "reload unexpectedly succeeded");
        }

        let state = inspect_reload_state(&LocalFs::new(), &index_dir);
        if state != point.expected_state() {
            return CrashRecoveryResult::fail(
                description,
                Some(state),
                &format!("expected {} after crash", point.expected_state()),
            );
        }

        let instance = instance.reopen();
        verify_recovered(&instance, &self.segment, &original, description, state)
    }

    /// Stages the on-disk shape of a crash at `point` without running a
    /// reload, reopens the instance, and checks the segment recovered.
    pub fn run_staged(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        let description = format!("staged {point:?} recovers on reopen");
        let instance = TestInstance::new();
        instance.write_segment(OFFLINE_TABLE, &self.segment, self.docs);
        let index_dir = instance.segment_dir(OFFLINE_TABLE, &self.segment);
        let original = snapshot_dir(&index_dir);

        stage_crash(&index_dir, point);
        let state = inspect_reload_state(&LocalFs::new(), &index_dir);

        let instance = instance.reopen();
        let result = verify_recovered(&instance, &self.segment, &original, &description, state);
        self.results.push(result.clone());
        result
    }

    /// Runs both variants for every crash point.
    pub fn run_all(&mut self) -> &[CrashRecoveryResult] {
        for point in CrashPoint::ALL {
            self.run(point);
            self.run_staged(point);
        }
        &self.results
    }

    /// Returns true if every scenario run so far passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn verify_recovered(
    instance: &TestInstance,
    segment: &str,
    original: &BTreeMap<PathBuf, Vec<u8>>,
    description: &str,
    state: ReloadState,
) -> CrashRecoveryResult {
    let index_dir = instance.segment_dir(OFFLINE_TABLE, segment);
    let recovered = inspect_reload_state(&LocalFs::new(), &index_dir);
    if !recovered.is_stable() {
        return CrashRecoveryResult::fail(description, Some(state), "directory not stable");
    }
    if !index_dir.is_dir() {
        return CrashRecoveryResult::fail(description, Some(state), "segment directory lost");
    }
    if snapshot_dir(&index_dir) != *original {
        return CrashRecoveryResult::fail(description, Some(state), "segment data changed");
    }

    match instance.add_offline_segment(OFFLINE_TABLE, segment, &index_dir) {
        Ok(()) => {}
        Err(e) => {
            return CrashRecoveryResult::fail(description, Some(state), &e.to_string());
        }
    }
    match instance.get_segment_metadata(OFFLINE_TABLE, segment) {
        Some(_) => CrashRecoveryResult::pass(description, state),
        None => CrashRecoveryResult::fail(description, Some(state), "segment not served"),
    }
}
