//! Batches, categories and cancellation

mod common;

use common::*;
use mvreg_core::{CloudKey, Point3d, Result};
use mvreg_engine::{
    BatchEvent, ChannelSink, DispatchError, DispatcherConfig, EngineConfig, Job, JobCategory, Notification,
    PointsGenerator, TaskDispatcher,
};
use mvreg_io::{PcdReader, POINTS_FILE_NAME};
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocks every generation until the test lets it through
struct GatedGenerator {
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl GatedGenerator {
    fn new() -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let generator = Arc::new(Self {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        (generator, started_rx, release_tx)
    }
}

impl PointsGenerator for GatedGenerator {
    fn generate(&self, _points_folder: &Path, _ctr: u32, _sat: u32) -> Result<()> {
        let _ = self.started.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        Ok(())
    }
}

/// Panics on view 1, succeeds elsewhere
struct FlakyGenerator;

impl PointsGenerator for FlakyGenerator {
    fn generate(&self, points_folder: &Path, _ctr: u32, _sat: u32) -> Result<()> {
        if points_folder.ends_with("view_01") {
            panic!("converter crashed");
        }
        Ok(())
    }
}

fn generation_jobs(views: u32) -> Vec<Job> {
    (0..views)
        .map(|view| Job::PointsGeneration {
            frame: 0,
            view,
            ctr_threshold: 25,
            sat_threshold: 500,
        })
        .collect()
}

fn project(views: u32) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for view in 0..views {
        write_view(dir.path(), 0, view, &[Point3d::new(f64::from(view), 1.0, 0.0)]);
    }
    dir
}

/// One single-view frame per number, with its merged cloud already written
fn write_frames(root: &Path, frames: u32) {
    for frame in 0..frames {
        write_view(root, frame, 0, &[Point3d::new(1.0, 1.0, f64::from(frame))]);
        fs::copy(view_path(root, frame, 0), frame_folder(root, frame).join(POINTS_FILE_NAME)).unwrap();
    }
}

fn config(threads: usize) -> EngineConfig {
    EngineConfig {
        dispatcher: DispatcherConfig::default()
            .with_threads(threads)
            .with_thread_name_prefix("dispatch-test"),
        ..EngineConfig::default()
    }
}

#[test]
fn test_busy_category_is_rejected() {
    let dir = project(2);
    let engine = engine(dir.path(), config(2));
    let (generator, started, release) = GatedGenerator::new();
    let dispatcher = TaskDispatcher::new(engine.context.with_generator(generator)).unwrap();

    let first = dispatcher
        .dispatch(JobCategory::PointsGeneration, generation_jobs(1), false)
        .unwrap();
    started.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(dispatcher.is_running(JobCategory::PointsGeneration));

    let second = dispatcher.dispatch(JobCategory::PointsGeneration, generation_jobs(1), false);
    assert!(matches!(
        second,
        Err(DispatchError::CategoryBusy(JobCategory::PointsGeneration))
    ));

    let other = dispatcher
        .dispatch(JobCategory::DataCut, vec![Job::DataCut { frame: 0 }], false)
        .unwrap();
    assert_eq!(other.wait().completed, 1);

    release.send(()).unwrap();
    let summary = first.wait();
    assert_eq!(summary.completed, 1);
    assert!(!dispatcher.is_running(JobCategory::PointsGeneration));

    drop(release);
    let again = dispatcher
        .dispatch(JobCategory::PointsGeneration, generation_jobs(1), false)
        .unwrap();
    assert_eq!(again.wait().completed, 1);
}

#[test]
fn test_mismatched_or_invalid_jobs_fail_fast() {
    let dir = project(1);
    let engine = engine(dir.path(), config(1));
    let dispatcher = TaskDispatcher::new(engine.context).unwrap();

    let mixed = dispatcher.dispatch(JobCategory::Denoise, vec![Job::DataCut { frame: 0 }], false);
    assert!(matches!(mixed, Err(DispatchError::Core(_))));

    let invalid = dispatcher.dispatch_extract_points(0, dir.path().join("out"));
    assert!(matches!(invalid, Err(DispatchError::Core(_))));
    assert!(!dispatcher.is_busy());
}

#[test]
fn test_batch_survives_panicking_job() {
    let dir = project(4);
    let engine = engine(dir.path(), config(2));
    let (sender, notifications) = mpsc::channel();
    let dispatcher = TaskDispatcher::new(engine.context.with_generator(Arc::new(FlakyGenerator)))
        .unwrap()
        .with_sink(Arc::new(ChannelSink::new(sender)));

    let handle = dispatcher
        .dispatch(JobCategory::PointsGeneration, generation_jobs(4), false)
        .unwrap();
    let summary = handle.wait();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 1);
    assert!(!summary.cancelled);

    let events: Vec<BatchEvent> = handle.events().try_iter().collect();
    let failed: Vec<CloudKey> = events
        .iter()
        .filter_map(|event| match event {
            BatchEvent::JobFinished { key, succeeded: false, .. } => Some(*key),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![CloudKey::new(0, 1)]);
    assert!(matches!(events.last(), Some(BatchEvent::BatchFinished(_))));

    let notifications: Vec<Notification> = notifications.try_iter().collect();
    assert!(matches!(notifications.first(), Some(Notification::Started { total: 4, .. })));
    assert!(matches!(
        notifications.last(),
        Some(Notification::Finished {
            completed: 3,
            failed: 1,
            cancelled: false,
            ..
        })
    ));
}

#[test]
fn test_cancel_skips_pending_jobs() {
    let dir = project(4);
    let engine = engine(dir.path(), config(1));
    let (generator, started, release) = GatedGenerator::new();
    let dispatcher = TaskDispatcher::new(engine.context.with_generator(generator)).unwrap();

    let handle = dispatcher
        .dispatch(JobCategory::PointsGeneration, generation_jobs(4), false)
        .unwrap();
    started.recv_timeout(Duration::from_secs(10)).unwrap();
    handle.cancel();
    drop(release);

    let summary = handle.wait();
    assert!(summary.cancelled);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.skipped(), 3);
}

#[test]
fn test_cancel_running_tasks_waits_for_drain() {
    let dir = project(2);
    let engine = engine(dir.path(), config(1));
    let (generator, started, release) = GatedGenerator::new();
    let dispatcher = TaskDispatcher::new(engine.context.with_generator(generator)).unwrap();

    let handle = dispatcher
        .dispatch(JobCategory::PointsGeneration, generation_jobs(2), false)
        .unwrap();
    started.recv_timeout(Duration::from_secs(10)).unwrap();
    drop(release);

    dispatcher.cancel_running_tasks(true);
    assert!(handle.is_finished());
    assert!(!dispatcher.is_busy());
}

#[test]
fn test_display_queue_follows_finished_jobs() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 4);
    let mut config = config(1);
    config.dispatcher = config.dispatcher.with_display_capacity(2);
    let engine = engine(dir.path(), config);
    let store = Arc::clone(&engine.store);
    let dispatcher = TaskDispatcher::new(engine.context).unwrap();
    assert_eq!(dispatcher.display_capacity(), 2);

    let out = dir.path().join("extracted");
    let jobs: Vec<Job> = (0..4)
        .map(|frame| Job::ExtractPoints {
            frame,
            interval: 1,
            folder: out.clone(),
        })
        .collect();
    let handle = dispatcher.dispatch(JobCategory::ExtractPoints, jobs, true).unwrap();

    let mut finished = 0;
    for event in handle.events() {
        if let BatchEvent::JobFinished { .. } = event {
            finished += 1;
            assert!(store.shown_keys().len() <= 2);
        }
    }
    assert_eq!(finished, 4);
    assert_eq!(handle.wait().completed, 4);
    assert!(dispatcher.displayed_keys().is_empty());
    assert!(store.shown_keys().is_empty());
}

#[test]
fn test_denoise_job_drops_small_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let mut points = Vec::new();
    for x in 0..5 {
        for y in 0..5 {
            for z in 0..2 {
                points.push(Point3d::new(f64::from(x), f64::from(y), f64::from(z)));
            }
        }
    }
    points.extend([
        Point3d::new(100.0, 0.0, 0.0),
        Point3d::new(101.0, 0.0, 0.0),
        Point3d::new(100.0, 1.0, 0.3),
    ]);
    write_view(dir.path(), 0, 0, &points);

    let engine = engine(dir.path(), config(2));
    let dispatcher = TaskDispatcher::new(engine.context).unwrap();
    let summary = dispatcher.dispatch_denoise(10).unwrap().wait();
    assert_eq!(summary.completed, 1);

    let cloud = PcdReader::read_point_cloud(view_path(dir.path(), 0, 0)).unwrap();
    assert_eq!(cloud.len(), 50);
    assert!(cloud.iter().all(|record| record.position.x < 10.0));
}

#[test]
fn test_extract_points_copies_every_interval() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 5);
    let out = dir.path().join("extracted");

    let engine = engine(dir.path(), config(2));
    let dispatcher = TaskDispatcher::new(engine.context).unwrap();
    let summary = dispatcher.dispatch_extract_points(2, &out).unwrap().wait();
    assert_eq!(summary.completed, 5);

    let mut extracted: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    extracted.sort();
    assert_eq!(extracted, vec!["frame_00000", "frame_00002", "frame_00004"]);
}
