//! Layout detection, cache leases and the display working set

mod common;

use common::*;
use mvreg_core::{CloudKey, Point3d};
use mvreg_engine::{CloudStore, DirectoryLayout, DisplayQueue, NavigationType, RootKind};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn corner_project(frames: u32, views: u32) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for frame in 0..frames {
        for view in 0..views {
            write_view(dir.path(), frame, view, &[Point3d::new(f64::from(view), 1.0, f64::from(frame))]);
        }
    }
    dir
}

#[test]
fn test_layout_accepts_all_root_forms() {
    let dir = corner_project(3, 2);

    let project = DirectoryLayout::open(dir.path()).unwrap();
    assert_eq!(project.kind(), RootKind::Project);
    assert_eq!(project.frame_range(), Some((0, 2)));
    assert_eq!(project.view_count(), 2);
    assert_eq!(project.points_path(CloudKey::new(1, 1)).unwrap(), view_path(dir.path(), 1, 1));

    let points = DirectoryLayout::open(dir.path().join("points")).unwrap();
    assert_eq!(points.kind(), RootKind::Points);
    assert_eq!(points.frames().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(points.points_path(CloudKey::new(2, 0)).unwrap(), view_path(dir.path(), 2, 0));

    let frame = DirectoryLayout::open(frame_folder(dir.path(), 1)).unwrap();
    assert_eq!(frame.kind(), RootKind::Frame(1));
    assert_eq!(frame.frame_range(), Some((1, 1)));
    assert_eq!(frame.view_count(), 2);
    assert!(frame.points_path(CloudKey::new(0, 0)).is_none());
    assert_eq!(frame.axis_path(1).unwrap(), frame_folder(dir.path(), 1).join("axis.txt"));
}

#[test]
fn test_cache_never_evicts_shown_clouds() {
    let dir = corner_project(6, 2);
    let store = CloudStore::open(dir.path(), 2).unwrap();

    let shown = CloudKey::new(0, 0);
    assert!(store.show(shown));
    let leased = store.get(CloudKey::new(0, 1)).unwrap();

    for frame in 1..6 {
        for view in 0..2 {
            assert!(store.get(CloudKey::new(frame, view)).is_some());
        }
    }

    assert!(store.is_cached(shown));
    assert!(store.is_cached(leased.key()));
    assert!(store.cached_count() <= 4);

    drop(leased);
    store.hide(shown);
    for frame in 1..6 {
        store.get(CloudKey::new(frame, 0));
    }
    assert!(!store.is_cached(shown));
    assert!(!store.is_cached(CloudKey::new(0, 1)));
}

#[test]
fn test_display_queue_evicts_oldest() {
    let dir = corner_project(4, 1);
    let store = CloudStore::open(dir.path(), 64).unwrap();
    let mut queue = DisplayQueue::new(2);

    let keys: Vec<CloudKey> = (0..4).map(|frame| CloudKey::new(frame, 0)).collect();
    queue.push(keys[0], &store);
    queue.push(keys[1], &store);
    assert_eq!(store.shown_keys(), vec![keys[0], keys[1]]);

    queue.push(keys[2], &store);
    assert_eq!(queue.len(), 2);
    assert_eq!(store.shown_keys(), vec![keys[1], keys[2]]);

    queue.push(keys[2], &store);
    assert_eq!(queue.keys().copied().collect::<Vec<_>>(), vec![keys[1], keys[2]]);

    queue.push(keys[3], &store);
    assert_eq!(store.shown_keys(), vec![keys[2], keys[3]]);

    queue.clear(&store);
    assert!(queue.is_empty());
    assert!(store.shown_keys().is_empty());
}

#[test]
fn test_set_root_shows_first_frame() {
    let dir = corner_project(2, 3);
    let store = CloudStore::open(dir.path(), 64).unwrap();
    assert!(store.shown_keys().is_empty());

    store.set_root(dir.path()).unwrap();
    assert_eq!(store.shown_keys(), vec![CloudKey::new(0, 0)]);

    store.navigate_next_frame(NavigationType::Switch);
    assert_eq!(store.shown_keys(), vec![CloudKey::new(1, 0)]);
    assert_eq!(store.scene_info(), "frame 00001 View 00");

    fs::copy(view_path(dir.path(), 0, 0), frame_folder(dir.path(), 0).join("points.pcd")).unwrap();
    store.set_root(dir.path()).unwrap();
    assert_eq!(store.shown_keys(), vec![CloudKey::merged(0)]);
    assert!(!store.is_cached(CloudKey::new(1, 0)));
}

#[test]
fn test_shown_cloud_stays_cached_under_concurrent_sweeps() {
    let dir = corner_project(4, 1);
    let store = CloudStore::open(dir.path(), 0).unwrap();
    let key = CloudKey::new(0, 0);
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..100_000 {
                if done.load(Ordering::SeqCst) {
                    break;
                }
                for frame in 1..4 {
                    store.get(CloudKey::new(frame, 0));
                }
            }
        });

        for _ in 0..200 {
            assert!(store.show(key));
            assert!(store.is_shown(key));
            assert!(store.is_cached(key));
            store.hide(key);
        }
        done.store(true, Ordering::SeqCst);
    });
}
