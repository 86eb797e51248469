//! Point cloud cache and the set of shown clouds
//!
//! Clouds are loaded on first access and shared through `CloudHandle`
//! leases. Once the cache grows past its threshold, entries that are neither
//! shown nor leased are released. The store lock is never held while a
//! cloud lock is taken.

use crate::layout::DirectoryLayout;
use crate::lock;
use crate::view_cloud::ViewCloud;
use log::{debug, info, warn};
use mvreg_core::{CloudKey, Result};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// How navigation treats the clouds already shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationType {
    /// Replace the anchor cloud with its neighbour
    Switch,
    /// Show the neighbour next to the anchor
    Append,
    /// Hide the anchor
    Erase,
}

/// Lease on a cached cloud. The cache keeps the cloud alive while any
/// handle exists.
pub struct CloudHandle {
    key: CloudKey,
    cloud: Arc<Mutex<ViewCloud>>,
    leases: Arc<AtomicUsize>,
}

impl CloudHandle {
    fn new(key: CloudKey, cloud: Arc<Mutex<ViewCloud>>, leases: Arc<AtomicUsize>) -> Self {
        leases.fetch_add(1, Ordering::SeqCst);
        Self { key, cloud, leases }
    }

    pub fn key(&self) -> CloudKey {
        self.key
    }

    /// Exclusive access to the cloud
    pub fn lock(&self) -> MutexGuard<'_, ViewCloud> {
        lock(&self.cloud)
    }
}

impl Clone for CloudHandle {
    fn clone(&self) -> Self {
        Self::new(self.key, Arc::clone(&self.cloud), Arc::clone(&self.leases))
    }
}

impl Drop for CloudHandle {
    fn drop(&mut self) {
        self.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for CloudHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudHandle").field("key", &self.key).finish()
    }
}

struct CacheEntry {
    path: PathBuf,
    cloud: Arc<Mutex<ViewCloud>>,
    leases: Arc<AtomicUsize>,
}

impl CacheEntry {
    fn handle(&self, key: CloudKey) -> CloudHandle {
        CloudHandle::new(key, Arc::clone(&self.cloud), Arc::clone(&self.leases))
    }
}

struct StoreState {
    layout: DirectoryLayout,
    entries: HashMap<CloudKey, CacheEntry>,
    shown: BTreeSet<CloudKey>,
}

/// Cache of loaded clouds plus the shown set, over one project layout
pub struct CloudStore {
    state: Mutex<StoreState>,
    cache_threshold: usize,
}

impl CloudStore {
    pub fn new(layout: DirectoryLayout, cache_threshold: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                layout,
                entries: HashMap::new(),
                shown: BTreeSet::new(),
            }),
            cache_threshold,
        }
    }

    /// Open the layout at `root`
    pub fn open<P: AsRef<Path>>(root: P, cache_threshold: usize) -> Result<Self> {
        Ok(Self::new(DirectoryLayout::open(root)?, cache_threshold))
    }

    /// Switch to another project. Cached and shown clouds are dropped and
    /// the first frame is shown, merged if available, else its first view.
    pub fn set_root<P: AsRef<Path>>(&self, root: P) -> Result<()> {
        let layout = DirectoryLayout::open(root)?;
        let start = layout.frame_range().map(|(start, _)| start);
        {
            let mut state = lock(&self.state);
            state.entries.clear();
            state.shown.clear();
            state.layout = layout;
        }
        info!("project root set to {}", self.layout().root().display());

        if let Some(start) = start {
            if !self.show(CloudKey::merged(start)) {
                self.show(CloudKey::new(start, 0));
            }
        }
        Ok(())
    }

    /// Snapshot of the current layout
    pub fn layout(&self) -> DirectoryLayout {
        lock(&self.state).layout.clone()
    }

    pub fn view_count(&self) -> u32 {
        lock(&self.state).layout.view_count()
    }

    pub fn frame_range(&self) -> Option<(u32, u32)> {
        lock(&self.state).layout.frame_range()
    }

    /// Lease the cloud of `key`, loading it on first access.
    ///
    /// `None` when the layout has no such file or it cannot be read.
    pub fn get(&self, key: CloudKey) -> Option<CloudHandle> {
        let path = {
            let mut state = lock(&self.state);
            self.sweep(&mut state);
            if let Some(entry) = state.entries.get(&key) {
                return Some(entry.handle(key));
            }
            state.layout.points_path(key)?
        };
        if !path.is_file() {
            return None;
        }

        let cloud = match ViewCloud::open(key, &path) {
            Ok(cloud) => cloud,
            Err(e) => {
                warn!("failed to load {} from {}: {}", key, path.display(), e);
                return None;
            }
        };

        let mut state = lock(&self.state);
        let entry = state.entries.entry(key).or_insert_with(|| CacheEntry {
            path,
            cloud: Arc::new(Mutex::new(cloud)),
            leases: Arc::new(AtomicUsize::new(0)),
        });
        Some(entry.handle(key))
    }

    /// Release entries that are neither shown nor leased
    fn sweep(&self, state: &mut StoreState) {
        if state.entries.len() <= self.cache_threshold {
            return;
        }
        let StoreState { entries, shown, .. } = state;
        let before = entries.len();
        entries.retain(|key, entry| shown.contains(key) || entry.leases.load(Ordering::SeqCst) > 0);
        debug!("cache sweep released {} of {} clouds", before - entries.len(), before);
    }

    /// Number of cached clouds
    pub fn cached_count(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_cached(&self, key: CloudKey) -> bool {
        lock(&self.state).entries.contains_key(&key)
    }

    /// Backing file of a cached cloud
    pub fn cached_path(&self, key: CloudKey) -> Option<PathBuf> {
        lock(&self.state).entries.get(&key).map(|entry| entry.path.clone())
    }

    /// Show `key`. Returns false when the cloud cannot be loaded.
    pub fn show(&self, key: CloudKey) -> bool {
        // The lease keeps the entry out of any sweep until it is marked shown
        let Some(_lease) = self.get(key) else {
            return false;
        };
        let mut state = lock(&self.state);
        if !state.entries.contains_key(&key) {
            return false;
        }
        if state.shown.insert(key) {
            debug!("show {}", key);
        }
        true
    }

    /// Hide `key`. Returns whether it was shown.
    pub fn hide(&self, key: CloudKey) -> bool {
        let removed = lock(&self.state).shown.remove(&key);
        if removed {
            debug!("hide {}", key);
        }
        removed
    }

    /// Hide one cloud and show another in a single step. The hide happens
    /// even when the new cloud cannot be loaded. Returns whether `show` is
    /// shown afterwards.
    pub fn hide_and_show(&self, hide: CloudKey, show: CloudKey) -> bool {
        let lease = self.get(show);
        let mut state = lock(&self.state);
        let loadable = lease.is_some() && state.entries.contains_key(&show);
        if loadable {
            state.shown.insert(show);
        }
        if hide != show || !loadable {
            state.shown.remove(&hide);
        }
        debug!("hide {} and show {}", hide, show);
        loadable
    }

    pub fn is_shown(&self, key: CloudKey) -> bool {
        lock(&self.state).shown.contains(&key)
    }

    /// Shown keys, views of a frame before its merged cloud
    pub fn shown_keys(&self) -> Vec<CloudKey> {
        let state = lock(&self.state);
        let view_count = state.layout.view_count();
        let mut keys: Vec<CloudKey> = state.shown.iter().copied().collect();
        keys.sort_by_key(|key| display_order(key, view_count));
        keys
    }

    /// Re-read a cached cloud from disk. Uncached clouds are left to load
    /// lazily; returns whether a reload happened.
    pub fn reload(&self, key: CloudKey) -> Result<bool> {
        let cloud = match lock(&self.state).entries.get(&key) {
            Some(entry) => Arc::clone(&entry.cloud),
            None => return Ok(false),
        };
        lock(&cloud).reload()?;
        debug!("reloaded {}", key);
        Ok(true)
    }

    /// One line per shown cloud, e.g. `frame 00003 View 02`
    pub fn scene_info(&self) -> String {
        self.shown_keys()
            .iter()
            .map(|key| key.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Step the earliest shown cloud one frame back
    pub fn navigate_previous_frame(&self, navigation: NavigationType) {
        let Some((start, _)) = self.frame_range() else {
            return;
        };
        let Some(first) = self.shown_keys().first().copied() else {
            self.show(CloudKey::merged(start));
            return;
        };
        if navigation == NavigationType::Erase {
            self.hide(first);
            return;
        }
        if first.frame <= start {
            return;
        }
        self.navigate(first, CloudKey { frame: first.frame - 1, view: first.view }, navigation);
    }

    /// Step the latest shown cloud one frame forward
    pub fn navigate_next_frame(&self, navigation: NavigationType) {
        let Some((_, end)) = self.frame_range() else {
            return;
        };
        let Some(last) = self.shown_keys().last().copied() else {
            self.show(CloudKey::merged(end));
            return;
        };
        if navigation == NavigationType::Erase {
            self.hide(last);
            return;
        }
        if last.frame >= end {
            return;
        }
        self.navigate(last, CloudKey { frame: last.frame + 1, view: last.view }, navigation);
    }

    /// Step the earliest shown cloud one view back
    pub fn navigate_previous_view(&self, navigation: NavigationType) {
        let Some((start, _)) = self.frame_range() else {
            return;
        };
        let view_count = self.view_count();
        let Some(first) = self.shown_keys().first().copied() else {
            self.show(CloudKey::new(start, 0));
            return;
        };
        if navigation == NavigationType::Erase {
            self.hide(first);
            return;
        }
        let slot = display_order(&first, view_count).1;
        if slot == 0 {
            return;
        }
        self.navigate(first, key_at_slot(first.frame, slot - 1, view_count), navigation);
    }

    /// Step the last view of the latest shown frame one view forward; the
    /// step after the last view lands on the merged cloud
    pub fn navigate_next_view(&self, navigation: NavigationType) {
        let Some((start, _)) = self.frame_range() else {
            return;
        };
        let view_count = self.view_count();
        let Some(last) = self.shown_keys().last().copied() else {
            self.show(key_at_slot(start, view_count.saturating_sub(1), view_count));
            return;
        };
        if navigation == NavigationType::Erase {
            self.hide(last);
            return;
        }
        let slot = display_order(&last, view_count).1;
        if slot >= view_count {
            return;
        }
        self.navigate(last, key_at_slot(last.frame, slot + 1, view_count), navigation);
    }

    fn navigate(&self, anchor: CloudKey, target: CloudKey, navigation: NavigationType) {
        match navigation {
            NavigationType::Append => {
                self.show(target);
            }
            NavigationType::Switch => {
                self.hide_and_show(anchor, target);
            }
            NavigationType::Erase => {
                self.hide(anchor);
            }
        }
    }
}

/// Sort key with the merged cloud after every view of its frame
fn display_order(key: &CloudKey, view_count: u32) -> (u32, u32) {
    (key.frame, key.view.unwrap_or(view_count))
}

fn key_at_slot(frame: u32, slot: u32, view_count: u32) -> CloudKey {
    if slot >= view_count {
        CloudKey::merged(frame)
    } else {
        CloudKey::new(frame, slot)
    }
}
