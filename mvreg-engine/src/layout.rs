//! On-disk project layout
//!
//! A project keeps one folder per frame and one sub-folder per view:
//!
//! ```text
//! <root>/points/frame_00000/view_00/points.pcd
//! <root>/points/frame_00000/points.pcd          (merged frame cloud)
//! <root>/images/frame_00000/slice_00/...
//! ```
//!
//! The layout may be opened at the project root, at the `points` folder or
//! at a single `frame_NNNNN` folder.

use log::debug;
use mvreg_core::{parse_numbered, CloudKey, Result};
use mvreg_io::{AXIS_FILE_NAME, POINTS_FILE_NAME};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

const POINTS_DIR: &str = "points";
const IMAGES_DIR: &str = "images";

/// Which folder the layout was opened at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Folder containing `points/`
    Project,
    /// The `points` folder itself
    Points,
    /// A single `frame_NNNNN` folder
    Frame(u32),
    /// Nothing recognisable; no frames
    Unknown,
}

/// Maps (frame, view) identifiers to folders and files
#[derive(Debug, Clone)]
pub struct DirectoryLayout {
    root: PathBuf,
    kind: RootKind,
    frame_range: Option<(u32, u32)>,
    view_count: u32,
}

impl DirectoryLayout {
    /// Scan `root` for frames and views
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (kind, frame_range) = if let Some(frame) = parse_numbered(&name, "frame_", 5) {
            (RootKind::Frame(frame), Some((frame, frame)))
        } else if name == POINTS_DIR {
            (RootKind::Points, frame_range_in(&root)?)
        } else if root.join(POINTS_DIR).is_dir() {
            (RootKind::Project, frame_range_in(&root.join(POINTS_DIR))?)
        } else {
            (RootKind::Unknown, None)
        };

        let mut layout = Self {
            root,
            kind,
            frame_range,
            view_count: 0,
        };
        if let Some((start, _)) = frame_range {
            if let Some(folder) = layout.frame_folder(start) {
                layout.view_count = count_views(&folder)?;
            }
        }

        debug!(
            "opened {:?} layout at {}: frames {:?}, {} views",
            layout.kind,
            layout.root.display(),
            layout.frame_range,
            layout.view_count
        );
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> RootKind {
        self.kind
    }

    /// Inclusive `(start, end)` frame numbers, `None` without frames
    pub fn frame_range(&self) -> Option<(u32, u32)> {
        self.frame_range
    }

    /// Every frame number from start to end
    pub fn frames(&self) -> impl Iterator<Item = u32> {
        let (start, end) = self.frame_range.map_or((1, 0), |range| range);
        start..=end
    }

    /// Views per frame, counted in the first frame folder
    pub fn view_count(&self) -> u32 {
        self.view_count
    }

    /// Keys of the individual views of `frame`
    pub fn view_keys(&self, frame: u32) -> Vec<CloudKey> {
        (0..self.view_count).map(|view| CloudKey::new(frame, view)).collect()
    }

    /// Folder of `frame`, `None` when the layout has no frames
    pub fn frame_folder(&self, frame: u32) -> Option<PathBuf> {
        self.frame_range?;
        match self.kind {
            RootKind::Frame(only) => (only == frame).then(|| self.root.clone()),
            RootKind::Points => Some(self.root.join(frame_dir_name(frame))),
            RootKind::Project => Some(self.root.join(POINTS_DIR).join(frame_dir_name(frame))),
            RootKind::Unknown => None,
        }
    }

    /// Folder holding the cloud of `key`: the frame folder for merged keys,
    /// `view_VV` or else `slice_VV` inside it for views
    pub fn points_folder(&self, key: CloudKey) -> Option<PathBuf> {
        let frame_folder = self.frame_folder(key.frame)?;
        match key.view {
            None => Some(frame_folder),
            Some(view) => {
                let folder = frame_folder.join(format!("view_{:02}", view));
                if folder.is_dir() {
                    Some(folder)
                } else {
                    Some(frame_folder.join(format!("slice_{:02}", view)))
                }
            }
        }
    }

    /// Path of the `points.pcd` of `key`; the file may not exist
    pub fn points_path(&self, key: CloudKey) -> Option<PathBuf> {
        self.points_folder(key).map(|folder| folder.join(POINTS_FILE_NAME))
    }

    /// Path of the refined axis of `frame`
    pub fn axis_path(&self, frame: u32) -> Option<PathBuf> {
        self.frame_folder(frame).map(|folder| folder.join(AXIS_FILE_NAME))
    }

    /// Images folder mirroring the points folder of `frame`, if it exists
    pub fn images_folder(&self, frame: u32) -> Option<PathBuf> {
        let points = self.frame_folder(frame)?;
        let images = swap_points_component(&points)?;
        images.is_dir().then_some(images)
    }

    /// Images of one view; `slice_VV` is preferred over `view_VV`
    pub fn view_images_folder(&self, key: CloudKey) -> Option<PathBuf> {
        let frame_folder = self.images_folder(key.frame)?;
        let view = key.view?;
        let slice = frame_folder.join(format!("slice_{:02}", view));
        if slice.is_dir() {
            Some(slice)
        } else {
            Some(frame_folder.join(format!("view_{:02}", view)))
        }
    }
}

/// `frame_NNNNN`
pub fn frame_dir_name(frame: u32) -> String {
    format!("frame_{:05}", frame)
}

fn frame_range_in(folder: &Path) -> Result<Option<(u32, u32)>> {
    if !folder.is_dir() {
        return Ok(None);
    }
    let mut range: Option<(u32, u32)> = None;
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(frame) = parse_numbered(&name, "frame_", 5) {
            range = Some(match range {
                Some((start, end)) => (start.min(frame), end.max(frame)),
                None => (frame, frame),
            });
        }
    }
    Ok(range)
}

fn count_views(frame_folder: &Path) -> Result<u32> {
    if !frame_folder.is_dir() {
        return Ok(0);
    }
    let mut views = BTreeSet::new();
    for entry in fs::read_dir(frame_folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(view) = parse_numbered(&name, "view_", 2).or_else(|| parse_numbered(&name, "slice_", 2)) {
            views.insert(view);
        }
    }
    Ok(views.len() as u32)
}

/// Replace the last `points` component with `images`
fn swap_points_component(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component> = path.components().collect();
    let position = components
        .iter()
        .rposition(|c| c.as_os_str() == POINTS_DIR)?;

    let mut swapped = PathBuf::new();
    for (i, component) in components.iter().enumerate() {
        if i == position {
            swapped.push(IMAGES_DIR);
        } else {
            swapped.push(component.as_os_str());
        }
    }
    Some(swapped)
}
