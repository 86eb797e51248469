//! (frame, view) identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Identifies one point cloud of the capture sequence.
///
/// `view == None` addresses the merged cloud of a frame, the registered union
/// of all its views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CloudKey {
    pub frame: u32,
    pub view: Option<u32>,
}

impl CloudKey {
    pub fn new(frame: u32, view: u32) -> Self {
        Self {
            frame,
            view: Some(view),
        }
    }

    pub fn merged(frame: u32) -> Self {
        Self { frame, view: None }
    }

    pub fn is_merged(&self) -> bool {
        self.view.is_none()
    }

    /// Whether this is the fixed reference view of its frame
    pub fn is_reference(&self) -> bool {
        self.view == Some(0)
    }

    /// Recover the key from a path such as `.../frame_00012/view_03/points.pcd`.
    ///
    /// `slice_VV` is accepted as an alternate spelling of `view_VV`. Paths
    /// without a frame component yield `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let mut frame = None;
        let mut view = None;

        for component in path.components() {
            let name = component.as_os_str().to_string_lossy();
            if let Some(number) = parse_numbered(&name, "frame_", 5) {
                frame = Some(number);
            } else if let Some(number) =
                parse_numbered(&name, "view_", 2).or_else(|| parse_numbered(&name, "slice_", 2))
            {
                view = Some(number);
            }
        }

        frame.map(|frame| Self { frame, view })
    }
}

/// Parse `<prefix><digits>` where the digit run is exactly `width` long
pub fn parse_numbered(name: &str, prefix: &str, width: usize) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?;
    if digits.len() != width || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for CloudKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.view {
            Some(view) => write!(f, "frame {:05} View {:02}", self.frame, view),
            None => write!(f, "frame {:05}", self.frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_key_from_view_path() {
        let path = PathBuf::from("/data/points/frame_00012/view_03/points.pcd");
        assert_eq!(CloudKey::from_path(&path), Some(CloudKey::new(12, 3)));
    }

    #[test]
    fn test_key_from_slice_path() {
        let path = PathBuf::from("project/points/frame_00001/slice_11/points.pcd");
        assert_eq!(CloudKey::from_path(&path), Some(CloudKey::new(1, 11)));
    }

    #[test]
    fn test_key_from_frame_path_is_merged() {
        let path = PathBuf::from("project/points/frame_00007/points.pcd");
        let key = CloudKey::from_path(&path).unwrap();
        assert!(key.is_merged());
        assert_eq!(key.frame, 7);
    }

    #[test]
    fn test_key_requires_frame() {
        assert_eq!(CloudKey::from_path(Path::new("/tmp/view_01/points.pcd")), None);
        assert_eq!(CloudKey::from_path(Path::new("/tmp/frame_123/points.pcd")), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(CloudKey::new(4, 2).to_string(), "frame 00004 View 02");
        assert_eq!(CloudKey::merged(4).to_string(), "frame 00004");
    }
}
