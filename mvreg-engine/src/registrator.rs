//! Per-frame registration driver
//!
//! Brings every view of a frame into the frame of view 0: nominal turntable
//! rotations first, then pairwise ICP or global LUM refinement. Afterwards
//! the registered views are merged into the frame cloud and the turntable
//! axis is re-estimated from the view poses.

use crate::config::{DenoiseConfig, EngineConfig, RegistrationConfig};
use crate::lock;
use crate::notify::{LogSink, Notification, NotificationSink};
use crate::store::{CloudHandle, CloudStore};
use log::{debug, info, warn};
use mvreg_algorithms::{icp, jet, reciprocal_correspondences, refine_axis, IcpParams, Lum};
use mvreg_core::{Bounded, CloudKey, Error, Point3d, RecordCloud, ReferenceAxis, Result, Transform3D, Vector3d};
use mvreg_io::{read_axis, write_axis, PcdWriter};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Correspondence segments between neighbouring views, coloured by length
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorOverlay {
    /// `(source, target)` point pairs
    pub segments: Vec<(Point3d, Point3d)>,
    /// Jet colour of each segment over `[0, max_distance]`
    pub colors: Vec<[u8; 3]>,
}

impl ErrorOverlay {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Mean segment length, 0 without segments
    pub fn mean_distance(&self) -> f64 {
        if self.segments.is_empty() {
            return 0.0;
        }
        self.segments.iter().map(|(s, t)| (t - s).norm()).sum::<f64>() / self.segments.len() as f64
    }
}

/// Registers the views of frames held by a [`CloudStore`]
pub struct Registrator {
    store: Arc<CloudStore>,
    registration: RegistrationConfig,
    denoise: DenoiseConfig,
    axes: Mutex<HashMap<u32, ReferenceAxis>>,
    errors: Mutex<HashMap<u32, ErrorOverlay>>,
    sink: Arc<dyn NotificationSink>,
}

impl Registrator {
    pub fn new(store: Arc<CloudStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            registration: config.registration.clone(),
            denoise: config.denoise.clone(),
            axes: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn store(&self) -> &Arc<CloudStore> {
        &self.store
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.registration
    }

    /// Turntable axis of `frame`.
    ///
    /// Falls back to the frame's `axis.txt`, then to an axis through the
    /// bounding sphere of the reference view, then to the default axis.
    pub fn axis(&self, frame: u32) -> ReferenceAxis {
        if let Some(axis) = lock(&self.axes).get(&frame) {
            return *axis;
        }

        let axis = self
            .axis_from_file(frame)
            .or_else(|| self.axis_from_reference_view(frame))
            .unwrap_or_default();
        *lock(&self.axes).entry(frame).or_insert(axis)
    }

    fn axis_from_file(&self, frame: u32) -> Option<ReferenceAxis> {
        let path = self.store.layout().axis_path(frame)?;
        match read_axis(&path) {
            Ok(axis) => axis,
            Err(e) => {
                warn!("ignoring unreadable axis file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn axis_from_reference_view(&self, frame: u32) -> Option<ReferenceAxis> {
        let handle = self.store.get(CloudKey::new(frame, 0))?;
        let (center, radius) = handle.lock().records().bounding_sphere()?;
        Some(ReferenceAxis::from_bounding_sphere(center, radius))
    }

    pub fn set_axis(&self, frame: u32, axis: ReferenceAxis) {
        lock(&self.axes).insert(frame, axis);
    }

    pub fn pivot_point(&self, frame: u32) -> Point3d {
        self.axis(frame).pivot_point()
    }

    pub fn axis_normal(&self, frame: u32) -> Vector3d {
        self.axis(frame).axis_normal()
    }

    /// Move the pivot of `frame`'s axis, keeping its direction
    pub fn set_pivot_point(&self, frame: u32, pivot: Point3d) {
        let mut axis = self.axis(frame);
        axis.set_pivot_point(pivot);
        self.set_axis(frame, axis);
    }

    pub fn set_axis_normal(&self, frame: u32, normal: Vector3d) -> Result<()> {
        let mut axis = self.axis(frame);
        axis.set_axis_normal(normal)?;
        self.set_axis(frame, axis);
        Ok(())
    }

    /// Rotation by `angle` about `frame`'s axis
    pub fn rotation_matrix(&self, frame: u32, angle: f64) -> Transform3D {
        self.axis(frame).rotation_matrix(angle)
    }

    /// Read an axis file and use it for `frame`. A missing file leaves the
    /// axis untouched and returns `None`.
    pub fn load_axis<P: AsRef<Path>>(&self, frame: u32, path: P) -> Result<Option<ReferenceAxis>> {
        let axis = read_axis(path)?;
        if let Some(axis) = axis {
            self.set_axis(frame, axis);
        }
        Ok(axis)
    }

    pub fn save_axis<P: AsRef<Path>>(&self, frame: u32, path: P) -> Result<()> {
        write_axis(path, &self.axis(frame))
    }

    /// Correspondence overlay of the last registration of `frame` with
    /// error display on
    pub fn error_overlay(&self, frame: u32) -> Option<ErrorOverlay> {
        lock(&self.errors).get(&frame).cloned()
    }

    fn record_error(&self, frame: u32, max_distance: f64) {
        if self.registration.show_error {
            let overlay = self.compute_error(frame, max_distance);
            lock(&self.errors).insert(frame, overlay);
        }
    }

    /// Handles of every view of `frame` that has a point file
    fn views(&self, frame: u32) -> Vec<CloudHandle> {
        let view_count = self.store.view_count();
        (0..view_count)
            .filter_map(|view| {
                let handle = self.store.get(CloudKey::new(frame, view));
                if handle.is_none() {
                    warn!("frame {} view {} has no point cloud", frame, view);
                }
                handle
            })
            .collect()
    }

    fn init_rotation(&self, handle: &CloudHandle, axis: &ReferenceAxis) {
        let view_count = self.store.view_count();
        handle.lock().init_rotation(axis, view_count);
    }

    /// Views refined by pairwise ICP, in processing order.
    ///
    /// Views are taken pairwise from both sides of the reference view and
    /// work towards the back; only shown views are used.
    pub fn icp_views(&self, frame: u32) -> Vec<u32> {
        let n = self.store.view_count();
        let shown = |view: u32| view < n && self.store.is_shown(CloudKey::new(frame, view));

        let mut views = Vec::new();
        for i in 1..n / 2 {
            if shown(i) {
                views.push(i);
            }
            if shown(n - i) {
                views.push(n - i);
            }
        }
        if n / 2 == 0 {
            if shown(n / 2) {
                views.push(n / 2);
            }
        } else {
            if shown(n / 2) {
                views.push(n / 2);
            }
            if shown(n / 2 + 1) {
                views.push(n / 2 + 1);
            }
        }
        views
    }

    /// Pairwise ICP of the shown views of `frame` against view 0, repeated
    /// `repeat_times` times
    pub fn registration_icp(&self, frame: u32, max_iterations: usize, max_distance: f64, repeat_times: usize) -> Result<()> {
        if max_iterations == 0 {
            return Err(Error::InvalidParameter("ICP needs at least one iteration".to_string()));
        }
        for pass in 0..repeat_times {
            debug!("ICP pass {} of {} on frame {}", pass + 1, repeat_times, frame);
            self.registration_icp_once(frame, max_iterations, max_distance)?;
        }
        Ok(())
    }

    fn registration_icp_once(&self, frame: u32, max_iterations: usize, max_distance: f64) -> Result<()> {
        let handles: Vec<CloudHandle> = self
            .icp_views(frame)
            .into_iter()
            .filter_map(|view| self.store.get(CloudKey::new(frame, view)))
            .collect();
        if handles.is_empty() {
            return Ok(());
        }
        let Some(reference) = self.store.get(CloudKey::new(frame, 0)) else {
            warn!("frame {} has no reference view, skipping ICP", frame);
            return Ok(());
        };

        let axis = self.axis(frame);
        for handle in &handles {
            self.init_rotation(handle, &axis);
        }

        let params = IcpParams::default()
            .with_max_iterations(max_iterations)
            .with_max_correspondence_distance(max_distance)
            .with_transformation_epsilon(self.registration.transformation_epsilon)
            .with_euclidean_fitness_epsilon(self.registration.euclidean_fitness_epsilon);

        let mut target = reference.lock().transformed_positions();
        for handle in &handles {
            let source = handle.lock().transformed_positions();
            if source.is_empty() || target.is_empty() {
                warn!("{}: nothing to align", handle.key());
                continue;
            }

            let result = icp(&source, &target, Transform3D::identity(), &params)?;
            debug!(
                "{}: ICP mse {:.4} after {} iterations (converged: {})",
                handle.key(),
                result.mse,
                result.iterations,
                result.converged
            );

            {
                let mut cloud = handle.lock();
                let transform = result.transformation.compose(cloud.transform());
                cloud.set_transform(transform);
            }
            target.extend(source.iter().map(|p| result.transformation.transform_point(p)));
        }

        self.record_error(frame, max_distance);
        Ok(())
    }

    fn denoise_views(&self, handles: &[CloudHandle], segment_threshold: usize) {
        if !self.registration.denoise_before_registration {
            return;
        }
        for handle in handles {
            handle.lock().denoise(segment_threshold, self.denoise.triangle_length);
        }
    }

    /// Global LUM registration of every view of `frame`, then merge and
    /// axis refinement
    pub fn registration_lum(
        &self,
        frame: u32,
        segment_threshold: usize,
        max_iterations: usize,
        max_distance: f64,
    ) -> Result<()> {
        if max_iterations == 0 {
            return Err(Error::InvalidParameter("LUM needs at least one iteration".to_string()));
        }
        info!("LUM registration of frame {} running", frame);

        let handles = self.views(frame);
        self.denoise_views(&handles, segment_threshold);
        let axis = self.axis(frame);
        let view_count = self.store.view_count();
        for handle in &handles {
            let mut cloud = handle.lock();
            cloud.init_rotation(&axis, view_count);
            cloud.set_registered(true)?;
        }

        let lum_iterations = self.registration.lum_iterations.max(1);
        let passes = max_iterations.div_ceil(lum_iterations).max(1);
        if handles.len() >= 2 {
            for pass in 0..passes {
                debug!("LUM pass {} of {} on frame {}", pass + 1, passes, frame);
                self.lum_pass(&handles, lum_iterations, max_distance)?;
            }
        }

        self.record_error(frame, max_distance);
        self.save_registered_points(frame)?;
        self.refine_axis(frame)?;

        self.sink
            .notify(Notification::Message(format!("LUM registration for frame {} finished", frame)));
        Ok(())
    }

    fn lum_pass(&self, handles: &[CloudHandle], lum_iterations: usize, max_distance: f64) -> Result<()> {
        let positions: Vec<Vec<Point3d>> = handles.iter().map(|h| h.lock().transformed_positions()).collect();

        let mut lum = Lum::new().with_max_iterations(lum_iterations);
        for points in &positions {
            lum.add_point_cloud(points.clone());
        }
        let n = positions.len();
        for source in 0..n {
            let target = (source + 1) % n;
            let correspondences = reciprocal_correspondences(&positions[source], &positions[target], max_distance);
            lum.set_correspondences(source, target, &correspondences)?;
        }
        lum.compute()?;

        for (vertex, handle) in handles.iter().enumerate() {
            let Some(pose) = lum.transformation(vertex) else {
                continue;
            };
            let mut cloud = handle.lock();
            let transform = pose.compose(cloud.transform());
            cloud.set_transform(transform);
            cloud.set_registered(true)?;
        }
        Ok(())
    }

    /// Nominal rotations only: mark every view registered, then merge and
    /// refine the axis
    pub fn registration(&self, frame: u32, segment_threshold: usize) -> Result<()> {
        info!("registration of frame {} running", frame);
        let handles = self.views(frame);
        self.denoise_views(&handles, segment_threshold);

        let axis = self.axis(frame);
        let view_count = self.store.view_count();
        for handle in &handles {
            let mut cloud = handle.lock();
            cloud.init_rotation(&axis, view_count);
            cloud.set_registered(true)?;
        }

        self.record_error(frame, self.registration.max_distance);
        self.save_registered_points(frame)?;
        self.refine_axis(frame)?;
        Ok(())
    }

    /// Reciprocal correspondences between shown neighbouring views and
    /// between the first and last view
    pub fn compute_error(&self, frame: u32, max_distance: f64) -> ErrorOverlay {
        let n = self.store.view_count();
        if n == 0 {
            return ErrorOverlay::default();
        }
        let axis = self.axis(frame);

        let mut shown = vec![false; n as usize];
        shown[0] = true;
        for view in 1..n {
            let key = CloudKey::new(frame, view);
            shown[view as usize] = self.store.is_shown(key);
            if shown[view as usize] {
                if let Some(handle) = self.store.get(key) {
                    self.init_rotation(&handle, &axis);
                }
            }
        }

        let last = n as usize - 1;
        let mut pairs: Vec<(u32, u32)> = (0..last)
            .filter(|&i| shown[i] && shown[i + 1])
            .map(|i| (i as u32, i as u32 + 1))
            .collect();
        if shown[0] && shown[last] {
            pairs.push((0, last as u32));
        }

        let mut overlay = ErrorOverlay::default();
        for (source_view, target_view) in pairs {
            let (Some(source), Some(target)) = (
                self.store.get(CloudKey::new(frame, source_view)),
                self.store.get(CloudKey::new(frame, target_view)),
            ) else {
                continue;
            };
            let source = source.lock().transformed_positions();
            let target = target.lock().transformed_positions();

            for c in reciprocal_correspondences(&source, &target, max_distance) {
                overlay.segments.push((source[c.source], target[c.target]));
                overlay.colors.push(jet(c.distance, 0.0, max_distance));
            }
        }
        debug!("frame {}: {} error segments", frame, overlay.len());
        overlay
    }

    /// Merge the registered views of `frame` into the frame cloud.
    ///
    /// Each view is cut by the turntable plane first. Returns the number of
    /// points written.
    pub fn save_registered_points(&self, frame: u32) -> Result<usize> {
        let layout = self.store.layout();
        let Some(path) = layout.points_path(CloudKey::merged(frame)) else {
            return Ok(0);
        };
        let axis = self.axis(frame);

        let mut merged = RecordCloud::new();
        for handle in self.views(frame) {
            let mut cloud = handle.lock();
            cloud.extract_by_plane(&axis);
            if !cloud.is_registered() {
                continue;
            }
            merged.extend(cloud.transformed_records());
        }

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        PcdWriter::write_point_cloud(&merged, &path)?;
        self.store.reload(CloudKey::merged(frame))?;
        info!("frame {}: saved {} registered points to {}", frame, merged.len(), path.display());
        Ok(merged.len())
    }

    /// Re-estimate `frame`'s axis from the registered view poses and write
    /// it next to the frame cloud. `None` without registered views.
    pub fn refine_axis(&self, frame: u32) -> Result<Option<ReferenceAxis>> {
        let poses: Vec<Transform3D> = self
            .views(frame)
            .iter()
            .filter(|h| !h.key().is_reference())
            .filter_map(|h| {
                let cloud = h.lock();
                cloud.is_registered().then(|| cloud.transform())
            })
            .collect();
        if poses.is_empty() {
            debug!("frame {}: no registered views, axis unchanged", frame);
            return Ok(None);
        }

        let refined = refine_axis(&self.axis(frame), &poses)?;
        self.set_axis(frame, refined);
        if let Some(path) = self.store.layout().axis_path(frame) {
            write_axis(&path, &refined)?;
        }
        Ok(Some(refined))
    }
}
