//! Per-frame and per-view jobs
//!
//! A [`Job`] is an immutable description of one unit of work. All jobs run
//! through [`run_job`], which resolves clouds through the store and returns
//! once the result is on disk.

use crate::config::EngineConfig;
use crate::layout::frame_dir_name;
use crate::registrator::Registrator;
use crate::store::CloudStore;
use log::{debug, info, warn};
use mvreg_core::{CloudKey, Error, PointRecord, RecordCloud, Result};
use mvreg_io::{read_bxyzuv, PcdWriter, BXYZUV_FILE_NAME, POINTS_FILE_NAME};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

/// Kinds of batches; at most one batch per category runs at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobCategory {
    PointsGeneration,
    Registration,
    Denoise,
    Downsampling,
    DataCut,
    RemoveOutliers,
    ExtractPoints,
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobCategory::PointsGeneration => "Generate Points",
            JobCategory::Registration => "Register Frames",
            JobCategory::Denoise => "Denoise Frames",
            JobCategory::Downsampling => "Downsample Frames",
            JobCategory::DataCut => "Cut Frames",
            JobCategory::RemoveOutliers => "Remove Outliers",
            JobCategory::ExtractPoints => "Extract Points",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Run the external converter on one view, then colour its points
    PointsGeneration {
        frame: u32,
        view: u32,
        ctr_threshold: u32,
        sat_threshold: u32,
    },
    /// LUM registration of a frame
    Registration {
        frame: u32,
        segment_threshold: usize,
        max_iterations: usize,
        max_distance: f64,
    },
    /// Component denoise of every view of a frame
    Denoise { frame: u32, segment_threshold: usize },
    /// Write every `sample_ratio`-th point of the frame cloud under `folder`
    Downsampling {
        frame: u32,
        sample_ratio: usize,
        folder: PathBuf,
    },
    /// Drop frame cloud points behind the turntable plane
    DataCut { frame: u32 },
    /// Density denoise of the frame cloud
    RemoveOutliers { frame: u32 },
    /// Copy the frame cloud under `folder` when `frame` is a multiple of `interval`
    ExtractPoints { frame: u32, interval: usize, folder: PathBuf },
}

impl Job {
    pub fn category(&self) -> JobCategory {
        match self {
            Job::PointsGeneration { .. } => JobCategory::PointsGeneration,
            Job::Registration { .. } => JobCategory::Registration,
            Job::Denoise { .. } => JobCategory::Denoise,
            Job::Downsampling { .. } => JobCategory::Downsampling,
            Job::DataCut { .. } => JobCategory::DataCut,
            Job::RemoveOutliers { .. } => JobCategory::RemoveOutliers,
            Job::ExtractPoints { .. } => JobCategory::ExtractPoints,
        }
    }

    pub fn frame(&self) -> u32 {
        match self {
            Job::PointsGeneration { frame, .. }
            | Job::Registration { frame, .. }
            | Job::Denoise { frame, .. }
            | Job::Downsampling { frame, .. }
            | Job::DataCut { frame }
            | Job::RemoveOutliers { frame }
            | Job::ExtractPoints { frame, .. } => *frame,
        }
    }

    /// Cloud the job produces; frame jobs produce the merged cloud
    pub fn key(&self) -> CloudKey {
        match self {
            Job::PointsGeneration { frame, view, .. } => CloudKey::new(*frame, *view),
            other => CloudKey::merged(other.frame()),
        }
    }

    /// Reject parameters the job cannot run with
    pub fn validate(&self) -> Result<()> {
        match self {
            Job::Registration { max_iterations: 0, .. } => {
                Err(Error::InvalidParameter("registration needs at least one iteration".to_string()))
            }
            Job::Registration { max_distance, .. } if !(max_distance.is_finite() && *max_distance > 0.0) => Err(
                Error::InvalidParameter(format!("registration distance must be positive, got {}", max_distance)),
            ),
            Job::Downsampling { sample_ratio: 0, .. } => {
                Err(Error::InvalidParameter("sample ratio must be at least 1".to_string()))
            }
            Job::ExtractPoints { interval: 0, .. } => {
                Err(Error::InvalidParameter("extraction interval must be at least 1".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// External image-to-points converter
pub trait PointsGenerator: Send + Sync {
    /// Turn the images of one view into `points.bxyzuv` inside `points_folder`
    fn generate(&self, points_folder: &Path, ctr_threshold: u32, sat_threshold: u32) -> Result<()>;
}

/// Converter executable invoked as `<program> <points_folder> <ctr> <sat>`
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    program: PathBuf,
}

impl ExternalConverter {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// First file in `folder` whose name starts with `prefix`
    pub fn discover<P: AsRef<Path>>(folder: P, prefix: &str) -> Result<Option<Self>> {
        let folder = folder.as_ref();
        if !folder.is_dir() {
            return Ok(None);
        }
        let mut candidates: Vec<PathBuf> = fs::read_dir(folder)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .is_some_and(|name| name.to_string_lossy().starts_with(prefix))
            })
            .collect();
        candidates.sort();
        Ok(candidates.into_iter().next().map(Self::new))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl PointsGenerator for ExternalConverter {
    fn generate(&self, points_folder: &Path, ctr_threshold: u32, sat_threshold: u32) -> Result<()> {
        debug!("running {} on {}", self.program.display(), points_folder.display());
        let status = Command::new(&self.program)
            .arg(points_folder)
            .arg(ctr_threshold.to_string())
            .arg(sat_threshold.to_string())
            .status()?;
        if !status.success() {
            return Err(Error::Algorithm(format!(
                "{} exited with {} for {}",
                self.program.display(),
                status,
                points_folder.display()
            )));
        }
        Ok(())
    }
}

/// RGB image the scanner took of a view
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    width: usize,
    height: usize,
    pixels: Vec<[u8; 3]>,
}

impl Snapshot {
    /// Row-major pixels; `pixels.len()` must be `width * height`
    pub fn new(width: usize, height: usize, pixels: Vec<[u8; 3]>) -> Result<Self> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return Err(Error::InvalidData(format!(
                "snapshot of {}x{} needs {} pixels, got {}",
                width,
                height,
                width * height,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// Pixel at `(u, v)` truncated and clamped into the image
    pub fn pixel(&self, u: f64, v: f64) -> [u8; 3] {
        let clamp = |value: f64, size: usize| {
            let index = if value.is_finite() { value.trunc().max(0.0) as usize } else { 0 };
            index.min(size - 1)
        };
        self.pixels[clamp(v, self.height) * self.width + clamp(u, self.width)]
    }
}

/// Source of the snapshot used to colour freshly generated points
pub trait Colorizer: Send + Sync {
    /// Snapshot of the view stored in `points_folder`, `None` if there is none
    fn snapshot(&self, points_folder: &Path) -> Result<Option<Snapshot>>;
}

/// Everything a job needs to run
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<CloudStore>,
    pub registrator: Arc<Registrator>,
    pub config: EngineConfig,
    pub generator: Option<Arc<dyn PointsGenerator>>,
    pub colorizer: Option<Arc<dyn Colorizer>>,
}

impl JobContext {
    pub fn new(store: Arc<CloudStore>, registrator: Arc<Registrator>, config: EngineConfig) -> Self {
        Self {
            store,
            registrator,
            config,
            generator: None,
            colorizer: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn PointsGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_colorizer(mut self, colorizer: Arc<dyn Colorizer>) -> Self {
        self.colorizer = Some(colorizer);
        self
    }
}

/// Execute `job`. Missing clouds or folders make the job a no-op.
pub fn run_job(job: &Job, ctx: &JobContext) -> Result<()> {
    job.validate()?;
    match job {
        Job::PointsGeneration {
            frame,
            view,
            ctr_threshold,
            sat_threshold,
        } => generate_points(ctx, CloudKey::new(*frame, *view), *ctr_threshold, *sat_threshold),
        Job::Registration {
            frame,
            segment_threshold,
            max_iterations,
            max_distance,
        } => ctx
            .registrator
            .registration_lum(*frame, *segment_threshold, *max_iterations, *max_distance),
        Job::Denoise {
            frame,
            segment_threshold,
        } => denoise_frame(ctx, *frame, *segment_threshold),
        Job::Downsampling {
            frame,
            sample_ratio,
            folder,
        } => downsample_frame(ctx, *frame, *sample_ratio, folder),
        Job::DataCut { frame } => cut_frame(ctx, *frame),
        Job::RemoveOutliers { frame } => remove_outliers(ctx, *frame),
        Job::ExtractPoints { frame, interval, folder } => extract_points(ctx, *frame, *interval, folder),
    }
}

fn generate_points(ctx: &JobContext, key: CloudKey, ctr_threshold: u32, sat_threshold: u32) -> Result<()> {
    let Some(folder) = ctx.store.layout().points_folder(key) else {
        return Ok(());
    };
    match &ctx.generator {
        Some(generator) => generator.generate(&folder, ctr_threshold, sat_threshold)?,
        None => warn!("no points generator configured, colouring existing output of {}", key),
    }

    let snapshot = match &ctx.colorizer {
        Some(colorizer) => colorizer.snapshot(&folder)?,
        None => None,
    };
    if colorize_points(&folder, snapshot.as_ref())?.is_some() {
        ctx.store.reload(key)?;
    }
    Ok(())
}

/// Turn `points.bxyzuv` in `folder` into `points.pcd`.
///
/// Normals point back at the scanner origin; colours are sampled from
/// `snapshot` when there is one. The intermediate file is removed. Returns
/// the number of points, `None` when there was nothing to convert.
pub fn colorize_points(folder: &Path, snapshot: Option<&Snapshot>) -> Result<Option<usize>> {
    let raw_path = folder.join(BXYZUV_FILE_NAME);
    if !raw_path.is_file() {
        return Ok(None);
    }

    let samples = read_bxyzuv(&raw_path)?;
    let cloud: RecordCloud = samples
        .iter()
        .map(|sample| {
            let mut record = PointRecord::at(sample.position);
            let direction = -sample.position.coords;
            if let Some(normal) = direction.try_normalize(0.0) {
                record.normal = normal;
            }
            if let Some(snapshot) = snapshot {
                record.color = snapshot.pixel(sample.u, sample.v);
            }
            record
        })
        .collect();

    fs::remove_file(&raw_path)?;
    PcdWriter::write_point_cloud(&cloud, folder.join(POINTS_FILE_NAME))?;
    debug!("converted {} scanned points in {}", cloud.len(), folder.display());
    Ok(Some(cloud.len()))
}

fn denoise_frame(ctx: &JobContext, frame: u32, segment_threshold: usize) -> Result<()> {
    let triangle_length = ctx.config.denoise.triangle_length;
    for view in 0..ctx.store.view_count() {
        let Some(handle) = ctx.store.get(CloudKey::new(frame, view)) else {
            continue;
        };
        let mut cloud = handle.lock();
        let marked = cloud.denoise(segment_threshold, triangle_length);
        cloud.remove_noise();
        cloud.save()?;
        debug!("{}: removed {} noise points", cloud.key(), marked);
    }
    Ok(())
}

fn output_path(folder: &Path, frame: u32) -> PathBuf {
    folder.join(frame_dir_name(frame)).join(POINTS_FILE_NAME)
}

fn downsample_frame(ctx: &JobContext, frame: u32, sample_ratio: usize, folder: &Path) -> Result<()> {
    let Some(handle) = ctx.store.get(CloudKey::merged(frame)) else {
        return Ok(());
    };
    let sampled = handle.lock().records().downsampled(sample_ratio)?;

    let path = output_path(folder, frame);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    PcdWriter::write_point_cloud(&sampled, &path)?;
    info!("frame {}: wrote {} sampled points to {}", frame, sampled.len(), path.display());
    Ok(())
}

fn cut_frame(ctx: &JobContext, frame: u32) -> Result<()> {
    let Some(handle) = ctx.store.get(CloudKey::merged(frame)) else {
        return Ok(());
    };
    let axis = ctx.registrator.axis(frame);
    let mut cloud = handle.lock();
    let marked = cloud.extract_by_plane(&axis);
    cloud.remove_noise();
    cloud.save()?;
    debug!("frame {}: cut {} points behind the turntable plane", frame, marked);
    Ok(())
}

fn remove_outliers(ctx: &JobContext, frame: u32) -> Result<()> {
    let Some(handle) = ctx.store.get(CloudKey::merged(frame)) else {
        return Ok(());
    };
    let denoise = &ctx.config.denoise;
    let mut cloud = handle.lock();
    let marked = cloud.denoise_by_density(denoise.density_neighbors, denoise.density_weight);
    cloud.remove_noise();
    cloud.save()?;
    debug!("frame {}: removed {} outliers", frame, marked);
    Ok(())
}

fn extract_points(ctx: &JobContext, frame: u32, interval: usize, folder: &Path) -> Result<()> {
    if frame as usize % interval != 0 {
        return Ok(());
    }
    let Some(source) = ctx.store.layout().points_path(CloudKey::merged(frame)) else {
        return Ok(());
    };
    if !source.is_file() {
        return Ok(());
    }

    let path = output_path(folder, frame);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::copy(&source, &path)?;
    debug!("frame {}: extracted to {}", frame, path.display());
    Ok(())
}
