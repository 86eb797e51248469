//! `mvreg`: run registration and cleanup batches over a scan project
//!
//! Usage:
//!   mvreg info <root>                     Frames, views and axis of a project
//!   mvreg register <root>                 LUM registration of every frame
//!   mvreg icp <root> --frame 3            Pairwise ICP of one frame, then merge
//!   mvreg denoise <root>                  Component denoise of every view
//!   mvreg refine-axis <root> --frame 3    Re-estimate the turntable axis
//!   mvreg config                          Print the default configuration
//!
//! Set RUST_LOG=debug for per-job detail.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use mvreg_core::CloudKey;
use mvreg_engine::{
    BatchEvent, BatchHandle, CloudStore, EngineConfig, ExternalConverter, JobContext, Registrator, TaskDispatcher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "mvreg", version, about = "Multi-view turntable point cloud registration")]
struct Cli {
    /// JSON configuration file; defaults are used for missing fields
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Number of worker threads
    #[arg(long, short = 'j', global = true)]
    threads: Option<usize>,

    /// First frame to process
    #[arg(long, global = true)]
    start: Option<u32>,

    /// Last frame to process
    #[arg(long, global = true)]
    end: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Project {
    /// Project root, its `points` folder or a single `frame_NNNNN` folder
    root: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what the project contains
    Info(Project),
    /// Register every frame with LUM and merge its views
    Register {
        #[command(flatten)]
        project: Project,
        /// Smallest connected component kept when denoising first
        #[arg(long)]
        segment_threshold: Option<usize>,
    },
    /// Pairwise ICP of one frame against its reference view
    Icp {
        #[command(flatten)]
        project: Project,
        #[arg(long)]
        frame: u32,
        /// ICP passes over the frame
        #[arg(long)]
        repeat: Option<usize>,
    },
    /// Drop small connected components from every view
    Denoise {
        #[command(flatten)]
        project: Project,
        #[arg(long)]
        segment_threshold: Option<usize>,
    },
    /// Drop points below the turntable plane from the frame clouds
    Cut(Project),
    /// Density-based outlier removal on the frame clouds
    RemoveOutliers(Project),
    /// Write every n-th point of each frame cloud to another folder
    Downsample {
        #[command(flatten)]
        project: Project,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        ratio: Option<usize>,
    },
    /// Copy the frame clouds of every n-th frame to another folder
    Extract {
        #[command(flatten)]
        project: Project,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        interval: Option<usize>,
    },
    /// Run the external converter on every view, then colour the points
    Generate {
        #[command(flatten)]
        project: Project,
        /// Converter executable
        #[arg(long)]
        converter: PathBuf,
    },
    /// Re-estimate a frame's turntable axis from its registered views
    RefineAxis {
        #[command(flatten)]
        project: Project,
        #[arg(long)]
        frame: u32,
    },
    /// Print the configuration in effect as JSON
    Config,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.dispatcher.num_threads = Some(threads);
    }
    if cli.start.is_some() {
        config.frames.start = cli.start;
    }
    if cli.end.is_some() {
        config.frames.end = cli.end;
    }
    config.validate()?;
    Ok(config)
}

struct Session {
    store: Arc<CloudStore>,
    registrator: Arc<Registrator>,
    context: JobContext,
}

impl Session {
    fn open(root: &Path, config: &EngineConfig) -> Result<Self> {
        let store = Arc::new(
            CloudStore::open(root, config.dispatcher.cache_threshold)
                .with_context(|| format!("opening {}", root.display()))?,
        );
        if store.frame_range().is_none() {
            bail!("no frames found under {}", root.display());
        }
        let registrator = Arc::new(Registrator::new(Arc::clone(&store), config));
        let context = JobContext::new(Arc::clone(&store), Arc::clone(&registrator), config.clone());
        Ok(Self {
            store,
            registrator,
            context,
        })
    }

    fn dispatcher(&self) -> Result<TaskDispatcher> {
        Ok(TaskDispatcher::new(self.context.clone())?)
    }
}

/// Log progress until the batch ends, fail if any job failed
fn follow(handle: BatchHandle) -> Result<()> {
    for event in handle.events() {
        match event {
            BatchEvent::JobFinished {
                key,
                succeeded,
                finished,
                total,
            } => info!(
                "[{}/{}] {} {}",
                finished,
                total,
                key,
                if succeeded { "done" } else { "failed" }
            ),
            BatchEvent::BatchFinished(_) => break,
        }
    }

    let summary = handle.wait();
    println!(
        "{}: {} of {} jobs completed, {} failed{}",
        summary.category,
        summary.completed,
        summary.total,
        summary.failed,
        if summary.cancelled { ", cancelled" } else { "" }
    );
    if summary.failed > 0 {
        bail!("{} {} jobs failed", summary.failed, summary.category);
    }
    Ok(())
}

fn info(session: &Session) {
    let layout = session.store.layout();
    println!("root:   {}", layout.root().display());
    println!("kind:   {:?}", layout.kind());
    if let Some((start, end)) = layout.frame_range() {
        println!("frames: {} - {}", start, end);
    }
    println!("views:  {}", layout.view_count());

    for frame in layout.frames() {
        let merged = layout
            .points_path(CloudKey::merged(frame))
            .is_some_and(|path| path.is_file());
        let axis = session.registrator.axis(frame);
        println!(
            "{}: merged {}, pivot {:?}, normal {:?}",
            CloudKey::merged(frame),
            if merged { "yes" } else { "no" },
            axis.pivot_point().coords.as_slice(),
            axis.axis_normal().as_slice()
        );
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Config => {
            println!("{}", config.to_json()?);
        }
        Command::Info(project) => {
            let session = Session::open(&project.root, &config)?;
            info(&session);
        }
        Command::Register {
            project,
            segment_threshold,
        } => {
            let session = Session::open(&project.root, &config)?;
            let threshold = segment_threshold.unwrap_or(config.denoise.segment_threshold);
            follow(session.dispatcher()?.dispatch_registration(threshold)?)?;
        }
        Command::Icp { project, frame, repeat } => {
            let session = Session::open(&project.root, &config)?;
            for view in 0..session.store.view_count() {
                session.store.show(CloudKey::new(*frame, view));
            }
            let registration = &config.registration;
            session.registrator.registration_icp(
                *frame,
                registration.max_iterations,
                registration.max_distance,
                repeat.unwrap_or(registration.repeat_times),
            )?;
            session
                .registrator
                .registration(*frame, config.denoise.segment_threshold)?;
            if let Some(overlay) = session.registrator.error_overlay(*frame) {
                println!(
                    "{} correspondences, mean distance {:.4}",
                    overlay.len(),
                    overlay.mean_distance()
                );
            }
        }
        Command::Denoise {
            project,
            segment_threshold,
        } => {
            let session = Session::open(&project.root, &config)?;
            let threshold = segment_threshold.unwrap_or(config.denoise.segment_threshold);
            follow(session.dispatcher()?.dispatch_denoise(threshold)?)?;
        }
        Command::Cut(project) => {
            let session = Session::open(&project.root, &config)?;
            follow(session.dispatcher()?.dispatch_data_cut()?)?;
        }
        Command::RemoveOutliers(project) => {
            let session = Session::open(&project.root, &config)?;
            follow(session.dispatcher()?.dispatch_remove_outliers()?)?;
        }
        Command::Downsample { project, output, ratio } => {
            let session = Session::open(&project.root, &config)?;
            let ratio = ratio.unwrap_or(config.extraction.sample_ratio);
            follow(session.dispatcher()?.dispatch_downsampling(ratio, output)?)?;
        }
        Command::Extract {
            project,
            output,
            interval,
        } => {
            let session = Session::open(&project.root, &config)?;
            let interval = interval.unwrap_or(config.extraction.interval);
            follow(session.dispatcher()?.dispatch_extract_points(interval, output)?)?;
        }
        Command::Generate { project, converter } => {
            let mut session = Session::open(&project.root, &config)?;
            if !converter.is_file() {
                bail!("converter {} not found", converter.display());
            }
            session.context = session
                .context
                .with_generator(Arc::new(ExternalConverter::new(converter)));
            follow(session.dispatcher()?.dispatch_points_generation()?)?;
        }
        Command::RefineAxis { project, frame } => {
            let session = Session::open(&project.root, &config)?;
            match session.registrator.refine_axis(*frame)? {
                Some(axis) => println!(
                    "frame {}: pivot {:?}, normal {:?}",
                    frame,
                    axis.pivot_point().coords.as_slice(),
                    axis.axis_normal().as_slice()
                ),
                None => println!("frame {}: no registered views", frame),
            }
        }
    }
    Ok(())
}
