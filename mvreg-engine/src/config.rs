//! Engine configuration
//!
//! Every parameter the pipeline used to read from dialogs lives here and is
//! passed explicitly. Missing JSON fields fall back to the defaults below, so
//! a config file only needs to name what it changes.

use log::debug;
use mvreg_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub registration: RegistrationConfig,
    pub denoise: DenoiseConfig,
    pub generation: GenerationConfig,
    pub extraction: ExtractionConfig,
    pub frames: FrameRangeConfig,
    pub dispatcher: DispatcherConfig,
}

/// ICP and LUM parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub max_iterations: usize,
    pub max_distance: f64,
    /// Full ICP passes per frame
    pub repeat_times: usize,
    pub transformation_epsilon: f64,
    pub euclidean_fitness_epsilon: f64,
    /// Inner iterations of one LUM pass
    pub lum_iterations: usize,
    /// Compute the correspondence error overlay after registering
    pub show_error: bool,
    /// Run the component denoiser on every view before registering
    pub denoise_before_registration: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_distance: 4.0,
            repeat_times: 5,
            transformation_epsilon: 1e-6,
            euclidean_fitness_epsilon: 64.0,
            lum_iterations: 16,
            show_error: false,
            denoise_before_registration: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    /// Longest triangulation edge that links two points
    pub triangle_length: f64,
    /// Smallest connected cluster that survives
    pub segment_threshold: usize,
    pub density_neighbors: usize,
    pub density_weight: f64,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            triangle_length: 2.5,
            segment_threshold: 10,
            density_neighbors: 10,
            density_weight: mvreg_algorithms::DEFAULT_DENSITY_WEIGHT,
        }
    }
}

/// Thresholds handed to the external image-to-points converter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub ctr_threshold: u32,
    pub sat_threshold: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            ctr_threshold: 25,
            sat_threshold: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Keep every n-th point when downsampling
    pub sample_ratio: usize,
    /// Keep every n-th frame when extracting
    pub interval: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            sample_ratio: 10,
            interval: 5,
        }
    }
}

/// Optional override of the frame range detected from the project layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameRangeConfig {
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl FrameRangeConfig {
    /// Clamp a detected `(start, end)` range by the configured bounds
    pub fn apply(&self, detected: (u32, u32)) -> (u32, u32) {
        let start = self.start.map_or(detected.0, |s| s.max(detected.0));
        let end = self.end.map_or(detected.1, |e| e.min(detected.1));
        (start, end)
    }
}

/// Worker pool and working set sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker threads (None = rayon default)
    pub num_threads: Option<usize>,
    /// Worker stack size in bytes
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
    /// Clouds kept shown while a batch runs (None = pool size)
    pub display_capacity: Option<usize>,
    /// Cache size above which unused clouds are released
    pub cache_threshold: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(8 * 1024 * 1024),
            thread_name_prefix: "mvreg-worker".to_string(),
            display_capacity: None,
            cache_threshold: 64,
        }
    }
}

impl DispatcherConfig {
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_display_capacity(mut self, capacity: usize) -> Self {
        self.display_capacity = Some(capacity);
        self
    }

    pub fn with_cache_threshold(mut self, threshold: usize) -> Self {
        self.cache_threshold = threshold;
        self
    }
}

impl EngineConfig {
    /// Read and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        debug!("loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject parameter values no operation can run with
    pub fn validate(&self) -> Result<()> {
        let registration = &self.registration;
        if registration.max_iterations == 0 {
            return Err(invalid("registration.max_iterations must be at least 1"));
        }
        if registration.lum_iterations == 0 {
            return Err(invalid("registration.lum_iterations must be at least 1"));
        }
        if !positive(registration.max_distance) {
            return Err(invalid("registration.max_distance must be positive"));
        }
        if !positive(self.denoise.triangle_length) {
            return Err(invalid("denoise.triangle_length must be positive"));
        }
        if self.extraction.sample_ratio == 0 {
            return Err(invalid("extraction.sample_ratio must be at least 1"));
        }
        if self.extraction.interval == 0 {
            return Err(invalid("extraction.interval must be at least 1"));
        }
        if let (Some(start), Some(end)) = (self.frames.start, self.frames.end) {
            if start > end {
                return Err(invalid(format!("frames.start {} is after frames.end {}", start, end)));
            }
        }
        if self.dispatcher.num_threads == Some(0) {
            return Err(invalid("dispatcher.num_threads must be at least 1"));
        }
        if self.dispatcher.display_capacity == Some(0) {
            return Err(invalid("dispatcher.display_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidParameter(message.into())
}
