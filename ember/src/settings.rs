//! Executor configuration
//!
//! Backend selection is a tagged variant with per-backend fields rather
//! than trait objects; the executor validates the pairing at construction.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::{Error, Result};

/// Accelerator backend driving the compiled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cpu,
    Gpu,
    Npu,
    GpuArtisan,
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "npu" => Ok(Self::Npu),
            "gpu_artisan" => Ok(Self::GpuArtisan),
            other => Err(Error::InvalidArgument(format!(
                "unsupported backend: {other}"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
            Self::Npu => write!(f, "npu"),
            Self::GpuArtisan => write!(f, "gpu_artisan"),
        }
    }
}

/// Activation data type override. When unset, each backend's default is
/// used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ActivationDataType {
    F32,
    F16,
    I16,
    I8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Number of worker threads.
    pub number_of_threads: u32,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            number_of_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Maximum top-k any session may request. The default of 1 restricts
    /// sessions to greedy decoding.
    pub max_top_k: u32,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self { max_top_k: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpuArtisanConfig {
    /// Number of output candidates.
    pub num_output_candidates: u32,
    /// Whether to wait for weight uploads before prefilling.
    pub wait_for_weight_uploads: bool,
    /// Number of decode steps per sync.
    pub num_decode_steps_per_sync: u32,
    /// Sequence batch size for encoding. 0 means the batch size is chosen
    /// programmatically.
    pub sequence_batch_size: u32,
    /// Supported LoRA ranks for the base model. Empty means none.
    pub supported_lora_ranks: Vec<u32>,
    /// Maximum top-k any session may request.
    pub max_top_k: u32,
    /// Whether decode logits are exposed to callers.
    pub enable_decode_logits: bool,
}

impl Default for GpuArtisanConfig {
    fn default() -> Self {
        Self {
            num_output_candidates: 1,
            wait_for_weight_uploads: false,
            num_decode_steps_per_sync: 1,
            sequence_batch_size: 0,
            supported_lora_ranks: Vec::new(),
            max_top_k: 1,
            enable_decode_logits: false,
        }
    }
}

/// Backend-specific configuration, one variant per backend.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Cpu(CpuConfig),
    Gpu(GpuConfig),
    Npu,
    GpuArtisan(GpuArtisanConfig),
}

impl BackendConfig {
    fn default_for(backend: Backend) -> Self {
        match backend {
            Backend::Cpu => Self::Cpu(CpuConfig::default()),
            Backend::Gpu => Self::Gpu(GpuConfig::default()),
            Backend::Npu => Self::Npu,
            Backend::GpuArtisan => Self::GpuArtisan(GpuArtisanConfig::default()),
        }
    }
}

/// Paths to the compiled model package on disk.
#[derive(Debug, Clone)]
pub struct ModelAssets {
    path: PathBuf,
}

impl ModelAssets {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Settings for the LLM executor.
///
/// Construct with [`ExecutorSettings::create_default`] and adjust with the
/// setter APIs.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    model_assets: ModelAssets,
    backend: Backend,
    backend_config: BackendConfig,
    /// Maximum number of input plus output tokens; equivalently the KV
    /// cache capacity. 0 means "infer from the model assets".
    max_num_tokens: u32,
    /// Maximum number of images the model can ingest. 0 disables image
    /// input.
    max_num_images: u32,
    activation_data_type: Option<ActivationDataType>,
    cache_dir: Option<PathBuf>,
    /// Preferred over `cache_dir` when set.
    cache_file: Option<PathBuf>,
    dispatch_library_path: Option<PathBuf>,
}

impl ExecutorSettings {
    /// Settings with per-backend defaults for the given model assets.
    #[must_use]
    pub fn create_default(model_assets: ModelAssets, backend: Backend) -> Self {
        Self {
            model_assets,
            backend,
            backend_config: BackendConfig::default_for(backend),
            max_num_tokens: 0,
            max_num_images: 0,
            activation_data_type: None,
            cache_dir: None,
            cache_file: None,
            dispatch_library_path: None,
        }
    }

    #[must_use]
    pub fn model_assets(&self) -> &ModelAssets {
        &self.model_assets
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    #[must_use]
    pub fn max_num_tokens(&self) -> u32 {
        self.max_num_tokens
    }

    pub fn set_max_num_tokens(&mut self, max_num_tokens: u32) {
        self.max_num_tokens = max_num_tokens;
    }

    #[must_use]
    pub fn max_num_images(&self) -> u32 {
        self.max_num_images
    }

    pub fn set_max_num_images(&mut self, max_num_images: u32) {
        self.max_num_images = max_num_images;
    }

    #[must_use]
    pub fn activation_data_type(&self) -> Option<ActivationDataType> {
        self.activation_data_type
    }

    pub fn set_activation_data_type(&mut self, activation_data_type: ActivationDataType) {
        self.activation_data_type = Some(activation_data_type);
    }

    #[must_use]
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    pub fn set_cache_dir(&mut self, cache_dir: impl Into<PathBuf>) {
        self.cache_dir = Some(cache_dir.into());
    }

    #[must_use]
    pub fn cache_file(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    pub fn set_cache_file(&mut self, cache_file: impl Into<PathBuf>) {
        self.cache_file = Some(cache_file.into());
    }

    #[must_use]
    pub fn dispatch_library_path(&self) -> Option<&Path> {
        self.dispatch_library_path.as_deref()
    }

    pub fn set_dispatch_library_path(&mut self, path: impl Into<PathBuf>) {
        self.dispatch_library_path = Some(path.into());
    }

    pub fn set_backend_config(&mut self, backend_config: BackendConfig) {
        self.backend_config = backend_config;
    }

    /// The CPU backend configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if another backend's config is active.
    pub fn cpu_config(&self) -> Result<&CpuConfig> {
        match &self.backend_config {
            BackendConfig::Cpu(config) => Ok(config),
            _ => Err(Self::config_mismatch("cpu")),
        }
    }

    /// The GPU backend configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if another backend's config is active.
    pub fn gpu_config(&self) -> Result<&GpuConfig> {
        match &self.backend_config {
            BackendConfig::Gpu(config) => Ok(config),
            _ => Err(Self::config_mismatch("gpu")),
        }
    }

    /// The GPU artisan backend configuration.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if another backend's config is active.
    pub fn gpu_artisan_config(&self) -> Result<&GpuArtisanConfig> {
        match &self.backend_config {
            BackendConfig::GpuArtisan(config) => Ok(config),
            _ => Err(Self::config_mismatch("gpu_artisan")),
        }
    }

    fn config_mismatch(requested: &str) -> Error {
        Error::InvalidArgument(format!("backend config is not valid for {requested}"))
    }
}
