use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{BackendRegistry, ScriptedBackend};
use crate::ingest::FileConfig;
use crate::storage::{InMemoryStatePublisher, SqliteStatePublisher, StatePublisher};

const DEFAULT_DB_PATH: &str = "mask_tally.db";
const DEFAULT_SOURCE: &str = "stub://camera";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_BACKEND: &str = "scripted";
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8750";
const DEFAULT_POLL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct CounterConfigFile {
    store: Option<String>,
    db_path: Option<String>,
    source: Option<SourceConfigFile>,
    backend: Option<BackendConfigFile>,
    api: Option<ApiConfigFile>,
    dashboard: Option<DashboardConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    path: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    name: Option<String>,
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    enabled: Option<bool>,
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DashboardConfigFile {
    poll_ms: Option<u64>,
    history_window: Option<usize>,
}

/// Which publisher backs the shared state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(anyhow!("unknown store '{}' (expected memory|sqlite)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub store: StoreKind,
    pub db_path: String,
    pub source: FileConfig,
    pub backend: BackendSettings,
    pub api_addr: Option<String>,
    pub poll_interval: Duration,
    pub history_window: usize,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Registered backend name (`scripted`, or `tract` with the backend-tract feature).
    pub name: String,
    /// ONNX model for `tract`, detection script JSON for `scripted`.
    pub model_path: Option<PathBuf>,
    pub confidence: f32,
    pub input_width: u32,
    pub input_height: u32,
}

impl BackendSettings {
    /// Build a registry holding the configured backend as its default.
    pub fn build_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        match self.name.as_str() {
            "scripted" => {
                let backend = match &self.model_path {
                    Some(path) => ScriptedBackend::from_json_file(path)?,
                    None => ScriptedBackend::demo(),
                };
                registry.register(backend);
            }
            #[cfg(feature = "backend-tract")]
            "tract" => {
                let path = self
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("tract backend requires backend.model_path"))?;
                let backend =
                    crate::detect::TractBackend::new(path, self.input_width, self.input_height)?
                        .with_threshold(self.confidence);
                registry.register(backend);
            }
            other => {
                return Err(anyhow!(
                    "inference backend '{}' is not available in this build",
                    other
                ))
            }
        }
        registry.set_default(&self.name)?;
        Ok(registry)
    }
}

impl CounterConfig {
    /// Load from `MASK_TALLY_CONFIG` (if set), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MASK_TALLY_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Open the configured store.
    pub fn open_publisher(&self) -> Result<Arc<dyn StatePublisher>> {
        Ok(match self.store {
            StoreKind::Memory => Arc::new(InMemoryStatePublisher::new()),
            StoreKind::Sqlite => Arc::new(SqliteStatePublisher::open(&self.db_path)?),
        })
    }

    fn from_file(file: CounterConfigFile) -> Result<Self> {
        let store = match file.store.as_deref() {
            Some(store) => store.parse()?,
            None => StoreKind::Sqlite,
        };
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let source_file = file.source.unwrap_or_default();
        let source = FileConfig {
            path: source_file
                .path
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            max_frames: source_file.max_frames,
        };
        let backend_file = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            name: backend_file
                .name
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: backend_file.model_path,
            confidence: backend_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            input_width: backend_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: backend_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
        };
        let api_addr = match file.api {
            Some(ApiConfigFile {
                enabled: Some(false),
                ..
            }) => None,
            Some(api) => Some(api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string())),
            None => Some(DEFAULT_API_ADDR.to_string()),
        };
        let dashboard = file.dashboard.unwrap_or_default();
        Ok(Self {
            store,
            db_path,
            source,
            backend,
            api_addr,
            poll_interval: Duration::from_millis(dashboard.poll_ms.unwrap_or(DEFAULT_POLL_MS)),
            history_window: dashboard
                .history_window
                .unwrap_or(crate::DEFAULT_HISTORY_WINDOW),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(store) = std::env::var("MASK_TALLY_STORE") {
            if !store.trim().is_empty() {
                self.store = store.parse()?;
            }
        }
        if let Ok(path) = std::env::var("MASK_TALLY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(source) = std::env::var("MASK_TALLY_SOURCE") {
            if !source.trim().is_empty() {
                self.source.path = source;
            }
        }
        if let Ok(frames) = std::env::var("MASK_TALLY_MAX_FRAMES") {
            if !frames.trim().is_empty() {
                let frames: u64 = frames.trim().parse().map_err(|_| {
                    anyhow!("MASK_TALLY_MAX_FRAMES must be an integer frame count")
                })?;
                self.source.max_frames = Some(frames);
            }
        }
        if let Ok(name) = std::env::var("MASK_TALLY_BACKEND") {
            if !name.trim().is_empty() {
                self.backend.name = name;
            }
        }
        if let Ok(model) = std::env::var("MASK_TALLY_MODEL") {
            if !model.trim().is_empty() {
                self.backend.model_path = Some(PathBuf::from(model));
            }
        }
        if let Ok(addr) = std::env::var("MASK_TALLY_API_ADDR") {
            let addr = addr.trim();
            if addr.eq_ignore_ascii_case("off") {
                self.api_addr = None;
            } else if !addr.is_empty() {
                self.api_addr = Some(addr.to_string());
            }
        }
        if let Ok(poll) = std::env::var("MASK_TALLY_POLL_MS") {
            if !poll.trim().is_empty() {
                let ms: u64 = poll.trim().parse().map_err(|_| {
                    anyhow!("MASK_TALLY_POLL_MS must be an integer number of milliseconds")
                })?;
                self.poll_interval = Duration::from_millis(ms);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.store == StoreKind::Sqlite && self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must be set for the sqlite store"));
        }
        if self.source.path.trim().is_empty() {
            return Err(anyhow!("source path must be set"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.backend.confidence) {
            return Err(anyhow!("backend confidence must be within 0..=1"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("dashboard poll interval must be greater than zero"));
        }
        if self.history_window == 0 {
            return Err(anyhow!("dashboard history window must be greater than zero"));
        }
        self.backend.name = self.backend.name.trim().to_lowercase();
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
