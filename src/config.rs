//! Bridge configuration
//!
//! Tunables with sensible defaults, optionally overridden by a
//! `bridge.toml` in the platform config directory.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::constants::{
    BYTES_PER_SAMPLE, DEFAULT_BUFFER_SECONDS, NETWORK_SAMPLE_RATE, READ_CHUNK_BYTES,
    RENDER_THRESHOLD_BYTES,
};
use crate::error::{Error, Result};

/// Pipeline tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ring buffer depth in seconds of network-format audio
    pub buffer_seconds: f32,

    /// Render loop cadence in milliseconds
    pub render_interval_ms: u64,

    /// Scratch size for each socket read
    pub read_chunk_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            render_interval_ms: 200,
            read_chunk_bytes: READ_CHUNK_BYTES,
        }
    }
}

impl BridgeConfig {
    /// Ring buffer capacity in bytes
    pub fn capacity_bytes(&self) -> usize {
        (NETWORK_SAMPLE_RATE as f32 * BYTES_PER_SAMPLE as f32 * self.buffer_seconds) as usize
    }

    /// Bytes required before the render loop flushes a chunk
    pub fn render_threshold_bytes(&self) -> usize {
        RENDER_THRESHOLD_BYTES
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.buffer_seconds > 0.0) {
            return Err(Error::Config(format!(
                "buffer_seconds must be positive, got {}",
                self.buffer_seconds
            )));
        }
        if self.capacity_bytes() < self.render_threshold_bytes() {
            return Err(Error::Config(format!(
                "buffer capacity {}B is below the render threshold {}B",
                self.capacity_bytes(),
                self.render_threshold_bytes()
            )));
        }
        if self.render_interval_ms == 0 {
            return Err(Error::Config("render_interval_ms must be non-zero".into()));
        }
        if self.read_chunk_bytes == 0 {
            return Err(Error::Config("read_chunk_bytes must be non-zero".into()));
        }
        Ok(())
    }

    /// Path of the optional config file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pcm-bridge").map(|dirs| dirs.config_dir().join("bridge.toml"))
    }

    /// Load from the platform config dir, falling back to defaults when no
    /// file exists.
    pub fn load() -> Result<Self> {
        let Some(path) = Self::default_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}
