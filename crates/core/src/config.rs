//! Engine configuration.
//!
//! Configuration is read from a TOML file. Every section and field is
//! optional; anything left out falls back to [`EngineConfig::default`].
//!
//! ```toml
//! validation = true
//!
//! [window]
//! width = 1280
//! height = 720
//!
//! [render]
//! clear_color = [0.1, 0.1, 0.1, 1.0]
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "WRAP_CONFIG";

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "wrap.toml";

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window: WindowConfig,
    /// Request the Khronos validation layer. Startup fails if it is missing.
    pub validation: bool,
    pub shaders: ShaderConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

/// Where shader sources live and where compiled SPIR-V goes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub vertex: String,
    pub fragment: String,
    /// Watch `source_dir` and rebuild the pipeline when a file changes.
    pub hot_reload: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    /// Initial mesh capacity of the descriptor pool.
    pub max_meshes: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            validation: cfg!(debug_assertions),
            shaders: ShaderConfig::default(),
            render: RenderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: "wrap".to_string(),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("shaders"),
            output_dir: PathBuf::from("target/shaders"),
            vertex: "shader.vert".to_string(),
            fragment: "shader.frag".to_string(),
            hot_reload: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_meshes: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,wrap=debug,naga=warn".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load the config from `path`.
    ///
    /// A missing file is not an error and yields the defaults. Unreadable or
    /// malformed files are reported as [`Error::Io`] / [`Error::Config`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config = Self::from_toml(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from `$WRAP_CONFIG`, falling back to `wrap.toml`.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load(path)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.render.max_meshes == 0 {
            return Err(Error::Config("render.max_meshes must be at least 1".into()));
        }
        Ok(())
    }

    /// Full path of the vertex shader source.
    pub fn vertex_shader_path(&self) -> PathBuf {
        self.shaders.source_dir.join(&self.shaders.vertex)
    }

    /// Full path of the fragment shader source.
    pub fn fragment_shader_path(&self) -> PathBuf {
        self.shaders.source_dir.join(&self.shaders.fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.render.max_meshes, 64);
        assert_eq!(config.render.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(config.shaders.hot_reload);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            validation = false

            [window]
            width = 1280
            "#,
        )
        .unwrap();

        assert!(!config.validation);
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "wrap");
        assert_eq!(config.shaders, ShaderConfig::default());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml("[window\nwidth = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = EngineConfig::from_toml("[window]\nwidth = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrap.toml");
        fs::write(&path, "[render]\nmax_meshes = 8\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.render.max_meshes, 8);
    }

    #[test]
    fn test_shader_paths() {
        let config = EngineConfig::default();
        assert_eq!(config.vertex_shader_path(), Path::new("shaders/shader.vert"));
        assert_eq!(config.fragment_shader_path(), Path::new("shaders/shader.frag"));
    }
}
