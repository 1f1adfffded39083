#![forbid(unsafe_code)]

//! Notification settings as data.
//!
//! A [`NotifyConfig`] selects one of the built-in notification strategies
//! and can be applied to a builder with
//! [`SliceBuilder::config`](crate::SliceBuilder::config). With the `config`
//! feature it can also be loaded from TOML or JSON:
//!
//! ```toml
//! label = "todos"
//! mode = "debounce"
//! window_ms = 50
//! ```

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, SliceError};
use crate::pipeline::{Coalesce, Debounce, NotifyMiddleware};
use crate::schedule::TaskQueue;

/// Default debounce window, one frame at 60 Hz.
pub const DEFAULT_WINDOW_MS: u64 = 16;

/// When a slice runs its notify cycle after a commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum NotifyMode {
    /// Synchronously, after every commit.
    #[default]
    Immediate,
    /// Trailing-edge debounce over `window_ms`.
    Debounce,
    /// Once per task-queue drain.
    Coalesce,
}

impl NotifyMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Debounce => "debounce",
            Self::Coalesce => "coalesce",
        }
    }
}

impl FromStr for NotifyMode {
    type Err = SliceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" | "sync" => Ok(Self::Immediate),
            "debounce" => Ok(Self::Debounce),
            "coalesce" | "microtask" => Ok(Self::Coalesce),
            other => Err(SliceError::Config(format!(
                "unknown notify mode '{other}' (expected immediate, debounce or coalesce)"
            ))),
        }
    }
}

impl std::fmt::Display for NotifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loaded notification settings for one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default, deny_unknown_fields))]
pub struct NotifyConfig {
    /// Overrides the builder's label when set.
    pub label: Option<String>,
    pub mode: NotifyMode,
    /// Debounce window in milliseconds. Ignored by other modes.
    pub window_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            label: None,
            mode: NotifyMode::Immediate,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl NotifyConfig {
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn debounce(window: Duration) -> Self {
        Self {
            mode: NotifyMode::Debounce,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn coalesce() -> Self {
        Self {
            mode: NotifyMode::Coalesce,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Reject settings no strategy can honor.
    ///
    /// # Errors
    ///
    /// [`SliceError::Config`] for a zero-length debounce window.
    pub fn validate(&self) -> Result<()> {
        if self.mode == NotifyMode::Debounce && self.window_ms == 0 {
            return Err(SliceError::Config(
                "debounce mode needs a window_ms greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Middleware implementing this mode on `queue`; `None` for immediate.
    #[must_use]
    pub fn middleware(&self, queue: &TaskQueue) -> Option<Box<dyn NotifyMiddleware>> {
        match self.mode {
            NotifyMode::Immediate => None,
            NotifyMode::Debounce => Some(Box::new(Debounce::new(queue, self.window()))),
            NotifyMode::Coalesce => Some(Box::new(Coalesce::new(queue))),
        }
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// [`SliceError::Config`] on syntax errors, unknown keys or invalid
    /// values.
    #[cfg(feature = "config")]
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|err| SliceError::Config(format!("invalid TOML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`SliceError::Config`] on syntax errors, unknown keys or invalid
    /// values.
    #[cfg(feature = "config")]
    pub fn from_json_str(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)
            .map_err(|err| SliceError::Config(format!("invalid JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file, chosen by extension.
    ///
    /// # Errors
    ///
    /// [`SliceError::Config`] if the file cannot be read, has another
    /// extension, or fails to parse.
    #[cfg(feature = "config")]
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|err| {
            SliceError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&source),
            Some("json") => Self::from_json_str(&source),
            _ => Err(SliceError::Config(format!(
                "unsupported config file {} (expected .toml or .json)",
                path.display()
            ))),
        }
    }
}
