// User settings
// Loaded from ~/.config/cellwork/settings.json

use cellwork_engine::ReactiveOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Engine
    #[serde(rename = "engine.lazyEval")]
    pub lazy_eval: bool,

    #[serde(rename = "engine.useCache")]
    pub use_cache: bool,

    // Logging (error, warn, info, debug, trace)
    #[serde(rename = "log.level")]
    pub log_level: String,

    // Watch
    #[serde(rename = "watch.intervalMs")]
    pub watch_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Engine
            lazy_eval: true,
            use_cache: true,
            // Logging
            log_level: "warn".to_string(),
            // Watch
            watch_interval_ms: 500,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"{
    // Engine: lazy recompute on read, or eager recompute on write
    "engine.lazyEval": true,
    "engine.useCache": true,

    // Logging: "error", "warn", "info", "debug", "trace"
    // RUST_LOG and -v flags take precedence
    "log.level": "warn",

    // Polling interval for `cellwork watch`
    "watch.intervalMs": 500
}
"#;

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cellwork");
        config_dir.join("settings.json")
    }

    /// Load settings from the default location, creating a commented
    /// default file on first run.
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            let settings = Self::default();
            settings.create_default_file(&path);
            return settings;
        }

        Self::load_from(&path)
    }

    /// Load settings from an explicit path, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("Error parsing {}: {}", path.display(), e);
                    eprintln!("Using default settings");
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings JSON. Lines starting with `//` are comments.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        serde_json::from_str(&cleaned)
    }

    /// Save current settings to the default location
    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| e.to_string())?;

        fs::write(path, json).map_err(|e| e.to_string())
    }

    /// Evaluation mode for new environments
    pub fn engine_options(&self) -> ReactiveOptions {
        ReactiveOptions {
            lazy_eval: self.lazy_eval,
            use_cache: self.use_cache,
        }
    }

    /// Create default settings file with comments
    fn create_default_file(&self, path: &Path) {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!("Error creating config directory: {}", e);
                return;
            }
        }

        if let Err(e) = fs::write(path, DEFAULT_CONFIG) {
            eprintln!("Error writing default settings.json: {}", e);
        }
    }
}
