//! Project configuration.
//!
//! Layered with figment:
//! - Default values
//! - `gone.json` in the project root (missing file means all defaults)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `GONE_` and use double underscores
//! to separate nested levels:
//! - `GONE_PORT=8080` sets `port`
//! - `GONE_PRODUCTION=true` sets `production`
//! - `GONE_MAINFILE=cmd/api/main.go` sets `mainFile` (keys are matched
//!   against the camelCase document names)
//! - `GONE_WATCHER__DEBOUNCEMS=150` sets `watcher.debounceMs`
//!
//! The child-mode marker `GONE_ROUTINE` maps to no field and is ignored here.

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
    value::{Dict, Value},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the configuration document in the project root.
pub const CONFIG_FILE: &str = "gone.json";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Application name shown in the banner
    #[serde(default = "default_name")]
    pub name: String,

    /// Port the HTTP engine listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve directly, never watch or rebuild
    #[serde(default)]
    pub production: bool,

    /// Entry point handed to the compiler
    #[serde(default = "default_main_file")]
    pub main_file: String,

    /// Per-logger output toggles
    #[serde(default)]
    pub loggers: Vec<LoggerToggle>,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Watcher settings
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Build tool settings
    #[serde(default)]
    pub build: BuildConfig,
}

/// `{ "name": "watch", "output": true }`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggerToggle {
    pub name: String,
    #[serde(default)]
    pub output: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `"gone::watcher": "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WatcherConfig {
    /// Hidden directories to watch anyway, relative to the root
    #[serde(default)]
    pub includes: Vec<String>,

    /// Directories never watched, relative to the root
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Quiet window before a rebuild is requested
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BuildConfig {
    /// Program invoked as `<compiler> build -o <artifact> <mainFile>`
    #[serde(default = "default_compiler")]
    pub compiler: String,
}

// Default value functions
fn default_name() -> String {
    "GONE".to_string()
}
fn default_port() -> u16 {
    9999
}
fn default_main_file() -> String {
    "main.go".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_compiler() -> String {
    "go".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            production: false,
            main_file: default_main_file(),
            loggers: Vec::new(),
            logging: LoggingConfig::default(),
            watcher: WatcherConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
        }
    }
}

impl AppConfig {
    /// Load `gone.json` from `root`, layered over defaults and `GONE_*` env vars.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::load_from(root.as_ref().join(CONFIG_FILE))
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        // Env keys arrive lowercased, the document keys are camelCase.
        let env: Dict = Figment::from(Env::prefixed("GONE_").split("__"))
            .extract()
            .map_err(Box::new)?;

        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Json::file(path.as_ref()))
            .merge(Serialized::defaults(document_keys(env)))
            .extract()
            .map_err(Box::new)
    }

    /// Save current configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n")?;

        Ok(())
    }

    /// Create a default `gone.json` in `root`
    pub fn init_config_file(
        root: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.as_ref().join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut config = AppConfig::default();
        // The build output must never trigger a rebuild of itself.
        config.watcher.excludes.push(crate::rebuild::ARTIFACT_DIR.to_string());
        config.save(&config_path)?;

        Ok(config_path)
    }

    /// `EnvFilter` directives derived from `logging` and `loggers`.
    ///
    /// `info`, `warning` and `error` toggles set the level floor; any other
    /// name is a target (`watch` is the watcher) enabled at debug level or
    /// switched off.
    pub fn log_filter(&self) -> String {
        let mut floor = level_rank(&self.logging.default).unwrap_or(LEVELS.len() - 3);
        let mut targets = Vec::new();

        for logger in &self.loggers {
            match logger.name.as_str() {
                "info" | "warning" | "warn" | "error" => {
                    if !logger.output {
                        // Silencing a level also silences everything below it.
                        let silenced = level_rank(&logger.name).unwrap_or(floor);
                        floor = floor.min(silenced.saturating_sub(1));
                    }
                }
                name => {
                    let level = if logger.output { "debug" } else { "off" };
                    targets.push(format!("{}={level}", logger_target(name)));
                }
            }
        }

        let mut filter = LEVELS[floor].to_string();
        for directive in targets {
            filter.push(',');
            filter.push_str(&directive);
        }
        for (module, level) in &self.logging.modules {
            filter.push_str(&format!(",{module}={level}"));
        }
        filter
    }
}

/// Quietest first.
const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

fn level_rank(level: &str) -> Option<usize> {
    let level = match level {
        "warning" => "warn",
        other => other,
    };
    LEVELS.iter().position(|l| l.eq_ignore_ascii_case(level))
}

/// `{"watcher": {"debouncems": ..}}` -> `{"watcher": {"debounceMs": ..}}`
fn document_keys(dict: Dict) -> Dict {
    dict.into_iter()
        .map(|(key, value)| {
            let key = match key.as_str() {
                "mainfile" => "mainFile".to_string(),
                "debouncems" => "debounceMs".to_string(),
                _ => key,
            };
            let value = match value {
                Value::Dict(tag, nested) => Value::Dict(tag, document_keys(nested)),
                other => other,
            };
            (key, value)
        })
        .collect()
}

fn logger_target(name: &str) -> String {
    match name {
        "watch" | "watcher" => "gone::watcher".to_string(),
        name if name.contains("::") => name.to_string(),
        name => format!("gone::{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.name, "GONE");
        assert_eq!(config.port, 9999);
        assert!(!config.production);
        assert_eq!(config.main_file, "main.go");
        assert_eq!(config.watcher.debounce_ms, 200);
        assert_eq!(config.build.compiler, "go");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_from_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE);

        let json = r#"{
  "name": "shop",
  "port": 8080,
  "production": true,
  "mainFile": "cmd/shop/main.go",
  "loggers": [{ "name": "watch", "output": true }],
  "watcher": { "includes": [".config"], "excludes": [".gone", "vendor"] }
}"#;
        fs::write(&config_path, json).unwrap();

        let config = AppConfig::load_from(&config_path).unwrap();
        assert_eq!(config.name, "shop");
        assert_eq!(config.port, 8080);
        assert!(config.production);
        assert_eq!(config.main_file, "cmd/shop/main.go");
        assert_eq!(config.loggers[0].name, "watch");
        assert!(config.loggers[0].output);
        assert_eq!(config.watcher.includes, vec![".config"]);
        assert_eq!(config.watcher.excludes, vec![".gone", "vendor"]);
        // Defaults fill what the document leaves out
        assert_eq!(config.watcher.debounce_ms, 200);
        assert_eq!(config.build.compiler, "go");
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE);
        fs::write(&config_path, "{ \"port\": ").unwrap();

        assert!(AppConfig::load_from(&config_path).is_err());
    }

    #[test]
    fn test_save_and_init() {
        let temp_dir = TempDir::new().unwrap();

        let path = AppConfig::init_config_file(temp_dir.path(), false).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.watcher.excludes, vec![".gone"]);

        // Refuses to clobber without force
        assert!(AppConfig::init_config_file(temp_dir.path(), false).is_err());
        assert!(AppConfig::init_config_file(temp_dir.path(), true).is_ok());

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"mainFile\""));
    }

    #[test]
    fn test_lowercased_env_keys_become_document_keys() {
        let mut watcher = Dict::new();
        watcher.insert("debouncems".to_string(), Value::from(150u64));
        let mut build = Dict::new();
        build.insert("compiler".to_string(), Value::from("/opt/go/bin/go"));
        let mut env = Dict::new();
        env.insert("mainfile".to_string(), Value::from("cmd/web/main.go"));
        env.insert("watcher".to_string(), Value::from(watcher));
        env.insert("build".to_string(), Value::from(build));

        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Serialized::defaults(document_keys(env)))
            .extract()
            .unwrap();
        assert_eq!(config.main_file, "cmd/web/main.go");
        assert_eq!(config.watcher.debounce_ms, 150);
        assert_eq!(config.build.compiler, "/opt/go/bin/go");
    }

    #[test]
    fn test_log_filter_defaults_to_info() {
        assert_eq!(AppConfig::default().log_filter(), "info");
    }

    #[test]
    fn test_log_filter_maps_loggers() {
        let mut config = AppConfig::default();
        config.loggers = vec![
            LoggerToggle {
                name: "watch".to_string(),
                output: true,
            },
            LoggerToggle {
                name: "rebuild".to_string(),
                output: false,
            },
            LoggerToggle {
                name: "info".to_string(),
                output: false,
            },
        ];
        config
            .logging
            .modules
            .insert("tower_http".to_string(), "warn".to_string());

        assert_eq!(
            config.log_filter(),
            "warn,gone::watcher=debug,gone::rebuild=off,tower_http=warn"
        );
    }

    #[test]
    fn test_log_filter_error_off_silences_all() {
        let mut config = AppConfig::default();
        config.loggers = vec![LoggerToggle {
            name: "error".to_string(),
            output: false,
        }];
        assert_eq!(config.log_filter(), "off");
    }
}
