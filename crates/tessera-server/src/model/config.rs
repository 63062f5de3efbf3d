//! Configuration management for the Tessera server
//!
//! Settings come from `conf/application.yml` (or `--config`), overridden by
//! `TESSERA__<section>__<key>` environment variables.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use config::{Config, ConfigError, Environment};
use tessera_module::{ApplicationConfiguration, ModuleError};

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const ENV_PREFIX: &str = "TESSERA";
pub const ENV_SEPARATOR: &str = "__";

/// Keys whose environment override is a comma-separated list
const LIST_KEYS: &[&str] = &["cluster.static.members"];

/// How the server runs after bootstrap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Bootstrap every module, then keep serving until a shutdown signal
    #[default]
    Normal,
    /// Bootstrap every module, then exit
    Init,
}

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "tessera-server", version, about = "Tessera cluster node")]
pub struct Cli {
    #[arg(short = 'c', long = "config", env = "TESSERA_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = RunMode::Normal)]
    pub mode: RunMode,
}

/// Application configuration loaded from the config file and environment
#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: Config,
    mode: RunMode,
    path: PathBuf,
}

impl Configuration {
    /// Load using the process command line.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let config = Self::load(&cli.config)?;
        Ok(Self {
            config,
            mode: cli.mode,
            path: cli.config,
        })
    }

    fn load(path: &Path) -> Result<Config, ConfigError> {
        let mut environment = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .list_separator(",");
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        Config::builder()
            .add_source(config::File::from(path))
            .add_source(environment)
            .build()
    }

    pub fn run_mode(&self) -> RunMode {
        self.mode
    }

    pub fn config_path(&self) -> &Path {
        &self.path
    }

    /// Modules to load, with their selected providers.
    pub fn application_configuration(&self) -> Result<ApplicationConfiguration, ModuleError> {
        ApplicationConfiguration::from_config(&self.config)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string("logging.dir").ok()
    }

    pub fn log_level(&self) -> String {
        self.config
            .get_string("logging.level")
            .unwrap_or("info".to_string())
    }

    pub fn log_console(&self) -> bool {
        self.config.get_bool("logging.console").unwrap_or(true)
    }

    pub fn log_file(&self) -> bool {
        self.config.get_bool("logging.file").unwrap_or(false)
    }

    /// Logging settings from the `logging` section; `TESSERA_LOG_*` variables win.
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.log_dir(),
            self.log_console(),
            self.log_file(),
            self.log_level(),
        )
        .with_env_overrides()
    }
}
