//! Command-line flags shared by the PageLab binaries.
//!
//! Every flag falls back to an environment variable. Values set neither way
//! come from the `--config` file, then from [`Settings::default`].

use crate::settings::env;
use crate::{ConfigResult, Settings, load_settings_file};
use clap::Args;
use clap::builder::BoolishValueParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Args)]
pub struct SettingsArgs {
    /// KDL settings file
    #[arg(long, env = "PAGE_LAB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// The name of the job queue
    #[arg(short = 'q', long, env = env::QUEUE_NAME, global = true)]
    pub queue_name: Option<String>,

    /// Keep refilling the queue and the pool indefinitely
    #[arg(
        short = 'i',
        long,
        env = env::INFINITY_MODE,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub infinity: Option<bool>,

    /// Queue fill timeout in seconds
    #[arg(short = 't', long, env = env::FILL_TIMEOUT, global = true)]
    pub fill_timeout: Option<u64>,

    /// The result POST url
    #[arg(short = 'r', long, env = env::REPORT_URL, global = true)]
    pub report_url: Option<Url>,

    /// The url list endpoint
    #[arg(short = 'l', long, env = env::LIST_URL, global = true)]
    pub list_url: Option<Url>,

    /// Referrer header sent with results
    #[arg(long, env = env::REFERRER, global = true)]
    pub referrer: Option<String>,

    /// Number of concurrent workers
    #[arg(long, env = env::NUM_WORKERS, global = true)]
    pub workers: Option<usize>,

    /// Delay before the first worker spawns, in milliseconds
    #[arg(long, env = env::SPAWN_DELAY_MS, global = true)]
    pub spawn_delay_ms: Option<u64>,

    /// Extra delay per worker index, in milliseconds
    #[arg(long, env = env::SPAWN_BACKOFF_MS, global = true)]
    pub spawn_backoff_ms: Option<u64>,

    /// Successful runs before the server drains and exits
    #[arg(long, env = env::MAX_RUNS, global = true)]
    pub max_runs: Option<u64>,

    #[arg(long, env = env::REDIS_URL, global = true)]
    pub redis_url: Option<String>,

    #[arg(long, env = env::REDIS_NAMESPACE, global = true)]
    pub redis_ns: Option<String>,

    #[arg(long, env = env::DATABASE_URL, global = true)]
    pub database_url: Option<String>,

    /// Status server address
    #[arg(long, env = env::LISTEN, global = true)]
    pub listen: Option<SocketAddr>,

    /// Audit engine executable
    #[arg(long, env = env::ENGINE_COMMAND, global = true)]
    pub engine_command: Option<String>,

    /// Engine process name killed on shutdown
    #[arg(long, env = env::ENGINE_PROCESS, global = true)]
    pub engine_process: Option<String>,

    /// Audit configuration file passed to the engine
    #[arg(long, env = env::ENGINE_CONFIG, global = true)]
    pub engine_config: Option<PathBuf>,

    /// Space-separated browser flags
    #[arg(long, env = env::CHROME_FLAGS, allow_hyphen_values = true, global = true)]
    pub chrome_flags: Option<String>,

    /// Accept self-signed certificates
    #[arg(
        long,
        env = env::INSECURE_TLS,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub insecure_tls: Option<bool>,
}

impl SettingsArgs {
    /// Resolve flags and environment on top of the config file or defaults.
    pub fn resolve(&self) -> ConfigResult<Settings> {
        let base = match &self.config {
            Some(path) => load_settings_file(path)?,
            None => Settings::default(),
        };
        let settings = self.apply(base);
        settings.validate()?;
        Ok(settings)
    }

    /// Overwrite every field of `settings` that was given on the command line
    /// or through the environment.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(v) = &self.queue_name {
            settings.queue_name = v.clone();
        }
        if let Some(v) = self.infinity {
            settings.infinity_mode = v;
        }
        if let Some(v) = self.fill_timeout {
            settings.fill_timeout = Duration::from_secs(v);
        }
        if let Some(v) = &self.report_url {
            settings.report_url = v.clone();
        }
        if let Some(v) = &self.list_url {
            settings.list_url = v.clone();
        }
        if let Some(v) = &self.referrer {
            settings.referrer = v.clone();
        }
        if let Some(v) = self.workers {
            settings.num_workers = v;
        }
        if let Some(v) = self.spawn_delay_ms {
            settings.spawn_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.spawn_backoff_ms {
            settings.spawn_backoff = Duration::from_millis(v);
        }
        if let Some(v) = self.max_runs {
            settings.max_runs_before_restart = v;
        }
        if let Some(v) = &self.redis_url {
            settings.redis_url = v.clone();
        }
        if let Some(v) = &self.redis_ns {
            settings.redis_namespace = v.clone();
        }
        if let Some(v) = &self.database_url {
            settings.database_url = v.clone();
        }
        if let Some(v) = self.listen {
            settings.listen = v;
        }
        if let Some(v) = &self.engine_command {
            settings.engine.command = v.clone();
        }
        if let Some(v) = &self.engine_process {
            settings.engine.process_name = v.clone();
        }
        if let Some(v) = &self.engine_config {
            settings.engine.config_path = Some(v.clone());
        }
        if let Some(v) = &self.chrome_flags {
            settings.engine.chrome_flags = v.split_whitespace().map(String::from).collect();
        }
        if let Some(v) = self.insecure_tls {
            settings.insecure_tls = v;
        }
        settings
    }
}
