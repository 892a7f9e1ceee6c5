use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use registry::{Catalog, Limits, RegistrySettings};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalChatMode {
    /// Multi-turn `/api/chat`.
    Chat,
    /// Single prompt `/api/generate`.
    Generate,
}

impl LocalChatMode {
    pub fn flavor(&self) -> wire::Flavor {
        match self {
            LocalChatMode::Chat => wire::Flavor::OllamaChat,
            LocalChatMode::Generate => wire::Flavor::OllamaGenerate,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub catalog_path: Option<PathBuf>,
    pub local_runtime_url: Option<String>,
    pub local_chat_mode: LocalChatMode,

    pub max_concurrent_models: usize,
    pub cpu_max: f64,
    pub mem_max: f64,
    pub memory_reserve_mb: u64,
    pub ema_weight: f64,

    pub local_timeout: Duration,
    pub remote_timeout: Duration,
    pub monitor_interval: Duration,
    pub health_probe_interval: Duration,
    pub smoothing_window: usize,

    pub dispatch_log_url: Option<String>,
    pub dispatch_log_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let bind_addr = env.or("GATEWAY_BIND_ADDR", "0.0.0.0:8000");
        let catalog_path = env.opt("GATEWAY_CATALOG").map(PathBuf::from);
        let local_runtime_url = env.opt("LOCAL_RUNTIME_URL");
        let local_chat_mode = match env.or("LOCAL_CHAT_MODE", "chat").as_str() {
            "chat" => LocalChatMode::Chat,
            "generate" => LocalChatMode::Generate,
            other => bail!("LOCAL_CHAT_MODE must be chat or generate (got {other})"),
        };

        let max_concurrent_models = env.parse("MAX_CONCURRENT_MODELS", 2usize)?;
        let cpu_max = env.parse("CPU_MAX", registry::DEFAULT_CPU_MAX)?;
        let mem_max = env.parse("MEM_MAX", registry::DEFAULT_MEM_MAX)?;
        let memory_reserve_mb = env.parse("MEMORY_RESERVE_MB", 512u64)?;
        let ema_weight = env.parse("EMA_WEIGHT", 0.3f64)?;

        let local_timeout = Duration::from_secs(env.parse("LOCAL_TIMEOUT_SECS", 30u64)?);
        let remote_timeout = Duration::from_secs(env.parse("REMOTE_TIMEOUT_SECS", 30u64)?);
        let monitor_interval = Duration::from_secs(env.parse("MONITOR_INTERVAL_SECS", 30u64)?);
        let health_probe_interval = Duration::from_secs(env.parse("HEALTH_PROBE_INTERVAL_SECS", 60u64)?);
        let smoothing_window = env.parse("SMOOTHING_WINDOW", registry::DEFAULT_SMOOTHING_WINDOW)?;

        let dispatch_log_url = env.opt("DISPATCH_LOG_URL");
        let dispatch_log_secret = env.opt("DISPATCH_LOG_SECRET");

        // Tiny sanity checks (fail fast, fail loud)
        if max_concurrent_models == 0 {
            bail!("MAX_CONCURRENT_MODELS must be at least 1");
        }
        for (key, v) in [("CPU_MAX", cpu_max), ("MEM_MAX", mem_max)] {
            if !(v > 0.0 && v <= 100.0) {
                bail!("{key} must be in (0, 100] (got {v})");
            }
        }
        if !(ema_weight > 0.0 && ema_weight <= 1.0) {
            bail!("EMA_WEIGHT must be in (0, 1] (got {ema_weight})");
        }
        for (key, d) in [
            ("LOCAL_TIMEOUT_SECS", local_timeout),
            ("REMOTE_TIMEOUT_SECS", remote_timeout),
            ("MONITOR_INTERVAL_SECS", monitor_interval),
            ("HEALTH_PROBE_INTERVAL_SECS", health_probe_interval),
        ] {
            if d.is_zero() {
                bail!("{key} must be positive");
            }
        }
        if smoothing_window == 0 {
            bail!("SMOOTHING_WINDOW must be at least 1");
        }
        if let Some(url) = &local_runtime_url {
            check_url("LOCAL_RUNTIME_URL", url)?;
        }
        if let Some(url) = &dispatch_log_url {
            check_url("DISPATCH_LOG_URL", url)?;
        }

        Ok(Self {
            bind_addr,
            catalog_path,
            local_runtime_url,
            local_chat_mode,
            max_concurrent_models,
            cpu_max,
            mem_max,
            memory_reserve_mb,
            ema_weight,
            local_timeout,
            remote_timeout,
            monitor_interval,
            health_probe_interval,
            smoothing_window,
            dispatch_log_url,
            dispatch_log_secret,
        })
    }

    /// Built-in catalog unless `GATEWAY_CATALOG` points at a file.
    /// `LOCAL_RUNTIME_URL` wins over the catalog's own setting.
    pub fn load_catalog(&self) -> Result<Catalog> {
        let mut catalog = match &self.catalog_path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read catalog {}", path.display()))?;
                Catalog::from_json(&text)?
            }
            None => Catalog::builtin(),
        };
        if let Some(url) = &self.local_runtime_url {
            catalog.local_runtime = url.clone();
        }
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            max_concurrent_models: self.max_concurrent_models,
            ema_weight: self.ema_weight,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits { cpu_max: self.cpu_max, mem_max: self.mem_max }
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn opt(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.opt(key) {
            Some(v) => v
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("Invalid value for env var {key}: {v} ({e})")),
            None => Ok(default),
        }
    }
}

fn check_url(key: &str, url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("{key} must start with http:// or https://");
    }
    Ok(())
}
