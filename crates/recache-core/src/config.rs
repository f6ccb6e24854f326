//! Configuration loading and persistence
//!
//! Settings are layered: built-in defaults, then the human-readable
//! `config` file in the cache root (`key = value` lines), then
//! `RECACHE_*` environment variables. The cache root itself is resolved
//! from a candidate list where the first writable directory wins.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the configuration file inside the cache root. `--clear`
/// preserves it.
pub const CONFIG_FILE_NAME: &str = "config";

/// Default cache budget: 5 G (decimal, matching the default size suffix).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 5_000_000_000;

/// Default remote operation timeout in seconds.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

/// Resolved recache configuration.
///
/// A value of `0` for any of the size knobs means "unlimited".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Root directory of the local cache.
    pub cache_dir: PathBuf,
    /// Total local cache budget in bytes.
    pub max_cache_size: u64,
    /// Per-entry admission ceiling for the local cache.
    pub max_local_entry_size: u64,
    /// Per-entry admission ceiling for the remote cache.
    pub max_remote_entry_size: u64,
    /// Store local payload files compressed.
    pub compress: bool,
    /// Allow hard-linking cached files into place on retrieval.
    pub hard_links: bool,
    /// Never write to the remote cache.
    pub read_only_remote: bool,
    /// Remote cache endpoint, e.g. `http://cache.example.com/recache`.
    pub remote_url: Option<String>,
    /// Operation-wide timeout for remote requests.
    pub remote_timeout_secs: u64,
}

impl Config {
    /// Built-in defaults rooted at `cache_dir`.
    pub fn defaults(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_local_entry_size: 0,
            max_remote_entry_size: 0,
            compress: false,
            hard_links: false,
            read_only_remote: false,
            remote_url: None,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
        }
    }

    /// Resolve the cache root and load the configuration for it.
    pub fn load() -> Result<Self> {
        let dir = resolve_cache_dir()?;
        Self::load_from(dir)
    }

    /// Load the configuration rooted at an explicit directory: defaults,
    /// then the `config` file (if present), then environment overrides.
    pub fn load_from(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::defaults(cache_dir);
        let path = config.config_file_path();
        if path.exists() {
            let content =
                fs::read_to_string(&path).map_err(|e| Error::io(e, &path, "read"))?;
            config.apply_file(&content)?;
        }
        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    /// Path of the `config` file for this cache root.
    pub fn config_file_path(&self) -> PathBuf {
        self.cache_dir.join(CONFIG_FILE_NAME)
    }

    /// Persist the current settings to the `config` file.
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)
            .map_err(|e| Error::io(e, &self.cache_dir, "create_dir_all"))?;
        let path = self.config_file_path();
        let mut out = Vec::new();
        writeln!(out, "# recache configuration").unwrap();
        writeln!(out, "max_cache_size = {}", self.max_cache_size).unwrap();
        writeln!(out, "max_local_entry_size = {}", self.max_local_entry_size).unwrap();
        writeln!(out, "max_remote_entry_size = {}", self.max_remote_entry_size).unwrap();
        writeln!(out, "compress = {}", self.compress).unwrap();
        writeln!(out, "hard_links = {}", self.hard_links).unwrap();
        writeln!(out, "read_only_remote = {}", self.read_only_remote).unwrap();
        if let Some(url) = &self.remote_url {
            writeln!(out, "remote = {url}").unwrap();
        }
        writeln!(out, "remote_timeout = {}", self.remote_timeout_secs).unwrap();
        fs::write(&path, out).map_err(|e| Error::io(e, &path, "write"))
    }

    /// Update the cache budget and persist it. Shrinking the budget does
    /// not trim the cache immediately; the next insert's eviction pass
    /// enforces it.
    pub fn set_max_cache_size(&mut self, size: u64) -> Result<()> {
        self.max_cache_size = size;
        self.save()
    }

    fn apply_file(&mut self, content: &str) -> Result<()> {
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::configuration(format!("config line {}: missing '='", lineno + 1))
            })?;
            self.apply_setting(key.trim(), value.trim()).map_err(|e| {
                Error::configuration(format!("config line {}: {e}", lineno + 1))
            })?;
        }
        Ok(())
    }

    /// Apply `RECACHE_*` overrides. Environment wins over the file.
    fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        let vars: BTreeMap<String, String> = vars
            .filter(|(k, _)| k.starts_with("RECACHE_"))
            .collect();
        for (key, value) in &vars {
            let setting = match key.as_str() {
                "RECACHE_MAX_CACHE_SIZE" => "max_cache_size",
                "RECACHE_MAX_LOCAL_ENTRY_SIZE" => "max_local_entry_size",
                "RECACHE_MAX_REMOTE_ENTRY_SIZE" => "max_remote_entry_size",
                "RECACHE_COMPRESS" => "compress",
                "RECACHE_HARD_LINKS" => "hard_links",
                "RECACHE_READ_ONLY_REMOTE" => "read_only_remote",
                "RECACHE_REMOTE" => "remote",
                "RECACHE_REMOTE_TIMEOUT" => "remote_timeout",
                _ => continue,
            };
            if let Err(e) = self.apply_setting(setting, value) {
                tracing::warn!(var = %key, error = %e, "Ignoring invalid environment override");
            }
        }
    }

    fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "max_cache_size" => self.max_cache_size = parse_bytes(value)?,
            "max_local_entry_size" => self.max_local_entry_size = parse_bytes(value)?,
            "max_remote_entry_size" => self.max_remote_entry_size = parse_bytes(value)?,
            "compress" => self.compress = parse_bool(value)?,
            "hard_links" => self.hard_links = parse_bool(value)?,
            "read_only_remote" => self.read_only_remote = parse_bool(value)?,
            "remote" => {
                self.remote_url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "remote_timeout" => {
                self.remote_timeout_secs = value.parse().map_err(|_| {
                    Error::configuration(format!("invalid timeout: {value:?}"))
                })?;
            }
            other => {
                return Err(Error::configuration(format!("unknown setting: {other:?}")));
            }
        }
        Ok(())
    }
}

/// Parse a plain byte count (no suffix), as stored in the config file.
fn parse_bytes(value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| Error::configuration(format!("invalid byte count: {value:?}")))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(Error::configuration(format!(
            "invalid boolean: {other:?}"
        ))),
    }
}

/// Parse a human-entered size with an optional suffix.
///
/// Suffixes `k`, `M`, `G`, `T` are decimal and `Ki`, `Mi`, `Gi`, `Ti`
/// binary; a bare number is interpreted in gigabytes (the default
/// suffix). `0` means unlimited.
pub fn parse_size(input: &str) -> Result<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, suffix) = input.split_at(split);
    if digits.is_empty() {
        return Err(Error::configuration(format!("invalid size: {input:?}")));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::configuration(format!("invalid size: {input:?}")))?;
    let multiplier: u64 = match suffix {
        "" | "G" => 1_000_000_000,
        "k" => 1_000,
        "M" => 1_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        other => {
            return Err(Error::configuration(format!(
                "unknown size suffix: {other:?}"
            )));
        }
    };
    if value == 0 {
        return Ok(0);
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| Error::configuration(format!("size out of range: {input:?}")))
}

/// Render a byte count for human consumption (decimal units, one
/// decimal place).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("T", 1_000_000_000_000),
        ("G", 1_000_000_000),
        ("M", 1_000_000),
        ("k", 1_000),
    ];
    for (unit, factor) in UNITS {
        if bytes >= factor {
            return format!("{:.1} {unit}", bytes as f64 / factor as f64);
        }
    }
    format!("{bytes} bytes")
}

/// Inputs for determining the cache root directory.
struct CacheDirInputs {
    recache_dir: Option<PathBuf>,
    xdg_cache_home: Option<PathBuf>,
    os_cache_dir: Option<PathBuf>,
    home_dir: Option<PathBuf>,
    temp_dir: PathBuf,
}

fn resolve_cache_dir_from(inputs: CacheDirInputs) -> Result<PathBuf> {
    // Resolution order (first writable wins):
    // 1) RECACHE_DIR (explicit override)
    // 2) XDG_CACHE_HOME/recache
    // 3) OS cache dir/recache
    // 4) ~/.recache
    // 5) TMPDIR/recache
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = inputs.recache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("recache"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("recache"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".recache"));
    }
    candidates.push(inputs.temp_dir.join("recache"));

    for path in candidates {
        if path.exists() {
            // Some CI environments provide read-only cache directories;
            // probe before settling on one.
            let probe = path.join(".write_probe");
            match fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => continue,
            }
        }
        if fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

fn resolve_cache_dir() -> Result<PathBuf> {
    let inputs = CacheDirInputs {
        recache_dir: std::env::var("RECACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        xdg_cache_home: std::env::var("XDG_CACHE_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
        os_cache_dir: dirs::cache_dir(),
        home_dir: dirs::home_dir(),
        temp_dir: std::env::temp_dir(),
    };
    resolve_cache_dir_from(inputs)
}
