//! Persisted ecctl configuration.
//!
//! A configuration is resolved from, lowest precedence first:
//! 1. compiled defaults
//! 2. the JSON configuration file (`~/.ecctl/config.json` unless `--config` is given)
//! 3. `EC_*` environment variables
//! 4. explicit global flags

pub mod init;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration directory inside the user's home.
pub const CONFIG_DIR_NAME: &str = ".ecctl";

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Endpoint of the hosted offering.
pub const HOSTED_ENDPOINT: &str = "https://api.elastic-cloud.com";

/// Replacement for secrets when a configuration is displayed.
pub const REDACTED: &str = "[REDACTED]";

/// Per-call HTTP timeout when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Output rendering mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(Error::validation(format!(
                "output must be one of text or json, got \"{}\"",
                other
            ))),
        }
    }
}

/// ecctl configuration file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key sent in the `Authorization` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Text template overriding every named output template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// API endpoint, e.g. `https://api.elastic-cloud.com`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Skip TLS certificate verification.
    #[serde(skip_serializing_if = "is_false")]
    pub insecure: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFormat>,

    /// Password for the login-token workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Per-call HTTP timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Username for the login-token workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Dump HTTP traffic to stderr.
    #[serde(skip_serializing_if = "is_false")]
    pub verbose: bool,
}

impl std::str::FromStr for Config {
    type Err = Error;

    /// Parse configuration from a JSON string.
    fn from_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Config {
    /// Default configuration file location.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::validation("could not determine home directory"))?;
        Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse::<Self>().map_err(|e| {
            Error::validation(format!("invalid configuration file {}: {}", path.display(), e))
        })
    }

    /// Load the file at `path`, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Resolve the effective configuration: file, then environment, then flags.
    pub fn resolve<F>(path: &Path, lookup: F, flags: Config) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load_or_default(path)?;
        config.apply_env(lookup)?;
        config.merge(flags);
        Ok(config)
    }

    /// Overlay `EC_*` environment variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(host) = get("EC_HOST") {
            self.host = Some(host);
        }
        if let Some(region) = get("EC_REGION") {
            self.region = Some(region);
        }
        if let Some(user) = get("EC_USER") {
            self.user = Some(user);
        }
        if let Some(pass) = get("EC_PASS") {
            self.pass = Some(pass);
        }
        if let Some(key) = get("EC_APIKEY") {
            self.api_key = Some(key);
        }
        if let Some(output) = get("EC_OUTPUT") {
            self.output = Some(output.parse()?);
        }
        if let Some(timeout) = get("EC_TIMEOUT") {
            let secs = timeout.parse::<u64>().map_err(|_| {
                Error::validation(format!("EC_TIMEOUT must be a number of seconds, got \"{}\"", timeout))
            })?;
            self.timeout = Some(secs);
        }
        if let Some(verbose) = get("EC_VERBOSE") {
            self.verbose = parse_bool("EC_VERBOSE", &verbose)?;
        }
        if let Some(insecure) = get("EC_INSECURE") {
            self.insecure = parse_bool("EC_INSECURE", &insecure)?;
        }
        Ok(())
    }

    /// Overlay every value set in `other`.
    pub fn merge(&mut self, other: Config) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.api_key, other.api_key);
        take(&mut self.format, other.format);
        take(&mut self.host, other.host);
        take(&mut self.message, other.message);
        take(&mut self.output, other.output);
        take(&mut self.pass, other.pass);
        take(&mut self.region, other.region);
        take(&mut self.timeout, other.timeout);
        take(&mut self.user, other.user);
        self.insecure |= other.insecure;
        self.verbose |= other.verbose;
    }

    /// Check the configuration is usable for talking to the API.
    pub fn validate(&self) -> Result<()> {
        match self.host.as_deref() {
            None | Some("") => return Err(Error::validation("host is required")),
            Some(host) if !host.starts_with("http://") && !host.starts_with("https://") => {
                return Err(Error::validation(format!(
                    "host must start with http:// or https://, got \"{}\"",
                    host
                )))
            }
            Some(_) => {}
        }

        let has_key = self.api_key.as_deref().map_or(false, |k| !k.is_empty());
        let has_user = self.user.as_deref().map_or(false, |u| !u.is_empty());
        let has_pass = self.pass.as_deref().map_or(false, |p| !p.is_empty());

        if has_key && (has_user || has_pass) {
            return Err(Error::validation("api_key and user/pass are mutually exclusive"));
        }
        if !has_key && !(has_user && has_pass) {
            return Err(Error::validation("either api_key or both user and pass must be set"));
        }
        Ok(())
    }

    /// Copy of the configuration safe for display.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if copy.pass.is_some() {
            copy.pass = Some(REDACTED.to_string());
        }
        if copy.api_key.is_some() {
            copy.api_key = Some(REDACTED.to_string());
        }
        copy
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output.unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// Write the configuration as JSON, forcing a `.json` extension.
    ///
    /// Returns the path actually written.
    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        let path = if path.extension().map_or(false, |ext| ext == "json") {
            path.to_path_buf()
        } else {
            path.with_extension("json")
        };
        let fail = |message: String| Error::ConfigWriteFailed {
            path: path.clone(),
            message,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }

        let mut content = serde_json::to_string_pretty(self).map_err(|e| fail(e.to_string()))?;
        content.push('\n');

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o666);
        }
        let mut file = options.open(&path).map_err(|e| fail(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| fail(e.to_string()))?;

        Ok(path)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::validation(format!("{} must be a boolean, got \"{}\"", key, value))),
    }
}
