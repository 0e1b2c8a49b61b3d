//! Run-control file: the configuration a supervised player runs from.
//!
//! The file is plain `key = value` lines:
//!
//! ```text
//! decay = 0.50
//! threshold = 3
//! verbosity = 1
//! input_file = "/srv/audio/shush.wav"
//! ```
//!
//! The same fields arrive as JSON from a config server. `decay` and `threshold` are kept
//! for the other consumers of the file; the player itself reads `input_file`,
//! `verbosity` and `poll_interval`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RcConfig {
    pub input_file: PathBuf,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    #[serde(default)]
    pub decay: f64,
    #[serde(default)]
    pub threshold: f64,
    /// Seconds between config polls.
    #[serde(default)]
    pub poll_interval: Option<f64>,
}

fn default_verbosity() -> u8 {
    1
}

impl RcConfig {
    pub fn new(input_file: impl Into<PathBuf>) -> Self {
        Self {
            input_file: input_file.into(),
            verbosity: default_verbosity(),
            decay: 0.0,
            threshold: 0.0,
            poll_interval: None,
        }
    }

    /// Poll interval from the config, or `fallback` when absent or unusable.
    pub fn poll_interval_or(&self, fallback: Duration) -> Duration {
        self.poll_interval
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(fallback)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut input_file = None;
        let mut config = RcConfig::new(PathBuf::new());

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("line {}: expected `key = value`", lineno + 1))?;
            let key = key.trim();
            let value = unquote(value.trim());
            let bad = |what: &str| anyhow!("line {}: invalid {what} {value:?}", lineno + 1);
            match key {
                "input_file" => input_file = Some(PathBuf::from(value)),
                "verbosity" => config.verbosity = value.parse().map_err(|_| bad("verbosity"))?,
                "decay" => config.decay = value.parse().map_err(|_| bad("decay"))?,
                "threshold" => config.threshold = value.parse().map_err(|_| bad("threshold"))?,
                "poll_interval" => {
                    config.poll_interval = Some(value.parse().map_err(|_| bad("poll_interval"))?)
                }
                other => tracing::warn!(key = other, "ignoring unknown rc key"),
            }
        }

        match input_file {
            Some(path) if !path.as_os_str().is_empty() => {
                config.input_file = path;
                Ok(config)
            }
            _ => bail!("rc file has no input_file"),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse {}", path.display()))
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "decay = {:.2}\nthreshold = {}\nverbosity = {}\ninput_file = \"{}\"\n",
            self.decay,
            self.threshold,
            self.verbosity,
            self.input_file.display()
        );
        if let Some(secs) = self.poll_interval {
            out.push_str(&format!("poll_interval = {secs}\n"));
        }
        out
    }

    /// Write to `<path>.tmp`, then rename over `path`, so readers never see a partial file.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, self.render()).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("rename {} to {}", tmp.display(), path.display()))?;
        tracing::debug!(path = %path.display(), "rc file written");
        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
