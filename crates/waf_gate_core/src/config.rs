use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GateError;
use crate::inputs::{non_empty, InputSource};
use crate::invoker::ToolCommand;

/// Environment variable naming a settings file when `--config` is not given.
pub const SETTINGS_ENV: &str = "WAF_GATE_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GateSettings {
    #[serde(default = "default_validator")]
    pub validator: ToolCommand,
    #[serde(default = "default_report")]
    pub report: ToolCommand,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub output: OutputSettings,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            validator: default_validator(),
            report: default_report(),
            limits: Limits::default(),
            output: OutputSettings::default(),
        }
    }
}

impl GateSettings {
    pub fn from_path(path: &Path) -> Result<Self, GateError> {
        let data = fs::read_to_string(path).map_err(|source| GateError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| GateError::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    /// An explicit path wins over `WAF_GATE_CONFIG`; with neither, the
    /// built-in defaults apply.
    pub fn load(explicit: Option<&Path>, source: &dyn InputSource) -> Result<Self, GateError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| non_empty(source, SETTINGS_ENV).map(PathBuf::from));
        match path {
            Some(path) => {
                debug!(target: "waf_gate.config", path = %path.display(), "loading settings");
                Self::from_path(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

fn default_validator() -> ToolCommand {
    ToolCommand::new("python3", ["/src/validate_waf.py"])
}

fn default_report() -> ToolCommand {
    ToolCommand::new("python3", ["/src/create_waf_excel.py"])
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Limits {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_tool_timeout_secs() -> u64 {
    600
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    /// Key of the multi-line block written to the output sink.
    #[serde(default = "default_output_key")]
    pub key: String,
    /// When set, every captured tool output is also kept here as a log file.
    #[serde(default)]
    pub capture_dir: Option<PathBuf>,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            key: default_output_key(),
            capture_dir: None,
        }
    }
}

fn default_output_key() -> String {
    "result".to_owned()
}
