use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::invoker::ToolKind;

/// Exit status for failures that are not a validator verdict.
pub const EXIT_GENERIC_FAILURE: u8 = 1;
/// The validator ran past its time limit and was killed.
pub const EXIT_TOOL_TIMEOUT: u8 = 124;
/// The validator could not be started at all.
pub const EXIT_TOOL_LAUNCH: u8 = 127;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("{tool} tool `{program}` could not be started")]
    ToolLaunch {
        tool: ToolKind,
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} tool did not finish within {}s", .after.as_secs())]
    ToolTimeout { tool: ToolKind, after: Duration },
    #[error("failed to collect output of the {tool} tool")]
    ToolIo {
        tool: ToolKind,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to read settings file {}", .path.display())]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to output sink {}", .path.display())]
    OutputSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read event payload {}", .path.display())]
    EventPayloadIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("event payload {} is not valid JSON", .path.display())]
    EventPayloadJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl GateError {
    /// Process exit status for a run that aborted with this error. Tool
    /// breakage is kept apart from any status a validator can report.
    pub fn exit_code(&self) -> u8 {
        match self {
            GateError::ToolLaunch { .. } => EXIT_TOOL_LAUNCH,
            GateError::ToolTimeout { .. } => EXIT_TOOL_TIMEOUT,
            _ => EXIT_GENERIC_FAILURE,
        }
    }
}
