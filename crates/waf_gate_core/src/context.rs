use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, warn};

use crate::comment::CommentMeta;
use crate::error::GateError;
use crate::inputs::{non_empty, InputSource, TargetRoot};

pub const GITHUB_EVENT_NAME: &str = "GITHUB_EVENT_NAME";
pub const GITHUB_WORKFLOW: &str = "GITHUB_WORKFLOW";
pub const GITHUB_ACTION: &str = "GITHUB_ACTION";
pub const GITHUB_EVENT_PATH: &str = "GITHUB_EVENT_PATH";
pub const GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const GITHUB_OUTPUT: &str = "GITHUB_OUTPUT";

const PULL_REQUEST_EVENTS: [&str; 2] = ["pull_request", "pull_request_target"];

/// Facts the CI runner provides about the current job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CiContext {
    pub event_name: Option<String>,
    pub workflow: Option<String>,
    pub action: Option<String>,
    pub comments_url: Option<String>,
    #[serde(serialize_with = "redact")]
    pub token: Option<String>,
    pub output_path: Option<PathBuf>,
}

impl CiContext {
    /// An unreadable event payload only costs the comments URL.
    pub fn resolve(source: &dyn InputSource) -> Self {
        let comments_url = non_empty(source, GITHUB_EVENT_PATH).and_then(|path| {
            let path = PathBuf::from(path);
            match read_comments_url(&path) {
                Ok(url) => url,
                Err(err) => {
                    warn!(target: "waf_gate.inputs", error = %err, "ignoring event payload");
                    None
                }
            }
        });

        let context = Self {
            event_name: non_empty(source, GITHUB_EVENT_NAME),
            workflow: non_empty(source, GITHUB_WORKFLOW),
            action: non_empty(source, GITHUB_ACTION),
            comments_url,
            token: non_empty(source, GITHUB_TOKEN),
            output_path: non_empty(source, GITHUB_OUTPUT).map(PathBuf::from),
        };
        debug!(target: "waf_gate.inputs", event_name = ?context.event_name, has_comments_url = context.comments_url.is_some(), "resolved CI context");
        context
    }

    pub fn is_pull_request(&self) -> bool {
        self.event_name
            .as_deref()
            .is_some_and(|name| PULL_REQUEST_EVENTS.contains(&name))
    }

    pub fn comment_meta(&self, target: &TargetRoot) -> CommentMeta {
        CommentMeta {
            workflow: self.workflow.clone().unwrap_or_else(|| "unknown".into()),
            action: self.action.clone().unwrap_or_else(|| "unknown".into()),
            target: target.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    pull_request: Option<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    #[serde(default)]
    comments_url: Option<String>,
}

pub fn comments_url_from_payload(json: &str) -> Result<Option<String>, serde_json::Error> {
    let payload: EventPayload = serde_json::from_str(json)?;
    Ok(payload.pull_request.and_then(|pr| pr.comments_url))
}

pub fn read_comments_url(path: &Path) -> Result<Option<String>, GateError> {
    let data = fs::read_to_string(path).map_err(|source| GateError::EventPayloadIo {
        path: path.to_path_buf(),
        source,
    })?;
    comments_url_from_payload(&data).map_err(|source| GateError::EventPayloadJson {
        path: path.to_path_buf(),
        source,
    })
}

fn redact<S: Serializer>(token: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    match token {
        Some(_) => serializer.serialize_some("***"),
        None => serializer.serialize_none(),
    }
}
