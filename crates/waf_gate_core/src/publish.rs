use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use thiserror::Error;
use tracing::{debug, warn};

use crate::comment::CommentPayload;
use crate::context::CiContext;
use crate::inputs::RunConfig;
use crate::invoker::InvocationResult;

/// Why a comment could not be posted. Never fatal to the run.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("comment request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("comment endpoint answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no access token available for commenting")]
    MissingToken,
    #[error("comment client unavailable: {0}")]
    ClientUnavailable(String),
    #[error("event payload carries no pull request comments_url")]
    MissingCommentsUrl,
    #[error("could not encode comment body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Comments only on failing validations of pull requests that asked for it.
pub fn should_comment(context: &CiContext, config: &RunConfig, result: &InvocationResult) -> bool {
    context.is_pull_request() && config.comment_enabled && !result.succeeded()
}

pub trait CommentPublisher {
    fn publish(&self, comments_url: &str, payload: &CommentPayload) -> Result<(), PublishError>;
}

/// Posts to the pull-request comments endpoint named in the event payload.
pub struct GithubCommentClient {
    client: Client,
    token: String,
}

impl GithubCommentClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, token))
    }

    pub fn with_client(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }
}

/// Stands in for a client that could not be built, so the run reports why
/// instead of a missing token.
#[derive(Debug, Clone)]
pub struct UnavailablePublisher {
    reason: String,
}

impl UnavailablePublisher {
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl CommentPublisher for UnavailablePublisher {
    fn publish(&self, _comments_url: &str, _payload: &CommentPayload) -> Result<(), PublishError> {
        Err(PublishError::ClientUnavailable(self.reason.clone()))
    }
}

/// Client for the given token, or a stand-in carrying the build error.
pub fn comment_publisher(token: &str, timeout: Duration) -> Box<dyn CommentPublisher> {
    match GithubCommentClient::new(token, timeout) {
        Ok(client) => Box::new(client),
        Err(err) => {
            warn!(target: "waf_gate.comment", error = %err, "comment client unavailable");
            Box::new(UnavailablePublisher::new(err))
        }
    }
}

impl CommentPublisher for GithubCommentClient {
    fn publish(&self, comments_url: &str, payload: &CommentPayload) -> Result<(), PublishError> {
        let body = serde_json::to_string(payload)?;
        debug!(target: "waf_gate.comment", url = comments_url, bytes = body.len(), "posting comment");

        let response = self
            .client
            .post(comments_url)
            .header(AUTHORIZATION, format!("token {}", self.token))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/vnd.github+json")
            .header(
                USER_AGENT,
                concat!("waf-gate/", env!("CARGO_PKG_VERSION")),
            )
            .body(body)
            .send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        Err(PublishError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    use super::*;
    use crate::inputs::TargetRoot;
    use crate::invoker::ToolKind;

    struct CapturedRequest {
        head: String,
        body: String,
    }

    fn serve_once(status_line: &'static str) -> (String, JoinHandle<CapturedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!(
            "http://{}/repos/acme/waf/issues/7/comments",
            listener.local_addr().unwrap()
        );
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line.is_empty() || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            let length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            let mut body = vec![0; length];
            reader.read_exact(&mut body).unwrap();
            stream
                .write_all(
                    format!("{status_line}\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}")
                        .as_bytes(),
                )
                .unwrap();
            CapturedRequest {
                head,
                body: String::from_utf8(body).unwrap(),
            }
        });
        (url, handle)
    }

    fn client() -> GithubCommentClient {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        GithubCommentClient::with_client(client, "secret-token")
    }

    fn pr_context() -> CiContext {
        CiContext {
            event_name: Some("pull_request".into()),
            ..CiContext::default()
        }
    }

    fn failing() -> InvocationResult {
        InvocationResult {
            tool: ToolKind::Validate,
            exit_code: 2,
            output: String::new(),
        }
    }

    #[test]
    fn comment_decision_truth_table() {
        let enabled = RunConfig::default();
        let disabled = RunConfig {
            comment_enabled: false,
            ..RunConfig::default()
        };
        let push = CiContext {
            event_name: Some("push".into()),
            ..CiContext::default()
        };
        let passing = InvocationResult {
            exit_code: 0,
            ..failing()
        };

        assert!(should_comment(&pr_context(), &enabled, &failing()));
        assert!(!should_comment(&pr_context(), &enabled, &passing));
        assert!(!should_comment(&pr_context(), &disabled, &failing()));
        assert!(!should_comment(&push, &enabled, &failing()));
        assert!(!should_comment(&CiContext::default(), &enabled, &failing()));
        assert_eq!(enabled.target, TargetRoot::Default);
    }

    #[test]
    fn posts_json_body_with_token_header() {
        let (url, server) = serve_once("HTTP/1.1 201 Created");
        let payload = CommentPayload {
            body: "#### `validate` Failed\n\"quoted\"\n".into(),
        };

        client().publish(&url, &payload).unwrap();

        let request = server.join().unwrap();
        let head = request.head.to_ascii_lowercase();
        assert!(
            head.starts_with("post /repos/acme/waf/issues/7/comments http/1.1"),
            "{head}"
        );
        assert!(head.contains("authorization: token secret-token"), "{head}");
        assert!(head.contains("content-type: application/json"), "{head}");
        let sent: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(sent, serde_json::json!({ "body": payload.body }));
    }

    #[test]
    fn non_success_status_is_reported() {
        let (url, server) = serve_once("HTTP/1.1 403 Forbidden");
        let err = client()
            .publish(&url, &CommentPayload { body: "x".into() })
            .unwrap_err();
        server.join().unwrap();

        match err {
            PublishError::Status { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "{}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unavailable_client_reports_its_reason() {
        let err = UnavailablePublisher::new("TLS backend cannot be initialized")
            .publish("https://example.invalid/comments", &CommentPayload { body: "x".into() })
            .unwrap_err();

        assert!(matches!(err, PublishError::ClientUnavailable(_)), "{err:?}");
        assert_eq!(
            err.to_string(),
            "comment client unavailable: TLS backend cannot be initialized"
        );
    }

    #[test]
    fn unreachable_endpoint_is_an_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/comments", listener.local_addr().unwrap());
        drop(listener);

        let err = client()
            .publish(&url, &CommentPayload { body: "x".into() })
            .unwrap_err();
        assert!(matches!(err, PublishError::Http(_)), "{err:?}");
    }
}
