//! Orchestration for the WAF definition gate: resolve action inputs, run the
//! validator and report tools, comment on failing pull requests, and publish
//! the captured result to the CI output channel.

pub mod comment;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod inputs;
pub mod invoker;
pub mod output;
pub mod publish;

pub use comment::{format_comment, CommentMeta, CommentPayload};
pub use config::{GateSettings, Limits, OutputSettings};
pub use context::CiContext;
pub use controller::{CommentOutcome, Controller, RunOutcome, Stage};
pub use error::GateError;
pub use inputs::{InputSource, ProcessEnv, RunConfig, TargetRoot};
pub use invoker::{InvocationResult, ProcessRunner, ToolCommand, ToolKind, ToolRunner};
pub use output::{FileSink, OutputRecord, OutputSink};
pub use publish::{
    comment_publisher, should_comment, CommentPublisher, GithubCommentClient, PublishError,
    UnavailablePublisher,
};
