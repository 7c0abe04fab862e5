use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::comment::format_comment;
use crate::config::GateSettings;
use crate::context::CiContext;
use crate::error::{GateError, EXIT_GENERIC_FAILURE};
use crate::inputs::RunConfig;
use crate::invoker::{InvocationResult, ToolKind, ToolRunner};
use crate::output::{OutputRecord, OutputSink};
use crate::publish::{should_comment, CommentPublisher, PublishError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Resolved,
    Invoked,
    Commented,
    Skipped,
    Recorded,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum CommentOutcome {
    Skipped,
    Posted,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub validation: Option<InvocationResult>,
    pub report: Option<InvocationResult>,
    pub comment: CommentOutcome,
    pub recorded: bool,
    pub stages: Vec<Stage>,
    pub exit_code: i32,
}

impl RunOutcome {
    /// `exit_code` squeezed into a process status without letting a
    /// non-zero code wrap around to success.
    pub fn process_exit_code(&self) -> u8 {
        match self.exit_code {
            0 => 0,
            code => match (code & 0xff) as u8 {
                0 => EXIT_GENERIC_FAILURE,
                low => low,
            },
        }
    }
}

/// Sequences one run: invoke, maybe comment, record, finish.
pub struct Controller<'a> {
    config: RunConfig,
    context: CiContext,
    settings: GateSettings,
    runner: &'a dyn ToolRunner,
    publisher: Option<&'a dyn CommentPublisher>,
    stages: Vec<Stage>,
}

impl<'a> Controller<'a> {
    pub fn new(
        config: RunConfig,
        context: CiContext,
        settings: GateSettings,
        runner: &'a dyn ToolRunner,
    ) -> Self {
        let mut controller = Self {
            config,
            context,
            settings,
            runner,
            publisher: None,
            stages: Vec::new(),
        };
        controller.enter(Stage::Idle);
        controller.enter(Stage::Resolved);
        controller
    }

    pub fn with_publisher(mut self, publisher: &'a dyn CommentPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    fn enter(&mut self, stage: Stage) {
        debug!(target: "waf_gate.controller", ?stage, "entering stage");
        self.stages.push(stage);
    }

    /// Only a validator that cannot be run aborts the run. Report failures,
    /// comment failures and output write failures are logged instead.
    pub fn run(mut self, sink: Option<&mut dyn OutputSink>) -> Result<RunOutcome, GateError> {
        let validation = if self.config.validation_enabled {
            let result =
                self.runner
                    .run(ToolKind::Validate, &self.settings.validator, &self.config.target)?;
            if result.succeeded() {
                info!(target: "waf_gate.controller", exit_code = result.exit_code, "validation passed");
            } else {
                warn!(target: "waf_gate.controller", exit_code = result.exit_code, "validation failed");
            }
            Some(result)
        } else {
            info!(target: "waf_gate.controller", "validation disabled");
            None
        };

        let report = if self.config.report_enabled {
            self.run_report()
        } else {
            None
        };
        self.enter(Stage::Invoked);

        let comment = match &validation {
            Some(result) if should_comment(&self.context, &self.config, result) => {
                self.enter(Stage::Commented);
                self.post_comment(result)
            }
            _ => {
                self.enter(Stage::Skipped);
                CommentOutcome::Skipped
            }
        };

        let mut exit_code = validation.as_ref().map_or(0, |result| result.exit_code);
        let record = OutputRecord::new(
            self.settings.output.key.as_str(),
            validation.as_ref().map_or("", |result| result.output.as_str()),
        )
        .with_entry("status", if exit_code == 0 { "success" } else { "failed" })
        .with_entry("exit_code", exit_code.to_string());

        let recorded = match sink {
            Some(sink) => match sink.append(&record.render()) {
                Ok(()) => true,
                Err(err) => {
                    error!(target: "waf_gate.output", error = %err, "could not record outputs");
                    if exit_code == 0 {
                        exit_code = i32::from(EXIT_GENERIC_FAILURE);
                    }
                    false
                }
            },
            None => {
                warn!(target: "waf_gate.output", "no output sink configured, skipping outputs");
                false
            }
        };
        self.enter(Stage::Recorded);
        self.enter(Stage::Done);

        info!(target: "waf_gate.controller", exit_code, "run finished");
        Ok(RunOutcome {
            validation,
            report,
            comment,
            recorded,
            stages: self.stages,
            exit_code,
        })
    }

    fn run_report(&self) -> Option<InvocationResult> {
        match self
            .runner
            .run(ToolKind::Report, &self.settings.report, &self.config.target)
        {
            Ok(result) => {
                if !result.succeeded() {
                    warn!(target: "waf_gate.controller", exit_code = result.exit_code, "report generation failed");
                }
                Some(result)
            }
            Err(err) => {
                error!(target: "waf_gate.controller", error = %err, "report tool could not run");
                None
            }
        }
    }

    fn post_comment(&self, result: &InvocationResult) -> CommentOutcome {
        let payload = format_comment(result, &self.context.comment_meta(&self.config.target));
        let attempt = match (self.publisher, self.context.comments_url.as_deref()) {
            (_, None) => Err(PublishError::MissingCommentsUrl),
            (None, Some(_)) => Err(PublishError::MissingToken),
            (Some(publisher), Some(url)) => publisher.publish(url, &payload),
        };
        match attempt {
            Ok(()) => {
                info!(target: "waf_gate.comment", tool = %result.tool, "posted status comment");
                CommentOutcome::Posted
            }
            Err(err) => {
                warn!(target: "waf_gate.comment", error = %err, "could not post status comment");
                CommentOutcome::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: i32) -> RunOutcome {
        RunOutcome {
            validation: None,
            report: None,
            comment: CommentOutcome::Skipped,
            recorded: false,
            stages: Vec::new(),
            exit_code,
        }
    }

    #[test]
    fn process_exit_code_never_wraps_to_success() {
        assert_eq!(outcome(0).process_exit_code(), 0);
        assert_eq!(outcome(2).process_exit_code(), 2);
        assert_eq!(outcome(255).process_exit_code(), 255);
        assert_eq!(outcome(256).process_exit_code(), 1);
        assert_eq!(outcome(258).process_exit_code(), 2);
        assert_eq!(outcome(-1).process_exit_code(), 255);
    }
}
