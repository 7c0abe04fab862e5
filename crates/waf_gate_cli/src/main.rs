use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error};
use waf_gate_core::{
    comment_publisher, format_comment, CiContext, Controller, FileSink, GateError, GateSettings,
    InvocationResult, OutputSink, ProcessEnv, ProcessRunner, RunConfig, ToolKind,
};

#[derive(Parser)]
#[command(version, about = "Validate WAF definitions and report the verdict to CI")]
struct Cli {
    /// Tool settings file (falls back to $WAF_GATE_CONFIG, then built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the validator (and report tool), comment, and record outputs.
    Run,
    /// Print the resolved inputs, CI context and settings as JSON.
    Inputs,
    /// Print the status comment for a captured output file.
    Render(RenderArgs),
}

#[derive(Args)]
struct RenderArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    exit_code: i32,
    #[arg(long, value_enum, default_value_t = ToolArg::Validate)]
    tool: ToolArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum ToolArg {
    Validate,
    Report,
}

impl From<ToolArg> for ToolKind {
    fn from(arg: ToolArg) -> Self {
        match arg {
            ToolArg::Validate => ToolKind::Validate,
            ToolArg::Report => ToolKind::Report,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => handle_run(cli.config.as_deref()),
        Commands::Inputs => handle_inputs(cli.config.as_deref()).map(|()| 0),
        Commands::Render(args) => handle_render(args).map(|()| 0),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(target: "waf_gate.cli", "{err:#}");
            let code = err
                .downcast_ref::<GateError>()
                .map_or(waf_gate_core::error::EXIT_GENERIC_FAILURE, GateError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    debug!(target: "waf_gate.cli", level, "logging initialized");
}

fn handle_run(config_path: Option<&Path>) -> Result<u8> {
    let env = ProcessEnv;
    let settings = GateSettings::load(config_path, &env)?;
    let config = RunConfig::resolve(&env);
    let context = CiContext::resolve(&env);

    let runner = ProcessRunner::new(settings.limits.tool_timeout())
        .with_capture_dir(settings.output.capture_dir.clone());
    let publisher = context
        .token
        .as_deref()
        .map(|token| comment_publisher(token, settings.limits.http_timeout()));
    let mut sink = context.output_path.clone().map(FileSink::new);

    let mut controller = Controller::new(config, context, settings, &runner);
    if let Some(publisher) = publisher.as_deref() {
        controller = controller.with_publisher(publisher);
    }
    let outcome = controller.run(sink.as_mut().map(|sink| sink as &mut dyn OutputSink))?;
    Ok(outcome.process_exit_code())
}

fn handle_inputs(config_path: Option<&Path>) -> Result<()> {
    let env = ProcessEnv;
    let settings = GateSettings::load(config_path, &env)?;
    let resolved = serde_json::json!({
        "config": RunConfig::resolve(&env),
        "context": CiContext::resolve(&env),
        "settings": settings,
    });
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let output = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let env = ProcessEnv;
    let config = RunConfig::resolve(&env);
    let context = CiContext::resolve(&env);

    let result = InvocationResult {
        tool: args.tool.into(),
        exit_code: args.exit_code,
        output,
    };
    let payload = format_comment(&result, &context.comment_meta(&config.target));
    print!("{}", payload.body);
    Ok(())
}
