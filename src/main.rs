//! LINSTOR FlexVolume driver
//!
//! Invoked by the kubelet as `linstor-flexvolume <verb> <args...>`. Prints a
//! single JSON response on stdout; logs go to a file since the kubelet owns
//! the process output.

use clap::error::{ContextKind, ErrorKind};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use linstor_flexvolume::{
    AgentConfig, BackendFactory, BackendKind, FlexCall, FlexVolumeApi, Reply, Response, Result,
    SystemRunner,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// FlexVolume driver for LINSTOR and drbdmanage managed DRBD volumes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, global = true, env = "LINSTOR_FLEX_CONFIG")]
    config: Option<PathBuf>,

    /// Control plane backend, overrides the configuration file
    #[arg(long, global = true, env = "LINSTOR_FLEX_BACKEND")]
    backend: Option<BackendKind>,

    /// LINSTOR controllers, overrides the configuration file
    #[arg(long, global = true, env = "LINSTOR_CONTROLLERS")]
    controllers: Option<String>,

    /// Name of this node in the control plane
    #[arg(long, global = true, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    /// Log file, appended to
    #[arg(
        long,
        global = true,
        env = "LINSTOR_FLEX_LOG_FILE",
        default_value = "/tmp/linstor-flexvolume.log"
    )]
    log_file: PathBuf,

    #[command(subcommand)]
    call: FlexCall,
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => exit_with(rejected_call(e)),
    };

    init_logging(&args);
    info!(
        "{} {} handling {}",
        linstor_flexvolume::NAME,
        linstor_flexvolume::VERSION,
        args.call.verb()
    );

    let reply = match args.call {
        FlexCall::Init => FlexVolumeApi::init(),
        ref call => match run(&args, call) {
            Ok(reply) => reply,
            Err(e) => Reply::from_error(call.verb(), &e),
        },
    };

    exit_with(reply)
}

/// Build the driver and run one call on a single threaded runtime
fn run(args: &Args, call: &FlexCall) -> Result<Reply> {
    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(controllers) = &args.controllers {
        config.linstor.controllers = Some(controllers.clone());
    }
    if let Some(node_name) = &args.node_name {
        config.node_name = Some(node_name.clone());
    }

    let local_node = config.local_node()?;
    info!("Backend {} on node {}", config.backend, local_node);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let runner = Arc::new(SystemRunner::new());
    let control_plane = BackendFactory::from_config(&config, runner.clone());
    let api = FlexVolumeApi::new(config, control_plane, runner, local_node);

    Ok(runtime.block_on(api.call(call)))
}

/// Answer a command line clap could not parse
fn rejected_call(err: clap::Error) -> Reply {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
        ErrorKind::InvalidSubcommand => {
            let verb = err
                .get(ContextKind::InvalidSubcommand)
                .map(|v| v.to_string())
                .unwrap_or_default();
            Reply::bad_call(Response::not_supported(format!(
                "Unsupported driver action: {}",
                verb
            )))
        }
        _ => {
            let rendered = err.to_string();
            let message = rendered
                .lines()
                .next()
                .unwrap_or("invalid call")
                .trim_start_matches("error: ");
            Reply::bad_call(Response::failure(message))
        }
    }
}

fn exit_with(reply: Reply) -> ! {
    println!("{}", reply.response.to_json());
    std::process::exit(reply.exit_code)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Never log to stdout, the kubelet parses it
    let writer = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
    {
        Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
        Err(_) => BoxMakeWriter::new(std::io::sink),
    };

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
            .init();
    }
}
