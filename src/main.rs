/*!
 * orbit-s3 - single-object S3 upload/download from the command line
 *
 * Blocks until the transfer reports its terminal result. Exits 0 on
 * success and 1 on any failure.
 */

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use orbit_s3_transfer::{
    config::EngineConfig,
    core::Direction,
    error::{EXIT_FAILURE, EXIT_SUCCESS},
    params::TransferParams,
    Engine,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "orbit-s3")]
#[command(version, about = "Upload or download one object to an S3-compatible bucket", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Engine configuration file (TOML)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Directory for daily-rotated log files (stdout when absent)
    #[arg(long, value_name = "DIR", global = true)]
    log_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file to an object
    Upload(TransferArgs),

    /// Download an object to a local file
    Download(TransferArgs),
}

#[derive(Args)]
struct TransferArgs {
    #[arg(long)]
    bucket: String,

    /// Object key (URL-encoded)
    #[arg(long)]
    object: String,

    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    access_key_id: String,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: String,

    #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    session_token: Option<String>,

    /// Local source (upload) or destination (download)
    #[arg(long, value_name = "PATH")]
    file_path: String,

    /// Token attached to uploads as object metadata
    #[arg(long)]
    security_token: Option<String>,

    /// PEM bundle replacing the platform trust store
    #[arg(long, value_name = "PATH")]
    ca_certs_path: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// Maximum number of attempts
    #[arg(long, default_value_t = 3)]
    tries: u32,

    /// Endpoint override, e.g. http://127.0.0.1:9000
    #[arg(long)]
    endpoint: Option<String>,
}

impl From<TransferArgs> for TransferParams {
    fn from(args: TransferArgs) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        TransferParams {
            bucket: args.bucket,
            object: args.object,
            access_key_id: args.access_key_id,
            secret_access_key: args.secret_access_key,
            session_token: non_empty(args.session_token),
            security_token: non_empty(args.security_token),
            file_path: args.file_path,
            region: non_empty(args.region),
            tries: Some(args.tries),
            endpoint: non_empty(args.endpoint),
            ca_certs_path: non_empty(args.ca_certs_path),
        }
    }
}

fn main() {
    let code = match run() {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => EXIT_FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = cli.log_path {
        config.log_path = Some(dir);
    }

    let (direction, args) = match cli.command {
        Command::Upload(args) => (Direction::Upload, args),
        Command::Download(args) => (Direction::Download, args),
    };
    let request = TransferParams::from(args)
        .into_request(direction)
        .context("invalid transfer parameters")?;

    let engine = Engine::start(config).context("failed to start transfer engine")?;

    let (tx, rx) = mpsc::channel();
    let on_result = Box::new(move |success: bool, message: String| {
        let _ = tx.send((success, message));
    });
    match direction {
        Direction::Upload => {
            let on_progress = Box::new(|fraction: f64| {
                info!("upload progress: {:.2}%", fraction * 100.0);
            });
            engine.upload(request, on_result, Some(on_progress))
        }
        Direction::Download => engine.download(request, on_result),
    };

    let (success, message) = rx
        .recv()
        .context("transfer ended without reporting a result")?;
    engine.shutdown();

    if success {
        println!("{} succeeded", direction);
    } else {
        eprintln!("{} failed: {}", direction, message);
    }
    Ok(success)
}
