use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use polycrypt_wire::OperationType;
use tokio::runtime::Runtime;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod loopback;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the non-cryptographic loopback backend on a socket.
    Loopback(LoopbackArgs),
    /// Run one streaming operation against a backend.
    Run(RunArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Loopback(args) => loopback::run(args),
        Command::Run(args) => run::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

pub(crate) fn runtime() -> CliResult<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Socket path to bind.
    #[arg(env = "POLYCRYPT_SOCKET")]
    pub path: PathBuf,
    /// Schema directory for request validation.
    #[arg(long, value_name = "DIR")]
    pub validate: Option<PathBuf>,
    /// Exit after the first caller disconnects.
    #[arg(long)]
    pub once: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StreamOp {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    Digest,
}

impl From<StreamOp> for OperationType {
    fn from(op: StreamOp) -> Self {
        match op {
            StreamOp::Encrypt => OperationType::Encrypt,
            StreamOp::Decrypt => OperationType::Decrypt,
            StreamOp::Sign => OperationType::Sign,
            StreamOp::Verify => OperationType::Verify,
            StreamOp::Digest => OperationType::Digest,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Backend socket path.
    #[arg(env = "POLYCRYPT_SOCKET")]
    pub path: PathBuf,
    /// Operation to run.
    #[arg(long)]
    pub op: StreamOp,
    /// Algorithm name, or a JSON algorithm object.
    #[arg(long)]
    pub algorithm: String,
    /// Key as JSON (e.g. a handle returned by the backend).
    #[arg(long)]
    pub key: Option<String>,
    /// Signature to check, hex encoded (verify only).
    #[arg(long)]
    pub signature: Option<String>,
    /// Raw string input.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read input from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Bytes per `process` request.
    #[arg(long, default_value = "65536")]
    pub chunk_size: usize,
    /// Maximum time to wait for readiness and for completion (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Directory the client must be able to write to.
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
