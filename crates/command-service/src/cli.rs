use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "command-service",
    version,
    about = "HTTP service that runs shell scripts and tracks their lifecycle"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub(crate) listen_addr: String,
    /// Engine settings; `config/command-service.toml` is used when present.
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    #[arg(long, default_value = "data/commands.db")]
    pub(crate) database: PathBuf,
    /// Keep records in memory only; nothing survives a restart.
    #[arg(long, default_value_t = false)]
    pub(crate) memory: bool,
    #[arg(long, default_value = "logs")]
    pub(crate) log_dir: PathBuf,
    /// Filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    pub(crate) log_level: String,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
