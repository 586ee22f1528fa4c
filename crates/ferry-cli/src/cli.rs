use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ferry",
    about = "ferry: copy, list and mirror files across storage backends",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file (defaults to ./ferry.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Username for backends that need one
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Password for backends that need one
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Chunk size in bytes for database backends
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List objects under a remote path
    Ls(LsArgs),
    /// Copy one local file to a remote object
    Upload(UploadArgs),
    /// Copy one remote object to a local file
    Download(DownloadArgs),
    /// Upload a local directory tree
    Push(PushArgs),
    /// Download a remote directory tree
    Pull(PullArgs),
    /// Delete a remote object
    Rm(RmArgs),
    /// Rename a remote object
    Mv(MvArgs),
    /// Write a remote object to stdout
    Cat(CatArgs),
}

#[derive(Args)]
pub struct LsArgs {
    /// Backend URL
    pub url: String,
    #[arg(default_value = "")]
    pub path: String,
}

#[derive(Args)]
pub struct UploadArgs {
    pub url: String,
    pub local: PathBuf,
    pub remote: String,
}

#[derive(Args)]
pub struct DownloadArgs {
    pub url: String,
    pub remote: String,
    pub local: PathBuf,
}

#[derive(Args)]
pub struct PushArgs {
    pub url: String,
    pub local_dir: PathBuf,
    #[arg(default_value = "")]
    pub remote_dir: String,
    /// Do not delete existing remote objects before writing them
    #[arg(long)]
    pub no_replace: bool,
    /// Delete local files once uploaded
    #[arg(long)]
    pub delete_after: bool,
}

#[derive(Args)]
pub struct PullArgs {
    pub url: String,
    pub remote_dir: String,
    pub local_dir: PathBuf,
    /// Delete remote objects once downloaded
    #[arg(long)]
    pub delete_after: bool,
}

#[derive(Args)]
pub struct RmArgs {
    pub url: String,
    #[arg(required = true)]
    pub keys: Vec<String>,
    /// Succeed when a key does not exist
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct MvArgs {
    pub url: String,
    pub from: String,
    pub to: String,
}

#[derive(Args)]
pub struct CatArgs {
    pub url: String,
    pub key: String,
}
