use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "quiver",
    about = "quiver: named, owner-scoped object store with metadata queries",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Base directory new buckets are created under
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Bucket configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path of an existing bucket
    #[arg(long, global = true)]
    pub bucket: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new bucket under the base directory
    Init,
    /// Store a file as a new object
    Put(PutArgs),
    /// Show an object or copy its payload to a file
    Get(GetArgs),
    /// Fetch or delete objects by metadata
    Query(QueryArgs),
    /// Delete an object
    Rm(TargetArgs),
    /// Reconcile the bucket's indexes
    Repair,
}

#[derive(Args)]
pub struct PutArgs {
    pub file: PathBuf,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub owner: String,
    #[arg(long)]
    pub content_type: Option<String>,
    /// Extra metadata, repeatable
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub meta: Vec<(String, String)>,
}

/// Selects a single object by identity or by name and owner.
#[derive(Args)]
pub struct TargetArgs {
    #[arg(long, conflicts_with = "name", required_unless_present = "name")]
    pub id: Option<String>,
    #[arg(long, requires = "owner")]
    pub name: Option<String>,
    #[arg(long)]
    pub owner: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Write the payload to this file
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct QueryArgs {
    #[arg(long)]
    pub owner: Option<String>,
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,
    /// Require every parameter to match instead of any
    #[arg(long)]
    pub and: bool,
    /// Delete the matches instead of listing them
    #[arg(long)]
    pub delete: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
