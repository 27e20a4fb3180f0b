use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "davstore",
    about = "Inspect and maintain a davstore calendar or contact store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Store configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store root; overrides the configuration file
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Store kind when no configuration file is given
    #[arg(long, global = true, default_value = "calendar")]
    pub kind: KindArg,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum KindArg {
    Calendar,
    Addressbook,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the UIDs of all homes
    Homes,
    /// Create a home with its default collections
    Provision(HomeArgs),
    /// List a home's collections, or a collection's resources
    Ls(LsArgs),
    /// Create a collection
    Mkcol(CollectionArgs),
    /// Remove a collection and everything in it
    Rmcol(CollectionArgs),
    /// Store a resource from a file, or `-` for stdin
    Put(PutArgs),
    /// Print a resource
    Get(ResourceArgs),
    /// Remove a resource
    Rm(ResourceArgs),
    /// Show or advance a collection's change token
    Ctag(CtagArgs),
    /// List dead properties of a home, collection or resource
    Props(PropsArgs),
}

#[derive(Args)]
pub struct HomeArgs {
    pub uid: String,
}

#[derive(Args)]
pub struct LsArgs {
    pub uid: String,
    pub collection: Option<String>,
}

#[derive(Args)]
pub struct CollectionArgs {
    pub uid: String,
    pub collection: String,
}

#[derive(Args)]
pub struct ResourceArgs {
    pub uid: String,
    pub collection: String,
    pub resource: String,
}

#[derive(Args)]
pub struct PutArgs {
    pub uid: String,
    pub collection: String,
    pub resource: String,
    pub file: PathBuf,
    /// Create the home and collection if they are missing
    #[arg(short = 'p', long)]
    pub parents: bool,
}

#[derive(Args)]
pub struct CtagArgs {
    pub uid: String,
    pub collection: String,
    /// Advance the token
    #[arg(long)]
    pub bump: bool,
    /// Start a new token lineage
    #[arg(long, conflicts_with = "bump")]
    pub reset: bool,
}

#[derive(Args)]
pub struct PropsArgs {
    pub uid: String,
    pub collection: Option<String>,
    #[arg(requires = "collection")]
    pub resource: Option<String>,
}
