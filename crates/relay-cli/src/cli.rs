use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use relay_core::{Id, PubKey};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    /// Path to the `redb` store file.
    #[arg(long, global = true)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Print per-index-family row counts.
    Stats,
    /// Run an ad-hoc filter query and print matching events as JSON.
    Query(QueryOpts),
    /// Drop every event, index row, and the serial counter.
    Wipe,
    /// Reclaim space freed by `wipe` or physical deletes.
    Compact,
}

#[derive(Debug, Args)]
pub struct QueryOpts {
    #[arg(long = "id")]
    pub ids: Vec<Id>,
    #[arg(long = "author")]
    pub authors: Vec<PubKey>,
    #[arg(long = "kind")]
    pub kinds: Vec<u16>,
    /// Repeatable `letter=value` tag filter, e.g. `-t e=deadbeef`.
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,
    #[arg(long)]
    pub since: Option<i64>,
    #[arg(long)]
    pub until: Option<i64>,
    #[arg(long)]
    pub limit: Option<usize>,
}
