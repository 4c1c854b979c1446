mod cli;

use std::collections::BTreeMap;
use std::io;

use clap::Parser;
use cli::{Opts, OptsCmd, QueryOpts};
use relay_core::{EventKind, Filter, Timestamp};
use relay_store::{CancelToken, RelayStore, Store, StoreConfig, StoreError};
use snafu::{FromString, ResultExt, Snafu, Whatever};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LOG_TARGET: &str = "relay::cli";

type WhateverResult<T> = std::result::Result<T, snafu::Whatever>;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("store error: {source}"))]
    Store { source: StoreError },
    #[snafu(display("invalid filter: {reason}"))]
    InvalidFilter { reason: String },
    #[snafu(display("miscellaneous error: {source}"))]
    Whatever { source: Whatever },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
fn main() -> CliResult<()> {
    init_logging().context(WhateverSnafu)?;

    let opts = Opts::parse();
    let out = handle_cmd(opts)?;
    println!("{}", serde_json::to_string_pretty(&out).expect("value is always serializable"));
    Ok(())
}

fn handle_cmd(opts: Opts) -> CliResult<serde_json::Value> {
    let store = RelayStore::open(&opts.db, StoreConfig::default()).context(StoreSnafu)?;

    match opts.cmd {
        OptsCmd::Stats => {
            let stats = store.dump_table_stats().context(StoreSnafu)?;
            tracing::info!(target: LOG_TARGET, main_rows = stats.main_rows, "dumped table stats");
            let families: serde_json::Value = stats
                .families
                .iter()
                .map(|f| (f.name.to_string(), serde_json::json!(f.entry_count)))
                .collect();
            Ok(serde_json::json!({
                "main_rows": stats.main_rows,
                "meta_rows": stats.meta_rows,
                "families": families,
            }))
        }
        OptsCmd::Query(query) => {
            let filter = build_filter(query)?;
            let cancel = CancelToken::new();
            let events = store.query_events(&filter, &cancel).context(StoreSnafu)?;
            tracing::info!(target: LOG_TARGET, count = events.len(), "query complete");
            Ok(serde_json::to_value(events).expect("Event is always serializable"))
        }
        OptsCmd::Wipe => {
            store.wipe().context(StoreSnafu)?;
            tracing::info!(target: LOG_TARGET, "store wiped");
            Ok(serde_json::Value::Bool(true))
        }
        OptsCmd::Compact => {
            let mut store = store;
            let did_compact = store.compact().context(StoreSnafu)?;
            tracing::info!(target: LOG_TARGET, did_compact, "compaction complete");
            Ok(serde_json::Value::Bool(did_compact))
        }
    }
}

fn build_filter(query: QueryOpts) -> CliResult<Filter> {
    let mut tags: BTreeMap<u8, Vec<Vec<u8>>> = BTreeMap::new();
    for entry in &query.tags {
        let (letter, value) = entry.split_once('=').ok_or_else(|| {
            InvalidFilterSnafu {
                reason: format!("tag filter `{entry}` must be `letter=value`"),
            }
            .build()
        })?;
        let letter = letter.as_bytes().first().copied().ok_or_else(|| {
            InvalidFilterSnafu {
                reason: format!("tag filter `{entry}` has an empty letter"),
            }
            .build()
        })?;
        tags.entry(letter).or_default().push(value.as_bytes().to_vec());
    }

    Ok(Filter {
        ids: query.ids,
        authors: query.authors,
        kinds: query.kinds.into_iter().map(EventKind).collect(),
        tags,
        since: query.since.map(Timestamp),
        until: query.until.map(Timestamp),
        limit: query.limit,
    })
}

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("failed to initialize logging".to_string()))?;

    Ok(())
}
