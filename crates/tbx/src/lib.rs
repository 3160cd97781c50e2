//! 🧰 tbx: tabular extracts in, cleaned and enriched records out, loaded into a remote
//! record store in chunks.
//!
//! 🧠 Knowledge graph, leaf first:
//! - [`rows`]: comma-split row files in and out.
//! - [`transforms`]: the operation catalog, one pass at a time.
//! - [`lookup`]: natural keys → remote ids, in sub-batched queries.
//! - [`payload`]: rows → named records.
//! - [`upload`]: records → chunked remote writes that survive a bad chunk.
//! - [`store`], [`notify`], [`relational`]: the boundaries, each a trait plus backends.
//! - [`pipeline`]: the configured steps, in order.

pub mod app_config;
pub mod common;
pub mod error;
pub mod lookup;
pub mod notify;
pub mod payload;
pub mod pipeline;
pub mod progress;
pub mod relational;
pub mod rows;
pub mod store;
pub mod transforms;
pub mod upload;

use anyhow::Context;

use crate::app_config::AppConfig;
use crate::pipeline::{Pipeline, RunReport};

/// 🚀 Build every collaborator from `config` and run the steps.
pub async fn run(config: AppConfig) -> anyhow::Result<RunReport> {
    let pipeline = Pipeline::from_config(config)
        .await
        .context("💀 Could not set up the pipeline")?;
    pipeline.run().await
}
