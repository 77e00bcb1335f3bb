//! Fitbod-to-Elasticsearch ingestion.
//!
//! Fitbod delivers workout history as a CSV attachment on a Gmail message.
//! This crate fetches those attachments, stamps every data row with a stable
//! positional id, normalizes the rows into typed workout-set documents, and
//! upserts each document into Elasticsearch keyed by that id, so repeated
//! runs overwrite instead of duplicating.

pub mod config;
pub mod elastic;
pub mod gmail;
pub mod ingest;
pub mod pipeline;
