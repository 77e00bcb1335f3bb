//! The ingestion driver: pull export attachments from the mailbox, run each
//! through the row pipeline, push the resulting sets to the index, delete the
//! downloaded files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::config::IngestConfig;
use crate::elastic::{ElasticClient, IndexOutcome};
use crate::pipeline;

/// What the driver needs from the mail side. [`crate::gmail::GmailClient`]
/// is the production implementation.
#[async_trait]
pub trait MailSource {
    /// Ids of all messages matching the query.
    async fn search(&self, query: &str) -> Result<Vec<String>>;

    /// Save the message's attachments under `dest_dir/<msg_id>/` and return
    /// the local paths.
    async fn fetch_attachments(&self, msg_id: &str, dest_dir: &Path) -> Result<Vec<PathBuf>>;
}

pub struct Ingestor<M> {
    cfg: IngestConfig,
    query: String,
    mail: M,
    elastic: ElasticClient,
}

impl<M: MailSource> Ingestor<M> {
    pub fn new(cfg: IngestConfig, query: impl Into<String>, mail: M, elastic: ElasticClient) -> Self {
        Self {
            cfg,
            query: query.into(),
            mail,
            elastic,
        }
    }

    /// One full ingestion pass, sequential throughout.
    ///
    /// A failure before attachments land on disk aborts with nothing to clean
    /// up. A fatal pipeline error aborts without cleanup, leaving the
    /// offending file in the temp directory for inspection. Cleanup runs once
    /// at the end on the success path and is unconditional over every fetched
    /// file, csv or not.
    pub async fn run(&self, days: u32) -> Result<()> {
        self.elastic
            .ping()
            .await
            .context("Index server is unreachable")?;

        let attachments = self.fetch_attachments().await?;
        self.index_attachments(&attachments, days).await?;
        self.cleanup(&attachments);
        Ok(())
    }

    async fn fetch_attachments(&self) -> Result<Vec<PathBuf>> {
        let message_ids = self
            .mail
            .search(&self.query)
            .await
            .context("Failed to search for export messages")?;

        let mut attachments = Vec::new();
        for msg_id in &message_ids {
            let mut saved = self
                .mail
                .fetch_attachments(msg_id, &self.cfg.temp_dir)
                .await
                .with_context(|| format!("Failed to fetch attachments of message {msg_id}"))?;
            attachments.append(&mut saved);
        }

        tracing::info!("{} attachment(s) found and saved to disk", attachments.len());
        Ok(attachments)
    }

    pub async fn index_attachments(&self, attachments: &[PathBuf], days: u32) -> Result<()> {
        for att in attachments {
            tracing::info!("Indexing {}", att.display());
            if att.extension().and_then(|e| e.to_str()) != Some("csv") {
                tracing::warn!("...skipping due to unknown file type, expecting CSV");
                continue;
            }

            pipeline::rewrite_csv(att)
                .with_context(|| format!("Failed to rewrite {}", att.display()))?;
            let sets = pipeline::normalize_csv(att, days)
                .with_context(|| format!("Failed to normalize {}", att.display()))?;

            for set in &sets {
                let outcome = self
                    .elastic
                    .upsert(&self.cfg.index_name, &self.cfg.doc_type, set, set.doc_id)
                    .await?;
                match outcome {
                    IndexOutcome::Created | IndexOutcome::Updated => {}
                    IndexOutcome::Other(result) => {
                        tracing::error!(
                            "Indexing returned {result:?}, expected 'created' or 'updated'"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    pub fn cleanup(&self, attachments: &[PathBuf]) {
        for att in attachments {
            if let Err(e) = std::fs::remove_file(att) {
                tracing::warn!("Failed to delete {}: {e}", att.display());
            }
        }
    }
}
