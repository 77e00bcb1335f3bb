//! Thin Elasticsearch client: a document upsert keyed by id, plus a
//! reachability check. Everything else the index does (mappings, search,
//! aggregation) happens server-side and is out of scope here.

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ElasticConfig;

/// How the server reported an index write. `Created` and `Updated` are the
/// two success cases of an upsert; anything else means the document is not
/// reliably indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Created,
    Updated,
    Other(String),
}

#[derive(Deserialize)]
struct IndexResponse {
    result: String,
}

#[derive(Clone)]
pub struct ElasticClient {
    cfg: ElasticConfig,
    http: Client,
}

impl ElasticClient {
    pub fn new(cfg: ElasticConfig) -> Result<Self> {
        let timeout = Duration::from_secs_f64(cfg.timeout_seconds.max(1.0));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self { cfg, http })
    }

    fn base_url(&self) -> Result<Url> {
        Url::parse(&self.cfg.url).context("invalid Elasticsearch URL")
    }

    /// Verify the node answers at all before a run takes any side effects.
    pub async fn ping(&self) -> Result<()> {
        let request = self.with_auth(self.http.get(self.base_url()?));
        let response = request.send().await.context("elasticsearch ping failed")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("elasticsearch ping returned {}", status));
        }
        Ok(())
    }

    /// Upsert one document: created when the key is absent, overwritten when
    /// a document with the same key exists.
    pub async fn upsert<T: Serialize>(
        &self,
        index: &str,
        doc_type: &str,
        doc: &T,
        doc_id: u64,
    ) -> Result<IndexOutcome> {
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("elasticsearch URL cannot be a base"))?
            .pop_if_empty()
            .push(index)
            .push(doc_type)
            .push(&doc_id.to_string());

        let request = self.with_auth(self.http.put(url).json(doc));
        let response = request
            .send()
            .await
            .context("elasticsearch index request failed")?;
        let status = response.status();
        let text = response.text().await.with_context(|| {
            format!("failed to read elasticsearch response body (status {status})")
        })?;

        if !status.is_success() {
            return Err(anyhow!("elasticsearch returned {}: {}", status, text));
        }

        let parsed: IndexResponse = serde_json::from_str(&text)
            .with_context(|| format!("invalid elasticsearch index response: {text}"))?;
        Ok(match parsed.result.as_str() {
            "created" => IndexOutcome::Created,
            "updated" => IndexOutcome::Updated,
            other => IndexOutcome::Other(other.to_string()),
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.cfg.username.is_empty() {
            request
        } else {
            request.basic_auth(self.cfg.username.clone(), Some(self.cfg.password.clone()))
        }
    }
}
