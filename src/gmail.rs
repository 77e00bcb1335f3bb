//! Gmail API client for finding export messages and saving their attachments.

use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::api::MessagePart;
use google_gmail1::hyper_rustls::HttpsConnector;
use google_gmail1::Gmail;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::path::{Path, PathBuf};

use crate::config::GmailConfig;
use crate::ingest::MailSource;

/// Client for interacting with the Gmail API
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    /// Authorize with the installed-app flow. Tokens are cached on disk, so
    /// only the first run prompts in a browser; later runs reuse or refresh
    /// the cached token.
    pub async fn connect(cfg: &GmailConfig) -> Result<Self> {
        let secret = google_gmail1::yup_oauth2::read_application_secret(&cfg.credentials_path)
            .await
            .context("Failed to read OAuth credentials")?;

        let auth = google_gmail1::yup_oauth2::InstalledFlowAuthenticator::builder(
            secret,
            google_gmail1::yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(&cfg.token_cache_path)
        .build()
        .await
        .context("Failed to build authenticator")?;

        let connector = google_gmail1::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native TLS roots")?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let hub = Gmail::new(client, auth);

        Ok(Self { hub })
    }

    /// List ids of every message matching the query, following pagination
    /// until the mailbox is exhausted.
    pub async fn search(&self, query: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self.hub.users().messages_list("me").q(query);
            if let Some(ref token) = page_token {
                call = call.page_token(token);
            }
            let (_, response) = call.doit().await.context("Failed to list messages")?;

            for msg in response.messages.unwrap_or_default() {
                if let Some(id) = msg.id {
                    ids.push(id);
                }
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        tracing::debug!("Query matched {} message(s)", ids.len());
        Ok(ids)
    }

    /// Download every named attachment of a message to
    /// `dest_dir/<msg_id>/<filename>`, overwriting files that already exist.
    /// Returns the saved paths.
    pub async fn fetch_attachments(&self, msg_id: &str, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let (_, message) = self
            .hub
            .users()
            .messages_get("me", msg_id)
            .doit()
            .await
            .context("Failed to get message")?;

        let mut named_parts = Vec::new();
        if let Some(payload) = &message.payload {
            collect_named_parts(payload, &mut named_parts);
        }

        let mut saved = Vec::new();
        if named_parts.is_empty() {
            return Ok(saved);
        }

        let msg_dir = dest_dir.join(msg_id);
        std::fs::create_dir_all(&msg_dir)
            .with_context(|| format!("Failed to create {}", msg_dir.display()))?;

        for part in named_parts {
            let filename = part.filename.clone().unwrap_or_default();
            let data = self.part_data(msg_id, &part).await?;
            let path = msg_dir.join(&filename);
            std::fs::write(&path, &data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::debug!("Saved attachment {}", path.display());
            saved.push(path);
        }

        Ok(saved)
    }

    /// Attachment bytes are either inlined in the part or fetched by
    /// attachment id; small parts come inlined.
    async fn part_data(&self, msg_id: &str, part: &MessagePart) -> Result<Vec<u8>> {
        if let Some(body) = &part.body {
            if let Some(data) = &body.data {
                return Ok(data.clone());
            }
            if let Some(attachment_id) = &body.attachment_id {
                let (_, attachment) = self
                    .hub
                    .users()
                    .messages_attachments_get("me", msg_id, attachment_id)
                    .doit()
                    .await
                    .context("Failed to get attachment")?;
                return attachment
                    .data
                    .context("Attachment body carried no data");
            }
        }
        anyhow::bail!(
            "Message part {:?} has neither inline data nor an attachment id",
            part.filename
        )
    }
}

/// Walk the payload tree collecting parts that carry a filename; attachments
/// in nested multipart messages count too.
fn collect_named_parts(part: &MessagePart, out: &mut Vec<MessagePart>) {
    if part.filename.as_deref().is_some_and(|f| !f.is_empty()) {
        out.push(part.clone());
    }
    if let Some(parts) = &part.parts {
        for nested in parts {
            collect_named_parts(nested, out);
        }
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn search(&self, query: &str) -> Result<Vec<String>> {
        GmailClient::search(self, query).await
    }

    async fn fetch_attachments(&self, msg_id: &str, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        GmailClient::fetch_attachments(self, msg_id, dest_dir).await
    }
}
