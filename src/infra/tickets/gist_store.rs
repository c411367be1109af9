// GitHub Gist implementation of the shared ticket document.
//
// The gist holds one JSON file containing the whole TicketDocument. GitHub
// offers no server-side compare-and-swap for gist edits, so the conditional
// write re-reads the remote document and compares the embedded revision
// counter before patching. Together with the service's in-process write mutex
// (this bot is the document's only writer in a normal deployment) this gives
// the application-level lock-plus-revision-tag discipline the design calls
// for; a concurrent writer from another deployment surfaces as a
// RevisionConflict instead of a silent lost update.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::TicketConfig;
use crate::core::tickets::{TicketDocument, TicketError, TicketStore};

pub struct GistTicketStore {
    client: Client,
    base_url: String,
    gist_id: String,
    filename: String,
}

impl GistTicketStore {
    pub fn new(config: &TicketConfig, timeout: Duration) -> Result<Self, TicketError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Accept",
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("User-Agent", HeaderValue::from_static("CommunityBot/1.0"));
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", config.github_token))
                .map_err(|e| TicketError::Remote(e.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TicketError::Remote(e.to_string()))?;

        Ok(Self {
            client,
            base_url: "https://api.github.com".to_string(),
            gist_id: config.gist_id.clone(),
            filename: config.gist_filename.clone(),
        })
    }

    async fn fetch_document(&self) -> Result<TicketDocument, TicketError> {
        let url = format!("{}/gists/{}", self.base_url, self.gist_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TicketError::Remote(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(TicketError::Remote(format!(
                "Gist {} not found",
                self.gist_id
            )));
        }
        if !resp.status().is_success() {
            return Err(TicketError::Remote(format!(
                "GitHub API error: {}",
                resp.status()
            )));
        }

        let gist: ApiGist = resp
            .json()
            .await
            .map_err(|e| TicketError::Remote(e.to_string()))?;

        let content = gist
            .files
            .get(&self.filename)
            .and_then(|f| f.content.as_deref())
            .unwrap_or("");

        Ok(parse_document(content))
    }
}

/// A missing, empty or unparseable file yields the empty document so a fresh
/// gist bootstraps itself on the first write.
fn parse_document(content: &str) -> TicketDocument {
    if content.trim().is_empty() {
        return TicketDocument::empty(Utc::now());
    }
    match serde_json::from_str(content) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("Ticket document is not valid JSON, starting empty: {}", e);
            TicketDocument::empty(Utc::now())
        }
    }
}

#[async_trait]
impl TicketStore for GistTicketStore {
    async fn load(&self) -> Result<TicketDocument, TicketError> {
        self.fetch_document().await
    }

    async fn store(
        &self,
        doc: &TicketDocument,
        expected_revision: u64,
    ) -> Result<(), TicketError> {
        // Application-level revision check before the overwrite.
        let current = self.fetch_document().await?;
        if current.revision != expected_revision {
            return Err(TicketError::RevisionConflict);
        }

        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| TicketError::Remote(e.to_string()))?;

        let mut files = serde_json::Map::new();
        files.insert(
            self.filename.clone(),
            serde_json::json!({ "content": content }),
        );
        let body = serde_json::json!({ "files": files });

        let url = format!("{}/gists/{}", self.base_url, self.gist_id);
        let resp = self
            .client
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TicketError::Remote(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(TicketError::Remote(format!(
                "Gist update failed: {}",
                resp.status()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiGist {
    #[serde(default)]
    files: HashMap<String, ApiGistFile>,
}

#[derive(Debug, Deserialize)]
struct ApiGistFile {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tickets::{TicketKind, TicketRecord, TicketStatus};
    use chrono::TimeZone;

    #[test]
    fn empty_or_garbage_content_yields_the_empty_document() {
        assert!(parse_document("").tickets.is_empty());
        assert_eq!(parse_document("   ").revision, 0);
        assert!(parse_document("not json at all").tickets.is_empty());
    }

    #[test]
    fn stored_documents_parse_back() {
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut doc = TicketDocument::empty(created);
        doc.revision = 3;
        doc.tickets.push(TicketRecord {
            ticket_id: "000123".into(),
            user_id: 1,
            username: "alice".into(),
            channel_id: 100,
            kind: TicketKind::Bug,
            description: "help".into(),
            created_at: created,
            status: TicketStatus::Open,
            guild_id: 10,
            closed_at: None,
            closed_by: None,
        });

        let json = serde_json::to_string_pretty(&doc).unwrap();
        let parsed = parse_document(&json);
        assert_eq!(parsed.revision, 3);
        assert_eq!(parsed.tickets.len(), 1);
        assert_eq!(parsed.tickets[0].status, TicketStatus::Open);
    }

    #[test]
    fn gist_payloads_deserialize() {
        let raw = r#"
        {
            "id": "abc",
            "files": {
                "community-tickets.json": {
                    "filename": "community-tickets.json",
                    "content": "{\"tickets\":[],\"last_updated\":\"2024-05-01T12:00:00Z\",\"revision\":9}"
                }
            }
        }
        "#;
        let gist: ApiGist = serde_json::from_str(raw).unwrap();
        let content = gist
            .files
            .get("community-tickets.json")
            .and_then(|f| f.content.as_deref())
            .unwrap();
        assert_eq!(parse_document(content).revision, 9);
    }
}
