// Firestore-backed implementation of the remote link-token store.
//
// Authentication follows the Google service-account OAuth2 flow: an RS256 JWT
// assertion is exchanged for a short-lived bearer token, which we cache until
// shortly before expiry.
//
// The token consume is a single Firestore `commit` carrying three writes:
//   1. token document update, predicated on the updateTime we read
//   2. link document create, predicated on the document not existing
//   3. array-append of the account id onto the reward mailbox list
// A commit is applied atomically or not at all, and the updateTime
// precondition guarantees that of two concurrent consumers exactly one wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::LinkingConfig;
use crate::core::linking::{LinkError, LinkRecord, LinkToken, LinkTokenStore};

// =============================================================================
// SERVICE ACCOUNT AUTHENTICATION
// =============================================================================

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    /// The service account email (used as issuer in JWT).
    client_email: String,

    /// The private key in PEM format.
    private_key: String,

    /// The token URI (where to exchange JWT for an access token).
    token_uri: String,
}

/// JWT claims for Google OAuth2.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Cached access token with expiration.
struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Authenticator that handles OAuth2 with service account credentials.
pub struct ServiceAccountAuth {
    credentials: ServiceAccountCredentials,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl ServiceAccountAuth {
    pub async fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)?;
        // The token endpoint is a remote call too; keep it bounded.
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            credentials,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Key material from `GOOGLE_SERVICE_ACCOUNT_KEY` (file path),
    /// `GOOGLE_SERVICE_ACCOUNT_JSON` (raw JSON), or
    /// `GOOGLE_SERVICE_ACCOUNT_JSON_B64` (base64, for env-only deployments).
    pub async fn from_env() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            return Self::from_file(&path).await;
        }

        if let Ok(json) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            return Self::from_json(&json);
        }

        if let Ok(encoded) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON_B64") {
            let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
            return Self::from_json(std::str::from_utf8(&decoded)?);
        }

        anyhow::bail!(
            "None of GOOGLE_SERVICE_ACCOUNT_KEY, GOOGLE_SERVICE_ACCOUNT_JSON or \
             GOOGLE_SERVICE_ACCOUNT_JSON_B64 is set"
        )
    }

    /// Gets a valid access token, refreshing if necessary.
    async fn get_access_token(&self) -> Result<String, LinkError> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > SystemTime::now() + Duration::from_secs(60) {
                    return Ok(token.token.clone());
                }
            }
        }

        let new_token = self.fetch_new_token().await?;

        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(CachedToken {
                token: new_token.clone(),
                expires_at: SystemTime::now() + Duration::from_secs(55 * 60),
            });
        }

        Ok(new_token)
    }

    async fn fetch_new_token(&self) -> Result<String, LinkError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| LinkError::Remote(e.to_string()))?
            .as_secs();

        let claims = JwtClaims {
            iss: self.credentials.client_email.clone(),
            scope: "https://www.googleapis.com/auth/datastore".to_string(),
            aud: self.credentials.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| LinkError::Remote(format!("Invalid service account key: {}", e)))?;
        let jwt =
            encode(&header, &claims, &key).map_err(|e| LinkError::Remote(e.to_string()))?;

        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .map_err(|e| LinkError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LinkError::Remote(format!(
                "Token exchange failed ({}): {}",
                status, text
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| LinkError::Remote(e.to_string()))?;
        Ok(token_response.access_token)
    }
}

// =============================================================================
// FIRESTORE API STRUCTURES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ApiValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    boolean_value: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp_value: Option<String>,
}

impl ApiValue {
    fn string(value: impl Into<String>) -> Self {
        Self {
            string_value: Some(value.into()),
            ..Default::default()
        }
    }

    fn boolean(value: bool) -> Self {
        Self {
            boolean_value: Some(value),
            ..Default::default()
        }
    }

    fn timestamp(value: DateTime<Utc>) -> Self {
        Self {
            timestamp_value: Some(value.to_rfc3339()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    fields: HashMap<String, ApiValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    update_time: Option<String>,
}

impl ApiDocument {
    fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.string_value.as_deref())
    }

    fn timestamp_field(&self, name: &str) -> Option<DateTime<Utc>> {
        self.fields
            .get(name)
            .and_then(|v| v.timestamp_value.as_deref())
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Deserialize)]
struct ApiQueryResult {
    document: Option<ApiDocument>,
}

// =============================================================================
// FIRESTORE LINK STORE
// =============================================================================

pub struct FirestoreLinkStore {
    client: Client,
    auth: ServiceAccountAuth,
    base_url: String,
    config: LinkingConfig,
}

impl FirestoreLinkStore {
    pub fn new(
        auth: ServiceAccountAuth,
        config: LinkingConfig,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            auth,
            base_url: "https://firestore.googleapis.com/v1".to_string(),
            config,
        })
    }

    /// `projects/{p}/databases/(default)/documents`
    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/(default)/documents",
            self.config.project_id
        )
    }

    fn doc_name(&self, relative: &str) -> String {
        format!("{}/{}", self.documents_root(), relative)
    }

    fn document_to_link(&self, doc: &ApiDocument) -> Option<LinkRecord> {
        Some(LinkRecord {
            discord_id: doc.str_field("discord_id")?.parse().ok()?,
            account_id: doc.str_field("account_id")?.to_string(),
            guild_id: doc
                .str_field("guild_id")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            linked_at: doc.timestamp_field("linked_at").unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LinkTokenStore for FirestoreLinkStore {
    async fn find_unused_token(&self, token: &str) -> Result<Option<LinkToken>, LinkError> {
        let access_token = self.auth.get_access_token().await?;

        let query = serde_json::json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.config.tokens_collection }],
                "where": {
                    "compositeFilter": {
                        "op": "AND",
                        "filters": [
                            {
                                "fieldFilter": {
                                    "field": { "fieldPath": "token" },
                                    "op": "EQUAL",
                                    "value": { "stringValue": token }
                                }
                            },
                            {
                                "fieldFilter": {
                                    "field": { "fieldPath": "used" },
                                    "op": "EQUAL",
                                    "value": { "booleanValue": false }
                                }
                            }
                        ]
                    }
                },
                "limit": 1
            }
        });

        let url = format!("{}/{}:runQuery", self.base_url, self.documents_root());
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .json(&query)
            .send()
            .await
            .map_err(|e| LinkError::Remote(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LinkError::Remote(format!(
                "Token query failed: {}",
                resp.status()
            )));
        }

        let results: Vec<ApiQueryResult> = resp
            .json()
            .await
            .map_err(|e| LinkError::Remote(e.to_string()))?;

        Ok(results.into_iter().filter_map(|r| r.document).find_map(|doc| {
            let name = doc.name.clone()?;
            let update_time = doc.update_time.clone()?;
            Some(LinkToken {
                doc_name: name,
                token: doc.str_field("token")?.to_string(),
                account_id: doc.str_field("account_id")?.to_string(),
                update_time,
            })
        }))
    }

    async fn get_link(&self, discord_id: u64) -> Result<Option<LinkRecord>, LinkError> {
        let access_token = self.auth.get_access_token().await?;

        let url = format!(
            "{}/{}",
            self.base_url,
            self.doc_name(&format!("{}/{}", self.config.links_collection, discord_id))
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| LinkError::Remote(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(LinkError::Remote(format!(
                "Link lookup failed: {}",
                resp.status()
            )));
        }

        let doc: ApiDocument = resp
            .json()
            .await
            .map_err(|e| LinkError::Remote(e.to_string()))?;
        Ok(self.document_to_link(&doc))
    }

    async fn consume_token(
        &self,
        token: &LinkToken,
        record: &LinkRecord,
    ) -> Result<(), LinkError> {
        let access_token = self.auth.get_access_token().await?;

        let link_doc = ApiDocument {
            name: Some(self.doc_name(&format!(
                "{}/{}",
                self.config.links_collection, record.discord_id
            ))),
            fields: HashMap::from([
                ("discord_id".into(), ApiValue::string(record.discord_id.to_string())),
                ("account_id".into(), ApiValue::string(&record.account_id)),
                ("guild_id".into(), ApiValue::string(record.guild_id.to_string())),
                ("linked_at".into(), ApiValue::timestamp(record.linked_at)),
            ]),
            update_time: None,
        };

        let body = serde_json::json!({
            "writes": [
                // 1. Mark the token consumed; fails if anyone touched the
                //    document since we read it.
                {
                    "update": {
                        "name": token.doc_name,
                        "fields": {
                            "used": ApiValue::boolean(true),
                            "consumed_by": ApiValue::string(record.discord_id.to_string()),
                            "consumed_at": ApiValue::timestamp(record.linked_at),
                        }
                    },
                    "updateMask": { "fieldPaths": ["used", "consumed_by", "consumed_at"] },
                    "currentDocument": { "updateTime": token.update_time }
                },
                // 2. Create the link document; fails if this Discord id is
                //    already linked.
                {
                    "update": link_doc,
                    "currentDocument": { "exists": false }
                },
                // 3. Reward side effect: append the account to the mailbox
                //    recipient list.
                {
                    "transform": {
                        "document": self.doc_name(&self.config.mailbox_document),
                        "fieldTransforms": [
                            {
                                "fieldPath": "recipients",
                                "appendMissingElements": {
                                    "values": [{ "stringValue": record.account_id }]
                                }
                            }
                        ]
                    }
                }
            ]
        });

        let url = format!(
            "{}/projects/{}/databases/(default)/documents:commit",
            self.base_url, self.config.project_id
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| LinkError::Remote(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        // A failed precondition means one of the guarded writes lost a race.
        // The already-linked case is pre-checked by the service, so in
        // practice this is the token document having moved.
        if status == StatusCode::CONFLICT
            || (status == StatusCode::BAD_REQUEST && text.contains("FAILED_PRECONDITION"))
            || text.contains("FAILED_PRECONDITION")
        {
            tracing::debug!("Link commit lost a precondition race: {}", text);
            return Err(LinkError::TokenConflict);
        }

        Err(LinkError::Remote(format!(
            "Link commit failed ({}): {}",
            status, text
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_values_serialize_sparsely() {
        let value = ApiValue::string("hello");
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"stringValue":"hello"}"#);

        let value = ApiValue::boolean(false);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"booleanValue":false}"#);
    }

    #[test]
    fn documents_parse_fields_and_update_time() {
        let raw = r#"
        {
            "name": "projects/p/databases/(default)/documents/link_tokens/abc",
            "fields": {
                "token": { "stringValue": "ABC123" },
                "used": { "booleanValue": false },
                "account_id": { "stringValue": "steam-77" },
                "consumed_at": { "timestampValue": "2024-05-01T12:00:00Z" }
            },
            "updateTime": "2024-05-01T11:59:00.000000Z"
        }
        "#;

        let doc: ApiDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.str_field("token"), Some("ABC123"));
        assert_eq!(doc.str_field("account_id"), Some("steam-77"));
        assert!(doc.timestamp_field("consumed_at").is_some());
        assert_eq!(doc.update_time.as_deref(), Some("2024-05-01T11:59:00.000000Z"));
    }

    #[test]
    fn link_documents_map_to_records() {
        let raw = r#"
        {
            "name": "projects/p/databases/(default)/documents/account_links/42",
            "fields": {
                "discord_id": { "stringValue": "42" },
                "account_id": { "stringValue": "steam-77" },
                "guild_id": { "stringValue": "10" },
                "linked_at": { "timestampValue": "2024-05-01T12:00:00Z" }
            }
        }
        "#;
        let doc: ApiDocument = serde_json::from_str(raw).unwrap();

        let store_config = LinkingConfig {
            project_id: "p".into(),
            tokens_collection: "link_tokens".into(),
            links_collection: "account_links".into(),
            mailbox_document: "mailboxes/link_rewards".into(),
        };
        let store = FirestoreLinkStore {
            client: Client::new(),
            auth: ServiceAccountAuth::from_json(
                r#"{"client_email":"x@y","private_key":"k","token_uri":"https://t"}"#,
            )
            .unwrap(),
            base_url: "https://firestore.googleapis.com/v1".into(),
            config: store_config,
        };

        let record = store.document_to_link(&doc).unwrap();
        assert_eq!(record.discord_id, 42);
        assert_eq!(record.account_id, "steam-77");
        assert_eq!(record.guild_id, 10);
    }
}
