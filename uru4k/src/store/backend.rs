//! Remote template backend
//!
//! REST contract:
//!
//! | Operation | Request |
//! |---|---|
//! | store template | `POST {base}/users/{id}/fingerprint` `{template, finger}` |
//! | load template | `GET {base}/users/{id}/fingerprint[?finger=F]` |
//! | load gallery | `GET {base}/templates[?scope=S]` |
//! | log auth event | `POST {base}/log_auth` `{user_id, success, score}` |
//! | create user | `POST {base}/users` `{name, email}` |
//! | list users | `GET {base}/users` |
//! | user fingers | `GET {base}/users/{id}/fingers` |
//!
//! Templates travel base64-encoded.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use uru4k_types::{
    Finger, GalleryEntry, Score, StoredTemplate, Template, UserId, UserSummary,
};

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Remote template persistence
#[async_trait]
pub trait TemplateBackend: Send + Sync {
    async fn store_template(
        &self,
        user_id: UserId,
        finger: Finger,
        template: &Template,
    ) -> Result<()>;

    /// Fails with `TemplateNotFound` when the user has no (matching) template
    async fn fetch_template(&self, user_id: UserId, finger: Option<Finger>)
    -> Result<StoredTemplate>;

    async fn fetch_gallery(&self, scope: Option<&str>) -> Result<Vec<GalleryEntry>>;

    /// `user_id` is `None` when identification matched nobody
    async fn log_auth(&self, user_id: Option<UserId>, success: bool, score: Score) -> Result<()>;

    async fn create_user(&self, name: &str, email: Option<&str>) -> Result<UserId>;

    async fn list_users(&self) -> Result<Vec<UserSummary>>;

    async fn user_fingers(&self, user_id: UserId) -> Result<Vec<Finger>>;
}

#[derive(Debug, Serialize)]
struct TemplateUpload {
    #[serde(with = "base64_bytes")]
    template: Vec<u8>,
    finger: Finger,
}

#[derive(Debug, Deserialize)]
struct TemplateRecord {
    #[serde(with = "base64_bytes")]
    template: Vec<u8>,
    #[serde(default)]
    finger: Finger,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GalleryRecord {
    user_id: UserId,
    user_name: String,
    #[serde(default)]
    user_email: Option<String>,
    #[serde(with = "base64_bytes")]
    template: Vec<u8>,
    #[serde(default)]
    finger: Finger,
}

#[derive(Debug, Serialize)]
struct AuthLog {
    user_id: i32,
    success: bool,
    score: f32,
}

#[derive(Debug, Serialize)]
struct NewUser<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreatedUser {
    id: UserId,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: UserId,
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    finger_count: u32,
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.trim())
            .map_err(|e| serde::de::Error::custom(format!("invalid base64 template: {}", e)))
    }
}

/// [`TemplateBackend`] over HTTP/JSON
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, config: &BackendConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn non-2xx responses into `Error::Backend`
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

#[async_trait]
impl TemplateBackend for HttpBackend {
    async fn store_template(
        &self,
        user_id: UserId,
        finger: Finger,
        template: &Template,
    ) -> Result<()> {
        let body = TemplateUpload {
            template: template.as_bytes().to_vec(),
            finger,
        };

        let response = self
            .http
            .post(self.url(&format!("/users/{}/fingerprint", user_id)))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;

        debug!(%user_id, %finger, bytes = template.len(), "Template stored");
        Ok(())
    }

    async fn fetch_template(
        &self,
        user_id: UserId,
        finger: Option<Finger>,
    ) -> Result<StoredTemplate> {
        let mut request = self
            .http
            .get(self.url(&format!("/users/{}/fingerprint", user_id)));
        if let Some(finger) = finger {
            request = request.query(&[("finger", finger.as_str())]);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::TemplateNotFound { user_id, finger });
        }

        let record: TemplateRecord = Self::check(response).await?.json().await?;
        if record.template.is_empty() {
            return Err(Error::TemplateNotFound { user_id, finger });
        }

        trace!(%user_id, bytes = record.template.len(), "Template fetched");
        Ok(StoredTemplate {
            template: Template::new(record.template),
            finger: record.finger,
            created_at: record.created_at,
        })
    }

    async fn fetch_gallery(&self, scope: Option<&str>) -> Result<Vec<GalleryEntry>> {
        let mut request = self.http.get(self.url("/templates"));
        if let Some(scope) = scope {
            request = request.query(&[("scope", scope)]);
        }

        let records: Vec<GalleryRecord> = Self::check(request.send().await?).await?.json().await?;
        debug!(entries = records.len(), "Gallery fetched");

        Ok(records
            .into_iter()
            .map(|r| GalleryEntry {
                user_id: r.user_id,
                user_name: r.user_name,
                user_email: r.user_email,
                finger: r.finger,
                template: Template::new(r.template),
            })
            .collect())
    }

    async fn log_auth(&self, user_id: Option<UserId>, success: bool, score: Score) -> Result<()> {
        let body = AuthLog {
            user_id: user_id.map_or(-1, UserId::get),
            success,
            score: score.as_normalized(),
        };

        let response = self.http.post(self.url("/log_auth")).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn create_user(&self, name: &str, email: Option<&str>) -> Result<UserId> {
        let response = self
            .http
            .post(self.url("/users"))
            .json(&NewUser { name, email })
            .send()
            .await?;

        let created: CreatedUser = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>> {
        let response = self.http.get(self.url("/users")).send().await?;
        let records: Vec<UserRecord> = Self::check(response).await?.json().await?;

        Ok(records
            .into_iter()
            .map(|r| UserSummary {
                id: r.id,
                name: r.name,
                email: r.email,
                finger_count: r.finger_count,
            })
            .collect())
    }

    async fn user_fingers(&self, user_id: UserId) -> Result<Vec<Finger>> {
        let response = self
            .http
            .get(self.url(&format!("/users/{}/fingers", user_id)))
            .send()
            .await?;

        let names: Vec<String> = Self::check(response).await?.json().await?;
        names
            .iter()
            .map(|name| name.parse::<Finger>().map_err(Error::from))
            .collect()
    }
}
