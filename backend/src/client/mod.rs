//! Remote LMS API client.
//!
//! The pipeline only talks to the backend through the [`LmsApi`] trait, so
//! the coordinator can be driven by the HTTP client in production and by an
//! in-memory fake in tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rosterload::client::{load_context, HttpLmsClient};
//!
//! let client = HttpLmsClient::from_env()?;
//! let context = load_context(&client, 1000).await?;
//! ```

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::logs::{log_info, log_success};
use crate::config::ImportConfig;
use crate::error::{ApiError, ApiResult, ConfigError};
use crate::models::{
    BulkCreateResponse, Course, CreatedUser, NewMessage, NewUser, UserId, UserSummary,
};
use crate::validation::ValidationContext;

/// External operations consumed by the import pipeline.
#[async_trait]
pub trait LmsApi: Send + Sync {
    /// Create one user account.
    async fn create_user(&self, user: &NewUser) -> ApiResult<CreatedUser>;

    /// Create many users from a CSV payload in one request.
    async fn bulk_create_users(&self, csv: Vec<u8>) -> ApiResult<BulkCreateResponse>;

    /// Enroll a user in a course.
    async fn enroll_user_in_course(&self, course_id: &str, user_id: &UserId) -> ApiResult<()>;

    /// Send an in-platform message.
    async fn send_message(&self, message: &NewMessage) -> ApiResult<()>;

    /// All known courses.
    async fn list_courses(&self) -> ApiResult<Vec<Course>>;

    /// Existing users, first page of `page_size`.
    async fn list_users(&self, page_size: u32) -> ApiResult<Vec<UserSummary>>;
}

/// Fetch the reference data validation needs: existing emails and course ids.
pub async fn load_context<C: LmsApi + ?Sized>(client: &C, page_size: u32) -> ApiResult<ValidationContext> {
    log_info("Loading courses and existing users...");
    let courses = client.list_courses().await?;
    let users = client.list_users(page_size).await?;
    log_success(format!(
        "{} courses, {} existing users",
        courses.len(),
        users.len()
    ));

    Ok(ValidationContext::new(
        users.iter().map(|u| u.email.as_str()),
        courses.into_iter().map(|c| c.id),
    ))
}

/// List bodies come either bare or paginated as `{ "results": [...] }`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Page { results: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Page { results } => results,
            Listing::Bare(items) => items,
        }
    }
}

/// HTTP implementation of [`LmsApi`].
#[derive(Clone)]
pub struct HttpLmsClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpLmsClient {
    /// Create a client for an API base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Create a client from the environment (`ROSTERLOAD_API_URL`, `ROSTERLOAD_API_TOKEN`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::from_config(&ImportConfig::from_env()?))
    }

    pub fn from_config(config: &ImportConfig) -> Self {
        let client = Self::new(config.api_url.clone());
        match config.api_token {
            Some(ref token) => client.with_token(token),
            None => client,
        }
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let request = match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| {
            if text.trim().is_empty() {
                Value::Null
            } else {
                json!({ "error": text.trim() })
            }
        });
        Err(ApiError::Rejected { status: status.as_u16(), body })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LmsApi for HttpLmsClient {
    async fn create_user(&self, user: &NewUser) -> ApiResult<CreatedUser> {
        let request = self.http.post(self.url("/users/api/register/")).json(user);
        let response = self.send(request).await?;
        Self::read_json(response).await
    }

    async fn bulk_create_users(&self, csv: Vec<u8>) -> ApiResult<BulkCreateResponse> {
        let part = Part::bytes(csv)
            .file_name("users.csv")
            .mime_str("text/csv")?;
        let form = Form::new().part("file", part);

        let request = self
            .http
            .post(self.url("/users/api/users/bulk_upload/"))
            .multipart(form);
        let response = self.send(request).await?;
        Self::read_json(response).await
    }

    async fn enroll_user_in_course(&self, course_id: &str, user_id: &UserId) -> ApiResult<()> {
        let request = self
            .http
            .post(self.url(&format!("/courses/enrollments/course/{}/", course_id)))
            .json(&json!({ "user_id": user_id }));
        self.send(request).await?;
        Ok(())
    }

    async fn send_message(&self, message: &NewMessage) -> ApiResult<()> {
        let request = self.http.post(self.url("/messaging/api/messages/")).json(message);
        self.send(request).await?;
        Ok(())
    }

    async fn list_courses(&self) -> ApiResult<Vec<Course>> {
        let response = self.send(self.http.get(self.url("/courses/courses/"))).await?;
        Ok(Self::read_json::<Listing<Course>>(response).await?.into_vec())
    }

    async fn list_users(&self, page_size: u32) -> ApiResult<Vec<UserSummary>> {
        let request = self
            .http
            .get(self.url("/users/api/users/"))
            .query(&[("page_size", page_size)]);
        let response = self.send(request).await?;
        Ok(Self::read_json::<Listing<UserSummary>>(response).await?.into_vec())
    }
}
