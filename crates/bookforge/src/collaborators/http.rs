//! HTTP clients for the story and illustration services.
//!
//! Both services take a JSON body and a bearer API key. The story service
//! answers with a [`Story`]; the illustration service answers with
//! `{"url": "..."}` for both the reference image (`POST {endpoint}/reference`)
//! and individual pages (`POST {endpoint}/page`).

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CollaboratorError, GeneratedImage, Illustrator, PageContext, Story, StoryGenerator};
use crate::domain::BookParams;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Error bodies are cut to this many characters before they reach the job row.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_error_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    }
}

fn create_http_client(timeout: Duration) -> Result<Client, CollaboratorError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
        .map_err(|e| CollaboratorError::Client(e.to_string()))
}

/// Shared request plumbing: JSON POST with bearer auth, status check, JSON
/// decode.
struct JsonEndpoint {
    client: Client,
    base_url: String,
    api_key: SecretString,
    service: &'static str,
}

impl JsonEndpoint {
    fn new(
        base_url: String,
        api_key: SecretString,
        timeout: Duration,
        service: &'static str,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: create_http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            service,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, CollaboratorError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let url = self.url(path);
        debug!("POST {} ({})", url, self.service);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Http {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                service: self.service,
                status: status.as_u16(),
                body: truncate_error_body(&body),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse {
                service: self.service,
                reason: e.to_string(),
            })
    }
}

#[derive(Serialize)]
struct StoryRequest<'a> {
    #[serde(flatten)]
    params: &'a BookParams,
}

#[derive(Serialize)]
struct ReferenceRequest<'a> {
    child_name: &'a str,
    child_age: u8,
    art_style: &'a str,
    character_description: Option<&'a str>,
}

#[derive(Serialize)]
struct PageRequest<'a> {
    book_id: &'a str,
    page_number: u32,
    text: &'a str,
    scene_hint: &'a str,
    art_style: &'a str,
    reference_url: &'a str,
    previous_url: Option<&'a str>,
}

/// Story generation over HTTP.
pub struct HttpStoryGenerator {
    endpoint: JsonEndpoint,
}

impl HttpStoryGenerator {
    pub fn new(
        endpoint: String,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, api_key, timeout, "story service")?,
        })
    }
}

#[async_trait]
impl StoryGenerator for HttpStoryGenerator {
    async fn generate(&self, params: &BookParams) -> Result<Story, CollaboratorError> {
        let story: Story = self.endpoint.post("", &StoryRequest { params }).await?;
        story
            .validate(params.page_count)
            .map_err(|reason| CollaboratorError::InvalidResponse {
                service: self.endpoint.service,
                reason,
            })?;
        Ok(story)
    }
}

/// Illustration over HTTP.
pub struct HttpIllustrator {
    endpoint: JsonEndpoint,
}

impl HttpIllustrator {
    pub fn new(
        endpoint: String,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, api_key, timeout, "illustration service")?,
        })
    }

    fn check(&self, image: GeneratedImage) -> Result<GeneratedImage, CollaboratorError> {
        if image.url.trim().is_empty() {
            return Err(CollaboratorError::InvalidResponse {
                service: self.endpoint.service,
                reason: "empty image url".to_string(),
            });
        }
        Ok(image)
    }
}

#[async_trait]
impl Illustrator for HttpIllustrator {
    async fn generate_reference(
        &self,
        params: &BookParams,
    ) -> Result<GeneratedImage, CollaboratorError> {
        let request = ReferenceRequest {
            child_name: &params.child_name,
            child_age: params.child_age,
            art_style: &params.art_style,
            character_description: params.character_description.as_deref(),
        };
        let image = self.endpoint.post("reference", &request).await?;
        self.check(image)
    }

    async fn generate_page(
        &self,
        page: &PageContext<'_>,
        reference_url: &str,
        previous_url: Option<&str>,
    ) -> Result<GeneratedImage, CollaboratorError> {
        let request = PageRequest {
            book_id: page.book_id,
            page_number: page.page_number,
            text: page.text,
            scene_hint: page.scene_hint,
            art_style: &page.params.art_style,
            reference_url,
            previous_url,
        };
        let image = self.endpoint.post("page", &request).await?;
        self.check(image)
    }
}
