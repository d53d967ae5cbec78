//! External services the pipeline delegates to.
//!
//! Each service sits behind a trait so the pipeline can run against real
//! HTTP endpoints, the local filesystem, or the in-process stubs used by
//! tests and by `collaborators.mode = "stub"`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{CollaboratorMode, Config};
use crate::domain::BookParams;
use crate::secrets::SecretError;
use secrecy::{ExposeSecret, SecretString};

pub mod http;
pub mod pdf;
pub mod storage;
pub mod stub;

pub use http::{HttpIllustrator, HttpStoryGenerator};
pub use pdf::LopdfAssembler;
pub use storage::FileSystemStore;
pub use stub::{StubCall, StubGate, StubStep, StubStudio};

/// Errors returned by collaborators. All of them are treated as transient
/// by the worker: the attempt fails and the retry policy decides.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },

    #[error("API key unavailable: {0}")]
    Credentials(#[from] SecretError),

    #[error("PDF assembly failed: {0}")]
    Pdf(String),

    #[error("Failed to write artifact '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact key '{0}'")]
    InvalidKey(String),

    #[error("Injected failure in {0}")]
    Injected(&'static str),
}

/// Generated story text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    #[serde(default)]
    pub title: String,
    pub pages: Vec<StoryPage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPage {
    pub number: u32,
    pub text: String,
    #[serde(default)]
    pub scene_hint: String,
}

impl Story {
    /// Checks that pages are numbered 1..=`expected` with no gaps or
    /// duplicates and carry text. Pages may arrive in any order.
    pub fn validate(&self, expected: u32) -> Result<(), String> {
        if self.pages.len() != expected as usize {
            return Err(format!(
                "expected {} pages, got {}",
                expected,
                self.pages.len()
            ));
        }

        let mut numbers: Vec<u32> = self.pages.iter().map(|p| p.number).collect();
        numbers.sort_unstable();
        if numbers.iter().copied().ne(1..=expected) {
            return Err(format!("page numbers must be 1..={}, got {:?}", expected, numbers));
        }

        if let Some(page) = self.pages.iter().find(|p| p.text.trim().is_empty()) {
            return Err(format!("page {} has no text", page.number));
        }
        Ok(())
    }
}

/// A stored image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
}

/// What the illustrator gets to know about the page it draws.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub book_id: &'a str,
    pub page_number: u32,
    pub text: &'a str,
    pub scene_hint: &'a str,
    pub params: &'a BookParams,
}

/// One page handed to the PDF assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyPage {
    pub number: u32,
    pub text: String,
    pub image_url: String,
}

/// Kinds of artifacts uploaded to the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pdf,
}

impl ArtifactKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "book.pdf",
        }
    }
}

#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate(&self, params: &BookParams) -> Result<Story, CollaboratorError>;
}

#[async_trait]
pub trait Illustrator: Send + Sync {
    /// Draws the main character once per attempt; every page is seeded with it.
    async fn generate_reference(
        &self,
        params: &BookParams,
    ) -> Result<GeneratedImage, CollaboratorError>;

    /// Draws one page, seeded with the reference image and the image of the
    /// page before it.
    async fn generate_page(
        &self,
        page: &PageContext<'_>,
        reference_url: &str,
        previous_url: Option<&str>,
    ) -> Result<GeneratedImage, CollaboratorError>;
}

/// Renders a book into PDF bytes. CPU-bound; the pipeline calls it on the
/// blocking pool.
pub trait PdfAssembler: Send + Sync {
    fn assemble(&self, title: &str, pages: &[AssemblyPage]) -> Result<Vec<u8>, CollaboratorError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` for the book and returns a URL to it. Uploading the
    /// same kind twice for a book overwrites.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        book_id: &str,
        kind: ArtifactKind,
    ) -> Result<String, CollaboratorError>;
}

/// The set of services a pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub story: Arc<dyn StoryGenerator>,
    pub illustrator: Arc<dyn Illustrator>,
    pub assembler: Arc<dyn PdfAssembler>,
    pub store: Arc<dyn ObjectStore>,
}

impl Collaborators {
    /// Builds collaborators from configuration.
    ///
    /// In `http` mode story and illustration go to the configured endpoints.
    /// In `stub` mode they are answered in-process. PDF assembly and storage
    /// are local in both modes.
    pub fn from_config(config: &Config) -> Result<Self, CollaboratorError> {
        let settings = &config.collaborators;
        let assembler: Arc<dyn PdfAssembler> = Arc::new(LopdfAssembler::default());
        let store: Arc<dyn ObjectStore> = Arc::new(FileSystemStore::new(
            crate::secrets::expand_home(&config.storage.output_directory),
        ));

        match settings.mode {
            CollaboratorMode::Http => {
                let api_key = crate::secrets::resolve_secret(
                    settings.api_key.as_deref(),
                    settings.api_key_file.as_deref(),
                    settings.api_key_env_var.as_deref(),
                )?;
                let timeout = std::time::Duration::from_secs(settings.request_timeout_secs);
                let story_endpoint = settings.story_endpoint.clone().unwrap_or_default();
                let illustration_endpoint =
                    settings.illustration_endpoint.clone().unwrap_or_default();

                Ok(Self {
                    story: Arc::new(HttpStoryGenerator::new(
                        story_endpoint,
                        SecretString::from(api_key.expose_secret().to_string()),
                        timeout,
                    )?),
                    illustrator: Arc::new(HttpIllustrator::new(
                        illustration_endpoint,
                        api_key,
                        timeout,
                    )?),
                    assembler,
                    store,
                })
            }
            CollaboratorMode::Stub => {
                log::warn!("Collaborators running in stub mode; generated books are placeholders");
                let studio = Arc::new(StubStudio::new());
                Ok(Self {
                    story: studio.clone(),
                    illustrator: studio,
                    assembler,
                    store,
                })
            }
        }
    }

    /// Every service answered by one stub.
    pub fn stubbed(studio: Arc<StubStudio>) -> Self {
        Self {
            story: studio.clone(),
            illustrator: studio.clone(),
            assembler: studio.clone(),
            store: studio,
        }
    }
}
