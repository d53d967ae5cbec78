//! In-process collaborators.
//!
//! `StubStudio` answers every collaborator trait deterministically, records
//! each call, and can be told to fail, panic or wait on upcoming calls.
//! Tests use it to drive the pipeline and worker; the binary uses it in stub
//! mode.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{
    ArtifactKind, AssemblyPage, CollaboratorError, GeneratedImage, Illustrator, ObjectStore,
    PageContext, PdfAssembler, Story, StoryGenerator, StoryPage,
};
use crate::domain::BookParams;

/// A collaborator call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubStep {
    Story,
    Reference,
    Page,
    Assemble,
    Upload,
}

impl StubStep {
    fn name(self) -> &'static str {
        match self {
            StubStep::Story => "story generation",
            StubStep::Reference => "reference illustration",
            StubStep::Page => "page illustration",
            StubStep::Assemble => "pdf assembly",
            StubStep::Upload => "upload",
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubCall {
    Story {
        child_name: String,
    },
    Reference {
        child_name: String,
    },
    Page {
        book_id: String,
        page_number: u32,
        reference_url: String,
        previous_url: Option<String>,
    },
    Assemble {
        title: String,
        pages: Vec<u32>,
    },
    Upload {
        book_id: String,
        bytes: usize,
    },
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Pass,
    Error,
    Panic,
}

/// Holds calls of one step until opened. See [`StubStudio::hold`].
#[derive(Clone)]
pub struct StubGate(Arc<Semaphore>);

impl StubGate {
    /// Releases every held call and lets later calls through.
    pub fn open(&self) {
        self.0.close();
    }
}

#[derive(Default)]
struct StudioState {
    calls: Vec<StubCall>,
    faults: HashMap<StubStep, Vec<Fault>>,
    gates: HashMap<StubStep, Arc<Semaphore>>,
    uploads: HashMap<String, Vec<u8>>,
    sequence: u64,
}

#[derive(Default)]
pub struct StubStudio {
    state: Mutex<StudioState>,
}

impl StubStudio {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StudioState> {
        // Every write leaves the state consistent, so a poisoned lock is usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes the next `times` calls of `step` return an error.
    pub fn fail_next(&self, step: StubStep, times: usize) {
        let mut state = self.state();
        let queue = state.faults.entry(step).or_default();
        queue.extend(std::iter::repeat(Fault::Error).take(times));
    }

    /// Lets `successes` calls of `step` through, then fails the next one.
    pub fn fail_after(&self, step: StubStep, successes: usize) {
        let mut state = self.state();
        let queue = state.faults.entry(step).or_default();
        queue.extend(std::iter::repeat(Fault::Pass).take(successes));
        queue.push(Fault::Error);
    }

    /// Makes the next call of `step` panic.
    pub fn panic_next(&self, step: StubStep) {
        self.state()
            .faults
            .entry(step)
            .or_default()
            .push(Fault::Panic);
    }

    /// Makes calls of `step` wait, after being recorded, until the returned
    /// gate is opened. Assembly is synchronous and never waits.
    pub fn hold(&self, step: StubStep) -> StubGate {
        let gate = Arc::new(Semaphore::new(0));
        self.state().gates.insert(step, Arc::clone(&gate));
        StubGate(gate)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StubCall> {
        self.state().calls.clone()
    }

    /// Number of calls made for `step`.
    pub fn call_count(&self, step: StubStep) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call_step(call) == step)
            .count()
    }

    /// Bytes uploaded for a book, if any.
    pub fn uploaded(&self, book_id: &str) -> Option<Vec<u8>> {
        self.state().uploads.get(book_id).cloned()
    }

    /// Records the call, then applies any pending fault for its step.
    fn enter(&self, call: StubCall) -> Result<u64, CollaboratorError> {
        let step = call_step(&call);
        let (fault, sequence) = {
            let mut state = self.state();
            state.calls.push(call);
            state.sequence += 1;
            let fault = match state.faults.get_mut(&step) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            };
            (fault, state.sequence)
        };

        match fault {
            Some(Fault::Error) => Err(CollaboratorError::Injected(step.name())),
            Some(Fault::Panic) => panic!("injected panic in {}", step.name()),
            Some(Fault::Pass) | None => Ok(sequence),
        }
    }

    async fn pass_gate(&self, step: StubStep) {
        let gate = self.state().gates.get(&step).cloned();
        if let Some(gate) = gate {
            // No permits are ever added; an open gate is a closed semaphore.
            let _ = gate.acquire().await;
        }
    }
}

fn call_step(call: &StubCall) -> StubStep {
    match call {
        StubCall::Story { .. } => StubStep::Story,
        StubCall::Reference { .. } => StubStep::Reference,
        StubCall::Page { .. } => StubStep::Page,
        StubCall::Assemble { .. } => StubStep::Assemble,
        StubCall::Upload { .. } => StubStep::Upload,
    }
}

#[async_trait]
impl StoryGenerator for StubStudio {
    async fn generate(&self, params: &BookParams) -> Result<Story, CollaboratorError> {
        self.enter(StubCall::Story {
            child_name: params.child_name.clone(),
        })?;
        self.pass_gate(StubStep::Story).await;

        let pages = (1..=params.page_count)
            .map(|number| StoryPage {
                number,
                text: format!(
                    "{} explores the {}, part {} of {}.",
                    params.child_name, params.theme, number, params.page_count
                ),
                scene_hint: format!("{} scene {}", params.theme, number),
            })
            .collect();

        Ok(Story {
            title: format!("{}'s {} Adventure", params.child_name, params.theme),
            pages,
        })
    }
}

#[async_trait]
impl Illustrator for StubStudio {
    async fn generate_reference(
        &self,
        params: &BookParams,
    ) -> Result<GeneratedImage, CollaboratorError> {
        let n = self.enter(StubCall::Reference {
            child_name: params.child_name.clone(),
        })?;
        self.pass_gate(StubStep::Reference).await;
        Ok(GeneratedImage {
            url: format!("stub://reference/{}", n),
        })
    }

    async fn generate_page(
        &self,
        page: &PageContext<'_>,
        reference_url: &str,
        previous_url: Option<&str>,
    ) -> Result<GeneratedImage, CollaboratorError> {
        let n = self.enter(StubCall::Page {
            book_id: page.book_id.to_string(),
            page_number: page.page_number,
            reference_url: reference_url.to_string(),
            previous_url: previous_url.map(str::to_string),
        })?;
        self.pass_gate(StubStep::Page).await;
        Ok(GeneratedImage {
            url: format!("stub://pages/{}/{}?v={}", page.book_id, page.page_number, n),
        })
    }
}

impl PdfAssembler for StubStudio {
    fn assemble(&self, title: &str, pages: &[AssemblyPage]) -> Result<Vec<u8>, CollaboratorError> {
        self.enter(StubCall::Assemble {
            title: title.to_string(),
            pages: pages.iter().map(|p| p.number).collect(),
        })?;
        Ok(format!("%PDF-stub {} ({} pages)", title, pages.len()).into_bytes())
    }
}

#[async_trait]
impl ObjectStore for StubStudio {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        book_id: &str,
        kind: ArtifactKind,
    ) -> Result<String, CollaboratorError> {
        self.enter(StubCall::Upload {
            book_id: book_id.to_string(),
            bytes: bytes.len(),
        })?;
        self.pass_gate(StubStep::Upload).await;
        self.state().uploads.insert(book_id.to_string(), bytes);
        Ok(format!("stub://artifacts/{}/{}", book_id, kind.file_name()))
    }
}
