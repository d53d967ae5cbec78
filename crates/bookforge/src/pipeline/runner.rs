use std::sync::Arc;

use tracing::{debug, info, info_span, Instrument};

use crate::collaborators::{ArtifactKind, AssemblyPage, Collaborators, PageContext};
use crate::config::PageRegeneration;
use crate::db::page_repo::{self, NewPage};
use crate::db::job_repo::JobLease;
use crate::db::{self, book_repo, job_repo, Database};
use crate::domain::JobStatus;

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::StageError;
use super::progress::{ProgressEvent, ProgressReporter};
use super::stage::{page_progress, Stage};

/// Runs the stages of a claimed job.
///
/// Every status or progress write happens before the stage's external work,
/// so the job row always names the last stage attempted. Every write is
/// fenced by the run's [`JobLease`]: if stuck-job recovery took the job away
/// mid-run, even if another worker has claimed it since, the next write fails
/// with [`StageError::Superseded`] and the run stops.
#[derive(Clone)]
pub struct Pipeline {
    db: Database,
    collaborators: Collaborators,
    config: Arc<PipelineConfig>,
}

impl Pipeline {
    pub fn new(db: Database, collaborators: Collaborators, config: Arc<PipelineConfig>) -> Self {
        Self {
            db,
            collaborators,
            config,
        }
    }

    /// Runs every stage of the job held by `lease`, which must have just
    /// been claimed.
    pub async fn run(
        &self,
        lease: &JobLease,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        let span = info_span!(
            "job",
            job_id = %lease.job_id,
            attempt = lease.attempt,
            book_id = tracing::field::Empty
        );
        let result = self.run_stages(lease, progress).instrument(span).await;

        if let Err(ref e) = result {
            progress.report(
                &lease.job_id,
                ProgressEvent::Failed {
                    error: e.to_string(),
                },
            );
        }
        result
    }

    async fn run_stages(
        &self,
        lease: &JobLease,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        let mut ctx = self.load_context(lease)?;
        tracing::Span::current().record("book_id", ctx.book_id.as_str());

        self.step_content(&mut ctx, progress)
            .instrument(info_span!("content"))
            .await?;
        self.step_reference(&mut ctx, progress)
            .instrument(info_span!("reference"))
            .await?;
        self.step_pages(&mut ctx, progress)
            .instrument(info_span!("pages"))
            .await?;
        self.step_assembly(&mut ctx, progress)
            .instrument(info_span!("assembly"))
            .await?;

        job_repo::mark_completed(&self.db, &ctx.lease, &db::now())?;

        let pdf_url = ctx.pdf_url.clone().unwrap_or_default();
        info!(pdf_url = %pdf_url, "Book completed");
        progress.report(&ctx.job_id, ProgressEvent::Completed { pdf_url });
        Ok(())
    }

    fn load_context(&self, lease: &JobLease) -> Result<PipelineContext, StageError> {
        let job = job_repo::find_by_id(&self.db, &lease.job_id)?
            .ok_or_else(|| StageError::JobNotFound(lease.job_id.clone()))?;
        if job.status != JobStatus::GeneratingStory || job.retry_count != lease.attempt {
            return Err(StageError::Superseded {
                job_id: job.id,
                detail: format!("now {}, attempt {}", job.status, job.retry_count),
            });
        }

        let book = book_repo::find_by_id(&self.db, &job.book_id)?
            .ok_or_else(|| StageError::BookNotFound(job.book_id.clone()))?;
        let params = book.params()?;

        let mut ctx = PipelineContext::new(lease.clone(), book.id, params);
        ctx.title = book.title;
        Ok(ctx)
    }

    /// Records the start of a stage: moves the job into the stage's status
    /// (or, when it is already there, checks it still holds it) and raises
    /// progress.
    fn enter_stage(
        &self,
        ctx: &PipelineContext,
        from: JobStatus,
        stage: Stage,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        let now = db::now();
        if from == stage.status() {
            job_repo::update_progress(&self.db, &ctx.lease, from, stage.start_progress(), &now)?;
        } else {
            job_repo::advance(
                &self.db,
                &ctx.lease,
                from,
                stage.status(),
                stage.start_progress(),
                &now,
            )?;
        }

        debug!(stage = %stage, "Entering stage");
        progress.report(
            &ctx.job_id,
            ProgressEvent::Stage {
                stage,
                progress: stage.start_progress(),
            },
        );
        Ok(())
    }

    /// Stage 1: story text. Skipped when the book already has pages, so a
    /// retried job never asks for a new story or duplicates pages.
    pub(crate) async fn step_content(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        self.enter_stage(ctx, JobStatus::GeneratingStory, Stage::Content, progress)?;

        if page_repo::count_for_book(&self.db, &ctx.book_id)? == 0 {
            let story = self.collaborators.story.generate(&ctx.params).await?;
            story
                .validate(ctx.params.page_count)
                .map_err(StageError::InvalidStory)?;

            let title = match story.title.trim() {
                "" => ctx.params.fallback_title(),
                title => title.to_string(),
            };
            let pages: Vec<NewPage> = story
                .pages
                .into_iter()
                .map(|p| NewPage {
                    page_number: p.number,
                    text: p.text,
                    scene_hint: p.scene_hint,
                })
                .collect();

            let inserted =
                book_repo::store_story(&self.db, &ctx.book_id, &title, &pages, &db::now())?;
            if inserted > 0 {
                info!(pages = inserted, title = %title, "Story stored");
                ctx.title = Some(title);
            }
        } else {
            debug!("Pages already exist, skipping story generation");
        }

        ctx.pages = page_repo::list_for_book(&self.db, &ctx.book_id)?;
        if ctx.pages.is_empty() {
            return Err(StageError::NoPages);
        }
        Ok(())
    }

    /// Stage 2: character reference image.
    pub(crate) async fn step_reference(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        self.enter_stage(ctx, JobStatus::GeneratingStory, Stage::Reference, progress)?;

        let image = self
            .collaborators
            .illustrator
            .generate_reference(&ctx.params)
            .await?;
        book_repo::set_reference_url(&self.db, &ctx.lease, &image.url, &db::now())?;
        ctx.reference_url = Some(image.url);
        Ok(())
    }

    /// Stage 3: one illustration per page, strictly in page order. Each page
    /// is seeded with the reference image and the previous page's image.
    pub(crate) async fn step_pages(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        self.enter_stage(ctx, JobStatus::GeneratingImages, Stage::Pages, progress)?;

        let reference_url = ctx.reference_url.clone().unwrap_or_default();
        let skip_completed = self.config.page_regeneration == PageRegeneration::SkipCompleted;
        let total = ctx.pages.len() as u32;
        let mut previous_url: Option<String> = None;

        for (index, page) in ctx.pages.iter_mut().enumerate() {
            let done = index as u32 + 1;

            match page.image_url.clone() {
                Some(existing) if skip_completed => {
                    debug!(page = page.page_number, "Keeping existing page image");
                    previous_url = Some(existing);
                }
                _ => {
                    let page_ctx = PageContext {
                        book_id: &ctx.book_id,
                        page_number: page.page_number,
                        text: &page.text,
                        scene_hint: &page.scene_hint,
                        params: &ctx.params,
                    };
                    let image = self
                        .collaborators
                        .illustrator
                        .generate_page(&page_ctx, &reference_url, previous_url.as_deref())
                        .await?;

                    page_repo::set_image_url(&self.db, &ctx.lease, &page.id, &image.url)?;
                    page.image_url = Some(image.url.clone());
                    previous_url = Some(image.url);
                }
            }

            let value = page_progress(done, total);
            job_repo::update_progress(
                &self.db,
                &ctx.lease,
                JobStatus::GeneratingImages,
                value,
                &db::now(),
            )?;
            progress.report(
                &ctx.job_id,
                ProgressEvent::Page {
                    page_number: page.page_number,
                    total,
                    progress: value,
                },
            );
        }
        Ok(())
    }

    /// Stage 4: render the PDF from the stored pages and upload it.
    pub(crate) async fn step_assembly(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), StageError> {
        self.enter_stage(ctx, JobStatus::GeneratingImages, Stage::Assembly, progress)?;

        // Reload: the stored rows are the source of truth, not this run's view.
        let pages = page_repo::list_for_book(&self.db, &ctx.book_id)?;
        if pages.is_empty() {
            return Err(StageError::NoPages);
        }
        let assembly_pages = pages
            .into_iter()
            .map(|p| match p.image_url {
                Some(image_url) => Ok(AssemblyPage {
                    number: p.page_number,
                    text: p.text,
                    image_url,
                }),
                None => Err(StageError::MissingPageImage {
                    page_number: p.page_number,
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let assembler = Arc::clone(&self.collaborators.assembler);
        let title = ctx.title();
        let bytes = tokio::task::spawn_blocking(move || assembler.assemble(&title, &assembly_pages))
            .await
            .map_err(|e| StageError::TaskFailed(e.to_string()))??;

        let url = self
            .collaborators
            .store
            .upload(bytes, &ctx.book_id, ArtifactKind::Pdf)
            .await?;
        book_repo::set_pdf_url(&self.db, &ctx.lease, &url, &db::now())?;
        ctx.pdf_url = Some(url);
        Ok(())
    }
}
