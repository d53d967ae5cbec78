use crate::db::job_repo::JobLease;
use crate::db::page_repo::PageRow;
use crate::domain::BookParams;

/// State carried between the stages of one run.
pub struct PipelineContext {
    pub job_id: String,
    /// The claim this run works under; fences every write.
    pub lease: JobLease,
    pub book_id: String,
    pub params: BookParams,

    // Content stage result; falls back to a title built from the params
    pub title: Option<String>,

    // Pages in page order, refreshed after the content stage
    pub pages: Vec<PageRow>,

    // Reference stage result
    pub reference_url: Option<String>,

    // Assembly stage result
    pub pdf_url: Option<String>,
}

impl PipelineContext {
    pub fn new(lease: JobLease, book_id: String, params: BookParams) -> Self {
        Self {
            job_id: lease.job_id.clone(),
            lease,
            book_id,
            params,
            title: None,
            pages: Vec::new(),
            reference_url: None,
            pdf_url: None,
        }
    }

    pub fn title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => self.params.fallback_title(),
        }
    }
}
