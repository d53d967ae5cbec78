use std::fmt;

use crate::domain::JobStatus;

/// Progress once the per-page stage starts.
pub const PAGES_START_PROGRESS: u8 = 35;
/// Progress once every page has an image.
pub const PAGES_END_PROGRESS: u8 = 85;

/// The ordered stages of a book job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Story text and page rows.
    Content,
    /// Character reference image.
    Reference,
    /// One illustration per page.
    Pages,
    /// PDF rendering and upload.
    Assembly,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Content, Stage::Reference, Stage::Pages, Stage::Assembly];

    /// Job status while this stage runs.
    pub fn status(self) -> JobStatus {
        match self {
            Stage::Content => JobStatus::GeneratingStory,
            Stage::Reference | Stage::Pages => JobStatus::GeneratingImages,
            Stage::Assembly => JobStatus::AssemblingPdf,
        }
    }

    /// Progress written when the stage starts.
    pub fn start_progress(self) -> u8 {
        match self {
            Stage::Content => 10,
            Stage::Reference => 30,
            Stage::Pages => PAGES_START_PROGRESS,
            Stage::Assembly => 90,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Content => "content",
            Stage::Reference => "reference",
            Stage::Pages => "pages",
            Stage::Assembly => "assembly",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress after `done` of `total` pages have an image.
pub fn page_progress(done: u32, total: u32) -> u8 {
    if total == 0 {
        return PAGES_END_PROGRESS;
    }
    let span = u32::from(PAGES_END_PROGRESS - PAGES_START_PROGRESS);
    let done = done.min(total);
    PAGES_START_PROGRESS + (span * done / total) as u8
}
