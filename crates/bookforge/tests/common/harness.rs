//! Test harness for isolated worker runs.
//!
//! Each `TestHarness` owns a temporary directory holding a SQLite database
//! file and an artifact directory. Story and illustration calls go to a
//! `StubStudio`; PDF assembly and storage are the real implementations.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use bookforge::collaborators::{Collaborators, FileSystemStore, LopdfAssembler, StubStudio};
use bookforge::config::PageRegeneration;
use bookforge::db::book_repo::{self, BookRow};
use bookforge::db::job_repo::{self, JobRow};
use bookforge::db::page_repo::{self, PageRow};
use bookforge::pipeline::ProgressReporter;
use bookforge::{
    submit_book, BookParams, Database, Pipeline, PipelineConfig, SubmittedBook, Worker,
    WorkerConfig,
};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub db: Database,
    pub studio: Arc<StubStudio>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("bookforge.db");
        let output_dir = temp_dir.path().join("artifacts");
        let db = Database::open(&db_path).expect("Failed to open test database");

        Self {
            temp_dir,
            db_path,
            output_dir,
            db,
            studio: Arc::new(StubStudio::new()),
        }
    }

    /// A second, independent connection to the same database file.
    pub fn open_handle(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open second handle")
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            story: self.studio.clone(),
            illustrator: self.studio.clone(),
            assembler: Arc::new(LopdfAssembler::default()),
            store: Arc::new(FileSystemStore::new(&self.output_dir)),
        }
    }

    pub fn pipeline(&self, page_regeneration: PageRegeneration) -> Pipeline {
        Pipeline::new(
            self.db.clone(),
            self.collaborators(),
            Arc::new(PipelineConfig { page_regeneration }),
        )
    }

    pub fn worker(&self, config: WorkerConfig, progress: Arc<dyn ProgressReporter>) -> Worker {
        Worker::new(
            self.db.clone(),
            self.pipeline(PageRegeneration::AlwaysRedo),
            progress,
            config,
        )
    }

    pub fn submit(&self, params: &BookParams) -> SubmittedBook {
        submit_book(&self.db, params).expect("Failed to submit book")
    }

    pub fn job(&self, job_id: &str) -> JobRow {
        job_repo::find_by_id(&self.db, job_id)
            .expect("Failed to read job")
            .expect("Job not found")
    }

    pub fn book(&self, book_id: &str) -> BookRow {
        book_repo::find_by_id(&self.db, book_id)
            .expect("Failed to read book")
            .expect("Book not found")
    }

    pub fn pages(&self, book_id: &str) -> Vec<PageRow> {
        page_repo::list_for_book(&self.db, book_id).expect("Failed to list pages")
    }

    /// Overwrites fields the worker normally owns, to stage a scenario.
    pub fn force_job(&self, job_id: &str, retry_count: u32, updated_at: &str) {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE jobs SET retry_count = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![job_id, retry_count, updated_at],
                )?;
                Ok(())
            })
            .expect("Failed to stage job");
    }
}
