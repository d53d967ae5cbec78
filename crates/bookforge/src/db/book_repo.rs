//! Book repository: operations on the `books` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::job_repo::{self, JobLease};
use super::page_repo::{self, NewPage};
use super::{Database, DatabaseError};
use crate::domain::{BookParams, BookStatus};

/// A raw book row from the database.
#[derive(Debug, Clone)]
pub struct BookRow {
    pub id: String,
    pub status: BookStatus,
    /// JSON-encoded [`BookParams`].
    pub params: String,
    pub title: Option<String>,
    pub reference_url: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BookRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            params: row.get("params")?,
            title: row.get("title")?,
            reference_url: row.get("reference_url")?,
            pdf_url: row.get("pdf_url")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Decodes the stored input parameters.
    pub fn params(&self) -> Result<BookParams, DatabaseError> {
        serde_json::from_str(&self.params).map_err(|e| DatabaseError::InvalidRow {
            column: "params",
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

pub(crate) fn insert_in(conn: &Connection, book: &BookRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO books (id, status, params, title, reference_url, pdf_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            book.id,
            book.status,
            book.params,
            book.title,
            book.reference_url,
            book.pdf_url,
            book.created_at,
            book.updated_at,
        ],
    )?;
    Ok(())
}

/// Inserts a new book row.
pub fn insert(db: &Database, book: &BookRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_in(conn, book))
}

/// Finds a book by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<BookRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM books WHERE id = ?1",
                params![id],
                BookRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub(crate) fn update_status_in(
    conn: &Connection,
    id: &str,
    status: BookStatus,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE books SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status, updated_at],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Book",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Updates only the status and updated_at of a book.
pub fn update_status(
    db: &Database,
    id: &str,
    status: BookStatus,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| update_status_in(conn, id, status, updated_at))
}

/// Sets one of the nullable text columns of the leased job's book, after
/// checking the lease in the same transaction. `column` is always a literal.
fn set_column(
    db: &Database,
    column: &'static str,
    lease: &JobLease,
    value: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_immediate_tx(|tx| {
        let job = job_repo::ensure_held_in(tx, lease)?;
        let changed = tx.execute(
            &format!(
                "UPDATE books SET {} = ?2, updated_at = ?3 WHERE id = ?1",
                column
            ),
            params![job.book_id, value, updated_at],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "Book",
                id: job.book_id,
            });
        }
        Ok(())
    })
}

/// Stores a generated story: the title and all pages, in one transaction.
///
/// A book that already has pages is left untouched and 0 is returned, so
/// re-running the content stage never duplicates pages or swaps the title.
pub fn store_story(
    db: &Database,
    id: &str,
    title: &str,
    pages: &[NewPage],
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_immediate_tx(|tx| {
        let inserted = page_repo::insert_all_in(tx, id, pages)?;
        if inserted > 0 {
            let changed = tx.execute(
                "UPDATE books SET title = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, title, updated_at],
            )?;
            if changed == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "Book",
                    id: id.to_string(),
                });
            }
        }
        Ok(inserted)
    })
}

/// Stores the URL of the character reference image on the leased job's
/// book. Rejected once the lease is lost.
pub fn set_reference_url(
    db: &Database,
    lease: &JobLease,
    url: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    set_column(db, "reference_url", lease, url, updated_at)
}

/// Stores the URL of the uploaded PDF on the leased job's book.
pub fn set_pdf_url(
    db: &Database,
    lease: &JobLease,
    url: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    set_column(db, "pdf_url", lease, url, updated_at)
}
