//! Page repository: operations on the `pages` table.

use rusqlite::{params, Connection, Row};

use super::job_repo::{self, JobLease};
use super::{Database, DatabaseError};

/// A raw page row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRow {
    pub id: String,
    pub book_id: String,
    pub page_number: u32,
    pub text: String,
    pub scene_hint: String,
    pub image_url: Option<String>,
}

impl PageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            book_id: row.get("book_id")?,
            page_number: row.get("page_number")?,
            text: row.get("text")?,
            scene_hint: row.get("scene_hint")?,
            image_url: row.get("image_url")?,
        })
    }
}

/// Page content to insert.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub page_number: u32,
    pub text: String,
    pub scene_hint: String,
}

pub(crate) fn insert_all_in(
    conn: &Connection,
    book_id: &str,
    pages: &[NewPage],
) -> Result<usize, DatabaseError> {
    let existing: u32 = conn.query_row(
        "SELECT COUNT(*) FROM pages WHERE book_id = ?1",
        params![book_id],
        |r| r.get(0),
    )?;
    if existing > 0 {
        log::debug!(
            "Book {} already has {} pages, skipping insert",
            book_id,
            existing
        );
        return Ok(0);
    }

    let mut stmt = conn.prepare(
        "INSERT INTO pages (id, book_id, page_number, text, scene_hint)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for page in pages {
        stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            book_id,
            page.page_number,
            page.text,
            page.scene_hint,
        ])?;
    }
    Ok(pages.len())
}

/// Inserts all pages of a book, unless the book already has pages.
///
/// Returns the number of rows written (0 when pages already existed).
/// Runs in one immediate transaction: either every page lands or none does.
pub fn insert_all(db: &Database, book_id: &str, pages: &[NewPage]) -> Result<usize, DatabaseError> {
    db.with_immediate_tx(|tx| insert_all_in(tx, book_id, pages))
}

/// Lists the pages of a book in page order.
pub fn list_for_book(db: &Database, book_id: &str) -> Result<Vec<PageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM pages WHERE book_id = ?1 ORDER BY page_number")?;
        let rows = stmt
            .query_map(params![book_id], PageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_for_book(db: &Database, book_id: &str) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE book_id = ?1",
            params![book_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Attaches (or overwrites) the image URL of one page of the leased job's
/// book. The lease is checked in the same transaction, so a run that lost its
/// job cannot overwrite the new attempt's images.
pub fn set_image_url(
    db: &Database,
    lease: &JobLease,
    page_id: &str,
    url: &str,
) -> Result<(), DatabaseError> {
    db.with_immediate_tx(|tx| {
        let job = job_repo::ensure_held_in(tx, lease)?;
        let changed = tx.execute(
            "UPDATE pages SET image_url = ?3 WHERE id = ?1 AND book_id = ?2",
            params![page_id, job.book_id, url],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "Page",
                id: page_id.to_string(),
            });
        }
        Ok(())
    })
}
