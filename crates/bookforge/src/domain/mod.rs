pub mod book;
pub mod status;

pub use book::{BookParams, MAX_PAGE_COUNT};
pub use status::{BookStatus, JobStatus, ParseStatusError, TransitionError};
