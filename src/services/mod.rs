//! Business logic for the ingestion pipeline.
//!
//! The database layer persists rows; these modules own the behavior:
//! credential lifecycle, CRM projection, draft orchestration, and the
//! per-account sync coordination that ties them together.

pub mod credentials;
pub mod drafts;
pub mod projector;
pub mod sync;
