//! C5/C6/C7 — Dynamic CRUD + Query Engine: turns the schema cache into a
//! generic REST surface over every introspected table, with filtering,
//! sorting, field selection, relationship expansion, and an atomic batch
//! endpoint, all run through the same RLS-scoped session as any other
//! table access.

pub mod dynamic;
pub mod error;
pub mod expand;
pub mod handlers;
pub mod response;
pub mod rpc;
pub mod state;
pub mod values;

pub use error::CollectionsError;
pub use response::{BatchResult, ListResponse};
pub use state::CollectionsState;
