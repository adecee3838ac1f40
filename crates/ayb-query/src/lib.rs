pub mod builder;
pub mod error;
pub mod filter;

pub use builder::{ExpandField, ListPlan, QueryBuilder, DEFAULT_PER_PAGE, MAX_PER_PAGE};
pub use error::QueryError;
