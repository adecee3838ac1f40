pub mod cache;
pub mod error;
pub mod introspect;
pub mod snapshot;
pub mod watcher;

pub use cache::CacheHolder;
pub use error::SchemaError;
pub use snapshot::{
    Column, ForeignKey, Index, JsonType, RelationKind, Relationship, RelationshipKind,
    SchemaSnapshot, Table,
};
