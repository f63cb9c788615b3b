//! Generic filter / sort / projection / pagination over a resource table.
//!
//! [`features::ApiFeatures`] turns raw query pairs into a [`features::QuerySpec`];
//! [`sql`] renders that spec, a [`sql::Scope`] and relation expansions into
//! one parameterized statement returning a JSON document per row.

pub mod features;
pub mod schema;
pub mod sql;

pub use features::{ApiFeatures, QuerySpec};
pub use schema::{Column, FieldKind, FilterValue, Relation, ResourceSchema};
pub use sql::Scope;

/// Kind of query a handler is about to run. Resources pick default scopes and
/// relation expansions per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FindMany,
    FindOne,
    UpdateOne,
    DeleteOne,
}
