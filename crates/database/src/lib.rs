//! Query Guard, named-placeholder rewriting, and the pooled PostgreSQL
//! executor behind the `query_database` tool and the `/query` endpoint.

pub mod convert;
pub mod executor;
pub mod guard;
mod lexer;
pub mod placeholders;
pub mod schema;

pub use executor::{PgExecutor, PoolStats, QueryExecutor};
pub use guard::QueryGuard;
pub use schema::DatabaseSchema;
