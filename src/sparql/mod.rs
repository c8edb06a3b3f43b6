//! Fact source: query rendering and the SPARQL endpoint client.

pub mod client;
pub mod query;

pub use client::{FactSource, SparqlClient, Throttle};
pub use query::QueryBuilder;
