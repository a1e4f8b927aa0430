//! Search layer facade.
//!
//! - **[`tantivy`]**: index schema, document mapping and the write protocol.
//! - **[`query`]**: query parsing, sort fields, paging and browse terms.

pub mod query;
pub mod tantivy;
