//! The metadata store collaborator: a relational record of pipeline
//! runs and the resource entries each run consumed.

pub mod sqlite;

pub use sqlite::db::SqliteMetadataStore;
