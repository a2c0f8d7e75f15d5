//! SQLite implementation of the metadata store

pub mod db;
