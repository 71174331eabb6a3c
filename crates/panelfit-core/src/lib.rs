pub mod artifact;
pub mod builder;
pub mod config;
pub mod derive;
pub mod error;
pub mod ingestion;
pub mod types;
pub mod variants;
