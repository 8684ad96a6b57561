#![deny(missing_docs)]

//! Core library for the vector-records service.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// File download, splitting, and chunk ingestion.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Collection metadata and file-task persistence.
pub mod metadata;
/// Qdrant vector store integration.
pub mod qdrant;
/// File-ingestion job queue.
pub mod queue;
/// Record operations orchestrating the external collaborators.
pub mod records;
