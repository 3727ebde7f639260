//! Producer-facing ingestion queue

pub mod ingestion;

pub use ingestion::{EnqueueOutcome, IngestionQueue, QueueCollaborators};
