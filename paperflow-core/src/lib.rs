//! # Paperflow Core
//!
//! Core library for the Paperflow examination middleware, which bridges
//! bulk-scanned answer papers with a Moodle-compatible LMS.
//!
//! ## Overview
//!
//! - **Ingestion & identity**: filename parsing, magic-byte validation,
//!   content hashing and idempotent deduplication
//! - **Storage**: dual-backed persistence (local disk + database blob)
//!   with automatic read failover
//! - **Extraction**: remote AI metadata inference with filename fallback
//! - **LMS client**: the multi-step Moodle submission conversation
//! - **Submission orchestration**: state machine, retry queue, audit trail
//! - **Auth**: staff bearer tokens and encrypted student LMS sessions

pub mod auth;
pub mod database;
pub mod error;
pub mod extraction;
pub mod identity;
pub mod lms;
pub mod model;
pub mod notify;
pub mod storage;
pub mod submission;

pub use error::{CoreError, Result};

/// Embedded versioned migrations, applied at boot under sqlx's advisory
/// migration lock. Boot is read-only once migrations are current.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
