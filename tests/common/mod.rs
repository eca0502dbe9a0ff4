//! Common test utilities and infrastructure.
//!
//! This module provides shared fixtures for the top-level integration
//! tests: a tempfile-backed `SqliteStore`, a scripted chain RPC double,
//! and a recording `DomainIndexer`.

pub mod fixtures;
