//! Integration test suite for cognition-dispatch.
//!
//! These tests run the pipeline through real files: recommendations are
//! compiled into a DAG artifact, packaged, reconciled, and the journal and
//! report are read back from disk.
//!
//! # Test Categories
//!
//! - `compile_pipeline`: DAG compilation, artifact round trip, graph invariants
//! - `dispatch_pipeline`: reconciliation, release, follow-ups, journal and report

mod fixtures;

mod compile_pipeline;
mod dispatch_pipeline;
