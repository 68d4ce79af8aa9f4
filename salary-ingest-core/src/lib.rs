#![doc = "salary-ingest-core: core logic library for salary-ingest."]

//! This crate contains the file ingestion pipeline: tabular readers, the
//! salary filter, local file lifecycle, the directory monitor and the soft
//! object storage gateway. The S3 transport and the CLI live in the
//! `salary-ingest` crate.
//!
//! # Usage
//! Build a [`storage::StorageGateway`] over any [`contract::ObjectStore`],
//! wrap it in a [`pipeline::DataPipeline`], and either call
//! `process_file` directly or hand the pipeline to a
//! [`monitor::DirectoryMonitor`].

pub mod config;
pub mod contract;
pub mod lifecycle;
#[cfg(any(test, feature = "test-export-mocks"))]
pub mod memory_store;
pub mod monitor;
pub mod pipeline;
pub mod reader;
pub mod result_log;
pub mod salary_filter;
pub mod storage;
pub mod table;
