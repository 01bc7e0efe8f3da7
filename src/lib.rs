//! Retriever - promotional-content retrieval and batch analysis pipeline.
//!
//! Searches the web for suspicious promotional posts, crawls the result
//! pages, batches the crawled text into LLM batch-inference jobs, applies
//! the returned analyses, and fans out channel-ingestion tasks for every
//! messenger identifier the analysis detects.

pub mod batch;
pub mod channel;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod models;
pub mod provider;
pub mod queue;
pub mod repository;
pub mod server;
pub mod worker;
