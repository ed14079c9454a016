//! Integration tests for the crawl orchestration engine
//!
//! These tests use wiremock to stand up mock HTTP servers and exercise
//! discovery and the full job lifecycle end-to-end.

mod discovery_tests;
mod engine_tests;
