//! Privacy-preserving, two-node analytics pipeline for sites serving both
//! HTTP(S) and the Gemini protocol.
//!
//! The pipeline has three independently invocable phases:
//!
//! - *ingest*: raw access logs → parsed events → filter → day-bucketed
//!   statistics → immutable snapshot files ([`ingest`], [`filter`],
//!   [`stats`], [`store`])
//! - *replicate*: best-effort pull of peer snapshots over HTTPS
//!   ([`replicate`])
//! - *merge*: cross-host, cross-protocol daily views for reporting
//!   ([`merge`], [`report`])
//!
//! Visitor identity never leaves the anonymizer: every IP address is reduced
//! to an irreversible digest before it reaches any other component.

pub mod anonymize;
pub mod config;
pub mod filter;
pub mod ingest;
pub mod merge;
pub mod replicate;
pub mod report;
pub mod stats;
pub mod store;
