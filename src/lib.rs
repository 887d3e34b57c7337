//! benchd: a distributed benchmark-execution service.
//!
//! Jobs are submitted onto an ordered stream with their authoritative
//! records in a revisioned KV; workers claim them, run the referenced
//! benchmarks, and upload artifacts; the report engine renders comparative
//! HTML over any set of completed jobs.

pub mod bench;
pub mod broker;
pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod reports;
pub mod shutdown;
pub mod web;
pub mod worker;
