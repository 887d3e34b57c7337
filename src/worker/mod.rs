//! Worker execution engine.
//!
//! A worker consumes submission pointers from its pool's stream and drives
//! each job through checkout, benchmark execution, artifact upload, and the
//! terminal status transition:
//!
//! 1. Claim a pointer (explicit ack), load the record, skip anything no
//!    longer `Submitted`.
//! 2. CAS `Submitted -> Running`; a revision conflict means another actor
//!    won and the message is simply acked.
//! 3. Materialize the job script in a scratch directory and run it under
//!    `sh`, heartbeating the record while the subprocess runs.
//! 4. Upload results/log/script artifacts and CAS to `Succeeded`/`Failed`.
//!
//! Cancellation is cooperative: a heartbeat hitting a revision conflict
//! reloads the record, and a terminal status there kills the subprocess.
//! The contract is at most one terminal transition per job, enforced by
//! the KV revision, not exactly-once execution.

pub mod executor;
pub mod script;

pub use executor::Worker;
pub use script::render_script;
