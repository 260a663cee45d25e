//! Ingestion of binary streamer reports from field devices.
//!
//! Raw report bytes are decoded by [`report`], timestamped by [`clock`],
//! sequenced by [`ingest`], deduplicated by [`dedup`] and written through the
//! collaborators in [`store`]. [`worker`] ties the stages together behind a
//! task queue, and [`retry`] bounds how long a deferred range may wait.

pub mod clock;
pub mod config;
pub mod dedup;
pub mod ids;
pub mod ingest;
pub mod report;
pub mod retry;
pub mod store;
pub mod worker;
