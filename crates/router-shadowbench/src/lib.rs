//! Shadow-bench: the always-on comparison run. Every primary step that
//! succeeds is quietly re-run against idle subscription backends and the
//! local model, auto-scored against the primary's output, and folded into
//! a per-model trust score the router can consult when narrowing API
//! model candidates.

pub mod db;
pub mod manager;
pub mod scoring;
pub mod types;

pub use db::ShadowDb;
pub use manager::ShadowBenchManager;
pub use types::{ShadowBenchError, ShadowBenchResult};
