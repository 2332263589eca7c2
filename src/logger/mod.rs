//! Activity logging: JSONL on a dedicated thread, plus the plain-text status log.

pub mod activity;
pub mod jsonl;
pub mod status_log;
