//! Reconciles a streaming service's listening history against a local ledger
//! and scrobbles what is new or replayed to Last.fm or Libre.fm.

pub mod config;
pub mod failure;
pub mod history;
pub mod ledger;
pub mod normalize;
pub mod notify;
pub mod played_at;
pub mod reconcile;
pub mod service;
pub mod session;
pub mod timestamp;
