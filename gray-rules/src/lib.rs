//! In-memory resolution of gray release rules.
//!
//! Rule rows are read from a [`source::RuleRecordSource`] by a periodic full
//! [`scanner::Scanner`] pass and by the [`change_handler::ChangeHandler`] whenever a
//! release changes. Both feed the [`store::RuleCacheStore`], which answers
//! [`matcher::Matcher`] queries without blocking on either writer.

pub mod admin_client;
pub mod change_handler;
pub mod config;
pub mod engine;
pub mod matcher;
pub mod metrics_defs;
mod multimap;
pub mod notifier;
pub mod scanner;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

pub use engine::GrayReleaseEngine;
pub use matcher::Matcher;
pub use store::RuleCacheStore;
pub use types::{BranchStatus, GrayReleaseRule, ReleaseId, RuleId, RuleItem, Target};
