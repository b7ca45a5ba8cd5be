//! Resource policy table
//!
//! Ordered pattern-to-strategy rules, evaluated first-match-wins.

mod matcher;
mod rule;
mod table;

pub use matcher::PathPattern;
pub use rule::{ParseStrategyError, ResourceRule, StrategyKind};
pub use table::PolicyTable;
