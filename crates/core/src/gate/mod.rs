//! Change-approval gate for protected environments.

mod jira;
mod promotion;
mod types;

pub use jira::JiraClient;
pub use promotion::PromotionGate;
pub use types::*;
