//! Expense Processing Agent
//!
//! Posts approved expenses to the accounting ledger:
//! - Drives a tool-using language model through a bounded decision loop
//! - Matches each expense to exactly one bank transaction, repairing
//!   day/month inversions and recognising restaurant tips
//! - Validates receipts and resolves the tracking jurisdiction
//! - Keeps ledger credentials fresh across workers with optimistic locking
//! - Records every run in a tamper-evident audit trail
//! - Triages bank transactions no expense claimed
//!
//! DECISION LOOP:
//! PROMPT → MODEL TURN → DISPATCH → RESULTS → MODEL TURN ... → CLASSIFY

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod execution;
pub mod integrations;
pub mod jurisdiction;
pub mod llm;
pub mod matching;
pub mod models;
pub mod orphans;
pub mod processor;
pub mod receipt;
pub mod state;
pub mod token;
pub mod tools;

pub use error::{ProcessingError, Result};

// Re-export common types
pub use models::*;
pub use processor::ExpenseProcessor;
