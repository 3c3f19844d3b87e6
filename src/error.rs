//! Error types for the expense processing agent

use thiserror::Error;

/// Result type alias for expense processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {

    // =============================
    // Missing Inputs
    // =============================

    #[error("Expense not found: {0}")]
    ExpenseNotFound(String),

    #[error("Bank transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Receipt not available: {0}")]
    MissingReceipt(String),

    // =============================
    // Dispatch Errors
    // =============================

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Event board error: {0}")]
    BoardError(String),

    #[error("Receipt storage error: {0}")]
    StorageError(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Credential write conflict: {0}")]
    CredentialConflict(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Date parse error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
