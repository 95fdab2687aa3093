use thiserror::Error;

/// Failures raised by metadata drivers.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The underlying database rejected or failed the query.
    #[error("metadata database error: {0}")]
    Db(#[from] sqlx::Error),
    /// A stored row could not be mapped back into a fragment record.
    #[error("corrupt metadata row: {0}")]
    CorruptRow(String),
}
