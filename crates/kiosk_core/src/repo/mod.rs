//! Storage port used by the checkout engine and the summary job.
//!
//! # Responsibility
//! - Define the session-oriented storage contract (`Storage`,
//!   `StorageSession`) the core depends on.
//! - Isolate SQL details inside the SQLite adapter (`sqlite`).
//!
//! # Invariants
//! - Every read and write happens inside a session; a session that is dropped
//!   without `commit` rolls back.
//! - `lock_item`/`lock_account` are only valid in `SessionMode::Write` and hold
//!   the row exclusively until the session ends.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

use crate::db::DbError;
use crate::model::{
    Account, AccountId, EntityRef, Item, ItemId, ModelValidationError, NewTransactionRecord,
    TransactionRecord,
};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite;

pub use sqlite::{SqliteSession, SqliteStorage};

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for kiosk persistence operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(EntityRef),
    Validation(ModelValidationError),
    /// Persisted row could not be decoded into the domain model.
    InvalidData(String),
    /// A locking read or a mutation was attempted in a read-only session.
    WriteSessionRequired,
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::WriteSessionRequired => write!(f, "operation requires a write session"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) | Self::WriteSessionRequired => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ModelValidationError> for RepoError {
    fn from(value: ModelValidationError) -> Self {
        Self::Validation(value)
    }
}

/// How a session is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Consistent reads, no locks taken up-front.
    Read,
    /// Locking reads and writes; exclusive locks are released on commit or
    /// rollback.
    Write,
}

/// Factory for storage sessions. Shared across threads by the engine, the
/// summary job and the application context.
pub trait Storage: Send + Sync {
    fn begin(&self, mode: SessionMode) -> RepoResult<Box<dyn StorageSession + '_>>;
}

/// One storage transaction.
pub trait StorageSession {
    fn mode(&self) -> SessionMode;

    fn get_item_by_id(&self, id: ItemId) -> RepoResult<Option<Item>>;
    fn get_item_by_barcode(&self, barcode: &str) -> RepoResult<Option<Item>>;
    fn get_account_by_id(&self, id: AccountId) -> RepoResult<Option<Account>>;
    fn get_account_by_token(&self, token: &str) -> RepoResult<Option<Account>>;

    /// Reads one item and holds an exclusive lock on it (`SELECT ... FOR
    /// UPDATE` semantics).
    fn lock_item(&self, id: ItemId) -> RepoResult<Option<Item>>;
    /// Reads one account and holds an exclusive lock on it.
    fn lock_account(&self, id: AccountId) -> RepoResult<Option<Account>>;

    fn insert_transaction_record(
        &self,
        record: NewTransactionRecord,
    ) -> RepoResult<TransactionRecord>;
    fn update_item_quantity(&self, id: ItemId, quantity: u32) -> RepoResult<()>;
    fn update_account_credit(&self, id: AccountId, credit: Decimal) -> RepoResult<()>;

    /// Records for one account, oldest first.
    fn list_transactions_for_account(&self, id: AccountId) -> RepoResult<Vec<TransactionRecord>>;
    fn list_accounts(&self) -> RepoResult<Vec<Account>>;
    fn list_admins(&self) -> RepoResult<Vec<Account>>;

    fn commit(self: Box<Self>) -> RepoResult<()>;
    fn rollback(self: Box<Self>) -> RepoResult<()>;
}
