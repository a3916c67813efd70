//! SQLite adapter for the storage port.
//!
//! # Responsibility
//! - Map `items`, `accounts`, `account_handles` and `transactions` rows to the
//!   domain model.
//! - Turn a `SessionMode` into an explicit SQLite transaction.
//!
//! # Invariants
//! - Write sessions start with `BEGIN IMMEDIATE`, so the database write lock
//!   is held from the first statement; row locks taken inside are therefore
//!   exclusive and the fixed lock order cannot deadlock.
//! - A session that is dropped while still open is rolled back.
//! - Decimals round-trip through canonical TEXT and never through floats.
//! - File databases use one connection per session. In-memory databases share
//!   a single connection, so a thread must finish one session before it
//!   begins the next.

use crate::db::{connect, open_db, open_db_in_memory, DbResult};
use crate::lifecycle::lock_unpoisoned;
use crate::model::{
    Account, AccountId, AccountRole, EntityRef, Item, ItemId, NewAccount, NewItem,
    NewTransactionRecord, TransactionRecord,
};
use crate::repo::{RepoError, RepoResult, SessionMode, Storage, StorageSession};
use log::{debug, warn};
use rusqlite::{params, Connection, Row, ToSql};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const ITEM_COLUMNS: &str = "SELECT id, name, category, price, quantity, barcode FROM items";
const ACCOUNT_COLUMNS: &str = "SELECT id, name, token, role, credit FROM accounts";
const TRANSACTION_COLUMNS: &str =
    "SELECT id, account_id, item_id, occurred_at, quantity, cost, category FROM transactions";

enum Backend {
    File(PathBuf),
    Memory(Mutex<Connection>),
}

/// SQLite-backed `Storage`.
pub struct SqliteStorage {
    backend: Backend,
}

impl SqliteStorage {
    /// Opens (and migrates) a database file. Sessions reconnect on demand.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        drop(open_db(&path)?);
        Ok(Self {
            backend: Backend::File(path),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self {
            backend: Backend::Memory(Mutex::new(open_db_in_memory()?)),
        })
    }

    /// Begins a concrete session; `Storage::begin` boxes the same value.
    pub fn session(&self, mode: SessionMode) -> RepoResult<SqliteSession<'_>> {
        let conn = match &self.backend {
            Backend::File(path) => SessionConnection::Owned(connect(path)?),
            Backend::Memory(conn) => SessionConnection::Shared(lock_unpoisoned(conn)),
        };
        SqliteSession::begin(conn, mode)
    }

    /// Inserts one item. Seeding/admin helper; not used by checkout.
    pub fn insert_item(&self, item: &NewItem) -> RepoResult<Item> {
        item.validate()?;
        let mut session = self.session(SessionMode::Write)?;
        session.conn.execute(
            "INSERT INTO items (name, category, price, quantity, barcode)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                item.name.trim(),
                item.category.trim(),
                item.price.to_string(),
                item.quantity,
                item.barcode.trim(),
            ],
        )?;
        let id = session.conn.last_insert_rowid();
        session.finish("COMMIT;")?;

        Ok(Item {
            id,
            name: item.name.trim().to_string(),
            category: item.category.trim().to_string(),
            price: item.price,
            quantity: item.quantity,
            barcode: item.barcode.trim().to_string(),
        })
    }

    /// Inserts one account together with its notification handles.
    pub fn insert_account(&self, account: &NewAccount) -> RepoResult<Account> {
        account.validate()?;
        let mut session = self.session(SessionMode::Write)?;
        let token = account.token.trim().to_ascii_lowercase();
        session.conn.execute(
            "INSERT INTO accounts (name, token, role, credit)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                account.name.trim(),
                token,
                account.role.as_str(),
                account.credit.to_string(),
            ],
        )?;
        let id = session.conn.last_insert_rowid();
        for (channel, handle) in &account.handles {
            session.conn.execute(
                "INSERT INTO account_handles (account_id, channel, handle)
                 VALUES (?1, ?2, ?3);",
                params![id, channel.trim(), handle.trim()],
            )?;
        }
        session.finish("COMMIT;")?;

        Ok(Account {
            id,
            name: account.name.trim().to_string(),
            token,
            credit: account.credit,
            role: account.role,
            handles: account
                .handles
                .iter()
                .map(|(channel, handle)| (channel.trim().to_string(), handle.trim().to_string()))
                .collect(),
        })
    }
}

impl Storage for SqliteStorage {
    fn begin(&self, mode: SessionMode) -> RepoResult<Box<dyn StorageSession + '_>> {
        Ok(Box::new(self.session(mode)?))
    }
}

enum SessionConnection<'a> {
    Owned(Connection),
    Shared(MutexGuard<'a, Connection>),
}

impl Deref for SessionConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Self::Owned(conn) => conn,
            Self::Shared(guard) => guard,
        }
    }
}

/// One open SQLite transaction.
pub struct SqliteSession<'a> {
    conn: SessionConnection<'a>,
    mode: SessionMode,
    open: bool,
}

impl<'a> SqliteSession<'a> {
    fn begin(conn: SessionConnection<'a>, mode: SessionMode) -> RepoResult<Self> {
        let sql = match mode {
            SessionMode::Read => "BEGIN DEFERRED;",
            SessionMode::Write => "BEGIN IMMEDIATE;",
        };
        conn.execute_batch(sql)?;
        Ok(Self {
            conn,
            mode,
            open: true,
        })
    }

    fn finish(&mut self, sql: &str) -> RepoResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        if let Err(err) = self.conn.execute_batch(sql) {
            // A failed COMMIT leaves the transaction open on the connection.
            if !self.conn.is_autocommit() {
                let _ = self.conn.execute_batch("ROLLBACK;");
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn require_write(&self) -> RepoResult<()> {
        match self.mode {
            SessionMode::Write => Ok(()),
            SessionMode::Read => Err(RepoError::WriteSessionRequired),
        }
    }

    fn fetch_item(&self, filter: &str, value: impl ToSql) -> RepoResult<Option<Item>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{ITEM_COLUMNS} WHERE {filter};"))?;
        let mut rows = stmt.query(params![value])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_item_row(row)?)),
            None => Ok(None),
        }
    }

    fn fetch_accounts(
        &self,
        filter: Option<&str>,
        value: Option<&dyn ToSql>,
    ) -> RepoResult<Vec<Account>> {
        let sql = match filter {
            Some(filter) => format!("{ACCOUNT_COLUMNS} WHERE {filter} ORDER BY id ASC;"),
            None => format!("{ACCOUNT_COLUMNS} ORDER BY id ASC;"),
        };
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = match value {
            Some(value) => stmt.query(params![value])?,
            None => stmt.query([])?,
        };

        let mut accounts = Vec::new();
        while let Some(row) = rows.next()? {
            accounts.push(parse_account_row(row)?);
        }
        drop(rows);
        drop(stmt);

        for account in &mut accounts {
            account.handles = self.load_handles(account.id)?;
        }
        Ok(accounts)
    }

    fn fetch_account(&self, filter: &str, value: &dyn ToSql) -> RepoResult<Option<Account>> {
        Ok(self
            .fetch_accounts(Some(filter), Some(value))?
            .into_iter()
            .next())
    }

    fn load_handles(&self, account_id: AccountId) -> RepoResult<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT channel, handle
             FROM account_handles
             WHERE account_id = ?1
             ORDER BY channel ASC;",
        )?;
        let mut rows = stmt.query([account_id])?;
        let mut handles = BTreeMap::new();
        while let Some(row) = rows.next()? {
            handles.insert(row.get("channel")?, row.get("handle")?);
        }
        Ok(handles)
    }
}

impl StorageSession for SqliteSession<'_> {
    fn mode(&self) -> SessionMode {
        self.mode
    }

    fn get_item_by_id(&self, id: ItemId) -> RepoResult<Option<Item>> {
        self.fetch_item("id = ?1", id)
    }

    fn get_item_by_barcode(&self, barcode: &str) -> RepoResult<Option<Item>> {
        self.fetch_item("barcode = ?1", barcode.trim())
    }

    fn get_account_by_id(&self, id: AccountId) -> RepoResult<Option<Account>> {
        self.fetch_account("id = ?1", &id)
    }

    fn get_account_by_token(&self, token: &str) -> RepoResult<Option<Account>> {
        let token = token.trim().to_ascii_lowercase();
        self.fetch_account("token = ?1", &token)
    }

    fn lock_item(&self, id: ItemId) -> RepoResult<Option<Item>> {
        self.require_write()?;
        self.get_item_by_id(id)
    }

    fn lock_account(&self, id: AccountId) -> RepoResult<Option<Account>> {
        self.require_write()?;
        self.get_account_by_id(id)
    }

    fn insert_transaction_record(
        &self,
        record: NewTransactionRecord,
    ) -> RepoResult<TransactionRecord> {
        self.require_write()?;
        self.conn.execute(
            "INSERT INTO transactions (account_id, item_id, occurred_at, quantity, cost, category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                record.account_id,
                record.item_id,
                record.occurred_at,
                record.quantity,
                record.cost.to_string(),
                record.category,
            ],
        )?;
        Ok(record.into_record(self.conn.last_insert_rowid()))
    }

    fn update_item_quantity(&self, id: ItemId, quantity: u32) -> RepoResult<()> {
        self.require_write()?;
        let changed = self.conn.execute(
            "UPDATE items SET quantity = ?2 WHERE id = ?1;",
            params![id, quantity],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Item(id)));
        }
        Ok(())
    }

    fn update_account_credit(&self, id: AccountId, credit: Decimal) -> RepoResult<()> {
        self.require_write()?;
        let changed = self.conn.execute(
            "UPDATE accounts SET credit = ?2 WHERE id = ?1;",
            params![id, credit.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Account(id)));
        }
        Ok(())
    }

    fn list_transactions_for_account(&self, id: AccountId) -> RepoResult<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{TRANSACTION_COLUMNS} WHERE account_id = ?1 ORDER BY occurred_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([id])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_transaction_row(row)?);
        }
        Ok(records)
    }

    fn list_accounts(&self) -> RepoResult<Vec<Account>> {
        self.fetch_accounts(None, None)
    }

    fn list_admins(&self) -> RepoResult<Vec<Account>> {
        self.fetch_accounts(Some("role = 'admin'"), None)
    }

    fn commit(mut self: Box<Self>) -> RepoResult<()> {
        self.finish("COMMIT;")
    }

    fn rollback(mut self: Box<Self>) -> RepoResult<()> {
        self.finish("ROLLBACK;")
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        match self.conn.execute_batch("ROLLBACK;") {
            Ok(()) => debug!("event=session_rollback module=repo status=ok reason=dropped"),
            Err(err) => warn!(
                "event=session_rollback module=repo status=error reason=dropped error={err}"
            ),
        }
    }
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<Item> {
    Ok(Item {
        id: row.get("id")?,
        name: row.get("name")?,
        category: row.get("category")?,
        price: parse_decimal(row, "price")?,
        quantity: parse_quantity(row, "quantity")?,
        barcode: row.get("barcode")?,
    })
}

fn parse_account_row(row: &Row<'_>) -> RepoResult<Account> {
    let role_text: String = row.get("role")?;
    let role = AccountRole::parse(&role_text)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid account role `{role_text}`")))?;

    Ok(Account {
        id: row.get("id")?,
        name: row.get("name")?,
        token: row.get("token")?,
        credit: parse_decimal(row, "credit")?,
        role,
        handles: BTreeMap::new(),
    })
}

fn parse_transaction_row(row: &Row<'_>) -> RepoResult<TransactionRecord> {
    Ok(TransactionRecord {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        item_id: row.get("item_id")?,
        occurred_at: row.get("occurred_at")?,
        quantity: parse_quantity(row, "quantity")?,
        cost: parse_decimal(row, "cost")?,
        category: row.get("category")?,
    })
}

fn parse_decimal(row: &Row<'_>, column: &str) -> RepoResult<Decimal> {
    let text: String = row.get(column)?;
    Decimal::from_str(&text)
        .map_err(|_| RepoError::InvalidData(format!("invalid decimal `{text}` in `{column}`")))
}

fn parse_quantity(row: &Row<'_>, column: &str) -> RepoResult<u32> {
    let raw: i64 = row.get(column)?;
    u32::try_from(raw)
        .map_err(|_| RepoError::InvalidData(format!("invalid quantity `{raw}` in `{column}`")))
}
