//! In-process backend.
//!
//! Mimics the behavior the services rely on: generated `id` and
//! `created_at` columns, filter evaluation, ordering, pagination and upserts
//! on conflict columns. Row-level security is not emulated, scoped handles
//! share the same data.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use super::{
    Auth, AuthEvent, AuthSession, AuthUser, BackendError, Filter, OtpKind,
    Procedures, Query, Result, Row, Storage, Tables,
};

const EVENTS_CAPACITY: usize = 64;

/// Every in-memory adapter, sharing nothing but their lifetime.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub tables: MemoryTables,
    pub storage: MemoryStorage,
    pub auth: MemoryAuth,
    pub procedures: MemoryProcedures,
}

/// Tables kept in a map of table name to rows.
#[derive(Clone, Default)]
pub struct MemoryTables {
    rows: Arc<RwLock<HashMap<String, Vec<Row>>>>,
    rejected: Arc<RwLock<HashSet<String>>>,
    /// Tables only writable with user credentials.
    signed_only: Arc<RwLock<HashSet<String>>>,
    access_token: Option<String>,
}

impl MemoryTables {
    /// Make every write on `table` fail.
    pub async fn reject_writes(&self, table: &str) {
        self.rejected.write().await.insert(table.to_owned());
    }

    /// Make anonymous writes on `table` fail, as row-level security would.
    pub async fn require_session(&self, table: &str) {
        self.signed_only.write().await.insert(table.to_owned());
    }

    /// Every row of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.rows.read().await.get(table).cloned().unwrap_or_default()
    }

    async fn check_writable(&self, table: &str) -> Result<()> {
        if self.rejected.read().await.contains(table) {
            return Err(BackendError::Rejected(format!(
                "writes on {table} are rejected"
            )));
        }
        if self.access_token.is_none() && self.signed_only.read().await.contains(table) {
            return Err(BackendError::Rejected(format!(
                "anonymous writes on {table} are rejected"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Tables for MemoryTables {
    async fn select(&self, query: &Query) -> Result<Vec<Row>> {
        let tables = self.rows.read().await;
        let mut rows: Vec<Row> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            query.order.iter().fold(Ordering::Equal, |ordering, order| {
                ordering.then_with(|| {
                    let ordering = compare_nulls_last(
                        a.get(&order.column),
                        b.get(&order.column),
                    );
                    match (order.ascending, a.get(&order.column), b.get(&order.column)) {
                        // nulls stay last whatever the direction.
                        (false, Some(x), Some(y)) if !x.is_null() && !y.is_null() => {
                            ordering.reverse()
                        },
                        _ => ordering,
                    }
                })
            })
        });

        let rows = rows
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|row| project(row, &query.columns))
            .collect();

        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        self.check_writable(table).await?;

        let rows: Vec<Row> = rows.into_iter().map(with_defaults).collect();
        self.rows
            .write()
            .await
            .entry(table.to_owned())
            .or_default()
            .extend(rows.iter().cloned());

        Ok(rows)
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>> {
        self.check_writable(table).await?;

        let mut tables = self.rows.write().await;
        let mut updated = Vec::new();
        for row in tables.entry(table.to_owned()).or_default().iter_mut() {
            if filters.iter().all(|f| matches(row, f)) {
                row.extend(patch.clone());
                updated.push(row.clone());
            }
        }

        Ok(updated)
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: &[&str],
    ) -> Result<Vec<Row>> {
        self.check_writable(table).await?;

        let mut tables = self.rows.write().await;
        let rows = tables.entry(table.to_owned()).or_default();

        let existing = rows.iter_mut().find(|existing| {
            on_conflict
                .iter()
                .all(|column| match (existing.get(*column), row.get(*column)) {
                    (Some(a), Some(b)) => loose_eq(a, b),
                    _ => false,
                })
        });

        match existing {
            Some(existing) => {
                existing.extend(row);
                Ok(vec![existing.clone()])
            },
            None => {
                let row = with_defaults(row);
                rows.push(row.clone());
                Ok(vec![row])
            },
        }
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>> {
        self.check_writable(table).await?;

        let mut tables = self.rows.write().await;
        let rows = tables.entry(table.to_owned()).or_default();
        let (deleted, kept): (Vec<Row>, Vec<Row>) = rows
            .drain(..)
            .partition(|row| filters.iter().all(|f| matches(row, f)));
        *rows = kept;

        Ok(deleted)
    }

    fn scoped(&self, access_token: &str) -> Arc<dyn Tables> {
        Arc::new(Self {
            access_token: Some(access_token.to_owned()),
            ..self.clone()
        })
    }
}

fn with_defaults(mut row: Row) -> Row {
    if !row.get("id").is_some_and(|id| !id.is_null()) {
        row.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
    }
    if !row.get("created_at").is_some_and(|at| !at.is_null()) {
        row.insert(
            "created_at".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    row
}

fn project(row: Row, columns: &str) -> Row {
    if columns.trim() == "*" {
        return row;
    }

    let wanted: HashSet<&str> = columns.split(',').map(str::trim).collect();
    row.into_iter()
        .filter(|(column, _)| wanted.contains(column.as_str()))
        .collect()
}

/// Evaluate `filter` against `row`.
fn matches(row: &Row, filter: &Filter) -> bool {
    let present = |column: &str| row.get(column).filter(|v| !v.is_null());

    match filter {
        Filter::Eq(column, value) => present(column).is_some_and(|v| loose_eq(v, value)),
        Filter::Neq(column, value) => present(column).is_some_and(|v| !loose_eq(v, value)),
        Filter::Gt(column, value) => compare(present(column), value) == Some(Ordering::Greater),
        Filter::Gte(column, value) => matches!(
            compare(present(column), value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Filter::Lt(column, value) => compare(present(column), value) == Some(Ordering::Less),
        Filter::Lte(column, value) => matches!(
            compare(present(column), value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Filter::ILike(column, pattern) => present(column)
            .and_then(Value::as_str)
            .is_some_and(|text| like(text, pattern)),
        Filter::In(column, values) => {
            present(column).is_some_and(|v| values.iter().any(|value| loose_eq(v, value)))
        },
        Filter::Overlaps(column, values) => present(column)
            .and_then(Value::as_array)
            .is_some_and(|items| {
                items
                    .iter()
                    .any(|item| values.iter().any(|value| loose_eq(item, value)))
            }),
        Filter::IsNull(column) => present(column).is_none(),
        Filter::NotNull(column) => present(column).is_some(),
        Filter::Or(filters) => filters.iter().any(|f| matches(row, f)),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: Option<&Value>, b: &Value) -> Option<Ordering> {
    match (a?, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_nulls_last(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => compare(Some(x), y).unwrap_or(Ordering::Equal),
    }
}

/// SQL `ILIKE` with `%` wildcards.
fn like(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();

    let [first, middle @ .., last] = parts.as_slice() else {
        return text == pattern;
    };

    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    for part in middle {
        match rest.find(part) {
            Some(index) => rest = &rest[index + part.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}

/// Objects kept in a map of `(bucket, path)` to bytes.
#[derive(Clone)]
pub struct MemoryStorage {
    base_url: String,
    objects: Arc<RwLock<BTreeMap<(String, String), (Vec<u8>, String)>>>,
    rejected: Arc<RwLock<Vec<String>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_owned(),
            objects: Arc::default(),
            rejected: Arc::default(),
        }
    }
}

impl MemoryStorage {
    /// Make uploads whose path contains `fragment` fail.
    pub async fn reject_paths(&self, fragment: &str) {
        self.rejected.write().await.push(fragment.to_owned());
    }

    /// Bytes and content type of a stored object.
    pub async fn get(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_owned(), path.to_owned()))
            .cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        if self
            .rejected
            .read()
            .await
            .iter()
            .any(|fragment| path.contains(fragment.as_str()))
        {
            return Err(BackendError::Rejected(format!("upload of {path} rejected")));
        }

        self.objects.write().await.insert(
            (bucket.to_owned(), path.to_owned()),
            (bytes, content_type.to_owned()),
        );
        Ok(path.to_owned())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|(b, path)| b == bucket && path.starts_with(prefix))
            .map(|(_, path)| path.clone())
            .collect())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<()> {
        let mut objects = self.objects.write().await;
        for path in paths {
            objects.remove(&(bucket.to_owned(), path.clone()));
        }
        Ok(())
    }

    fn scoped(&self, _access_token: &str) -> Arc<dyn Storage> {
        Arc::new(self.clone())
    }
}

#[derive(Default)]
struct Accounts {
    /// email -> (user, password).
    users: HashMap<String, (AuthUser, String)>,
    /// access token -> user id.
    tokens: HashMap<String, String>,
    /// (email, token) -> kind.
    otps: HashMap<(String, String), OtpKind>,
}

/// Accounts and tokens kept in memory.
#[derive(Clone)]
pub struct MemoryAuth {
    accounts: Arc<RwLock<Accounts>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            accounts: Arc::default(),
            events,
        }
    }
}

impl MemoryAuth {
    /// Create an account.
    pub async fn register(&self, email: &str, password: &str) -> AuthUser {
        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_owned()),
        };
        self.accounts
            .write()
            .await
            .users
            .insert(email.to_owned(), (user.clone(), password.to_owned()));
        user
    }

    /// Issue a one-time token for `email`.
    pub async fn issue_otp(&self, email: &str, kind: OtpKind) -> String {
        let token = format!("{:06}", uuid::Uuid::new_v4().as_u128() % 1_000_000);
        self.accounts
            .write()
            .await
            .otps
            .insert((email.to_owned(), token.clone()), kind);
        token
    }

    fn open_session(accounts: &mut Accounts, user: AuthUser) -> AuthSession {
        let access_token = uuid::Uuid::new_v4().simple().to_string();
        accounts
            .tokens
            .insert(access_token.clone(), user.id.clone());

        AuthSession {
            access_token,
            refresh_token: uuid::Uuid::new_v4().simple().to_string(),
            expires_in: 3600,
            user,
        }
    }

    fn user_by_token(accounts: &Accounts, access_token: &str) -> Option<AuthUser> {
        let id = accounts.tokens.get(access_token)?;
        accounts
            .users
            .values()
            .find(|(user, _)| &user.id == id)
            .map(|(user, _)| user.clone())
    }

    fn notify(&self, event: AuthEvent) {
        // no subscriber is not an error.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Auth for MemoryAuth {
    async fn current_user(&self, access_token: &str) -> Result<Option<AuthUser>> {
        Ok(Self::user_by_token(&*self.accounts.read().await, access_token))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let mut accounts = self.accounts.write().await;
        let user = match accounts.users.get(email) {
            Some((user, expected)) if expected == password => user.clone(),
            _ => return Err(BackendError::InvalidCredentials),
        };

        let session = Self::open_session(&mut accounts, user);
        self.notify(AuthEvent::SignedIn {
            user_id: session.user.id.clone(),
        });
        Ok(session)
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        self.accounts.write().await.tokens.remove(access_token);
        self.notify(AuthEvent::SignedOut);
        Ok(())
    }

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> Result<AuthUser> {
        let mut accounts = self.accounts.write().await;
        let user = Self::user_by_token(&accounts, access_token)
            .ok_or(BackendError::InvalidCredentials)?;

        if let Some(entry) = accounts
            .users
            .values_mut()
            .find(|(candidate, _)| candidate.id == user.id)
        {
            entry.1 = password.to_owned();
        }

        self.notify(AuthEvent::UserUpdated {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    async fn update_email(&self, access_token: &str, email: &str) -> Result<AuthUser> {
        let mut accounts = self.accounts.write().await;
        let user = Self::user_by_token(&accounts, access_token)
            .ok_or(BackendError::InvalidCredentials)?;
        let old_email = user.email.clone().unwrap_or_default();

        let Some((mut user, password)) = accounts.users.remove(&old_email) else {
            return Err(BackendError::InvalidCredentials);
        };
        user.email = Some(email.to_owned());
        accounts
            .users
            .insert(email.to_owned(), (user.clone(), password));

        self.notify(AuthEvent::UserUpdated {
            user_id: user.id.clone(),
        });
        Ok(user)
    }

    async fn verify_otp(
        &self,
        email: &str,
        token: &str,
        kind: OtpKind,
    ) -> Result<AuthSession> {
        let mut accounts = self.accounts.write().await;
        let key = (email.to_owned(), token.to_owned());
        if accounts.otps.get(&key) != Some(&kind) {
            return Err(BackendError::InvalidCredentials);
        }
        accounts.otps.remove(&key);

        let user = accounts
            .users
            .get(email)
            .map(|(user, _)| user.clone())
            .ok_or(BackendError::InvalidCredentials)?;
        let session = Self::open_session(&mut accounts, user);

        self.notify(match kind {
            OtpKind::Recovery => AuthEvent::PasswordRecovery {
                user_id: session.user.id.clone(),
            },
            _ => AuthEvent::SignedIn {
                user_id: session.user.id.clone(),
            },
        });
        Ok(session)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

type Handler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Server-side functions registered as closures.
#[derive(Clone, Default)]
pub struct MemoryProcedures {
    handlers: Arc<RwLock<HashMap<String, Handler>>>,
    calls: Arc<RwLock<Vec<(String, Value)>>>,
}

impl MemoryProcedures {
    /// Register `handler` under `name`.
    pub async fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .await
            .insert(name.to_owned(), Arc::new(handler));
    }

    /// Every invocation so far, in order.
    pub async fn calls(&self) -> Vec<(String, Value)> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl Procedures for MemoryProcedures {
    async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        self.calls
            .write()
            .await
            .push((name.to_owned(), args.clone()));

        let handler = self.handlers.read().await.get(name).cloned();
        match handler {
            Some(handler) => handler(args),
            None => Err(BackendError::Status {
                status: 404,
                message: format!("function {name} not found"),
            }),
        }
    }

    fn scoped(&self, _access_token: &str) -> Arc<dyn Procedures> {
        Arc::new(self.clone())
    }
}
