//! In-process remote store for development and tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    Identity, LicenseRecord, LicenseType, LicenseUpdate, RemoteLicenseStore, UserRecord,
    UserUpdate,
};
use crate::errors::{LicenseError, LicenseResult};
use crate::vault::SymmetricVault;

/// Codes every development store starts with.
pub const SEED_CODES: [(&str, LicenseType); 3] = [
    ("LIQ-2025-TEST-0001-MAIK", LicenseType::Trial),
    ("LIQ-2025-DEMO-0001-STUD", LicenseType::Standard),
    ("LIQ-2025-ADMN-0001-SAEZ", LicenseType::Extended),
];

type Document = Map<String, Value>;

#[derive(Debug, Clone)]
struct Account {
    uid: String,
    password_hash: String,
}

#[derive(Default)]
struct State {
    licenses: HashMap<String, Document>,
    users: HashMap<String, Document>,
    accounts: HashMap<String, Account>,
    rejected_writes: HashSet<String>,
}

struct Inner {
    state: RwLock<State>,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
    next_uid: AtomicU64,
    vault: SymmetricVault,
}

/// Document store and account registry held in memory.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another. Outages and slow links are simulated with
/// [`set_reachable`](Self::set_reachable) and [`set_latency`](Self::set_latency).
#[derive(Clone)]
pub struct DevelopmentLicenseStore {
    inner: Arc<Inner>,
}

impl Default for DevelopmentLicenseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DevelopmentLicenseStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::with_state(State::default())
    }

    fn with_state(state: State) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                reachable: AtomicBool::new(true),
                latency_ms: AtomicU64::new(0),
                next_uid: AtomicU64::new(1),
                vault: SymmetricVault::default(),
            }),
        }
    }

    /// A store holding the fixed test codes, all available.
    pub fn seeded() -> Self {
        let now = Utc::now().timestamp_millis();
        let mut state = State::default();
        for (code, license_type) in SEED_CODES {
            let record = LicenseRecord::available(code, license_type, now);
            if let Ok(doc) = to_document(&record) {
                state.licenses.insert(code.to_string(), doc);
            }
        }
        Self::with_state(state)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every later write to `key` fail as if the service went away
    /// mid-operation. `key` is a license code, a uid, or an account email
    /// (covers the user document of that account).
    pub async fn reject_writes_to(&self, key: &str) {
        self.inner
            .state
            .write()
            .await
            .rejected_writes
            .insert(key.to_string());
    }

    /// Store a license document directly, bypassing reachability.
    pub async fn insert_license(&self, record: LicenseRecord) -> LicenseResult<()> {
        let doc = to_document(&record)?;
        self.inner
            .state
            .write()
            .await
            .licenses
            .insert(record.code.clone(), doc);
        Ok(())
    }

    /// Read a license document directly, bypassing reachability.
    pub async fn license(&self, code: &str) -> Option<LicenseRecord> {
        let state = self.inner.state.read().await;
        state.licenses.get(code).and_then(|d| from_document(d).ok())
    }

    /// Read a user document directly, bypassing reachability.
    pub async fn user(&self, uid: &str) -> Option<UserRecord> {
        let state = self.inner.state.read().await;
        state.users.get(uid).and_then(|d| from_document(d).ok())
    }

    async fn check(&self) -> LicenseResult<()> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LicenseError::RemoteUnavailable(
                "development store is offline".to_string(),
            ))
        }
    }

    fn write(
        collection: &mut HashMap<String, Document>,
        key: &str,
        fields: Document,
        merge: bool,
    ) {
        if merge {
            collection
                .entry(key.to_string())
                .or_default()
                .extend(fields);
        } else {
            collection.insert(key.to_string(), fields);
        }
    }
}

fn to_document<T: Serialize>(value: &T) -> LicenseResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(LicenseError::SerializationError(format!(
            "expected an object, got {other}"
        ))),
    }
}

fn from_document<T: DeserializeOwned>(doc: &Document) -> LicenseResult<T> {
    serde_json::from_value(Value::Object(doc.clone()))
        .map_err(|e| LicenseError::RemoteRejected(format!("malformed document: {e}")))
}

#[async_trait]
impl RemoteLicenseStore for DevelopmentLicenseStore {
    fn name(&self) -> &'static str {
        "development"
    }

    async fn get_license(&self, code: &str) -> LicenseResult<Option<LicenseRecord>> {
        self.check().await?;
        let state = self.inner.state.read().await;
        state.licenses.get(code).map(from_document).transpose()
    }

    async fn set_license(&self, code: &str, fields: &LicenseUpdate, merge: bool) -> LicenseResult<()> {
        self.check().await?;
        let fields = to_document(fields)?;
        let mut state = self.inner.state.write().await;
        if state.rejected_writes.contains(code) {
            return Err(LicenseError::RemoteUnavailable(format!(
                "write to licenses/{code} failed"
            )));
        }
        Self::write(&mut state.licenses, code, fields, merge);
        debug!(merge, "development store wrote license document");
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> LicenseResult<Option<UserRecord>> {
        self.check().await?;
        let state = self.inner.state.read().await;
        state.users.get(uid).map(from_document).transpose()
    }

    async fn set_user(&self, uid: &str, fields: &UserUpdate, merge: bool) -> LicenseResult<()> {
        self.check().await?;
        let fields = to_document(fields)?;
        let mut state = self.inner.state.write().await;
        let owner_rejected = state
            .accounts
            .iter()
            .any(|(email, account)| account.uid == uid && state.rejected_writes.contains(email));
        if owner_rejected || state.rejected_writes.contains(uid) {
            return Err(LicenseError::RemoteUnavailable(format!(
                "write to users/{uid} failed"
            )));
        }
        Self::write(&mut state.users, uid, fields, merge);
        Ok(())
    }

    async fn create_account(&self, email: &str, password: &str) -> LicenseResult<Identity> {
        self.check().await?;
        let mut state = self.inner.state.write().await;
        if state.accounts.contains_key(email) {
            return Err(LicenseError::AuthenticationFailed(format!(
                "an account already exists for {email}"
            )));
        }

        let seq = self.inner.next_uid.fetch_add(1, Ordering::SeqCst);
        let uid = format!("dev-user-{}-{}", Utc::now().timestamp_millis(), seq);
        state.accounts.insert(
            email.to_string(),
            Account {
                uid: uid.clone(),
                password_hash: self.inner.vault.hash_password(password),
            },
        );
        Ok(Identity {
            uid,
            email: email.to_string(),
        })
    }

    async fn authenticate(&self, email: &str, password: &str) -> LicenseResult<Identity> {
        self.check().await?;
        let state = self.inner.state.read().await;
        match state.accounts.get(email) {
            Some(account) if self.inner.vault.verify_password(password, &account.password_hash) => {
                Ok(Identity {
                    uid: account.uid.clone(),
                    email: email.to_string(),
                })
            }
            _ => Err(LicenseError::AuthenticationFailed(
                "invalid email or password".to_string(),
            )),
        }
    }
}
