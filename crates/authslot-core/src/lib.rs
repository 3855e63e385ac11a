use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions};
use tokio::sync::RwLock;
use tracing_subscriber::{EnvFilter, fmt as log_fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const KEY_SELECTED_AUTH_USER: &str = "selectedAuthUser";
pub const KEY_ENABLED_SERVICES: &str = "enabledServices";
pub const KEY_DETECTED_ACCOUNTS: &str = "detectedAccounts";
pub const KEY_ACCOUNT_EMAILS: &str = "accountEmails";
pub const KEY_MANUAL_MODE: &str = "manualMode";

/// One authenticated session with the identity provider ("account 0", "account 1", ...).
///
/// Serialized as a string so the preference never compares a number against a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountSlot(u64);

impl AccountSlot {
    pub const DEFAULT: AccountSlot = AccountSlot(0);

    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccountSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountSlot {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("invalid account slot: {:?}", s));
        }
        let index = trimmed
            .parse::<u64>()
            .map_err(|e| anyhow!("invalid account slot {:?}: {}", s, e))?;
        Ok(Self(index))
    }
}

impl TryFrom<String> for AccountSlot {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AccountSlot> for String {
    fn from(slot: AccountSlot) -> Self {
        slot.to_string()
    }
}

/// Census of known account slots and the email occupying each one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedAccountState {
    pub count: u64,
    pub emails: BTreeMap<AccountSlot, String>,
}

impl Default for DetectedAccountState {
    fn default() -> Self {
        Self {
            count: 1,
            emails: BTreeMap::new(),
        }
    }
}

impl DetectedAccountState {
    /// Records that `slot` exists, optionally with the email seen on it.
    /// `count` only ever grows. Returns whether anything changed.
    pub fn observe_slot(&mut self, slot: AccountSlot, email: Option<&str>) -> bool {
        let mut changed = false;
        let needed = slot.index().saturating_add(1);
        if needed > self.count {
            self.count = needed;
            changed = true;
        }
        if let Some(email) = email {
            if self.emails.get(&slot).map(String::as_str) != Some(email) {
                self.emails.insert(slot, email.to_string());
                changed = true;
            }
        }
        changed
    }

    /// Merges a discovery scan: found accounts are renumbered `0..n` in
    /// observed order, slots beyond `n` keep whatever they had.
    pub fn merge_scan(&mut self, found: &[String]) -> bool {
        if found.is_empty() {
            return false;
        }
        let before = self.clone();
        let found_count = u64::try_from(found.len()).unwrap_or(u64::MAX);
        self.count = self.count.max(found_count).max(1);
        for (index, email) in found.iter().enumerate() {
            let slot = AccountSlot::new(u64::try_from(index).unwrap_or(u64::MAX));
            self.emails.insert(slot, email.clone());
        }
        *self != before
    }

    pub fn email_for(&self, slot: AccountSlot) -> Option<&str> {
        self.emails.get(&slot).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Link,
    Typed,
    AutoBookmark,
    Reload,
    Generated,
    FormSubmit,
    Other,
}

impl TransitionType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "link" => Self::Link,
            "typed" => Self::Typed,
            "auto_bookmark" => Self::AutoBookmark,
            "reload" => Self::Reload,
            "generated" => Self::Generated,
            "form_submit" => Self::FormSubmit,
            _ => Self::Other,
        }
    }
}

/// Which browser signal reported a navigation. The same logical navigation
/// may arrive once per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationChannel {
    Committed,
    Completed,
    TabUpdated,
}

pub type TabId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub url: String,
    pub tab_id: TabId,
    pub frame_id: i64,
    pub transition: TransitionType,
    pub channel: NavigationChannel,
}

impl NavigationEvent {
    pub fn is_top_level(&self) -> bool {
        self.frame_id == 0
    }
}

/// Reply to a `scanForAccounts` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub success: bool,
    pub accounts_found: usize,
}

/// Preferences written by the UI layer and read fresh by the engine.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn selected_slot(&self) -> Result<AccountSlot>;
    async fn set_selected_slot(&self, slot: AccountSlot) -> Result<()>;
    async fn enabled_services(&self) -> Result<HashMap<String, bool>>;
    async fn set_service_enabled(&self, service: &str, enabled: bool) -> Result<()>;
}

#[async_trait]
pub trait DetectedAccountStore: Send + Sync {
    async fn load_detected(&self) -> Result<DetectedAccountState>;
    async fn save_detected(&self, state: &DetectedAccountState) -> Result<()>;
    async fn reset_detected(&self) -> Result<()>;

    /// Raises the detected count to at least `count` without touching the emails.
    /// Returns whether the stored value changed.
    async fn raise_detected_count(&self, count: u64) -> Result<bool> {
        let mut state = self.load_detected().await?;
        if count <= state.count {
            return Ok(false);
        }
        state.count = count;
        self.save_detected(&state).await?;
        Ok(true)
    }

    /// Stores the email seen on `slot` without touching the count.
    async fn record_account_email(&self, slot: AccountSlot, email: &str) -> Result<bool> {
        let mut state = self.load_detected().await?;
        if state.email_for(slot) == Some(email) {
            return Ok(false);
        }
        state.emails.insert(slot, email.to_string());
        self.save_detected(&state).await?;
        Ok(true)
    }

    async fn manual_mode(&self) -> Result<bool>;
    async fn set_manual_mode(&self, enabled: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreArea {
    /// User preferences.
    Sync,
    /// Detected accounts and runtime switches.
    Local,
}

impl StoreArea {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Local => "local",
        }
    }
}

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, area: StoreArea, key: &str) -> Result<Option<JsonValue>>;
    async fn set(&self, area: StoreArea, key: &str, value: JsonValue) -> Result<()>;
    async fn entries(&self, area: StoreArea) -> Result<Vec<(String, JsonValue)>>;
}

/// Both durable stores over a single key-value backend.
#[derive(Clone)]
pub struct AccountStore<B> {
    backend: B,
}

impl<B: KvBackend> AccountStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn dump(&self, area: StoreArea) -> Result<Vec<(String, JsonValue)>> {
        self.backend.entries(area).await
    }
}

fn slot_from_json(value: &JsonValue) -> Result<AccountSlot> {
    match value {
        JsonValue::String(s) => s.parse(),
        JsonValue::Number(n) => n
            .as_u64()
            .map(AccountSlot::new)
            .ok_or_else(|| anyhow!("invalid account slot: {}", n)),
        other => Err(anyhow!("invalid account slot: {}", other)),
    }
}

#[async_trait]
impl<B: KvBackend> PreferenceStore for AccountStore<B> {
    async fn selected_slot(&self) -> Result<AccountSlot> {
        match self
            .backend
            .get(StoreArea::Sync, KEY_SELECTED_AUTH_USER)
            .await?
        {
            Some(value) => slot_from_json(&value),
            None => Ok(AccountSlot::DEFAULT),
        }
    }

    async fn set_selected_slot(&self, slot: AccountSlot) -> Result<()> {
        self.backend
            .set(
                StoreArea::Sync,
                KEY_SELECTED_AUTH_USER,
                JsonValue::String(slot.to_string()),
            )
            .await
    }

    async fn enabled_services(&self) -> Result<HashMap<String, bool>> {
        match self
            .backend
            .get(StoreArea::Sync, KEY_ENABLED_SERVICES)
            .await?
        {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(HashMap::new()),
        }
    }

    async fn set_service_enabled(&self, service: &str, enabled: bool) -> Result<()> {
        let mut services = self.enabled_services().await?;
        services.insert(service.to_string(), enabled);
        self.backend
            .set(
                StoreArea::Sync,
                KEY_ENABLED_SERVICES,
                serde_json::to_value(services)?,
            )
            .await
    }
}

impl<B: KvBackend> AccountStore<B> {
    async fn load_count(&self) -> Result<u64> {
        Ok(self
            .backend
            .get(StoreArea::Local, KEY_DETECTED_ACCOUNTS)
            .await?
            .and_then(|value| value.as_u64())
            .unwrap_or(1)
            .max(1))
    }

    async fn load_emails(&self) -> Result<BTreeMap<AccountSlot, String>> {
        match self
            .backend
            .get(StoreArea::Local, KEY_ACCOUNT_EMAILS)
            .await?
        {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn save_count(&self, count: u64) -> Result<()> {
        self.backend
            .set(
                StoreArea::Local,
                KEY_DETECTED_ACCOUNTS,
                JsonValue::from(count.max(1)),
            )
            .await
    }

    async fn save_emails(&self, emails: &BTreeMap<AccountSlot, String>) -> Result<()> {
        self.backend
            .set(
                StoreArea::Local,
                KEY_ACCOUNT_EMAILS,
                serde_json::to_value(emails)?,
            )
            .await
    }
}

#[async_trait]
impl<B: KvBackend> DetectedAccountStore for AccountStore<B> {
    async fn load_detected(&self) -> Result<DetectedAccountState> {
        Ok(DetectedAccountState {
            count: self.load_count().await?,
            emails: self.load_emails().await?,
        })
    }

    async fn save_detected(&self, state: &DetectedAccountState) -> Result<()> {
        self.save_count(state.count).await?;
        self.save_emails(&state.emails).await
    }

    async fn raise_detected_count(&self, count: u64) -> Result<bool> {
        if count <= self.load_count().await? {
            return Ok(false);
        }
        self.save_count(count).await?;
        Ok(true)
    }

    async fn record_account_email(&self, slot: AccountSlot, email: &str) -> Result<bool> {
        let mut emails = self.load_emails().await?;
        if emails.get(&slot).map(String::as_str) == Some(email) {
            return Ok(false);
        }
        emails.insert(slot, email.to_string());
        self.save_emails(&emails).await?;
        Ok(true)
    }

    async fn reset_detected(&self) -> Result<()> {
        self.save_detected(&DetectedAccountState::default()).await
    }

    async fn manual_mode(&self) -> Result<bool> {
        Ok(self
            .backend
            .get(StoreArea::Local, KEY_MANUAL_MODE)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    async fn set_manual_mode(&self, enabled: bool) -> Result<()> {
        self.backend
            .set(StoreArea::Local, KEY_MANUAL_MODE, JsonValue::Bool(enabled))
            .await
    }
}

#[derive(Clone)]
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    pub async fn connect(path: &str) -> Result<Self> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{}", path)
        };
        let options = SqliteConnectOptions::new()
            .filename(url.trim_start_matches("sqlite:"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for SqliteKv {
    async fn get(&self, area: StoreArea, key: &str) -> Result<Option<JsonValue>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT value_json FROM kv WHERE area = ? AND key = ?",
        )
        .bind(area.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, area: StoreArea, key: &str, value: JsonValue) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (area, key, value_json, updated_ts) VALUES (?, ?, ?, ?)
             ON CONFLICT(area, key) DO UPDATE SET value_json = excluded.value_json, updated_ts = excluded.updated_ts",
        )
        .bind(area.as_str())
        .bind(key)
        .bind(serde_json::to_string(&value)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn entries(&self, area: StoreArea) -> Result<Vec<(String, JsonValue)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, value_json FROM kv WHERE area = ? ORDER BY key",
        )
        .bind(area.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(key, raw)| Ok((key, serde_json::from_str(&raw)?)))
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryKv {
    values: RwLock<HashMap<(StoreArea, String), JsonValue>>,
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(&self, area: StoreArea, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.values.read().await.get(&(area, key.to_string())).cloned())
    }

    async fn set(&self, area: StoreArea, key: &str, value: JsonValue) -> Result<()> {
        self.values
            .write()
            .await
            .insert((area, key.to_string()), value);
        Ok(())
    }

    async fn entries(&self, area: StoreArea) -> Result<Vec<(String, JsonValue)>> {
        let values = self.values.read().await;
        let mut out: Vec<(String, JsonValue)> = values
            .iter()
            .filter(|((a, _), _)| *a == area)
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

pub type SqliteAccountStore = AccountStore<SqliteKv>;
pub type MemoryAccountStore = AccountStore<MemoryKv>;

impl MemoryAccountStore {
    pub fn in_memory() -> Self {
        AccountStore::new(MemoryKv::default())
    }
}

impl SqliteAccountStore {
    pub async fn open(path: &str) -> Result<Self> {
        let kv = SqliteKv::connect(path).await?;
        kv.init().await?;
        Ok(AccountStore::new(kv))
    }
}

pub fn state_dir() -> PathBuf {
    std::env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local").join("state"))
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("authslot")
}

pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Installs the global subscriber: stderr at `warn` unless `AUTHSLOT_LOG`
/// says otherwise, plus an append-only file when `AUTHSLOT_LOG_FILE=1`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("AUTHSLOT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let file_layer = if env_flag("AUTHSLOT_LOG_FILE") {
        let dir = state_dir();
        let _ = std::fs::create_dir_all(&dir);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("authslot.log"))
            .ok()
            .map(|file| {
                log_fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file))
            })
    } else {
        None
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            log_fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{
        AccountSlot, DetectedAccountState, DetectedAccountStore, KvBackend, MemoryAccountStore,
        PreferenceStore, SqliteAccountStore, StoreArea,
    };

    fn temp_db_path() -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!(
            "authslot-core-migrate-{}-{}.db",
            std::process::id(),
            ts
        ))
    }

    #[test]
    fn slot_parses_digits_only() {
        assert_eq!("2".parse::<AccountSlot>().unwrap(), AccountSlot::new(2));
        assert_eq!(" 7 ".parse::<AccountSlot>().unwrap(), AccountSlot::new(7));
        assert!("-1".parse::<AccountSlot>().is_err());
        assert!("two".parse::<AccountSlot>().is_err());
        assert!("".parse::<AccountSlot>().is_err());
        assert_eq!(
            "99999999999".parse::<AccountSlot>().unwrap(),
            AccountSlot::new(99_999_999_999)
        );
        assert!("99999999999999999999999".parse::<AccountSlot>().is_err());
    }

    #[test]
    fn slot_serializes_as_string() {
        let json = serde_json::to_string(&AccountSlot::new(3)).unwrap();
        assert_eq!(json, "\"3\"");
        let mut state = DetectedAccountState::default();
        state.observe_slot(AccountSlot::new(1), Some("b@gmail.com"));
        let value = serde_json::to_value(&state.emails).unwrap();
        assert_eq!(value["1"], "b@gmail.com");
    }

    #[test]
    fn observe_slot_only_grows_count() {
        let mut state = DetectedAccountState::default();
        assert!(state.observe_slot(AccountSlot::new(2), None));
        assert_eq!(state.count, 3);
        assert!(!state.observe_slot(AccountSlot::new(0), None));
        assert_eq!(state.count, 3);
        assert!(state.observe_slot(AccountSlot::new(0), Some("a@gmail.com")));
        assert!(!state.observe_slot(AccountSlot::new(0), Some("a@gmail.com")));
    }

    #[test]
    fn merge_scan_renumbers_and_keeps_count_monotonic() {
        let mut state = DetectedAccountState {
            count: 4,
            emails: [(AccountSlot::new(3), "d@x".to_string())].into_iter().collect(),
        };
        assert!(state.merge_scan(&["a@x".to_string(), "b@x".to_string()]));
        assert_eq!(state.count, 4);
        assert_eq!(state.email_for(AccountSlot::new(0)), Some("a@x"));
        assert_eq!(state.email_for(AccountSlot::new(1)), Some("b@x"));
        assert_eq!(state.email_for(AccountSlot::new(3)), Some("d@x"));

        let before = state.clone();
        assert!(!state.merge_scan(&[]));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn memory_store_defaults_and_round_trips() -> anyhow::Result<()> {
        let store = MemoryAccountStore::in_memory();
        assert_eq!(store.selected_slot().await?, AccountSlot::DEFAULT);
        assert!(store.enabled_services().await?.is_empty());
        assert_eq!(store.load_detected().await?, DetectedAccountState::default());
        assert!(!store.manual_mode().await?);

        store.set_selected_slot(AccountSlot::new(2)).await?;
        store.set_service_enabled("drive", false).await?;
        store.set_manual_mode(true).await?;
        assert_eq!(store.selected_slot().await?, AccountSlot::new(2));
        assert_eq!(store.enabled_services().await?.get("drive"), Some(&false));
        assert!(store.manual_mode().await?);
        Ok(())
    }

    #[tokio::test]
    async fn count_and_email_writes_do_not_clobber_each_other() -> anyhow::Result<()> {
        let store = MemoryAccountStore::in_memory();
        assert!(store.record_account_email(AccountSlot::new(1), "b@gmail.com").await?);
        assert!(!store.record_account_email(AccountSlot::new(1), "b@gmail.com").await?);
        assert!(store.raise_detected_count(3).await?);
        assert!(!store.raise_detected_count(2).await?);

        let state = store.load_detected().await?;
        assert_eq!(state.count, 3);
        assert_eq!(state.email_for(AccountSlot::new(1)), Some("b@gmail.com"));

        let emails = store
            .backend()
            .get(StoreArea::Local, "accountEmails")
            .await?
            .ok_or_else(|| anyhow::anyhow!("emails missing"))?;
        assert_eq!(emails["1"], "b@gmail.com");
        Ok(())
    }

    #[tokio::test]
    async fn numeric_preference_is_accepted() -> anyhow::Result<()> {
        let store = MemoryAccountStore::in_memory();
        store
            .backend()
            .set(StoreArea::Sync, "selectedAuthUser", serde_json::json!(4))
            .await?;
        assert_eq!(store.selected_slot().await?, AccountSlot::new(4));
        Ok(())
    }

    #[tokio::test]
    async fn init_applies_migrations_on_fresh_db() -> anyhow::Result<()> {
        let db_path = temp_db_path();
        let _ = std::fs::remove_file(&db_path);

        let store = SqliteAccountStore::open(
            db_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("invalid temp db path"))?,
        )
        .await?;

        let rows = sqlx::query_as::<_, (i64, String, String, i64, Option<String>, i64)>(
            "PRAGMA table_info(kv)",
        )
        .fetch_all(&store.backend().pool)
        .await?;
        let columns: HashSet<String> = rows.into_iter().map(|row| row.1).collect();
        for required in ["area", "key", "value_json", "updated_ts"] {
            assert!(columns.contains(required), "missing column {}", required);
        }

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[tokio::test]
    async fn sqlite_store_persists_detected_accounts() -> anyhow::Result<()> {
        let db_path = temp_db_path();
        let _ = std::fs::remove_file(&db_path);
        let path = db_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("invalid temp db path"))?
            .to_string();

        {
            let store = SqliteAccountStore::open(&path).await?;
            let mut state = store.load_detected().await?;
            state.merge_scan(&["a@gmail.com".to_string(), "b@gmail.com".to_string()]);
            store.save_detected(&state).await?;
            store.set_selected_slot(AccountSlot::new(1)).await?;
        }

        let reopened = SqliteAccountStore::open(&path).await?;
        let state = reopened.load_detected().await?;
        assert_eq!(state.count, 2);
        assert_eq!(state.email_for(AccountSlot::new(1)), Some("b@gmail.com"));
        assert_eq!(reopened.selected_slot().await?, AccountSlot::new(1));

        let local = reopened.dump(StoreArea::Local).await?;
        assert!(local.iter().any(|(k, _)| k == "accountEmails"));

        reopened.reset_detected().await?;
        assert_eq!(reopened.load_detected().await?, DetectedAccountState::default());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
