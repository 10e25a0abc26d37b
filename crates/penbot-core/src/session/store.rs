//! Conversation history and the store that owns it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{ConversationEntry, ProviderFamily, Role};

/// Default number of non-system entries retained per history.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Default upper bound on live partitions before LRU eviction kicks in.
pub const DEFAULT_MAX_PARTITIONS: usize = 10_000;

// ─────────────────────────────────────────────
// ConversationHistory
// ─────────────────────────────────────────────

/// Ordered history for one user within one provider family.
///
/// Invariant: a system entry, if present, is first and is never trimmed;
/// at most `limit` non-system entries follow it.
#[derive(Clone, Debug)]
pub struct ConversationHistory {
    entries: Vec<ConversationEntry>,
    limit: usize,
}

impl ConversationHistory {
    /// Create a history, optionally seeded with a persona.
    pub fn new(limit: usize, persona: Option<&str>) -> Self {
        let entries = persona
            .map(|p| vec![ConversationEntry::system(p)])
            .unwrap_or_default();
        Self { entries, limit }
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append one entry and trim.
    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push(entry);
        self.trim();
    }

    /// The outbound request payload: current history plus a new user entry,
    /// trimmed to the same bound as the history.
    ///
    /// The history itself is not modified; the exchange is committed with
    /// [`record_exchange`](Self::record_exchange) only once the provider answers.
    pub fn with_user(&self, text: &str) -> Vec<ConversationEntry> {
        let mut messages = self.entries.clone();
        if !self.ends_with_user(text) {
            messages.push(ConversationEntry::user(text));
        }
        trim_entries(&mut messages, self.limit);
        messages
    }

    /// Commit a completed turn.
    ///
    /// The user entry is skipped if it is already the last entry, so staging
    /// a turn and then recording it never double-inserts.
    pub fn record_exchange(&mut self, user_text: &str, assistant_text: &str) {
        if !self.ends_with_user(user_text) {
            self.push(ConversationEntry::user(user_text));
        }
        self.push(ConversationEntry::assistant(assistant_text));
    }

    /// Drop everything except the persona.
    pub fn clear(&mut self) {
        self.entries.retain(ConversationEntry::is_system);
    }

    fn ends_with_user(&self, text: &str) -> bool {
        matches!(
            self.entries.last(),
            Some(last) if last.role == Role::User && last.content == text
        )
    }

    fn trim(&mut self) {
        trim_entries(&mut self.entries, self.limit);
    }
}

/// Keep the leading system entry plus the `limit` most recent others.
///
/// A trimmed body never opens on an assistant turn: if the cut lands between
/// a user entry and its reply, the orphaned reply goes too.
fn trim_entries(entries: &mut Vec<ConversationEntry>, limit: usize) {
    let has_system = entries.first().is_some_and(ConversationEntry::is_system);
    let body_start = usize::from(has_system);
    let body_len = entries.len() - body_start;
    if body_len > limit {
        let mut excess = body_len - limit;
        if entries
            .get(body_start + excess)
            .is_some_and(|e| e.role == Role::Assistant)
        {
            excess += 1;
        }
        entries.drain(body_start..body_start + excess);
    }
}

// ─────────────────────────────────────────────
// ConversationStore
// ─────────────────────────────────────────────

type PartitionKey = (ProviderFamily, String);

struct Partition {
    history: Arc<Mutex<ConversationHistory>>,
    last_used: DateTime<Utc>,
}

/// Owns every user's histories, one table per provider family.
///
/// Shared via `Arc` between providers; the outer map lock is only held for
/// lookups, never across an await.
pub struct ConversationStore {
    limit: usize,
    max_partitions: usize,
    personas: HashMap<ProviderFamily, String>,
    partitions: StdMutex<HashMap<PartitionKey, Partition>>,
}

impl ConversationStore {
    /// Create a store that keeps `limit` non-system entries per history.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            max_partitions: DEFAULT_MAX_PARTITIONS,
            personas: HashMap::new(),
            partitions: StdMutex::new(HashMap::new()),
        }
    }

    /// Seed every new history of `family` with a system persona.
    pub fn with_persona(mut self, family: ProviderFamily, persona: impl Into<String>) -> Self {
        let persona = persona.into();
        if !persona.trim().is_empty() {
            self.personas.insert(family, persona);
        }
        self
    }

    /// Cap the number of live partitions; the least recently used idle one is evicted first.
    pub fn with_max_partitions(mut self, max: usize) -> Self {
        self.max_partitions = max.max(1);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Persona configured for a family, if any.
    pub fn persona(&self, family: ProviderFamily) -> Option<&str> {
        self.personas.get(&family).map(String::as_str)
    }

    /// Get the lock guarding one user's history, creating it on first access.
    pub fn partition(&self, user_id: &str, family: ProviderFamily) -> Arc<Mutex<ConversationHistory>> {
        let now = Utc::now();
        let mut partitions = self.lock_partitions();
        let key = (family, user_id.to_string());

        if let Some(partition) = partitions.get_mut(&key) {
            partition.last_used = now;
            return partition.history.clone();
        }

        if partitions.len() >= self.max_partitions {
            evict_lru(&mut partitions);
        }

        let history = Arc::new(Mutex::new(ConversationHistory::new(
            self.limit,
            self.persona(family),
        )));
        debug!(user = user_id, family = %family, "created conversation history");
        partitions.insert(
            key,
            Partition {
                history: history.clone(),
                last_used: now,
            },
        );
        history
    }

    /// Current ordered history for a user.
    pub async fn get(&self, user_id: &str, family: ProviderFamily) -> Vec<ConversationEntry> {
        let partition = self.partition(user_id, family);
        let history = partition.lock().await;
        history.entries().to_vec()
    }

    /// Append one entry to a user's history, then trim.
    pub async fn append(&self, user_id: &str, family: ProviderFamily, role: Role, content: &str) {
        let partition = self.partition(user_id, family);
        let mut history = partition.lock().await;
        history.push(ConversationEntry::new(role, content));
    }

    /// Reset a user's history back to its persona.
    pub async fn clear(&self, user_id: &str, family: ProviderFamily) {
        let partition = self.partition(user_id, family);
        partition.lock().await.clear();
    }

    /// Remove partitions unused for longer than `max_idle` and not currently locked.
    ///
    /// Returns the number of partitions evicted. A window reaching past the
    /// earliest representable time evicts nothing.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let Some(cutoff) = Utc::now().checked_sub_signed(max_idle) else {
            return 0;
        };
        let mut partitions = self.lock_partitions();
        let before = partitions.len();
        partitions.retain(|_, p| p.last_used > cutoff || Arc::strong_count(&p.history) > 1);
        let evicted = before - partitions.len();
        if evicted > 0 {
            debug!(evicted, remaining = partitions.len(), "evicted idle histories");
        }
        evicted
    }

    /// Number of live partitions across all families.
    pub fn len(&self) -> usize {
        self.lock_partitions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_partitions(&self) -> std::sync::MutexGuard<'_, HashMap<PartitionKey, Partition>> {
        self.partitions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// Drop the least recently used partition nobody is holding.
fn evict_lru(partitions: &mut HashMap<PartitionKey, Partition>) {
    let victim = partitions
        .iter()
        .filter(|(_, p)| Arc::strong_count(&p.history) == 1)
        .min_by_key(|(_, p)| p.last_used)
        .map(|(k, _)| k.clone());
    if let Some(key) = victim {
        debug!(user = %key.1, family = %key.0, "evicting least recently used history");
        partitions.remove(&key);
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
