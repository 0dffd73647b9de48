//! Identity cache: opaque Teamwork ids resolved to display names.
//!
//! A TTL-gated in-memory map with a JSON snapshot on disk. Lookups never
//! fail: an unknown id resolves to itself and flags the cache so the next
//! refresh happens early. The cache only beautifies records; correctness
//! never depends on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use inflow_core::{defaults, Result};

use crate::teamwork::TeamworkClient;

const PEOPLE_SNAPSHOT: &str = "teamwork_people.json";
const TAGS_SNAPSHOT: &str = "teamwork_tags.json";

/// TTL cache of id → display-name mappings with a disk snapshot.
pub struct IdentityCache {
    people: RwLock<HashMap<String, String>>,
    tags: RwLock<HashMap<String, String>>,
    refreshed_at: RwLock<Option<Instant>>,
    /// Set when a lookup missed; forces the next refresh check to fire.
    miss_seen: AtomicBool,
    ttl: Duration,
    snapshot_dir: PathBuf,
}

impl IdentityCache {
    /// Create a cache rooted at `snapshot_dir`, loading any snapshots
    /// left by a previous run.
    pub fn new(snapshot_dir: impl AsRef<Path>) -> Self {
        let snapshot_dir = snapshot_dir.as_ref().to_path_buf();
        let people = load_snapshot(&snapshot_dir.join(PEOPLE_SNAPSHOT));
        let tags = load_snapshot(&snapshot_dir.join(TAGS_SNAPSHOT));

        if !people.is_empty() || !tags.is_empty() {
            debug!(
                subsystem = "connector",
                op = "identity_load",
                people = people.len(),
                tags = tags.len(),
                "Loaded identity snapshots"
            );
        }

        Self {
            people: RwLock::new(people),
            tags: RwLock::new(tags),
            refreshed_at: RwLock::new(None),
            miss_seen: AtomicBool::new(false),
            ttl: Duration::from_secs(defaults::IDENTITY_TTL_SECS),
            snapshot_dir,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Display name for a person id; the id itself when unknown.
    pub async fn person_name(&self, id: &str) -> String {
        match self.people.read().await.get(id) {
            Some(name) => name.clone(),
            None => {
                self.miss_seen.store(true, Ordering::Relaxed);
                id.to_string()
            }
        }
    }

    /// Display name for a tag id; the id itself when unknown.
    pub async fn tag_name(&self, id: &str) -> String {
        match self.tags.read().await.get(id) {
            Some(name) => name.clone(),
            None => {
                self.miss_seen.store(true, Ordering::Relaxed);
                id.to_string()
            }
        }
    }

    /// Whether the maps are past their TTL or a lookup missed since the
    /// last refresh.
    pub async fn is_stale(&self) -> bool {
        if self.miss_seen.load(Ordering::Relaxed) {
            return true;
        }
        match *self.refreshed_at.read().await {
            Some(at) => at.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// Refresh from upstream when stale. Errors are logged and swallowed:
    /// a stale name is better than a failed envelope.
    pub async fn refresh_if_stale(&self, client: &TeamworkClient) {
        if !self.is_stale().await {
            return;
        }
        if let Err(e) = self.refresh(client).await {
            warn!(
                subsystem = "connector",
                op = "identity_refresh",
                error = %e,
                "Identity refresh failed, keeping cached names"
            );
        }
    }

    /// Fetch people and tags and replace the maps, snapshotting to disk.
    pub async fn refresh(&self, client: &TeamworkClient) -> Result<()> {
        let people_raw = client.list_people().await?;
        let tags_raw = client.list_tags().await?;

        let people: HashMap<String, String> = people_raw
            .iter()
            .filter_map(|p| Some((crate::id_string(p.get("id")?)?, person_display_name(p))))
            .collect();
        let tags: HashMap<String, String> = tags_raw
            .iter()
            .filter_map(|t| {
                let name = t.get("name")?.as_str()?.to_string();
                Some((crate::id_string(t.get("id")?)?, name))
            })
            .collect();

        save_snapshot(&self.snapshot_dir.join(PEOPLE_SNAPSHOT), &people);
        save_snapshot(&self.snapshot_dir.join(TAGS_SNAPSHOT), &tags);

        debug!(
            subsystem = "connector",
            op = "identity_refresh",
            people = people.len(),
            tags = tags.len(),
            "Identity maps refreshed"
        );

        *self.people.write().await = people;
        *self.tags.write().await = tags;
        *self.refreshed_at.write().await = Some(Instant::now());
        self.miss_seen.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Seed the maps directly (tests and manual tooling).
    pub async fn seed(&self, people: HashMap<String, String>, tags: HashMap<String, String>) {
        *self.people.write().await = people;
        *self.tags.write().await = tags;
        *self.refreshed_at.write().await = Some(Instant::now());
        self.miss_seen.store(false, Ordering::Relaxed);
    }
}

/// Full name from first/last, falling back to email, then a generic label.
fn person_display_name(person: &JsonValue) -> String {
    let first = person
        .get("firstName")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let last = person
        .get("lastName")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let full = format!("{first} {last}").trim().to_string();
    if !full.is_empty() {
        return full;
    }
    if let Some(email) = person.get("email").and_then(|v| v.as_str()) {
        if !email.is_empty() {
            return email.to_string();
        }
    }
    let id = person
        .get("id")
        .and_then(crate::id_string)
        .unwrap_or_default();
    format!("User {id}")
}

fn load_snapshot(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

fn save_snapshot(path: &Path, map: &HashMap<String, String>) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(map) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!(
                    subsystem = "connector",
                    op = "identity_snapshot",
                    path = %path.display(),
                    error = %e,
                    "Could not write identity snapshot"
                );
            }
        }
        Err(e) => warn!(
            subsystem = "connector",
            op = "identity_snapshot",
            error = %e,
            "Could not serialize identity snapshot"
        ),
    }
}
