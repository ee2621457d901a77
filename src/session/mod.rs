//! Session management
//!
//! A session is the per-client unit of state: a workspace directory, a table
//! of pipeline artifacts keyed by stage, and lifecycle bookkeeping. Records
//! write through to the persistent store so sessions survive restarts; the
//! in-memory table is a cache rebuilt at boot.
//!
//! Concurrency: the session table itself takes a fast RwLock; each session
//! additionally owns an async mutex ticket that the executor holds for the
//! duration of a tool invocation, serialising per-session work while letting
//! distinct sessions proceed in parallel.

pub mod artifact;
pub mod workspace;

pub use artifact::{
    DeploymentArtifact, DockerfileArtifact, DockerfileOrigin, ImageArtifact, ManifestsArtifact,
    PipelineArtifact, Stage, StoredArtifact,
};

use crate::config::SessionConfig;
use crate::error::{AssistError, Result};
use crate::store::KvStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Terminated,
}

/// Durable session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub workspace: PathBuf,
    pub metadata: Value,
    pub status: SessionStatus,
    /// Set when the session is terminated; removal happens after the grace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated_at: Option<DateTime<Utc>>,
}

/// Summary row for `list_sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub status: SessionStatus,
    pub stages: Vec<String>,
}

#[derive(Debug)]
struct SessionEntry {
    record: RwLock<SessionRecord>,
    stages: RwLock<BTreeMap<String, StoredArtifact>>,
    /// Per-session execution ticket held by the executor per tool invocation
    ticket: Arc<tokio::sync::Mutex<()>>,
    /// Serialises artifact writes so the store and the in-memory stage table
    /// always agree on a single sequential order
    artifact_lock: tokio::sync::Mutex<()>,
}

impl SessionEntry {
    fn new(record: SessionRecord, stages: BTreeMap<String, StoredArtifact>) -> Arc<Self> {
        Arc::new(Self {
            record: RwLock::new(record),
            stages: RwLock::new(stages),
            ticket: Arc::new(tokio::sync::Mutex::new(())),
            artifact_lock: tokio::sync::Mutex::new(()),
        })
    }
}

/// Owns every session record and its workspace directory.
#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    store: KvStore,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionManager {
    /// Build the manager, creating the sessions root and rehydrating any
    /// sessions the store still holds from a previous run.
    pub fn new(config: SessionConfig, store: KvStore) -> Result<Arc<Self>> {
        std::fs::create_dir_all(config.workspace_root.join("sessions")).map_err(|e| {
            AssistError::io(format!(
                "cannot create sessions root under {}: {}",
                config.workspace_root.display(),
                e
            ))
        })?;
        let manager = Arc::new(Self {
            config,
            store,
            sessions: RwLock::new(HashMap::new()),
        });
        manager.rehydrate()?;
        Ok(manager)
    }

    fn rehydrate(&self) -> Result<()> {
        let mut restored = 0usize;
        for entry in self.store.range("session/") {
            let (key, value) = entry?;
            // meta keys are exactly session/<id>; stage keys carry /stage/
            let suffix = &key["session/".len()..];
            if suffix.contains('/') {
                continue;
            }
            let record: SessionRecord = match serde_json::from_slice(&value) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("skipping corrupt session record {}: {}", key, e);
                    continue;
                }
            };
            if record.status != SessionStatus::Active || self.is_idle_expired(&record) {
                continue;
            }
            let stages = self.load_stages(&record.session_id)?;
            let entry = SessionEntry::new(record, stages);
            self.sessions.write().insert(suffix.to_string(), entry);
            restored += 1;
        }
        if restored > 0 {
            log::info!("rehydrated {} session(s) from store", restored);
        }
        Ok(())
    }

    fn load_stages(&self, session_id: &str) -> Result<BTreeMap<String, StoredArtifact>> {
        let prefix = format!("session/{}/stage/", session_id);
        let mut stages = BTreeMap::new();
        for entry in self.store.range(&prefix) {
            let (key, value) = entry?;
            let stage_name = key[prefix.len()..].to_string();
            match serde_json::from_slice::<StoredArtifact>(&value) {
                Ok(artifact) => {
                    stages.insert(stage_name, artifact);
                }
                Err(e) => log::warn!("skipping corrupt artifact {}: {}", key, e),
            }
        }
        Ok(stages)
    }

    fn is_idle_expired(&self, record: &SessionRecord) -> bool {
        let idle = Utc::now().signed_duration_since(record.last_accessed);
        idle.to_std().map(|d| d > self.config.idle_timeout).unwrap_or(false)
    }

    /// Create a session, allocating its workspace.
    pub async fn create(&self, metadata: Value) -> Result<String> {
        {
            let sessions = self.sessions.read();
            let active = sessions
                .values()
                .filter(|e| e.record.read().status == SessionStatus::Active)
                .count();
            if active >= self.config.max_sessions {
                return Err(AssistError::resource_exhausted(format!(
                    "active session limit of {} reached",
                    self.config.max_sessions
                ))
                .with_hint("terminate an idle session or raise MAX_SESSIONS"));
            }
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let workspace = workspace::allocate(&self.config.workspace_root, &session_id)?;
        let record = SessionRecord {
            session_id: session_id.clone(),
            created_at: Utc::now(),
            last_accessed: Utc::now(),
            workspace,
            metadata,
            status: SessionStatus::Active,
            terminated_at: None,
        };
        self.persist_record(&record).await?;

        let entry = SessionEntry::new(record, BTreeMap::new());
        self.sessions.write().insert(session_id.clone(), entry);
        log::info!("created session {}", session_id);
        Ok(session_id)
    }

    async fn persist_record(&self, record: &SessionRecord) -> Result<()> {
        let key = format!("session/{}", record.session_id);
        let bytes = serde_json::to_vec(record)
            .map_err(|e| AssistError::internal(format!("serialising session record: {}", e)))?;
        self.store.put(&key, &bytes).await
    }

    fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AssistError::not_found(format!("session {} not found", session_id)))
    }

    /// Fetch a live session handle; expired or terminated sessions fail.
    pub fn get(self: &Arc<Self>, session_id: &str) -> Result<SessionView> {
        let entry = self.entry(session_id)?;
        {
            let record = entry.record.read();
            match record.status {
                SessionStatus::Terminated => {
                    return Err(AssistError::not_found(format!(
                        "session {} is terminated",
                        session_id
                    )));
                }
                SessionStatus::Expired => {
                    return Err(AssistError::precondition_failed(format!(
                        "session {} has expired",
                        session_id
                    ))
                    .with_hint("create a new session"));
                }
                SessionStatus::Active => {
                    if self.is_idle_expired(&record) {
                        drop(record);
                        entry.record.write().status = SessionStatus::Expired;
                        return Err(AssistError::precondition_failed(format!(
                            "session {} has expired",
                            session_id
                        ))
                        .with_hint("create a new session"));
                    }
                }
            }
        }
        Ok(SessionView {
            session_id: session_id.to_string(),
            workspace: entry.record.read().workspace.clone(),
            manager: Arc::clone(self),
        })
    }

    /// The per-session execution ticket; the executor holds it per call.
    pub fn ticket(&self, session_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        Ok(Arc::clone(&self.entry(session_id)?.ticket))
    }

    /// Bump `last_accessed` (monotone non-decreasing) and persist.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        let entry = self.entry(session_id)?;
        let record = {
            let mut record = entry.record.write();
            let now = Utc::now();
            if now > record.last_accessed {
                record.last_accessed = now;
            }
            record.clone()
        };
        self.persist_record(&record).await
    }

    /// Store a stage artifact, replacing any prior artifact for that stage.
    pub async fn put_artifact(&self, session_id: &str, artifact: StoredArtifact) -> Result<()> {
        let entry = self.entry(session_id)?;
        let _write_order = entry.artifact_lock.lock().await;
        let stage = artifact.artifact.stage();
        let key = format!("session/{}/stage/{}", session_id, stage.name());
        let bytes = serde_json::to_vec(&artifact)
            .map_err(|e| AssistError::internal(format!("serialising artifact: {}", e)))?;
        self.store.put(&key, &bytes).await?;
        entry
            .stages
            .write()
            .insert(stage.name().to_string(), artifact);
        self.touch(session_id).await
    }

    /// Read a stage artifact if present.
    pub fn get_artifact(&self, session_id: &str, stage: Stage) -> Result<Option<StoredArtifact>> {
        let entry = self.entry(session_id)?;
        Ok(entry.stages.read().get(stage.name()).cloned())
    }

    /// Stage names with artifacts, in pipeline order.
    pub fn completed_stages(&self, session_id: &str) -> Result<Vec<String>> {
        let entry = self.entry(session_id)?;
        let stages = entry.stages.read();
        Ok(Stage::ALL
            .iter()
            .filter(|s| stages.contains_key(s.name()))
            .map(|s| s.name().to_string())
            .collect())
    }

    /// Enumerate sessions (all statuses) for diagnostics.
    pub fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read();
        let mut rows: Vec<SessionSummary> = sessions
            .values()
            .map(|entry| {
                let record = entry.record.read();
                let stages = entry.stages.read();
                SessionSummary {
                    session_id: record.session_id.clone(),
                    created_at: record.created_at,
                    last_accessed: record.last_accessed,
                    status: record.status,
                    stages: Stage::ALL
                        .iter()
                        .filter(|s| stages.contains_key(s.name()))
                        .map(|s| s.name().to_string())
                        .collect(),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }

    /// Number of active sessions.
    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|e| e.record.read().status == SessionStatus::Active)
            .count()
    }

    /// Mark a session terminated; workspace removal happens after the grace.
    pub async fn terminate(&self, session_id: &str) -> Result<()> {
        let entry = self.entry(session_id)?;
        let record = {
            let mut record = entry.record.write();
            record.status = SessionStatus::Terminated;
            record.terminated_at = Some(Utc::now());
            record.clone()
        };
        self.persist_record(&record).await?;
        log::info!("terminated session {}", session_id);
        Ok(())
    }

    /// One sweep pass: expire idle sessions, remove terminated ones whose
    /// grace has elapsed, and compact their store records.
    pub async fn sweep(&self) -> Result<()> {
        let now = Utc::now();
        let mut to_expire = Vec::new();
        let mut to_remove = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, entry) in sessions.iter() {
                let record = entry.record.read();
                match record.status {
                    SessionStatus::Active if self.is_idle_expired(&record) => {
                        to_expire.push(id.clone());
                    }
                    SessionStatus::Terminated => {
                        let past_grace = record
                            .terminated_at
                            .map(|t| {
                                now.signed_duration_since(t)
                                    .to_std()
                                    .map(|d| d > self.config.removal_grace)
                                    .unwrap_or(false)
                            })
                            .unwrap_or(true);
                        if past_grace {
                            to_remove.push(id.clone());
                        }
                    }
                    SessionStatus::Expired => to_remove.push(id.clone()),
                    _ => {}
                }
            }
        }

        for id in to_expire {
            log::info!("session {} expired (idle)", id);
            if let Some(entry) = self.sessions.read().get(&id) {
                entry.record.write().status = SessionStatus::Expired;
            }
        }

        for id in to_remove {
            // Session leaves the active set even if directory removal fails
            self.sessions.write().remove(&id);
            self.store.delete_prefix(&format!("session/{}", id)).await?;
            if let Err(e) = workspace::remove(&self.config.workspace_root, &id) {
                log::warn!("workspace removal for {} failed: {}", id, e.message);
            }
            log::info!("removed session {}", id);
        }
        Ok(())
    }

    /// Run the idle sweeper until cancelled.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.sweep_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sweep().await {
                        log::warn!("session sweep failed: {}", e.message);
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// A tool's handle onto one session: read access to pipeline state plus the
/// bounded mutators. Owned data only, so views cross task boundaries freely.
#[derive(Clone, Debug)]
pub struct SessionView {
    session_id: String,
    workspace: PathBuf,
    manager: Arc<SessionManager>,
}

impl SessionView {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.workspace
    }

    pub fn get_artifact(&self, stage: Stage) -> Result<Option<StoredArtifact>> {
        self.manager.get_artifact(&self.session_id, stage)
    }

    pub async fn put_artifact(&self, artifact: StoredArtifact) -> Result<()> {
        self.manager.put_artifact(&self.session_id, artifact).await
    }

    pub fn completed_stages(&self) -> Result<Vec<String>> {
        self.manager.completed_stages(&self.session_id)
    }

    /// Append a line to the session's log file inside the session dir.
    pub fn append_log(&self, line: &str) -> Result<()> {
        let path = workspace::session_dir(
            &self.manager.config.workspace_root,
            &self.session_id,
        )
        .join("session.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AssistError::io(format!("cannot open session log: {}", e)))?;
        writeln!(file, "{} {}", Utc::now().to_rfc3339(), line)
            .map_err(|e| AssistError::io(format!("cannot write session log: {}", e)))?;
        Ok(())
    }

    /// Scratch directory for transient files (build contexts).
    pub fn scratch_dir(&self) -> Result<PathBuf> {
        workspace::scratch_dir(&self.manager.config.workspace_root, &self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::RepoAnalysis;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager_with(config_mod: impl FnOnce(&mut SessionConfig)) -> (TempDir, Arc<SessionManager>) {
        let dir = TempDir::new().unwrap();
        let mut config = SessionConfig {
            workspace_root: dir.path().to_path_buf(),
            ..SessionConfig::default()
        };
        config_mod(&mut config);
        let store = KvStore::temporary().unwrap();
        let manager = SessionManager::new(config, store).unwrap();
        (dir, manager)
    }

    fn analysis_artifact() -> StoredArtifact {
        StoredArtifact::new(
            PipelineArtifact::RepoAnalysis(RepoAnalysis::default()),
            "fp-analyze".into(),
        )
    }

    #[tokio::test]
    async fn create_and_get() {
        let (_dir, manager) = manager_with(|_| {});
        let id = manager.create(serde_json::json!({"client": "test"})).await.unwrap();
        let view = manager.get(&id).unwrap();
        assert!(view.workspace().is_dir());
        assert_eq!(view.completed_stages().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_session_not_found() {
        let (_dir, manager) = manager_with(|_| {});
        let err = manager.get("nope").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn session_cap_enforced() {
        let (_dir, manager) = manager_with(|c| c.max_sessions = 2);
        manager.create(Value::Null).await.unwrap();
        manager.create(Value::Null).await.unwrap();
        let err = manager.create(Value::Null).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn artifact_write_replaces_by_stage() {
        let (_dir, manager) = manager_with(|_| {});
        let id = manager.create(Value::Null).await.unwrap();
        manager.put_artifact(&id, analysis_artifact()).await.unwrap();

        let mut second = analysis_artifact();
        second.fingerprint = "fp-2".into();
        manager.put_artifact(&id, second).await.unwrap();

        let stored = manager.get_artifact(&id, Stage::Analyze).unwrap().unwrap();
        assert_eq!(stored.fingerprint, "fp-2");
        assert_eq!(manager.completed_stages(&id).unwrap(), vec!["analyze"]);
    }

    #[tokio::test]
    async fn expired_session_rejected() {
        let (_dir, manager) = manager_with(|c| c.idle_timeout = Duration::from_millis(10));
        let id = manager.create(Value::Null).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = manager.get(&id).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::PreconditionFailed);
        assert!(err.message.contains("expired"));
    }

    #[tokio::test]
    async fn terminate_then_sweep_removes() {
        let (dir, manager) = manager_with(|c| c.removal_grace = Duration::from_millis(1));
        let id = manager.create(Value::Null).await.unwrap();
        let session_path = workspace::session_dir(dir.path(), &id);
        assert!(session_path.exists());

        manager.terminate(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.sweep().await.unwrap();

        assert!(manager.get(&id).is_err());
        assert!(!session_path.exists());
    }

    #[tokio::test]
    async fn last_accessed_is_monotone() {
        let (_dir, manager) = manager_with(|_| {});
        let id = manager.create(Value::Null).await.unwrap();
        let before = manager.list()[0].last_accessed;
        manager.touch(&id).await.unwrap();
        let after = manager.list()[0].last_accessed;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn rehydrates_from_store() {
        let dir = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let store_path = store_dir.path().join("kv");
        let config = SessionConfig {
            workspace_root: dir.path().to_path_buf(),
            ..SessionConfig::default()
        };

        let id = {
            let store = KvStore::open(&store_path).unwrap();
            let manager = SessionManager::new(config.clone(), store).unwrap();
            let id = manager.create(Value::Null).await.unwrap();
            manager.put_artifact(&id, analysis_artifact()).await.unwrap();
            id
        };

        let store = KvStore::open(&store_path).unwrap();
        let manager = SessionManager::new(config, store).unwrap();
        let view = manager.get(&id).unwrap();
        assert_eq!(view.completed_stages().unwrap(), vec!["analyze"]);
    }
}
