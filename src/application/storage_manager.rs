//! Sync orchestration: the storage API the chat client talks to.
//!
//! Writes always land in the local cache first. While connected, each
//! mutation is queued and a debounced drain pushes it to the remote store. A
//! full sync merges both sides by `last_modified` and writes the result back
//! to both.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;

use crate::domain::{
    merge_sets, AppConfig, AppError, ArtifactPayload, ArtifactRecord, ArtifactReference,
    Conversation, ModeEvent, Result, SyncEvent, SyncMode, SyncOperation, SyncStatus,
};
use crate::infrastructure::{DriveApi, LocalCache};

use super::auth_manager::AuthTokenManager;
use super::event_bus::EventBus;
use super::remote_store::RemoteStore;
use super::scheduler::PeriodicTask;
use super::sync_queue::{DrainReport, SyncQueue};

const META_SYNC_ENABLED: &str = "sync.enabled";
const META_LAST_SYNC: &str = "sync.last_sync_time";

const OCTET_STREAM: &str = "application/octet-stream";

/// Result of an artifact upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded(ArtifactReference),
    /// Upload failed; the bytes exist only in the local cache.
    Temporary { name: String, reason: String },
}

/// Background work started by [`SyncOrchestrator::start_background`].
struct Background {
    drain: PeriodicTask,
    token: PeriodicTask,
    debounce_shutdown: mpsc::Sender<()>,
    debounce: JoinHandle<()>,
}

pub struct SyncOrchestrator {
    cache: Arc<LocalCache>,
    auth: Arc<AuthTokenManager>,
    remote: Arc<RemoteStore>,
    queue: Arc<SyncQueue>,
    events: EventBus,
    mode: Mutex<SyncMode>,
    drain_requested: Notify,
    background: Mutex<Option<Background>>,
    config: AppConfig,
}

impl SyncOrchestrator {
    #[must_use]
    pub fn new(
        config: AppConfig,
        cache: Arc<LocalCache>,
        auth: Arc<AuthTokenManager>,
        drive: Arc<dyn DriveApi>,
    ) -> Self {
        let events = EventBus::default();
        let remote = Arc::new(RemoteStore::new(drive, config.remote.app_folder.clone()));
        let queue = Arc::new(SyncQueue::new(
            Arc::clone(&cache),
            Arc::clone(&remote),
            events.clone(),
        ));

        Self {
            cache,
            auth,
            remote,
            queue,
            events,
            mode: Mutex::new(SyncMode::Offline),
            drain_requested: Notify::new(),
            background: Mutex::new(None),
            config,
        }
    }

    /// Restore the persisted token and, when sync was enabled last session
    /// and a token is available, reconnect.
    ///
    /// Reconnect failures are reported through events and the returned
    /// status, not as an error.
    pub async fn init(&self) -> Result<SyncStatus> {
        let authenticated = self.auth.restore()?;
        let enabled = self.sync_enabled()?;
        tracing::info!(authenticated, sync_enabled = enabled, "Storage initialized");

        if enabled && self.config.sync.auto_connect && self.auth.get_token().await.is_some() {
            if let Err(e) = self.go_online().await {
                tracing::warn!(error = %e, "Automatic reconnect failed");
            }
        }

        self.get_sync_status()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub const fn auth(&self) -> &Arc<AuthTokenManager> {
        &self.auth
    }

    /// Current connectivity mode.
    #[must_use]
    pub fn mode(&self) -> SyncMode {
        self.mode.lock().map_or(SyncMode::Error, |mode| *mode)
    }

    fn transition(&self, event: ModeEvent) -> Result<SyncMode> {
        let (from, to) = {
            let mut mode = self.mode.lock().map_err(|_| AppError::InvalidData {
                message: "sync mode lock poisoned".into(),
            })?;
            let from = *mode;
            let to = from.apply(event)?;
            *mode = to;
            (from, to)
        };

        if from != to {
            tracing::info!(from = %from, to = %to, "Sync mode changed");
            self.events.emit(SyncEvent::SyncModeChanged { from, to });
        }
        Ok(to)
    }

    fn sync_enabled(&self) -> Result<bool> {
        Ok(self.cache.get_meta(META_SYNC_ENABLED)?.as_deref() == Some("true"))
    }

    // ---------------------------------------------------------------------
    // conversations
    // ---------------------------------------------------------------------

    /// Persist a conversation locally and, while connected, queue it for the
    /// remote store.
    pub fn save_conversation(&self, mut conv: Conversation) -> Result<Conversation> {
        self.rewrite_inline_artifacts(&mut conv)?;
        self.cache.put_conversation(&conv)?;

        if self.mode().is_connected() {
            self.queue.enqueue(SyncOperation::SaveConversation, &conv.id)?;
            self.request_drain();
        }

        tracing::debug!(conversation = %conv.id, "Saved conversation");
        Ok(conv)
    }

    /// Replace inline bytes by their remote reference when one is known, or
    /// by a placeholder when the payload is too large to persist.
    fn rewrite_inline_artifacts(&self, conv: &mut Conversation) -> Result<()> {
        let threshold = self.config.remote.inline_threshold_bytes;

        for payload in conv.artifacts_mut() {
            let ArtifactPayload::Inline {
                name,
                mime_type,
                data,
            } = payload
            else {
                continue;
            };

            let cached = self.cache.get_artifact(name)?;
            if let Some(reference) = cached.as_ref().and_then(|r| r.reference.clone()) {
                *payload = ArtifactPayload::Remote { reference };
                continue;
            }

            if data.len() > threshold {
                if cached.is_none() {
                    self.cache.put_artifact(&ArtifactRecord {
                        name: name.clone(),
                        mime_type: mime_type.clone(),
                        data: std::mem::take(data),
                        reference: None,
                        temporary: true,
                        cached_at: Utc::now(),
                    })?;
                }
                *payload = ArtifactPayload::pending(name.clone());
            }
        }

        Ok(())
    }

    /// Every locally stored conversation, keyed by id.
    pub fn load_conversations(&self) -> Result<HashMap<String, Conversation>> {
        self.cache.all_conversations()
    }

    /// Local conversations, most recently modified first.
    pub fn recent_conversations(&self) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<_> = self.cache.all_conversations()?.into_values().collect();
        conversations.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(conversations)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.cache.get_conversation(id)
    }

    /// Delete locally and queue the remote delete. The delete is queued even
    /// while offline so the next connect propagates it.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        let existed = self.cache.delete_conversation(id)?;
        self.cache
            .remove_queue_entries_for(SyncOperation::SaveConversation, id)?;
        self.queue.enqueue(SyncOperation::DeleteConversation, id)?;

        if self.mode().is_connected() {
            self.request_drain();
        }

        tracing::debug!(conversation = id, existed, "Deleted conversation");
        Ok(existed)
    }

    // ---------------------------------------------------------------------
    // artifacts
    // ---------------------------------------------------------------------

    /// Upload artifact bytes. On a remote failure the bytes are kept in the
    /// local cache, flagged temporary.
    pub async fn upload_artifact(
        &self,
        data: Vec<u8>,
        name: &str,
        mime_type: &str,
    ) -> Result<UploadOutcome> {
        let mut record = ArtifactRecord {
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            data,
            reference: None,
            temporary: true,
            cached_at: Utc::now(),
        };

        let reason = if self.mode().is_connected() || self.auth.is_authenticated() {
            match self
                .remote
                .upload_artifact(record.data.clone(), name, mime_type)
                .await
            {
                Ok(reference) => {
                    record.reference = Some(reference.clone());
                    record.temporary = false;
                    self.cache.put_artifact(&record)?;
                    return Ok(UploadOutcome::Uploaded(reference));
                }
                Err(e) if e.is_recoverable() => e.to_string(),
                Err(e) => return Err(e),
            }
        } else {
            AppError::NotAuthenticated.to_string()
        };

        tracing::warn!(artifact = name, reason = %reason, "Artifact kept as temporary");
        self.cache.put_artifact(&record)?;
        Ok(UploadOutcome::Temporary {
            name: name.to_string(),
            reason,
        })
    }

    /// Artifact bytes, from the local cache when present.
    pub async fn download_artifact(&self, reference: &ArtifactReference) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.find_artifact_by_reference(reference)? {
            return Ok(cached.data);
        }

        let data = self.remote.download_artifact(reference).await?;
        self.cache.put_artifact(&ArtifactRecord {
            name: reference.id().to_string(),
            mime_type: OCTET_STREAM.to_string(),
            data: data.clone(),
            reference: Some(reference.clone()),
            temporary: false,
            cached_at: Utc::now(),
        })?;
        Ok(data)
    }

    // ---------------------------------------------------------------------
    // sync
    // ---------------------------------------------------------------------

    pub fn get_sync_status(&self) -> Result<SyncStatus> {
        let mode = self.mode();
        let last_sync_time = self
            .cache
            .get_meta(META_LAST_SYNC)?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        Ok(SyncStatus {
            mode,
            authenticated: self.auth.is_authenticated(),
            syncing: mode == SyncMode::Syncing || self.queue.is_draining(),
            last_sync_time,
            pending_operations: self.queue.pending()?,
        })
    }

    /// Acquire a token if needed, then go online. Going online always runs
    /// one full sync; if it fails the mode falls back to offline. Already
    /// connected (or connecting) is a no-op.
    pub async fn connect_google_drive(&self) -> Result<()> {
        let mode = self.mode();
        if matches!(mode, SyncMode::Online | SyncMode::Syncing | SyncMode::Connecting) {
            tracing::debug!(mode = %mode, "Already connected");
            return Ok(());
        }

        if self.auth.get_token().await.is_none() {
            self.auth.authorize().await?;
            self.events.emit(SyncEvent::AuthSuccess);
        }

        self.go_online().await?;
        self.cache.set_meta(META_SYNC_ENABLED, "true")
    }

    async fn go_online(&self) -> Result<()> {
        self.transition(ModeEvent::Connect)?;

        if let Err(e) = self.full_sync().await {
            self.transition(ModeEvent::Disconnect)?;
            return Err(e);
        }
        Ok(())
    }

    /// Go offline, stop background work and sign out.
    pub async fn disconnect_google_drive(&self) -> Result<()> {
        self.stop_background().await;
        self.transition(ModeEvent::Disconnect)?;
        self.cache.set_meta(META_SYNC_ENABLED, "false")?;
        self.remote.reset().await;
        self.auth.logout().await
    }

    /// Merge local and remote conversation sets, write the merged set to
    /// both sides and drain the queue.
    pub async fn full_sync(&self) -> Result<()> {
        self.transition(ModeEvent::SyncStarted)?;
        self.events.emit(SyncEvent::FullSyncStarted);

        match self.run_full_sync().await {
            Ok(count) => {
                let finished_at = Utc::now();
                self.cache
                    .set_meta(META_LAST_SYNC, &finished_at.timestamp_millis().to_string())?;
                self.transition(ModeEvent::SyncSucceeded)?;
                self.events.emit(SyncEvent::FullSyncCompleted {
                    conversations: count,
                    finished_at,
                });
                tracing::info!(conversations = count, "Full sync completed");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Full sync failed");
                self.events.emit(SyncEvent::SyncError {
                    message: e.to_string(),
                });
                self.transition(ModeEvent::SyncFailed)?;
                Err(e)
            }
        }
    }

    async fn run_full_sync(&self) -> Result<usize> {
        let remote: HashMap<String, Conversation> = self
            .remote
            .list_conversations()
            .await?
            .into_iter()
            .map(|conv| (conv.id.clone(), conv))
            .collect();

        let mut pending_deletes = Vec::new();
        for id in remote.keys() {
            if self
                .cache
                .has_queue_entry(SyncOperation::DeleteConversation, id)?
            {
                pending_deletes.push(id.clone());
            }
        }
        let remote: HashMap<_, _> = remote
            .into_iter()
            .filter(|(id, _)| !pending_deletes.contains(id))
            .collect();

        self.retry_temporary_artifacts().await?;

        let local = self.cache.all_conversations()?;
        tracing::debug!(
            local = local.len(),
            remote = remote.len(),
            "Merging conversation sets"
        );

        let merged = merge_sets(local, remote);
        for conv in merged.values() {
            self.cache.put_conversation(conv)?;
            self.queue.enqueue(SyncOperation::SaveConversation, &conv.id)?;
        }

        let report = self.queue.drain().await?;
        if report.unauthenticated {
            return Err(AppError::NotAuthenticated);
        }
        Ok(merged.len())
    }

    /// Upload artifacts that were kept as temporary, then point every
    /// placeholder for them at the new reference. Conversations that change
    /// are queued for the remote store. Returns how many were uploaded.
    async fn retry_temporary_artifacts(&self) -> Result<usize> {
        let pending = self.cache.temporary_artifacts()?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut uploaded = HashMap::new();
        for mut record in pending {
            match self
                .remote
                .upload_artifact(record.data.clone(), &record.name, &record.mime_type)
                .await
            {
                Ok(reference) => {
                    record.reference = Some(reference.clone());
                    record.temporary = false;
                    self.cache.put_artifact(&record)?;
                    uploaded.insert(record.name, reference);
                }
                Err(AppError::NotAuthenticated) => break,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(artifact = %record.name, error = %e, "Artifact upload retry failed");
                }
                Err(e) => return Err(e),
            }
        }
        if uploaded.is_empty() {
            return Ok(0);
        }

        for mut conv in self.cache.all_conversations()?.into_values() {
            let mut changed = false;
            for payload in conv.artifacts_mut() {
                let reference = match &*payload {
                    ArtifactPayload::Pending { name, .. } => uploaded.get(name.as_str()).cloned(),
                    _ => None,
                };
                if let Some(reference) = reference {
                    *payload = ArtifactPayload::Remote { reference };
                    changed = true;
                }
            }
            if changed {
                conv.touch();
                self.cache.put_conversation(&conv)?;
                self.queue.enqueue(SyncOperation::SaveConversation, &conv.id)?;
            }
        }

        tracing::info!(count = uploaded.len(), "Uploaded temporary artifacts");
        Ok(uploaded.len())
    }

    /// Retry temporary artifacts, then drain the queue. A credential
    /// rejection takes the orchestrator offline.
    async fn push_pending(&self) -> Result<DrainReport> {
        self.retry_temporary_artifacts().await?;
        let report = self.queue.drain().await?;
        if report.unauthenticated {
            self.drop_credentials();
        }
        Ok(report)
    }

    fn drop_credentials(&self) {
        tracing::warn!("Remote rejected credentials; going offline");
        if let Err(e) = self.auth.clear() {
            tracing::error!(error = %e, "Failed to clear token");
        }
        if let Err(e) = self.transition(ModeEvent::Disconnect) {
            tracing::error!(error = %e, "Failed to go offline");
        }
    }

    /// Push pending work now.
    pub async fn drain_now(&self) -> Result<DrainReport> {
        self.push_pending().await
    }

    /// Ask the background loop to drain soon.
    pub fn request_drain(&self) {
        self.drain_requested.notify_one();
    }

    // ---------------------------------------------------------------------
    // background work
    // ---------------------------------------------------------------------

    /// Start the periodic drain, the debounced drain and the token check.
    /// Calling it again while running is a no-op.
    pub fn start_background(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.background.lock().map_err(|_| AppError::InvalidData {
            message: "background lock poisoned".into(),
        })?;
        if slot.is_some() {
            return Ok(());
        }

        let orchestrator = Arc::clone(self);
        let drain = PeriodicTask::spawn(
            "sync-drain",
            Duration::from_secs(self.config.sync.drain_interval_secs),
            move || {
                let orchestrator = Arc::clone(&orchestrator);
                async move { orchestrator.drain_if_connected().await }
            },
        );

        let token = self.auth.start_background(Duration::from_secs(
            self.config.auth.refresh_check_interval_secs,
        ));

        let (debounce_shutdown, mut shutdown_rx) = mpsc::channel::<()>(1);
        let debounce_delay = Duration::from_millis(self.config.sync.drain_debounce_ms);
        let orchestrator = Arc::clone(self);
        let debounce = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    () = orchestrator.drain_requested.notified() => {
                        tokio::time::sleep(debounce_delay).await;
                        orchestrator.drain_if_connected().await;
                    }
                }
            }
        });

        *slot = Some(Background {
            drain,
            token,
            debounce_shutdown,
            debounce,
        });
        tracing::debug!("Background sync started");
        Ok(())
    }

    async fn drain_if_connected(&self) {
        if !self.mode().is_connected() {
            return;
        }
        if let Err(e) = self.push_pending().await {
            tracing::error!(error = %e, "Background drain failed");
        }
    }

    /// Stop all background work and wait for it to finish.
    pub async fn stop_background(&self) {
        let background = self
            .background
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());

        let Some(background) = background else {
            return;
        };

        background.drain.stop().await;
        background.token.stop().await;
        let _ = background.debounce_shutdown.send(()).await;
        if let Err(e) = background.debounce.await {
            tracing::error!(error = ?e, "Debounced drain task panicked");
        }
        tracing::debug!("Background sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::domain::{ContentPart, Message, Role};
    use crate::infrastructure::{CacheTokenStore, EntryKind};
    use crate::test_support::{FakeIdentity, MemoryDrive};

    struct Harness {
        orchestrator: Arc<SyncOrchestrator>,
        drive: Arc<MemoryDrive>,
        cache: Arc<LocalCache>,
    }

    fn harness() -> Harness {
        let cache = Arc::new(LocalCache::open_in_memory().unwrap());
        let drive = Arc::new(MemoryDrive::default());
        let auth = Arc::new(AuthTokenManager::new(
            Arc::new(FakeIdentity::default()),
            Arc::new(CacheTokenStore::new(cache.clone())),
            Duration::from_secs(5),
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            AppConfig::default(),
            cache.clone(),
            auth,
            drive.clone(),
        ));
        Harness {
            orchestrator,
            drive,
            cache,
        }
    }

    fn remote_copy(drive: &MemoryDrive, id: &str) -> Conversation {
        let bytes = drive.content_of(&format!("{id}.json")).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn drain_events(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_offline_edit_wins_after_reconnect() {
        let h = harness();
        let o = &h.orchestrator;

        let mut conv = Conversation::with_id("c1", "Test");
        conv.push_message(Message::text(Role::User, "hello"));
        o.save_conversation(conv.clone()).unwrap();

        let loaded = o.load_conversations().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("c1"));

        o.connect_google_drive().await.unwrap();
        assert_eq!(o.mode(), SyncMode::Online);
        assert_eq!(remote_copy(&h.drive, "c1").messages.len(), 1);

        o.disconnect_google_drive().await.unwrap();
        assert_eq!(o.mode(), SyncMode::Offline);

        conv.push_message(Message::text(Role::Assistant, "hi there"));
        o.save_conversation(conv.clone()).unwrap();
        assert_eq!(remote_copy(&h.drive, "c1").messages.len(), 1);

        o.connect_google_drive().await.unwrap();
        o.full_sync().await.unwrap();

        let local = o.get_conversation("c1").unwrap().unwrap();
        let remote = remote_copy(&h.drive, "c1");
        assert_eq!(local.messages.len(), 2);
        assert_eq!(remote, local);
        assert_eq!(local.last_modified, conv.last_modified);
    }

    #[tokio::test]
    async fn test_newer_remote_copy_replaces_local() {
        let h = harness();
        let o = &h.orchestrator;

        let older = Conversation::with_id("c1", "local title");
        o.save_conversation(older.clone()).unwrap();

        let mut newer = older.clone();
        newer.set_title("remote title");
        let root = h.drive.create_folder("ChatClientData", None).await.unwrap();
        let folder = h
            .drive
            .create_folder("conversations", Some(&root.id))
            .await
            .unwrap();
        h.drive
            .seed_file("c1.json", &folder.id, &serde_json::to_vec(&newer).unwrap());

        o.connect_google_drive().await.unwrap();

        assert_eq!(o.get_conversation("c1").unwrap().unwrap().title, "remote title");
    }

    #[tokio::test]
    async fn test_failed_initial_sync_reverts_to_offline() {
        let h = harness();
        let o = &h.orchestrator;
        let mut events = o.subscribe();
        h.drive.offline.store(true, Ordering::SeqCst);

        assert!(o.connect_google_drive().await.is_err());
        assert_eq!(o.mode(), SyncMode::Offline);

        let events = drain_events(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::SyncError { .. })));
        assert_eq!(
            events.last(),
            Some(&SyncEvent::SyncModeChanged {
                from: SyncMode::Error,
                to: SyncMode::Offline
            })
        );
    }

    #[tokio::test]
    async fn test_connect_emits_lifecycle_in_order() {
        let h = harness();
        let o = &h.orchestrator;
        let mut events = o.subscribe();

        o.connect_google_drive().await.unwrap();

        let names: Vec<_> = drain_events(&mut events)
            .iter()
            .map(SyncEvent::name)
            .filter(|n| *n != "sync-started" && *n != "sync-completed")
            .collect();
        assert_eq!(
            names,
            [
                "sync-mode-changed",
                "sync-mode-changed",
                "full-sync-started",
                "sync-mode-changed",
                "full-sync-completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_while_online_is_a_no_op() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();
        let folders = h.drive.folder_creates.load(Ordering::SeqCst);
        let mut events = o.subscribe();

        o.connect_google_drive().await.unwrap();

        assert_eq!(o.mode(), SyncMode::Online);
        assert_eq!(h.drive.folder_creates.load(Ordering::SeqCst), folders);
        assert!(drain_events(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_credentials_during_drain_go_offline() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();
        o.save_conversation(Conversation::with_id("c1", "x")).unwrap();
        let mut events = o.subscribe();

        h.drive.unauthorized.store(true, Ordering::SeqCst);
        let report = o.drain_now().await.unwrap();

        assert!(report.unauthenticated);
        let status = o.get_sync_status().unwrap();
        assert_eq!(status.mode, SyncMode::Offline);
        assert!(!status.authenticated);
        assert_eq!(status.pending_operations, 1);

        let events = drain_events(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::SyncError { .. })));
        assert!(events.contains(&SyncEvent::SyncModeChanged {
            from: SyncMode::Online,
            to: SyncMode::Offline
        }));
    }

    #[tokio::test]
    async fn test_rejected_credentials_fail_full_sync() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();

        h.drive.unauthorized.store(true, Ordering::SeqCst);
        let err = o.full_sync().await.unwrap_err();

        assert!(matches!(err, AppError::NotAuthenticated));
        assert_eq!(o.mode(), SyncMode::Error);
    }

    #[tokio::test]
    async fn test_full_sync_requires_connection() {
        let h = harness();
        let err = h.orchestrator.full_sync().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert_eq!(h.orchestrator.mode(), SyncMode::Offline);
    }

    #[tokio::test]
    async fn test_save_while_online_is_queued() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();

        o.save_conversation(Conversation::with_id("c2", "Queued")).unwrap();
        assert_eq!(o.get_sync_status().unwrap().pending_operations, 1);

        o.drain_now().await.unwrap();
        assert_eq!(o.get_sync_status().unwrap().pending_operations, 0);
        assert_eq!(remote_copy(&h.drive, "c2").title, "Queued");
    }

    #[tokio::test]
    async fn test_offline_delete_propagates_and_is_not_resurrected() {
        let h = harness();
        let o = &h.orchestrator;
        o.save_conversation(Conversation::with_id("c1", "Doomed")).unwrap();
        o.connect_google_drive().await.unwrap();
        assert!(h.drive.content_of("c1.json").is_some());

        o.disconnect_google_drive().await.unwrap();
        assert!(o.delete_conversation("c1").unwrap());
        assert_eq!(o.get_sync_status().unwrap().pending_operations, 1);

        o.connect_google_drive().await.unwrap();

        assert!(o.get_conversation("c1").unwrap().is_none());
        assert!(h.drive.content_of("c1.json").is_none());
        assert_eq!(o.get_sync_status().unwrap().pending_operations, 0);
    }

    #[tokio::test]
    async fn test_delete_twice_never_fails() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();
        o.save_conversation(Conversation::with_id("c1", "x")).unwrap();
        o.drain_now().await.unwrap();

        assert!(o.delete_conversation("c1").unwrap());
        o.drain_now().await.unwrap();
        assert!(!o.delete_conversation("c1").unwrap());
        let report = o.drain_now().await.unwrap();
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_inline_artifacts_are_rewritten_before_persisting() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();

        let big = vec![7u8; 70 * 1024];
        let reference = match o
            .upload_artifact(vec![1, 2, 3], "img_1.png", "image/png")
            .await
            .unwrap()
        {
            UploadOutcome::Uploaded(reference) => reference,
            other => panic!("unexpected outcome: {other:?}"),
        };

        let mut conv = Conversation::with_id("c1", "Artifacts");
        conv.push_message(Message::parts(
            Role::User,
            vec![
                ContentPart::Image {
                    artifact: ArtifactPayload::Inline {
                        name: "img_1.png".into(),
                        mime_type: "image/png".into(),
                        data: vec![1, 2, 3],
                    },
                },
                ContentPart::Audio {
                    artifact: ArtifactPayload::Inline {
                        name: "rec_1.webm".into(),
                        mime_type: "audio/webm".into(),
                        data: big.clone(),
                    },
                },
                ContentPart::Image {
                    artifact: ArtifactPayload::Inline {
                        name: "tiny.png".into(),
                        mime_type: "image/png".into(),
                        data: vec![9],
                    },
                },
            ],
        ));

        o.save_conversation(conv).unwrap();
        let mut stored = o.get_conversation("c1").unwrap().unwrap();
        let payloads: Vec<_> = stored.artifacts_mut().map(|p| p.clone()).collect();

        assert_eq!(payloads[0], ArtifactPayload::Remote { reference });
        assert_eq!(payloads[1], ArtifactPayload::pending("rec_1.webm"));
        assert!(matches!(payloads[2], ArtifactPayload::Inline { .. }));

        let kept = h.cache.get_artifact("rec_1.webm").unwrap().unwrap();
        assert!(kept.temporary);
        assert_eq!(kept.data, big);
    }

    #[tokio::test]
    async fn test_placeholder_replaced_once_artifact_uploads() {
        let h = harness();
        let o = &h.orchestrator;
        let big = vec![3u8; 70 * 1024];

        let mut conv = Conversation::with_id("c1", "Voice note");
        conv.push_message(Message::parts(
            Role::User,
            vec![ContentPart::Audio {
                artifact: ArtifactPayload::Inline {
                    name: "rec_2.webm".into(),
                    mime_type: "audio/webm".into(),
                    data: big.clone(),
                },
            }],
        ));
        let saved = o.save_conversation(conv).unwrap();

        o.connect_google_drive().await.unwrap();

        let record = h.cache.get_artifact("rec_2.webm").unwrap().unwrap();
        assert!(!record.temporary);
        let reference = record.reference.unwrap();
        assert_eq!(h.drive.content_of("rec_2.webm").unwrap(), big);

        let mut stored = o.get_conversation("c1").unwrap().unwrap();
        let payloads: Vec<_> = stored.artifacts_mut().map(|p| p.clone()).collect();
        assert_eq!(payloads, [ArtifactPayload::Remote { reference }]);
        assert!(stored.last_modified > saved.last_modified);
        assert_eq!(remote_copy(&h.drive, "c1"), stored);
        assert_eq!(o.get_sync_status().unwrap().pending_operations, 0);
    }

    #[tokio::test]
    async fn test_failed_upload_is_temporary() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();
        h.drive.offline.store(true, Ordering::SeqCst);

        let outcome = o
            .upload_artifact(vec![1, 2, 3], "doc.pdf", "application/pdf")
            .await
            .unwrap();

        assert!(matches!(outcome, UploadOutcome::Temporary { .. }));
        let record = h.cache.get_artifact("doc.pdf").unwrap().unwrap();
        assert!(record.temporary);
        assert!(record.reference.is_none());
    }

    #[tokio::test]
    async fn test_upload_offline_without_token_is_temporary() {
        let h = harness();
        let outcome = h
            .orchestrator
            .upload_artifact(vec![1], "a.bin", OCTET_STREAM)
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::Temporary { .. }));
        assert_eq!(h.drive.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_prefers_cache() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();
        let bytes: Vec<u8> = (0..=255).rev().collect();

        let UploadOutcome::Uploaded(reference) = o
            .upload_artifact(bytes.clone(), "blob.bin", OCTET_STREAM)
            .await
            .unwrap()
        else {
            panic!("upload failed");
        };

        assert_eq!(o.download_artifact(&reference).await.unwrap(), bytes);
        assert_eq!(h.drive.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_fetches_and_caches_remote_bytes() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();

        let folder = h
            .drive
            .find("artifacts", h.drive.id_of("ChatClientData").as_deref(), EntryKind::Folder)
            .await
            .unwrap()
            .unwrap();
        let id = h.drive.seed_file("other-device.png", &folder.id, &[4, 5, 6]);
        let reference = ArtifactReference::drive(id);

        assert_eq!(o.download_artifact(&reference).await.unwrap(), vec![4, 5, 6]);
        assert_eq!(o.download_artifact(&reference).await.unwrap(), vec![4, 5, 6]);
        assert_eq!(h.drive.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_reports_last_sync_time() {
        let h = harness();
        let o = &h.orchestrator;
        let before = o.get_sync_status().unwrap();
        assert_eq!(before.mode, SyncMode::Offline);
        assert!(before.last_sync_time.is_none());

        o.connect_google_drive().await.unwrap();

        let after = o.get_sync_status().unwrap();
        assert_eq!(after.mode, SyncMode::Online);
        assert!(after.authenticated);
        assert!(!after.syncing);
        assert!(after.last_sync_time.is_some());
    }

    #[tokio::test]
    async fn test_init_reconnects_when_sync_was_enabled() {
        let h = harness();
        h.orchestrator.connect_google_drive().await.unwrap();

        // a fresh orchestrator over the same cache, as after a restart
        let auth = Arc::new(AuthTokenManager::new(
            Arc::new(FakeIdentity::default()),
            Arc::new(CacheTokenStore::new(h.cache.clone())),
            Duration::from_secs(5),
        ));
        let restarted = SyncOrchestrator::new(
            AppConfig::default(),
            h.cache.clone(),
            auth,
            h.drive.clone(),
        );

        let status = restarted.init().await.unwrap();
        assert_eq!(status.mode, SyncMode::Online);
    }

    #[tokio::test]
    async fn test_init_stays_offline_when_never_enabled() {
        let h = harness();
        let status = h.orchestrator.init().await.unwrap();
        assert_eq!(status.mode, SyncMode::Offline);
        assert_eq!(h.drive.folder_creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_drains_after_debounce() {
        let h = harness();
        let o = &h.orchestrator;
        o.connect_google_drive().await.unwrap();
        o.start_background().unwrap();

        o.save_conversation(Conversation::with_id("c9", "Later")).unwrap();
        assert!(h.drive.content_of("c9.json").is_none());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(h.drive.content_of("c9.json").is_some());

        o.stop_background().await;
    }
}
