//! In-memory fakes for the identity provider and the file service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{AppError, Result};
use crate::infrastructure::{DriveApi, DriveFile, EntryKind, IdentityProvider, TokenGrant, FOLDER_MIME};

/// Identity provider that hands out `token-1`, `token-2`, ...
#[derive(Default)]
pub struct FakeIdentity {
    pub authorize_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub revoke_calls: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub fail_authorize: AtomicBool,
    issued: AtomicUsize,
    delay: Duration,
}

impl FakeIdentity {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn grant(&self) -> TokenGrant {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        TokenGrant {
            access_token: format!("token-{n}"),
            expires_in: chrono::Duration::hours(1),
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn authorize(&self) -> Result<TokenGrant> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(AppError::NotAuthenticated);
        }
        Ok(self.grant())
    }

    async fn refresh(&self) -> Result<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(AppError::RemoteStatus {
                status: 400,
                message: "invalid_grant".into(),
            });
        }
        Ok(self.grant())
    }

    async fn revoke(&self, _access_token: &str) -> Result<()> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
struct Entry {
    name: String,
    parent: Option<String>,
    mime_type: String,
    data: Vec<u8>,
}

/// File service kept in a map, with per-operation call counters.
#[derive(Default)]
pub struct MemoryDrive {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub downloads: AtomicUsize,
    pub folder_creates: AtomicUsize,
    /// Every call fails with a network-style error while set.
    pub offline: AtomicBool,
    /// Every call is rejected as unauthenticated while set.
    pub unauthorized: AtomicBool,
    latency: Duration,
}

impl MemoryDrive {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    async fn call(&self) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(AppError::NotAuthenticated);
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::RemoteStatus {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }

    fn insert(&self, name: &str, parent: Option<&str>, mime_type: &str, data: Vec<u8>) -> DriveFile {
        let id = format!("f{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.entries.lock().unwrap().insert(
            id.clone(),
            Entry {
                name: name.to_string(),
                parent: parent.map(str::to_string),
                mime_type: mime_type.to_string(),
                data,
            },
        );
        DriveFile {
            id,
            name: name.to_string(),
            mime_type: mime_type.to_string(),
        }
    }

    /// Place a file directly, bypassing counters.
    pub fn seed_file(&self, name: &str, parent: &str, data: &[u8]) -> String {
        self.insert(name, Some(parent), "application/json", data.to_vec()).id
    }

    /// Id of the first entry with this name.
    pub fn id_of(&self, name: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(id, _)| id.clone())
    }

    /// Content of the first entry with this name.
    pub fn content_of(&self, name: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .find(|e| e.name == name)
            .map(|e| e.data.clone())
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.name == name)
            .count()
    }
}

#[async_trait]
impl DriveApi for MemoryDrive {
    async fn find(
        &self,
        name: &str,
        parent: Option<&str>,
        kind: EntryKind,
    ) -> Result<Option<DriveFile>> {
        self.call().await?;
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|(_, e)| e.name == name && e.parent.as_deref() == parent)
            .filter(|(_, e)| (e.mime_type == FOLDER_MIME) == (kind == EntryKind::Folder))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(id, e)| DriveFile {
                id: id.clone(),
                name: e.name.clone(),
                mime_type: e.mime_type.clone(),
            }))
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<DriveFile> {
        self.call().await?;
        self.folder_creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(name, parent, FOLDER_MIME, Vec::new()))
    }

    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile> {
        self.call().await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(name, Some(parent), mime_type, data))
    }

    async fn update_file(&self, id: &str, _mime_type: &str, data: Vec<u8>) -> Result<()> {
        self.call().await?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(id).ok_or_else(|| AppError::not_found(id))?;
        entry.data = data;
        Ok(())
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        self.call().await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(id))
    }

    async fn list_files(&self, parent: &str) -> Result<Vec<DriveFile>> {
        self.call().await?;
        let entries = self.entries.lock().unwrap();
        let mut files: Vec<DriveFile> = entries
            .iter()
            .filter(|(_, e)| e.parent.as_deref() == Some(parent) && e.mime_type != FOLDER_MIME)
            .map(|(id, e)| DriveFile {
                id: id.clone(),
                name: e.name.clone(),
                mime_type: e.mime_type.clone(),
            })
            .collect();
        files.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(files)
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        self.call().await?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .get(id)
            .map(|e| e.data.clone())
            .ok_or_else(|| AppError::not_found(id))
    }
}
