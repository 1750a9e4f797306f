//! Conversation and artifact storage on the remote file service.
//!
//! Layout under the user's drive:
//!
//! ```text
//! <app folder>/
//!   conversations/<conversation id>.json
//!   artifacts/<generated filename>
//! ```
//!
//! Folders are found or created on first use and remembered afterwards.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{AppError, ArtifactReference, Conversation, ReferenceKind, Result};
use crate::infrastructure::{DriveApi, EntryKind};

pub const CONVERSATIONS_FOLDER: &str = "conversations";
pub const ARTIFACTS_FOLDER: &str = "artifacts";

const JSON_MIME: &str = "application/json";

#[derive(Debug, Clone)]
struct Folders {
    conversations: String,
    artifacts: String,
}

/// Remote side of the sync engine.
pub struct RemoteStore {
    drive: Arc<dyn DriveApi>,
    app_folder: String,
    folders: Mutex<Option<Folders>>,
}

impl RemoteStore {
    #[must_use]
    pub fn new(drive: Arc<dyn DriveApi>, app_folder: impl Into<String>) -> Self {
        Self {
            drive,
            app_folder: app_folder.into(),
            folders: Mutex::new(None),
        }
    }

    /// Resolve the folder hierarchy, creating missing levels.
    ///
    /// The lock is held across the lookups so two first callers cannot both
    /// create the same folder.
    async fn folders(&self) -> Result<Folders> {
        let mut cached = self.folders.lock().await;
        if let Some(folders) = cached.as_ref() {
            return Ok(folders.clone());
        }

        let root = self.find_or_create_folder(&self.app_folder, None).await?;
        let conversations = self
            .find_or_create_folder(CONVERSATIONS_FOLDER, Some(&root))
            .await?;
        let artifacts = self
            .find_or_create_folder(ARTIFACTS_FOLDER, Some(&root))
            .await?;

        tracing::debug!(root = %root, "Remote folder hierarchy ready");

        let folders = Folders {
            conversations,
            artifacts,
        };
        *cached = Some(folders.clone());
        Ok(folders)
    }

    async fn find_or_create_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        if let Some(existing) = self.drive.find(name, parent, EntryKind::Folder).await? {
            return Ok(existing.id);
        }
        let created = self.drive.create_folder(name, parent).await?;
        tracing::info!(folder = name, id = %created.id, "Created remote folder");
        Ok(created.id)
    }

    /// Forget resolved folder ids (e.g. after switching accounts).
    pub async fn reset(&self) {
        *self.folders.lock().await = None;
    }

    /// Write a conversation document, updating it in place if it exists.
    pub async fn save_conversation(&self, conv: &Conversation) -> Result<()> {
        let folders = self.folders().await?;
        let name = document_name(&conv.id);
        let body = serde_json::to_vec_pretty(conv).map_err(AppError::json_parse)?;

        match self
            .drive
            .find(&name, Some(&folders.conversations), EntryKind::File)
            .await?
        {
            Some(existing) => {
                self.drive.update_file(&existing.id, JSON_MIME, body).await?;
                tracing::debug!(conversation = %conv.id, "Updated remote conversation");
            }
            None => {
                self.drive
                    .create_file(&name, &folders.conversations, JSON_MIME, body)
                    .await?;
                tracing::debug!(conversation = %conv.id, "Created remote conversation");
            }
        }
        Ok(())
    }

    /// Store artifact bytes under `name`. An existing object with the same
    /// name is reused without uploading.
    pub async fn upload_artifact(
        &self,
        data: Vec<u8>,
        name: &str,
        mime_type: &str,
    ) -> Result<ArtifactReference> {
        let folders = self.folders().await?;

        if let Some(existing) = self
            .drive
            .find(name, Some(&folders.artifacts), EntryKind::File)
            .await?
        {
            tracing::debug!(artifact = name, "Artifact already uploaded");
            return Ok(ArtifactReference::drive(existing.id));
        }

        let size = data.len();
        let created = self
            .drive
            .create_file(name, &folders.artifacts, mime_type, data)
            .await?;
        tracing::info!(artifact = name, bytes = size, "Uploaded artifact");
        Ok(ArtifactReference::drive(created.id))
    }

    pub async fn download_artifact(&self, reference: &ArtifactReference) -> Result<Vec<u8>> {
        match reference.kind() {
            ReferenceKind::Drive => self.drive.download(reference.id()).await,
        }
    }

    /// Download and parse every conversation document. Unparsable documents
    /// are logged and skipped.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let folders = self.folders().await?;
        let files = self.drive.list_files(&folders.conversations).await?;

        let mut conversations = Vec::with_capacity(files.len());
        for file in files {
            let bytes = self.drive.download(&file.id).await?;
            match serde_json::from_slice::<Conversation>(&bytes) {
                Ok(conv) => conversations.push(conv),
                Err(e) => {
                    let err = AppError::CorruptRecord {
                        id: file.name.clone(),
                        message: e.to_string(),
                    };
                    tracing::warn!(error = %err, "Skipping remote conversation");
                }
            }
        }

        tracing::debug!(count = conversations.len(), "Listed remote conversations");
        Ok(conversations)
    }

    /// Delete a conversation document. Already-missing documents count as
    /// deleted.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let folders = self.folders().await?;
        let name = document_name(id);

        let Some(existing) = self
            .drive
            .find(&name, Some(&folders.conversations), EntryKind::File)
            .await?
        else {
            tracing::debug!(conversation = id, "Remote conversation already absent");
            return Ok(());
        };

        match self.drive.delete_file(&existing.id).await {
            Ok(()) | Err(AppError::NotFound { .. }) => {
                tracing::debug!(conversation = id, "Deleted remote conversation");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn document_name(conversation_id: &str) -> String {
    format!("{conversation_id}.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Message, Role};
    use crate::test_support::MemoryDrive;
    use std::sync::atomic::Ordering;

    fn store() -> (RemoteStore, Arc<MemoryDrive>) {
        let drive = Arc::new(MemoryDrive::default());
        (RemoteStore::new(drive.clone(), "ChatClientData"), drive)
    }

    #[tokio::test]
    async fn test_folders_created_once() {
        let (remote, drive) = store();
        remote.list_conversations().await.unwrap();
        remote.list_conversations().await.unwrap();
        remote.reset().await;
        remote.list_conversations().await.unwrap();

        assert_eq!(drive.folder_creates.load(Ordering::SeqCst), 3);
        assert_eq!(drive.count_named("ChatClientData"), 1);
        assert_eq!(drive.count_named(CONVERSATIONS_FOLDER), 1);
    }

    #[tokio::test]
    async fn test_existing_folders_are_reused() {
        let (remote, drive) = store();
        let root = drive.create_folder("ChatClientData", None).await.unwrap();
        drive
            .create_folder(CONVERSATIONS_FOLDER, Some(&root.id))
            .await
            .unwrap();

        remote.list_conversations().await.unwrap();

        // seeded two, remote store added only the artifacts folder
        assert_eq!(drive.folder_creates.load(Ordering::SeqCst), 3);
        assert_eq!(drive.count_named(CONVERSATIONS_FOLDER), 1);
    }

    #[tokio::test]
    async fn test_save_creates_then_updates() {
        let (remote, drive) = store();
        let mut conv = Conversation::with_id("c1", "Test");
        remote.save_conversation(&conv).await.unwrap();

        conv.push_message(Message::text(Role::User, "hello"));
        remote.save_conversation(&conv).await.unwrap();

        assert_eq!(drive.creates.load(Ordering::SeqCst), 1);
        assert_eq!(drive.updates.load(Ordering::SeqCst), 1);

        let listed = remote.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_artifact_round_trip_and_name_dedupe() {
        let (remote, drive) = store();
        let bytes: Vec<u8> = (0..=255).collect();

        let first = remote
            .upload_artifact(bytes.clone(), "img_1.png", "image/png")
            .await
            .unwrap();
        let second = remote
            .upload_artifact(vec![1, 2, 3], "img_1.png", "image/png")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(drive.creates.load(Ordering::SeqCst), 1);
        assert_eq!(remote.download_artifact(&first).await.unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_skipped() {
        let (remote, drive) = store();
        remote
            .save_conversation(&Conversation::with_id("good", "Good"))
            .await
            .unwrap();
        let folder = drive.id_of(CONVERSATIONS_FOLDER).unwrap();
        drive.seed_file("bad.json", &folder, b"{not json");

        let listed = remote.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "good");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (remote, drive) = store();
        remote
            .save_conversation(&Conversation::with_id("c1", "Test"))
            .await
            .unwrap();

        remote.delete_conversation("c1").await.unwrap();
        remote.delete_conversation("c1").await.unwrap();
        remote.delete_conversation("never-existed").await.unwrap();

        assert_eq!(drive.deletes.load(Ordering::SeqCst), 1);
        assert!(drive.content_of("c1.json").is_none());
    }

    #[tokio::test]
    async fn test_service_failure_propagates() {
        let (remote, drive) = store();
        drive.offline.store(true, Ordering::SeqCst);

        let err = remote
            .save_conversation(&Conversation::with_id("c1", "Test"))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
