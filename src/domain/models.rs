//! Domain models for conversations and their artifacts.
//!
//! Conversations are stored whole (one JSON document per id) both locally and
//! remotely, so these types double as the wire format.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::AppError;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the human.
    User,
    /// Model response.
    Assistant,
    /// System instruction injected into the conversation.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
            Self::System => write!(f, "System"),
        }
    }
}

/// Scheme of an artifact reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// Object stored in Google Drive.
    Drive,
}

impl ReferenceKind {
    /// URI scheme used when the reference is serialized.
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Drive => "gdrive",
        }
    }
}

/// Handle to a binary object stored remotely.
///
/// Serialized as `gdrive://<object-id>`; parsed back into kind and id at the
/// boundary so the rest of the crate never does string surgery on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactReference {
    kind: ReferenceKind,
    id: String,
}

impl ArtifactReference {
    /// Reference to a Drive object.
    #[must_use]
    pub fn drive(id: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Drive,
            id: id.into(),
        }
    }

    /// Reference kind.
    #[must_use]
    pub const fn kind(&self) -> ReferenceKind {
        self.kind
    }

    /// Opaque remote object id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind.scheme(), self.id)
    }
}

impl FromStr for ArtifactReference {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, id) = s.split_once("://").ok_or_else(|| AppError::InvalidData {
            message: format!("Not an artifact reference: {s}"),
        })?;

        let kind = match scheme {
            "gdrive" => ReferenceKind::Drive,
            other => {
                return Err(AppError::InvalidData {
                    message: format!("Unknown artifact scheme: {other}"),
                })
            }
        };

        if id.is_empty() {
            return Err(AppError::InvalidData {
                message: format!("Artifact reference without id: {s}"),
            });
        }

        Ok(Self {
            kind,
            id: id.to_string(),
        })
    }
}

impl TryFrom<String> for ArtifactReference {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArtifactReference> for String {
    fn from(reference: ArtifactReference) -> Self {
        reference.to_string()
    }
}

/// Bytes of an artifact-bearing message part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ArtifactPayload {
    /// Bytes carried in the message itself. Display-only for large payloads.
    Inline {
        name: String,
        mime_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Bytes stored remotely.
    Remote { reference: ArtifactReference },
    /// Bytes not yet uploaded; only a label is persisted.
    Pending { name: String, label: String },
}

impl ArtifactPayload {
    /// Placeholder persisted in place of bytes that have no remote copy yet.
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        let name = name.into();
        let label = format!("[attachment not uploaded: {name}]");
        Self::Pending { name, label }
    }
}

/// One typed part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { artifact: ArtifactPayload },
    Audio { artifact: ArtifactPayload },
    File { name: String, artifact: ArtifactPayload },
}

impl ContentPart {
    /// Artifact carried by this part, if any.
    pub fn artifact_mut(&mut self) -> Option<&mut ArtifactPayload> {
        match self {
            Self::Text { .. } => None,
            Self::Image { artifact } | Self::Audio { artifact } | Self::File { artifact, .. } => {
                Some(artifact)
            }
        }
    }

    /// Artifact carried by this part, if any.
    #[must_use]
    pub const fn artifact(&self) -> Option<&ArtifactPayload> {
        match self {
            Self::Text { .. } => None,
            Self::Image { artifact } | Self::Audio { artifact } | Self::File { artifact, .. } => {
                Some(artifact)
            }
        }
    }
}

/// Message body: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the message, ignoring artifacts.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Plain-text message stamped with the current time.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            timestamp: Some(Utc::now()),
        }
    }

    /// Multi-part message stamped with the current time.
    #[must_use]
    pub fn parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
            timestamp: Some(Utc::now()),
        }
    }
}

/// A conversation with all of its messages.
///
/// `last_modified` moves forward on every mutation and is the only input to
/// merge decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub pinned: bool,
}

impl Conversation {
    /// Start a new conversation with an id derived from the creation time.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self::with_id(
            format!("conv_{}_{}", now.timestamp_millis(), &suffix[..8]),
            title,
        )
    }

    /// Start a new conversation with a caller-chosen id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            created_at: now,
            last_modified: now,
            messages: Vec::new(),
            system_prompt: String::new(),
            folder_id: None,
            tags: BTreeSet::new(),
            pinned: false,
        }
    }

    /// Advance `last_modified`, strictly, even if the wall clock has not moved.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_modified = if now > self.last_modified {
            now
        } else {
            self.last_modified + Duration::milliseconds(1)
        };
    }

    /// Append a message.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Rename.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    /// Add a tag. Returns false if it was already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let added = self.tags.insert(tag.into());
        if added {
            self.touch();
        }
        added
    }

    /// Remove a tag. Returns false if it was absent.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let removed = self.tags.remove(tag);
        if removed {
            self.touch();
        }
        removed
    }

    /// Pin or unpin.
    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
        self.touch();
    }

    /// Move into a folder, or out of all folders with `None`.
    pub fn move_to_folder(&mut self, folder_id: Option<String>) {
        self.folder_id = folder_id;
        self.touch();
    }

    /// Text of the first message, for list views.
    #[must_use]
    pub fn preview(&self) -> String {
        self.messages
            .first()
            .map_or_else(|| "[Empty conversation]".to_string(), |m| m.content.text())
    }

    /// Get total message count.
    #[must_use]
    pub const fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// All artifact payloads across every message.
    pub fn artifacts_mut(&mut self) -> impl Iterator<Item = &mut ArtifactPayload> {
        self.messages
            .iter_mut()
            .filter_map(|m| match &mut m.content {
                MessageContent::Text(_) => None,
                MessageContent::Parts(parts) => Some(parts),
            })
            .flatten()
            .filter_map(ContentPart::artifact_mut)
    }
}

/// Locally cached artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Generated filename; the cache key and the remote object name.
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    /// Remote copy, once uploaded.
    pub reference: Option<ArtifactReference>,
    /// True when the upload failed and only this local copy exists.
    pub temporary: bool,
    pub cached_at: DateTime<Utc>,
}

/// Serde adapter storing bytes as standard base64 text.
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Deserialize::deserialize(deserializer)?;
        match opt {
            Some(s) if !s.is_empty() => base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(serde::de::Error::custom),
            _ => Ok(Vec::new()),
        }
    }
}
