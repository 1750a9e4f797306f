//! Google Drive v3 file service adapter.
//!
//! [`DriveApi`] is the raw file-service seam: name lookups scoped to a parent
//! folder, create/update/delete, listing and download. Folder layout and
//! conversation semantics live in the remote store service above it.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::domain::{AppError, Result};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// A file or folder as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// Which kind of entry a lookup should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    File,
}

/// Raw operations of a remote file service.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Find an entry by exact name under `parent` (or the root when `None`).
    async fn find(&self, name: &str, parent: Option<&str>, kind: EntryKind)
        -> Result<Option<DriveFile>>;

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<DriveFile>;

    /// Multipart create: metadata and content in one request.
    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile>;

    /// Replace the content of an existing file.
    async fn update_file(&self, id: &str, mime_type: &str, data: Vec<u8>) -> Result<()>;

    /// Delete by id. Missing ids yield `AppError::NotFound`.
    async fn delete_file(&self, id: &str) -> Result<()>;

    /// Non-folder children of `parent`.
    async fn list_files(&self, parent: &str) -> Result<Vec<DriveFile>>;

    /// Raw content of a file.
    async fn download(&self, id: &str) -> Result<Vec<u8>>;
}

/// Supplies bearer tokens to the HTTP adapter.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Current token, or `None` when not authenticated.
    async fn access_token(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

const FILE_FIELDS: &str = "id,name,mimeType";

/// Drive v3 REST client.
pub struct HttpDriveApi {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    api_base: String,
    upload_base: String,
}

impl HttpDriveApi {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn AccessTokenSource>,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            tokens,
            api_base: api_base.into(),
            upload_base: upload_base.into(),
        }
    }

    /// Attach the bearer token, send, and map error statuses.
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or(AppError::NotAuthenticated)?;

        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(AppError::network)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status.as_u16() {
            401 => Err(AppError::NotAuthenticated),
            404 => Err(AppError::not_found(what)),
            code => Err(AppError::RemoteStatus {
                status: code,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let text = response.text().await.map_err(AppError::network)?;
        serde_json::from_str(&text).map_err(AppError::json_parse)
    }
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn find(
        &self,
        name: &str,
        parent: Option<&str>,
        kind: EntryKind,
    ) -> Result<Option<DriveFile>> {
        let query = lookup_query(name, parent, kind);
        let request = self.http.get(format!("{}/files", self.api_base)).query(&[
            ("q", query.as_str()),
            ("spaces", "drive"),
            ("fields", "files(id,name,mimeType)"),
            ("pageSize", "1"),
        ]);

        let list: FileList = Self::json(self.send(request, name).await?).await?;
        Ok(list.files.into_iter().next())
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<DriveFile> {
        let mut metadata = serde_json::json!({ "name": name, "mimeType": FOLDER_MIME });
        if let Some(parent) = parent {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let request = self
            .http
            .post(format!("{}/files", self.api_base))
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata);

        let folder: DriveFile = Self::json(self.send(request, name).await?).await?;
        tracing::debug!(folder = %name, id = %folder.id, "Folder created");
        Ok(folder)
    }

    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile> {
        let metadata = serde_json::json!({ "name": name, "parents": [parent] });
        let boundary = format!("chat-sync-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, mime_type, &data);

        let request = self
            .http
            .post(format!("{}/files", self.upload_base))
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        Self::json(self.send(request, name).await?).await
    }

    async fn update_file(&self, id: &str, mime_type: &str, data: Vec<u8>) -> Result<()> {
        let request = self
            .http
            .patch(format!("{}/files/{id}", self.upload_base))
            .query(&[("uploadType", "media")])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(data);

        self.send(request, id).await?;
        Ok(())
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let request = self.http.delete(format!("{}/files/{id}", self.api_base));
        self.send(request, id).await?;
        Ok(())
    }

    async fn list_files(&self, parent: &str) -> Result<Vec<DriveFile>> {
        let query = format!(
            "'{}' in parents and trashed = false and mimeType != '{FOLDER_MIME}'",
            escape_query(parent)
        );

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.clone()),
                ("spaces", "drive".to_string()),
                ("fields", "nextPageToken,files(id,name,mimeType)".to_string()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let request = self
                .http
                .get(format!("{}/files", self.api_base))
                .query(&params);
            let page: FileList = Self::json(self.send(request, parent).await?).await?;

            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn download(&self, id: &str) -> Result<Vec<u8>> {
        let request = self
            .http
            .get(format!("{}/files/{id}", self.api_base))
            .query(&[("alt", "media")]);

        let bytes = self
            .send(request, id)
            .await?
            .bytes()
            .await
            .map_err(AppError::network)?;
        Ok(bytes.to_vec())
    }
}

/// Escape a value for use inside a single-quoted Drive query literal.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn lookup_query(name: &str, parent: Option<&str>, kind: EntryKind) -> String {
    let mut query = format!("name = '{}' and trashed = false", escape_query(name));
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", escape_query(parent)));
    }
    match kind {
        EntryKind::Folder => query.push_str(&format!(" and mimeType = '{FOLDER_MIME}'")),
        EntryKind::File => query.push_str(&format!(" and mimeType != '{FOLDER_MIME}'")),
    }
    query
}

fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
    body
}
