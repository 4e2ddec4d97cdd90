use std::{fmt, path::Path, sync::Arc};

use shared::{
    domain::{AttachmentRef, MessageKind},
    protocol::is_document_type,
};
use tracing::{info, warn};

use crate::{api::ChatApi, error::UploadError};

/// A binary payload ready for `POST /api/upload`.
#[derive(Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for FileUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileUpload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl FileUpload {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Reads a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, UploadError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| UploadError::Read(format!("{}: {err}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::for_file_type(&self.mime_type)
    }
}

/// Uploads a payload and normalizes the server's answer into an
/// [`AttachmentRef`]. Nothing is sent over the connection from here.
#[derive(Clone)]
pub struct AttachmentPipeline {
    api: Arc<dyn ChatApi>,
}

impl AttachmentPipeline {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self { api }
    }

    pub async fn upload(&self, file: FileUpload) -> Result<AttachmentRef, UploadError> {
        let source_name = file.file_name.clone();
        let source_type = file.mime_type.clone();
        let source_size = file.bytes.len() as u64;

        let response = match self.api.upload(file).await {
            Ok(response) => response,
            Err(err) => {
                warn!(file_name = %source_name, "attachment: upload failed: {err}");
                return Err(err);
            }
        };
        if response.url.trim().is_empty() {
            return Err(UploadError::InvalidResponse(
                "upload response carries no url".to_string(),
            ));
        }

        let file_type = if response.file_type.is_empty() {
            source_type
        } else {
            response.file_type
        };
        let attachment = AttachmentRef {
            download_url: response
                .download_url
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| response.url.clone()),
            url: response.url,
            file_name: response
                .original_name
                .filter(|name| !name.is_empty())
                .unwrap_or(source_name),
            file_size: if response.file_size == 0 {
                source_size
            } else {
                response.file_size
            },
            is_document: response
                .is_document
                .unwrap_or_else(|| is_document_type(&file_type)),
            file_type,
        };
        info!(
            file_name = %attachment.file_name,
            file_size = attachment.file_size,
            "attachment: uploaded"
        );
        Ok(attachment)
    }
}
