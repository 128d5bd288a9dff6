//! Image attachment staging.
//!
//! A selected file is checked against the image rules, then given a revocable
//! display reference. The reference lives exactly as long as its
//! `DisplayHandle`; dropping the handle revokes it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use wgpt_core::config::AttachmentConfig;
use wgpt_core::types::{new_id, AttachmentRef};

use crate::display::format_file_size;
use crate::error::ChatError;

pub const INVALID_TYPE_MESSAGE: &str = "Please select a valid image file";

/// Extension to media type table for files picked from disk.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("bmp", "image/bmp"),
    ("heic", "image/heic"),
];

/// A file the user picked, as reported by the file chooser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Size in bytes.
    pub size: u64,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size,
        }
    }

    /// Describe a file on disk. The media type is inferred from the
    /// extension; unknown extensions get `application/octet-stream`.
    pub async fn from_path(path: &Path) -> Result<Self, ChatError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ChatError::Validation(format!("Cannot read {}: {}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(ChatError::Validation(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let media_type = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .and_then(|ext| {
                IMAGE_TYPES
                    .iter()
                    .find(|(known, _)| *known == ext)
                    .map(|(_, mime)| *mime)
            })
            .unwrap_or("application/octet-stream");

        Ok(Self::new(name, media_type, metadata.len()))
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

// =============================================================================
// Display references
// =============================================================================

/// Issues and revokes ephemeral display references.
pub trait DisplayRefAllocator: Send + Sync {
    fn allocate(&self, file: &SelectedFile) -> String;
    fn revoke(&self, url: &str);
}

/// Process-local allocator that tracks which references are still live.
#[derive(Debug, Default)]
pub struct InMemoryDisplayRefs {
    live: Mutex<HashSet<String>>,
}

impl InMemoryDisplayRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of references not yet revoked.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(url)
    }
}

impl DisplayRefAllocator for InMemoryDisplayRefs {
    fn allocate(&self, _file: &SelectedFile) -> String {
        let url = format!("blob:wgpt/{}", Uuid::new_v4());
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.clone());
        url
    }

    fn revoke(&self, url: &str) {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(url);
    }
}

/// Owns one display reference and revokes it on drop.
pub struct DisplayHandle {
    url: String,
    allocator: Arc<dyn DisplayRefAllocator>,
}

impl DisplayHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        debug!(url = %self.url, "Revoking display reference");
        self.allocator.revoke(&self.url);
    }
}

impl std::fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayHandle").field("url", &self.url).finish()
    }
}

// =============================================================================
// Staging
// =============================================================================

/// Transient description of a staged image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    pub id: String,
    pub url: String,
    pub name: String,
    pub size: u64,
}

impl AttachmentDescriptor {
    /// The form recorded on the outgoing message.
    pub fn to_ref(&self) -> AttachmentRef {
        AttachmentRef {
            id: self.id.clone(),
            url: self.url.clone(),
            name: self.name.clone(),
        }
    }
}

/// A validated attachment together with the handle keeping its reference
/// alive.
#[derive(Debug)]
pub struct StagedAttachment {
    pub descriptor: AttachmentDescriptor,
    pub handle: DisplayHandle,
}

/// Validates picked files and allocates their display references.
#[derive(Clone)]
pub struct AttachmentService {
    allocator: Arc<dyn DisplayRefAllocator>,
    max_bytes: u64,
}

impl AttachmentService {
    pub fn new(allocator: Arc<dyn DisplayRefAllocator>, config: &AttachmentConfig) -> Self {
        Self {
            allocator,
            max_bytes: config.max_bytes,
        }
    }

    /// Validate `file` and stage it.
    ///
    /// Fails with `ChatError::Validation` for non-image media types and for
    /// files larger than the configured cap.
    pub async fn stage(&self, file: &SelectedFile) -> Result<StagedAttachment, ChatError> {
        if !file.is_image() {
            debug!(name = %file.name, media_type = %file.media_type, "Rejected non-image attachment");
            return Err(ChatError::Validation(INVALID_TYPE_MESSAGE.to_string()));
        }
        if file.size > self.max_bytes {
            debug!(name = %file.name, size = file.size, "Rejected oversized attachment");
            return Err(ChatError::Validation(format!(
                "Image size must be less than {}",
                format_file_size(self.max_bytes)
            )));
        }

        let url = self.allocator.allocate(file);
        let descriptor = AttachmentDescriptor {
            id: new_id("img"),
            url: url.clone(),
            name: file.name.clone(),
            size: file.size,
        };
        info!(id = %descriptor.id, name = %descriptor.name, size = file.size, "Attachment staged");

        Ok(StagedAttachment {
            descriptor,
            handle: DisplayHandle {
                url,
                allocator: self.allocator.clone(),
            },
        })
    }
}

impl std::fmt::Debug for AttachmentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentService")
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
