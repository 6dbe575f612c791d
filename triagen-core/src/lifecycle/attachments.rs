//! Attachment metadata and presigned blob access
//!
//! File bytes never pass through the engine: the client uploads to a
//! presigned URL, then registers the uploaded key here.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::manager::LifecycleManager;
use crate::blob::PresignedUrl;
use crate::broadcast::{EventName, Removed, Topic};
use crate::error::{TriageError, TriageResult};
use crate::model::{Actor, Attachment, NewAttachment};

/// Where to upload a file and the key to register afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTicket {
    pub key: String,
    pub upload: PresignedUrl,
}

fn clean_filename(filename: &str) -> TriageResult<String> {
    let name: String = filename
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if name.is_empty() {
        return Err(TriageError::validation("filename must not be empty"));
    }
    Ok(name)
}

impl LifecycleManager {
    /// Issue a presigned upload URL under `<incident_id>/<uuid>-<filename>`
    pub async fn request_upload(
        &self,
        incident_id: &str,
        filename: &str,
        content_type: &str,
    ) -> TriageResult<UploadTicket> {
        let filename = clean_filename(filename)?;
        self.require_incident(incident_id).await?;

        let key = format!("{}/{}-{}", incident_id, Uuid::new_v4(), filename);
        let upload = self
            .blobs
            .presign_upload(&key, content_type, self.settings.presign_ttl)
            .await?;
        Ok(UploadTicket { key, upload })
    }

    /// Record an uploaded file against its incident
    pub async fn register_attachment(
        &self,
        incident_id: &str,
        actor: &Actor,
        input: NewAttachment,
    ) -> TriageResult<Attachment> {
        if input.filename.trim().is_empty() {
            return Err(TriageError::validation("filename must not be empty"));
        }
        if !input.file_key.starts_with(&format!("{}/", incident_id)) {
            return Err(TriageError::validation(
                "file key does not belong to this incident",
            ));
        }
        self.require_incident(incident_id).await?;

        let attachment = self
            .store
            .insert_attachment(Attachment::new(incident_id, actor.id.clone(), input))
            .await?;

        info!(
            incident_id = %incident_id,
            attachment_id = %attachment.id,
            size_bytes = attachment.size_bytes,
            "Attachment registered"
        );
        self.broadcaster.publish(
            &Topic::incident(incident_id),
            EventName::AttachmentAdded,
            &attachment,
        );
        Ok(attachment)
    }

    pub async fn download_url(&self, attachment_id: &str) -> TriageResult<PresignedUrl> {
        let attachment = self
            .store
            .get_attachment(attachment_id)
            .await?
            .ok_or_else(|| TriageError::not_found("attachment", attachment_id))?;
        Ok(self
            .blobs
            .presign_download(&attachment.file_key, self.settings.presign_ttl)
            .await?)
    }

    /// Remove an attachment. The uploader, the incident's reporter or an
    /// admin may do this. A failed blob delete leaves an orphaned object
    /// but still removes the record.
    pub async fn remove_attachment(
        &self,
        incident_id: &str,
        attachment_id: &str,
        actor: &Actor,
    ) -> TriageResult<()> {
        let attachment = self
            .store
            .get_attachment(attachment_id)
            .await?
            .filter(|a| a.incident_id == incident_id)
            .ok_or_else(|| TriageError::not_found("attachment", attachment_id))?;

        if !actor.is_admin() && attachment.uploaded_by != actor.id {
            let incident = self.require_incident(incident_id).await?;
            if incident.reporter_id != actor.id {
                return Err(TriageError::forbidden(
                    "You do not have permission to remove this attachment",
                ));
            }
        }

        if let Err(e) = self.blobs.delete(&attachment.file_key).await {
            warn!(
                incident_id = %incident_id,
                key = %attachment.file_key,
                "Failed to delete blob: {}", e
            );
        }
        self.store.delete_attachment(&attachment.id).await?;

        info!(incident_id = %incident_id, attachment_id = %attachment_id, "Attachment removed");
        self.broadcaster.publish(
            &Topic::incident(incident_id),
            EventName::AttachmentRemoved,
            &Removed::attachment(&attachment.id),
        );
        Ok(())
    }
}
