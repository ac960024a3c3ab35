use std::sync::{Arc, Mutex, MutexGuard};

use relay_core::error::DocumentError;
use relay_stream::transport::TransportWriter;
use relay_stream::wire::{DocUpdate, ImagePosition};

use crate::document::{Document, DocumentSnapshot, Section};

/// A shared document bound to the stream of the sequence editing it.
///
/// Each operation mutates under the lock, releases it, then writes the
/// `doc_update` and waits for the flush. Nothing changes when the stream
/// can no longer carry the update. The caller gets its result only
/// after the remote side could have seen the change.
#[derive(Clone)]
pub struct DocumentModel {
    document: Arc<Mutex<Document>>,
    writer: TransportWriter,
}

impl DocumentModel {
    pub fn new(document: Arc<Mutex<Document>>, writer: TransportWriter) -> Self {
        Self { document, writer }
    }

    fn lock(&self) -> MutexGuard<'_, Document> {
        self.document.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_document(&self) -> DocumentSnapshot {
        self.lock().snapshot()
    }

    pub async fn clear_document(&self) -> Result<(), DocumentError> {
        self.mutate(|doc| Ok((doc.clear(), ()))).await
    }

    pub async fn append_section(&self, title: &str, content: &str) -> Result<Section, DocumentError> {
        let section = self
            .mutate(|doc| {
                let update = doc.append(title, content)?;
                Ok((update, doc.sections().last().cloned()))
            })
            .await?;
        section.ok_or_else(|| DocumentError::InvariantViolation("appended section missing".into()))
    }

    pub async fn replace_section(
        &self,
        index: usize,
        title: &str,
        content: &str,
    ) -> Result<(), DocumentError> {
        self.mutate(|doc| Ok((doc.replace(index, title, content)?, ())))
            .await
    }

    /// Returns the section count after removal.
    pub async fn delete_section(&self, index: usize) -> Result<usize, DocumentError> {
        self.mutate(|doc| {
            let update = doc.delete(index)?;
            Ok((update, doc.len()))
        })
        .await
    }

    pub async fn insert_section(
        &self,
        index: usize,
        title: &str,
        content: &str,
    ) -> Result<usize, DocumentError> {
        self.mutate(|doc| {
            let update = doc.insert(index, title, content)?;
            Ok((update, doc.len()))
        })
        .await
    }

    pub async fn insert_image(
        &self,
        index: usize,
        image_url: &str,
        image_description: &str,
        position: ImagePosition,
    ) -> Result<(), DocumentError> {
        self.mutate(|doc| {
            let update = doc.insert_image(index, image_url, image_description, position)?;
            Ok((update, ()))
        })
        .await
    }

    /// Applies `change` and publishes its update. A change that could not be
    /// delivered is rolled back so the document never holds an edit the
    /// remote side has not been sent.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Document) -> Result<(DocUpdate, T), DocumentError>,
    ) -> Result<T, DocumentError> {
        self.writer.ensure_open()?;

        let (before, update, value) = {
            let mut doc = self.lock();
            let before = doc.clone();
            let (update, value) = change(&mut *doc)?;
            (before, update, value)
        };

        if let Err(e) = self.publish(update).await {
            tracing::warn!("doc_update not delivered, rolling back: {e}");
            *self.lock() = before;
            return Err(e);
        }
        Ok(value)
    }

    async fn publish(&self, update: DocUpdate) -> Result<(), DocumentError> {
        tracing::debug!(operation = ?update.operation, index = ?update.section_index, "doc_update");
        self.writer.write(&update.into()).await?;
        Ok(())
    }
}
