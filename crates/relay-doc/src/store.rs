use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::document::{Document, DocumentSnapshot};

/// Documents of one server process, keyed by document id. They outlive
/// the sequences that edit them.
#[derive(Clone, Default)]
pub struct DocumentStore {
    docs: Arc<Mutex<HashMap<String, Arc<Mutex<Document>>>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<Document>>>> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the document for `id`, creating it if needed. A provided
    /// body is the editor's current state and reseeds the sections.
    pub fn open(&self, id: &str, html: Option<&str>) -> Arc<Mutex<Document>> {
        let doc = self
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Document::new())))
            .clone();
        if let Some(html) = html {
            let seeded = Document::from_html(html);
            tracing::debug!(document_id = id, sections = seeded.len(), "document seeded");
            *doc.lock().unwrap_or_else(|e| e.into_inner()) = seeded;
        }
        doc
    }

    pub fn snapshot(&self, id: &str) -> Option<DocumentSnapshot> {
        let doc = self.lock().get(id).cloned()?;
        let snapshot = doc.lock().unwrap_or_else(|e| e.into_inner()).snapshot();
        Some(snapshot)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
