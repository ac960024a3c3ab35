use std::sync::LazyLock;

use regex::Regex;
use relay_core::error::DocumentError;
use relay_stream::wire::{DocOperation, DocUpdate, ImagePosition};
use serde::{Deserialize, Serialize};

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h([12])[^>]*>(.*?)</h[12]\s*>").unwrap());

/// One titled unit of a document. `content` is an HTML fragment without
/// its own heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub index: usize,
    pub title: String,
    pub content: String,
}

/// Read-only view handed to `get_document` callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub sections: Vec<Section>,
    pub html: String,
}

/// Ordered, contiguously indexed section list.
///
/// Every mutation validates first and returns the `doc_update` describing
/// what it did. Section 0 is the title section and cannot be deleted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    sections: Vec<Section>,
}

fn non_empty(field: &str, value: &str) -> Result<(), DocumentError> {
    if value.trim().is_empty() {
        return Err(DocumentError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits a flattened body at `<h1>`/`<h2>` headings. Text before the
    /// first heading becomes an untitled section 0.
    pub fn from_html(html: &str) -> Self {
        let mut sections = Vec::new();
        let mut cursor = 0;
        let mut pending: Option<String> = None;

        for caps in HEADING.captures_iter(html) {
            let Some(whole) = caps.get(0) else { continue };
            let body = html[cursor..whole.start()].trim();
            match pending.take() {
                Some(title) => sections.push((title, body.to_string())),
                None if !body.is_empty() => sections.push((String::new(), body.to_string())),
                None => {}
            }
            pending = Some(caps.get(2).map_or("", |m| m.as_str()).trim().to_string());
            cursor = whole.end();
        }

        let tail = html[cursor..].trim();
        match pending {
            Some(title) => sections.push((title, tail.to_string())),
            None if !tail.is_empty() => sections.push((String::new(), tail.to_string())),
            None => {}
        }

        let mut doc = Self {
            sections: sections
                .into_iter()
                .map(|(title, content)| Section {
                    index: 0,
                    title,
                    content,
                })
                .collect(),
        };
        doc.reindex();
        doc
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// Section 0 as `<h1>`, the rest as `<h2>`, joined by newlines.
    pub fn to_html(&self) -> String {
        self.sections
            .iter()
            .map(|s| {
                let tag = if s.index == 0 { "h1" } else { "h2" };
                if s.title.is_empty() {
                    s.content.clone()
                } else {
                    format!("<{tag}>{}</{tag}>{}", s.title, s.content)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            sections: self.sections.clone(),
            html: self.to_html(),
        }
    }

    pub fn clear(&mut self) -> DocUpdate {
        self.sections.clear();
        DocUpdate::clear_all()
    }

    pub fn append(&mut self, title: &str, content: &str) -> Result<DocUpdate, DocumentError> {
        non_empty("title", title)?;
        non_empty("content", content)?;
        let index = self.sections.len();
        self.sections.push(Section {
            index,
            title: title.to_string(),
            content: content.to_string(),
        });
        Ok(DocUpdate::append(index, title, content))
    }

    /// Overwrites both title and content; there is no keep-existing title.
    pub fn replace(
        &mut self,
        index: usize,
        title: &str,
        content: &str,
    ) -> Result<DocUpdate, DocumentError> {
        self.check_existing(index)?;
        non_empty("title", title)?;
        non_empty("content", content)?;
        let section = &mut self.sections[index];
        section.title = title.to_string();
        section.content = content.to_string();
        Ok(DocUpdate::replace(index, title, content))
    }

    pub fn delete(&mut self, index: usize) -> Result<DocUpdate, DocumentError> {
        if index == 0 {
            return Err(DocumentError::InvariantViolation(
                "section 0 is the title section and cannot be deleted".into(),
            ));
        }
        if index >= self.sections.len() {
            return Err(DocumentError::Range {
                index,
                valid: format!("[1, {})", self.sections.len()),
            });
        }
        self.sections.remove(index);
        self.reindex();
        Ok(DocUpdate::delete(index))
    }

    /// Inserting at `len()` appends.
    pub fn insert(
        &mut self,
        index: usize,
        title: &str,
        content: &str,
    ) -> Result<DocUpdate, DocumentError> {
        if index > self.sections.len() {
            return Err(DocumentError::Range {
                index,
                valid: format!("[0, {}]", self.sections.len()),
            });
        }
        non_empty("title", title)?;
        non_empty("content", content)?;
        self.sections.insert(
            index,
            Section {
                index,
                title: title.to_string(),
                content: content.to_string(),
            },
        );
        self.reindex();
        Ok(DocUpdate::insert(index, title, content))
    }

    /// Images sit next to a section; the section list is unchanged.
    pub fn insert_image(
        &self,
        index: usize,
        image_url: &str,
        image_description: &str,
        position: ImagePosition,
    ) -> Result<DocUpdate, DocumentError> {
        self.check_existing(index)?;
        non_empty("image_url", image_url)?;
        Ok(DocUpdate::insert_image(
            index,
            image_url,
            image_description,
            position,
        ))
    }

    /// Replays an update produced by another instance.
    pub fn apply(&mut self, update: &DocUpdate) -> Result<(), DocumentError> {
        let index = || {
            update
                .section_index
                .ok_or_else(|| DocumentError::Validation("sectionIndex is required".into()))
        };
        let title = update.title.as_deref().unwrap_or_default();
        let content = update.content.as_deref().unwrap_or_default();

        match update.operation {
            DocOperation::ClearAll => {
                self.clear();
            }
            DocOperation::Append => {
                self.append(title, content)?;
            }
            DocOperation::Replace => {
                self.replace(index()?, title, content)?;
            }
            DocOperation::Delete => {
                self.delete(index()?)?;
            }
            DocOperation::Insert => {
                self.insert(index()?, title, content)?;
            }
            DocOperation::InsertImage => {
                self.check_existing(index()?)?;
            }
        }
        Ok(())
    }

    fn check_existing(&self, index: usize) -> Result<(), DocumentError> {
        if index >= self.sections.len() {
            return Err(DocumentError::Range {
                index,
                valid: format!("[0, {})", self.sections.len()),
            });
        }
        Ok(())
    }

    fn reindex(&mut self) {
        for (i, section) in self.sections.iter_mut().enumerate() {
            section.index = i;
        }
    }
}
