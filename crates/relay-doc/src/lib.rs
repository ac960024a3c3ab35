pub mod document;
pub mod model;
pub mod store;
pub mod tools;

pub use document::{Document, DocumentSnapshot, Section};
pub use model::DocumentModel;
pub use store::DocumentStore;
pub use tools::create_document_tools;
