pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use models::{Model, Models, Role};
pub use postgres::PgDocumentStore;
pub use store::{
    filter, is_object_id, new_object_id, Document, DocumentStore, FieldErrors, Filter, StoreError,
};
