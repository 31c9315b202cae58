// Database module
// Dual storage: LanceDB for vectors, SQLite for document and chunk metadata

pub mod lancedb;
pub mod sqlite;

pub use self::lancedb::VectorIndex;
pub use self::sqlite::MetadataStore;
