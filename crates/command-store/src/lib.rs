//! Persistence for command records.
//!
//! The service talks to storage only through [`CommandRepository`]; the store
//! owns id assignment and `created_at`, everything else is written back
//! verbatim by [`CommandRepository::update`].

mod error;
mod memory;
mod sqlite;

use std::time::SystemTime;

use async_trait::async_trait;
use protocol::{CommandId, CommandRecord, CommandStatus};

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait CommandRepository: Send + Sync {
    /// Inserts a new record and returns it with `id` and `created_at` filled in.
    async fn create(&self, script: &str, status: CommandStatus)
        -> Result<CommandRecord, StoreError>;

    /// Writes `script`, `status` and `output` for `record.id`.
    async fn update(&self, record: &CommandRecord) -> Result<(), StoreError>;

    /// All records, ordered by id.
    async fn list(&self) -> Result<Vec<CommandRecord>, StoreError>;

    async fn get(&self, id: CommandId) -> Result<CommandRecord, StoreError>;
}

pub(crate) fn now_rfc3339() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}
