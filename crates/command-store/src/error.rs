use protocol::CommandId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("command {0} not found")]
    NotFound(CommandId),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt row {id}: {message}")]
    Corrupt { id: CommandId, message: String },
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
