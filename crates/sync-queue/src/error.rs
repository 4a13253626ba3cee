use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to encode intent: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Message {id} has an undecodable body: {source}")]
    Decode {
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Connection error: {0:#}")]
    Connection(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
