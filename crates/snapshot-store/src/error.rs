use thiserror::Error;

/// Errors raised while decoding what a backend returned.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: String, reason: String },

    #[error("Source row {id} in {table} is not a JSON object")]
    NotAnObject { table: String, id: i64 },
}
