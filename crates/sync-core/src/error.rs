//! Failure taxonomy for applying a sync intent.

use thiserror::Error;

/// Why an intent could not be applied.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The payload can never be applied as-is (missing, not an object, wrong identity).
    #[error("invalid payload for record {record_id}: {reason}")]
    Validation { record_id: i64, reason: String },

    /// The snapshot store rejected or could not complete the write.
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl ApplyError {
    pub fn validation(record_id: i64, reason: impl Into<String>) -> Self {
        ApplyError::Validation {
            record_id,
            reason: reason.into(),
        }
    }

    /// Short label recorded in audit metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            ApplyError::Validation { .. } => "validation",
            ApplyError::Storage(_) => "storage",
        }
    }

    /// Whether another attempt could succeed without the payload changing.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApplyError::Storage(_))
    }
}

impl From<anyhow::Error> for ApplyError {
    fn from(err: anyhow::Error) -> Self {
        ApplyError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let v = ApplyError::validation(4, "payload is missing 'id'");
        assert!(!v.is_transient());
        assert_eq!(v.kind(), "validation");
        assert_eq!(
            v.to_string(),
            "invalid payload for record 4: payload is missing 'id'"
        );

        let s: ApplyError = anyhow::anyhow!("timeout").context("upsert snapshot 4").into();
        assert!(s.is_transient());
        assert_eq!(s.to_string(), "storage error: upsert snapshot 4: timeout");
    }
}
