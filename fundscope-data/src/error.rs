use thiserror::Error;

/// All errors generated in `fundscope-data`.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("unrecognised {kind} format: {detail}")]
    FormatUnrecognized { kind: String, detail: String },
}

impl DataError {
    /// Construct a [`DataError::FormatUnrecognized`] for a named source kind.
    pub fn format(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::FormatUnrecognized {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

impl From<std::io::Error> for DataError {
    fn from(value: std::io::Error) -> Self {
        Self::FeedUnavailable(value.to_string())
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        Self::format("summary feed", value.to_string())
    }
}

impl From<csv::Error> for DataError {
    fn from(value: csv::Error) -> Self {
        // An unreadable file is an availability problem; anything the csv
        // reader rejects after opening is a format problem.
        match value.kind() {
            csv::ErrorKind::Io(io) => Self::FeedUnavailable(io.to_string()),
            _ => Self::format("history file", value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = DataError::from(io);
        assert!(matches!(err, DataError::FeedUnavailable(_)));
    }

    #[test]
    fn test_json_error_maps_to_format() {
        let err = DataError::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert!(matches!(err, DataError::FormatUnrecognized { .. }));
    }

    #[test]
    fn test_format_display_names_kind() {
        let err = DataError::format("rate history", "missing column `time`");
        assert_eq!(
            err.to_string(),
            "unrecognised rate history format: missing column `time`"
        );
    }
}
