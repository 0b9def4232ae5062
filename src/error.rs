//! Error taxonomy for the scoring engine
//!
//! Only structural problems are errors. Sentence content never is: an empty
//! candidate or reference simply scores 0.

use thiserror::Error;

/// The category of a [`MetricsError`], preserved through query wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedInput,
    EmptyCollection,
    LengthMismatch,
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("empty {0}: metrics are undefined for a zero-length collection")]
    EmptyCollection(&'static str),

    #[error("corpus length mismatch: {hypotheses} hypothesis sets vs {references} reference groups")]
    LengthMismatch { hypotheses: usize, references: usize },

    #[error("query #{index}{}: {source}", .query.as_deref().map(|q| format!(" ({q})")).unwrap_or_default())]
    InQuery {
        index: usize,
        query: Option<String>,
        #[source]
        source: Box<MetricsError>,
    },
}

impl MetricsError {
    pub fn malformed(message: impl Into<String>) -> Self {
        MetricsError::MalformedInput(message.into())
    }

    /// Attach the position (and key, when known) of the query that failed.
    pub fn in_query(self, index: usize, query: Option<&str>) -> Self {
        MetricsError::InQuery {
            index,
            query: query.map(str::to_string),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MetricsError::MalformedInput(_) => ErrorKind::MalformedInput,
            MetricsError::EmptyCollection(_) => ErrorKind::EmptyCollection,
            MetricsError::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            MetricsError::InQuery { source, .. } => source.kind(),
        }
    }

    /// Index of the offending query, if the error was raised while scoring one.
    pub fn query_index(&self) -> Option<usize> {
        match self {
            MetricsError::InQuery { index, .. } => Some(*index),
            _ => None,
        }
    }
}

pub type MetricsResult<T> = std::result::Result<T, MetricsError>;
