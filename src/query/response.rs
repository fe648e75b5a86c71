//! Response shapes returned by terminal query calls.

use crate::error::{Result, StoreError};
use crate::types::Document;
use serde::{Serialize, Serializer};

/// Result of a terminal read.
///
/// Serializes as `{"data": [...] | null, "error": "..." | null, "count": n}`.
/// `count` is omitted when absent.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub data: Option<Vec<Document>>,
    #[serde(serialize_with = "error_message")]
    pub error: Option<StoreError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl QueryResponse {
    pub(crate) fn rows(rows: Vec<Document>) -> Self {
        let count = rows.len();
        Self {
            data: Some(rows),
            error: None,
            count: Some(count),
        }
    }

    pub(crate) fn count_only(count: usize) -> Self {
        Self {
            data: None,
            error: None,
            count: Some(count),
        }
    }

    pub(crate) fn failed(error: StoreError) -> Self {
        Self {
            data: None,
            error: Some(error),
            count: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a `Result`; a count-only response yields no rows.
    pub fn into_result(self) -> Result<Vec<Document>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.data.unwrap_or_default()),
        }
    }
}

/// Result of a terminal write. `data` is always `None` for deletes.
#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub data: Option<Vec<Document>>,
    #[serde(serialize_with = "error_message")]
    pub error: Option<StoreError>,
}

impl WriteResponse {
    pub(crate) fn from_result(result: Result<Option<Vec<Document>>>) -> Self {
        match result {
            Ok(data) => Self { data, error: None },
            Err(error) => Self {
                data: None,
                error: Some(error),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<Document>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.data.unwrap_or_default()),
        }
    }
}

fn error_message<S: Serializer>(
    error: &Option<StoreError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}
