//! Response envelopes of the highlights backend

use serde::Deserialize;

use clipstage_core::{CommitResult, FetchError, OperationAck, OperationFailure, Record, TransportError};

/// Per-item lists of a `POST .../batch-update` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchResults {
    #[serde(default)]
    successful: Vec<OperationAck>,
    #[serde(default)]
    failed: Vec<OperationFailure>,
    #[serde(default)]
    success_count: Option<usize>,
    #[serde(default)]
    total_operations: Option<usize>,
}

/// Decode a batch-update response body.
///
/// The backend wraps the per-item lists in `results`; bare
/// `{ successful, failed }` bodies are accepted too. Anything else, or any
/// item that does not decode, is a `TransportError::Decode` so the caller
/// keeps its staged operations.
pub fn decode_commit_response(body: &str) -> Result<CommitResult, TransportError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))?;
    let serde_json::Value::Object(mut object) = value else {
        return Err(TransportError::Decode("response is not a JSON object".into()));
    };

    let results = match object.remove("results") {
        Some(results) => results,
        None if object.contains_key("successful") || object.contains_key("failed") => {
            serde_json::Value::Object(object)
        }
        None => {
            let message = object
                .get("error")
                .or_else(|| object.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("no results in response");
            return Err(TransportError::Decode(message.to_string()));
        }
    };
    let results: BatchResults = serde_json::from_value(results)
        .map_err(|e| TransportError::Decode(format!("results: {e}")))?;

    if let Some(count) = results.success_count {
        if count != results.successful.len() {
            tracing::debug!(
                reported = count,
                listed = results.successful.len(),
                "successCount disagrees with successful list, using the list"
            );
        }
    }
    if let Some(total) = results.total_operations {
        tracing::trace!(total, "backend reported batch size");
    }

    Ok(CommitResult {
        successful: results.successful,
        failed: results.failed,
    })
}

#[derive(Debug, Deserialize)]
struct BookEnvelope {
    book: Option<BookBody>,
}

#[derive(Debug, Deserialize)]
struct BookBody {
    highlights: Option<serde_json::Value>,
}

/// `GET .../user/book/{scope}` response body: `{ book: { highlights: [...] } }`
pub fn decode_scope_records(scope_id: &str, body: &str) -> Result<Vec<Record>, FetchError> {
    let envelope: BookEnvelope =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    let book = envelope
        .book
        .ok_or_else(|| FetchError::NotFound(scope_id.to_string()))?;

    match book.highlights {
        Some(highlights @ serde_json::Value::Array(_)) => serde_json::from_value(highlights)
            .map_err(|e| FetchError::Malformed(format!("highlight: {e}"))),
        _ => Err(FetchError::Malformed(format!(
            "no highlight list for {scope_id}"
        ))),
    }
}
