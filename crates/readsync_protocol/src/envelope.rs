//! GraphQL request/response envelope.

use crate::error::{ProtocolError, ProtocolResult, RemoteErrorCode};
use crate::operation::Operation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request posted to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    /// Operation name, matching the name declared in the document.
    pub operation_name: String,
    /// Query or mutation document.
    pub query: String,
    /// Typed variables.
    pub variables: Value,
}

impl GraphqlRequest {
    /// Creates a request for a named operation.
    pub fn new(operation: Operation, variables: Value) -> Self {
        Self {
            operation_name: operation.name().to_string(),
            query: operation.document().to_string(),
            variables,
        }
    }

    /// Encodes to a JSON body.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decodes from a JSON body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// A response returned by the remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct GraphqlResponse<T> {
    /// Data payload, absent when the request failed as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Errors reported by the remote.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

impl<T: DeserializeOwned> GraphqlResponse<T> {
    /// Decodes from a JSON body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

impl<T> GraphqlResponse<T> {
    /// Wraps a successful payload.
    pub fn data(data: T) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// Wraps a list of errors.
    pub fn errors(errors: Vec<GraphqlError>) -> Self {
        Self { data: None, errors }
    }

    /// Returns the first error, preferring credential and throttling errors
    /// which decide how the failure is handled.
    pub fn primary_error(&self) -> Option<&GraphqlError> {
        self.errors
            .iter()
            .find(|e| e.code() != RemoteErrorCode::Other)
            .or_else(|| self.errors.first())
    }
}

/// One entry of the `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ErrorExtensions>,
}

impl GraphqlError {
    /// Creates an error with a message and an optional extension code.
    pub fn new(message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            message: message.into(),
            extensions: code.map(|c| ErrorExtensions {
                code: Some(c.to_string()),
            }),
        }
    }

    /// Classifies this error.
    pub fn code(&self) -> RemoteErrorCode {
        let code = self.extensions.as_ref().and_then(|e| e.code.as_deref());
        RemoteErrorCode::from_graphql(code, &self.message)
    }
}

/// Extensions attached to an error entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorExtensions {
    /// Remote error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MeData;
    use serde_json::json;

    #[test]
    fn request_body_shape() {
        let request = GraphqlRequest::new(Operation::SearchCatalog, json!({"query": "Dune"}));
        let body: Value = serde_json::from_slice(&request.encode().unwrap()).unwrap();

        assert_eq!(body["operationName"], "SearchCatalog");
        assert_eq!(body["variables"]["query"], "Dune");
        assert!(body["query"].as_str().unwrap().contains("query SearchCatalog"));
    }

    #[test]
    fn decode_error_response() {
        let body = br#"{"errors":[{"message":"Malformed Authorization header","extensions":{"code":"invalid-headers"}}]}"#;
        let response = GraphqlResponse::<MeData>::decode(body).unwrap();

        assert!(response.data.is_none());
        assert_eq!(
            response.primary_error().unwrap().code(),
            RemoteErrorCode::Unauthorized
        );
    }

    #[test]
    fn primary_error_prefers_classified_entries() {
        let response = GraphqlResponse::<MeData>::errors(vec![
            GraphqlError::new("unexpected", None),
            GraphqlError::new("slow down", Some("rate-limited")),
        ]);
        assert_eq!(
            response.primary_error().unwrap().code(),
            RemoteErrorCode::RateLimited
        );
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(GraphqlResponse::<MeData>::decode(b"<html>").is_err());
    }
}
