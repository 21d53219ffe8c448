use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{parse_json, url_with_query, Command};
use crate::errors::{ClientError, Result};
use crate::topology::ServerNode;
use crate::transport::{HttpRequest, HEADER_IF_MATCH};

fn document_url(node: &ServerNode, id: &str) -> Result<String> {
    url_with_query(
        &format!("{}/databases/{}/docs", node.url, node.database),
        &[("id", id)],
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetDocumentsResponse {
    #[serde(default)]
    results: Vec<Value>,
}

/// Loads a single document by id. A missing document leaves `result` empty.
#[derive(Debug)]
pub struct GetDocumentCommand {
    id: String,
    pub result: Option<Value>,
    pub from_cache: bool,
}

impl GetDocumentCommand {
    pub fn new(id: impl Into<String>) -> Self {
        GetDocumentCommand {
            id: id.into(),
            result: None,
            from_cache: false,
        }
    }
}

impl Command for GetDocumentCommand {
    fn is_read_request(&self) -> bool {
        true
    }

    fn is_cacheable(&self) -> bool {
        true
    }

    fn create_request(&self, node: &ServerNode) -> Result<HttpRequest> {
        Ok(HttpRequest::get(document_url(node, &self.id)?))
    }

    fn set_response(&mut self, body: &[u8], from_cache: bool) -> Result<()> {
        let response: GetDocumentsResponse = parse_json(body)?;
        self.result = response.results.into_iter().find(|doc| !doc.is_null());
        self.from_cache = from_cache;
        Ok(())
    }

    fn set_not_found(&mut self) -> Result<()> {
        self.result = None;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutResult {
    pub id: String,
    pub change_vector: String,
}

/// Stores a document. With an expected change vector the write only applies
/// if the stored document is still at that version.
#[derive(Debug)]
pub struct PutDocumentCommand {
    id: String,
    document: Value,
    expected_change_vector: Option<String>,
    pub result: Option<PutResult>,
}

impl PutDocumentCommand {
    pub fn new(id: impl Into<String>, document: Value) -> Self {
        PutDocumentCommand {
            id: id.into(),
            document,
            expected_change_vector: None,
            result: None,
        }
    }

    pub fn with_expected_change_vector(mut self, change_vector: impl Into<String>) -> Self {
        self.expected_change_vector = Some(change_vector.into());
        self
    }
}

impl Command for PutDocumentCommand {
    fn is_read_request(&self) -> bool {
        false
    }

    fn is_cacheable(&self) -> bool {
        true
    }

    fn create_request(&self, node: &ServerNode) -> Result<HttpRequest> {
        let body = serde_json::to_vec(&self.document)
            .map_err(|e| ClientError::Serialization(e.to_string()))?;
        let mut request = HttpRequest::put(document_url(node, &self.id)?, body);
        if let Some(change_vector) = &self.expected_change_vector {
            request = request.with_header(HEADER_IF_MATCH, format!("\"{}\"", change_vector));
        }
        Ok(request)
    }

    fn set_response(&mut self, body: &[u8], _from_cache: bool) -> Result<()> {
        self.result = Some(parse_json(body)?);
        Ok(())
    }
}
