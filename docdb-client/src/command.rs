use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::errors::{ClientError, Result};
use crate::topology::ServerNode;
use crate::transport::HttpRequest;

/// A unit of work the executor can dispatch to any node of the cluster.
///
/// The command builds the request for whichever node was selected and parses
/// the response into its own result. The executor calls `set_response` (or
/// `set_not_found`) at most once per `execute`, however many nodes were tried.
pub trait Command: Send {
    /// Reads may be retried on another node and served from the cache.
    /// Writes are sent once and their failures surface to the caller.
    fn is_read_request(&self) -> bool;

    /// Reads opt into the response cache; writes that return true invalidate
    /// the cached entry of the resource they target.
    fn is_cacheable(&self) -> bool {
        false
    }

    fn create_request(&self, node: &ServerNode) -> Result<HttpRequest>;

    fn set_response(&mut self, body: &[u8], from_cache: bool) -> Result<()>;

    /// Called when the server reports the resource does not exist.
    fn set_not_found(&mut self) -> Result<()> {
        Err(ClientError::NotFound(
            "server reported the resource does not exist".to_string(),
        ))
    }
}

/// Parses a JSON body; an empty body is an invalid response, never "no data".
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ClientError::InvalidResponse(
            "response body is empty".to_string(),
        ));
    }
    serde_json::from_slice(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

/// Appends url-encoded query pairs to `base`.
pub fn url_with_query(base: &str, pairs: &[(&str, &str)]) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", base, e)))?;
    if !pairs.is_empty() {
        let mut query = url.query_pairs_mut();
        for (name, value) in pairs {
            query.append_pair(name, value);
        }
    }
    Ok(url.to_string())
}
