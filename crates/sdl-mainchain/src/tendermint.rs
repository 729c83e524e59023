// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - TENDERMINT RPC CLIENT
//
// Commits block abstracts to a Tendermint node and checks for their presence.
//   commit: GET /broadcast_tx_sync?tx=0x<payload hex>
//   query:  GET /tx?hash=0x<hash hex>
//
// Every call is blocking and independent. Nothing is retried here.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::MainChainError;
use crate::types::{AnchorHash, CommitOutcome, CommitRequest};
use log::{debug, info, warn};
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const BROADCAST_ENDPOINT: &str = "broadcast_tx_sync";
pub const QUERY_ENDPOINT: &str = "tx";

/// Default request timeout for a single RPC call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the Tendermint RPC listener
    pub address: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Blocking client for a single Tendermint RPC endpoint.
///
/// Holds no mutable state, so one instance can be shared between threads.
#[derive(Debug, Clone)]
pub struct TendermintClient {
    address: String,
    http: reqwest::blocking::Client,
}

impl TendermintClient {
    pub fn new(config: ClientConfig) -> Result<Self, MainChainError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(MainChainError::ClientSetup)?;
        // Fail early on addresses that can never form a request.
        Url::parse(&format!("http://{}/", config.address))?;
        Ok(Self {
            address: config.address,
            http,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Submit an abstract. Returns the anchor hash only when the chain
    /// accepted it with code 0.
    pub fn commit(&self, request: &CommitRequest) -> CommitOutcome {
        let encoded = request.encoded();
        let response = match self.send_request(BROADCAST_ENDPOINT, &[("tx", encoded.as_str())]) {
            Ok(response) => response,
            Err(reason) => return CommitOutcome::Transport(reason),
        };
        interpret_commit(&response)
    }

    /// Check whether the chain knows a transaction with this hash.
    ///
    /// Only the presence of a `result` key is checked; the content of the
    /// returned transaction is not compared against the hash.
    pub fn query(&self, hash: &AnchorHash) -> bool {
        self.query_response(hash)
            .map(|response| interpret_query(&response))
            .unwrap_or(false)
    }

    /// Raw JSON answer of a query, `None` on transport failure.
    pub fn query_response(&self, hash: &AnchorHash) -> Option<Value> {
        let encoded = hash.to_hex();
        self.send_request(QUERY_ENDPOINT, &[("hash", encoded.as_str())])
            .ok()
    }

    /// `http://<address>/<endpoint>?k1=v1&k2=v2`, keeping parameter order.
    pub fn request_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url, MainChainError> {
        let mut url = Url::parse(&format!("http://{}/{}", self.address, endpoint))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Perform a GET and parse the body as a JSON object. Every failure is
    /// logged and reduced to a reason string.
    fn send_request(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, String> {
        let url = self.request_url(endpoint, params).map_err(|e| {
            info!("Failed building request for {}: {}", endpoint, e);
            e.to_string()
        })?;

        let response = self.http.get(url).send().map_err(|e| {
            info!("Failed executing request to {}: {}", endpoint, e);
            e.to_string()
        })?;

        let status = response.status();
        if !status.is_success() {
            info!("Request to {} returned HTTP {}", endpoint, status);
            return Err(format!("HTTP status {}", status));
        }

        let body = response.text().map_err(|e| {
            info!("Failed reading response from {}: {}", endpoint, e);
            e.to_string()
        })?;

        match serde_json::from_str::<Value>(&body) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) => {
                info!("Response from {} is not a JSON object: {}", endpoint, body);
                Err("response is not a JSON object".to_string())
            }
            Err(e) => {
                info!("Response from {} is not valid JSON: {}", endpoint, e);
                Err(e.to_string())
            }
        }
    }
}

/// Classify a `broadcast_tx_sync` answer.
///
/// A top-level `error` object wins over anything in `result`. Older
/// Tendermint versions send `"error": ""` alongside a good result, so only
/// an object counts as an error.
pub fn interpret_commit(response: &Value) -> CommitOutcome {
    if let Some(error) = response.get("error").and_then(Value::as_object) {
        let detail = match error.get("data") {
            Some(Value::String(data)) => data.clone(),
            Some(other) => other.to_string(),
            None => Value::Object(error.clone()).to_string(),
        };
        info!("⚓ Could not commit the abstract because: {}", detail);
        debug!("Rejected commit response: {}", response);
        return CommitOutcome::Rejected { code: None, detail };
    }

    let Some(result) = response.get("result").and_then(Value::as_object) else {
        warn!("Result parsing failed, no result object in: {}", response);
        return CommitOutcome::Malformed("missing result object".to_string());
    };

    let Some(code) = result.get("code").and_then(Value::as_i64) else {
        warn!("Result parsing failed, no numeric code in: {}", response);
        return CommitOutcome::Malformed("missing result code".to_string());
    };

    if code != 0 {
        let detail = result
            .get("log")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        info!("⚓ Abstract rejected with code {}: {}", code, detail);
        return CommitOutcome::Rejected {
            code: Some(code),
            detail,
        };
    }

    let Some(hash_text) = result.get("hash").and_then(Value::as_str) else {
        warn!("Result parsing failed, no hash in: {}", response);
        return CommitOutcome::Malformed("missing result hash".to_string());
    };

    match AnchorHash::from_hex(hash_text) {
        Ok(hash) if hash.is_empty() => {
            warn!("Result parsing failed, empty hash in: {}", response);
            CommitOutcome::Malformed("empty result hash".to_string())
        }
        Ok(hash) => CommitOutcome::Accepted(hash),
        Err(e) => {
            warn!("Result parsing failed: {}", e);
            CommitOutcome::Malformed(e.to_string())
        }
    }
}

/// A query succeeds iff the answer carries a `result` key, whatever its value.
pub fn interpret_query(response: &Value) -> bool {
    response
        .as_object()
        .map(|object| object.contains_key("result"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> TendermintClient {
        TendermintClient::new(ClientConfig::new("127.0.0.1:46658")).unwrap()
    }

    #[test]
    fn test_request_url_single_param() {
        let url = client()
            .request_url(BROADCAST_ENDPOINT, &[("tx", "0xabcd")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:46658/broadcast_tx_sync?tx=0xabcd"
        );
    }

    #[test]
    fn test_request_url_keeps_param_order() {
        let url = client()
            .request_url("tx", &[("hash", "0x01"), ("prove", "true")])
            .unwrap();
        assert_eq!(url.query(), Some("hash=0x01&prove=true"));
    }

    #[test]
    fn test_request_url_without_params() {
        let url = client().request_url("status", &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:46658/status");
    }

    #[test]
    fn test_invalid_address_rejected() {
        assert!(TendermintClient::new(ClientConfig::new("bad host:1")).is_err());
    }

    #[test]
    fn test_commit_accepted() {
        let outcome = interpret_commit(&json!({"result": {"code": 0, "hash": "0x1A2B"}}));
        assert_eq!(
            outcome,
            CommitOutcome::Accepted(AnchorHash::new(vec![0x1A, 0x2B]))
        );
    }

    #[test]
    fn test_commit_accepted_unprefixed_hash() {
        let outcome = interpret_commit(&json!({
            "jsonrpc": "2.0",
            "id": "",
            "result": {"code": 0, "data": "", "log": "", "hash": "E3B0C442"}
        }));
        assert_eq!(
            outcome.into_anchor_hash(),
            Some(AnchorHash::new(vec![0xE3, 0xB0, 0xC4, 0x42]))
        );
    }

    #[test]
    fn test_error_object_wins() {
        let outcome = interpret_commit(&json!({
            "error": {"code": -32603, "message": "Internal error", "data": "mempool full"},
            "result": {"code": 0, "hash": "0x1A2B"}
        }));
        assert_eq!(
            outcome,
            CommitOutcome::Rejected {
                code: None,
                detail: "mempool full".to_string()
            }
        );
    }

    #[test]
    fn test_error_without_data_renders_object() {
        match interpret_commit(&json!({"error": {"message": "boom"}})) {
            CommitOutcome::Rejected { detail, .. } => assert!(detail.contains("boom")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_empty_error_string_ignored() {
        let outcome = interpret_commit(&json!({"error": "", "result": {"code": 0, "hash": "AB"}}));
        assert!(outcome.is_accepted());
    }

    #[test]
    fn test_nonzero_code_rejected() {
        let outcome = interpret_commit(&json!({"result": {"code": 3, "log": "bad abstract", "hash": "0x1A2B"}}));
        assert_eq!(
            outcome,
            CommitOutcome::Rejected {
                code: Some(3),
                detail: "bad abstract".to_string()
            }
        );
    }

    #[test]
    fn test_structural_mismatches_are_malformed() {
        let cases = [
            json!({}),
            json!({"result": "ok"}),
            json!({"result": {"hash": "0x1A2B"}}),
            json!({"result": {"code": "zero", "hash": "0x1A2B"}}),
            json!({"result": {"code": 0}}),
            json!({"result": {"code": 0, "hash": 42}}),
            json!({"result": {"code": 0, "hash": "0xXYZ"}}),
            json!({"result": {"code": 0, "hash": "0x"}}),
        ];
        for case in cases {
            let outcome = interpret_commit(&case);
            assert!(
                matches!(outcome, CommitOutcome::Malformed(_)),
                "{} gave {:?}",
                case,
                outcome
            );
        }
    }

    #[test]
    fn test_query_presence_only() {
        assert!(interpret_query(&json!({"result": {}})));
        assert!(interpret_query(&json!({"result": null})));
        assert!(interpret_query(&json!({"result": {"hash": "0xFFFF", "height": "7"}})));
        assert!(!interpret_query(&json!({})));
        assert!(!interpret_query(&json!({"error": {"data": "tx not found"}})));
        assert!(!interpret_query(&json!([{"result": {}}])));
    }

    #[test]
    fn test_unreachable_endpoint_is_transport_failure() {
        // Port 1 on localhost refuses connections on any sane test host.
        let client = TendermintClient::new(
            ClientConfig::new("127.0.0.1:1").with_timeout(Duration::from_secs(2)),
        )
        .unwrap();
        let request = CommitRequest::new(b"abstract-17".to_vec()).unwrap();
        assert!(matches!(client.commit(&request), CommitOutcome::Transport(_)));
        assert!(!client.query(&AnchorHash::new(vec![0x1A, 0x2B])));
    }
}
