//! Node registry ("tracker") client.
//!
//! The tracker is a shared HTTP service that records which nodes are
//! currently running. Updates are last-writer-wins; the node only ever
//! flips its own flag.

use crate::error::NodeError;
use crate::node::NodeId;
use log::info;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SET_STATUS_PATH: &str = "set-node-status";

/// Shared registry of running nodes.
pub trait NodeRegistry: Send + Sync {
    fn set_running(&self, node_id: NodeId, running: bool) -> Result<(), NodeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatusUpdate {
    pub id: NodeId,
    pub running: bool,
}

/// HTTP client for the tracker server.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    address: String,
    http: reqwest::blocking::Client,
}

impl TrackerClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Result<Self, NodeError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NodeError::HttpClient)?;
        Ok(Self {
            address: address.into(),
            http,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl NodeRegistry for TrackerClient {
    fn set_running(&self, node_id: NodeId, running: bool) -> Result<(), NodeError> {
        let url = format!("http://{}/{}", self.address, SET_STATUS_PATH);
        let response = self
            .http
            .post(&url)
            .json(&NodeStatusUpdate {
                id: node_id,
                running,
            })
            .send()
            .map_err(|e| NodeError::Registry(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::Registry(format!(
                "tracker at {} returned HTTP {}",
                self.address, status
            )));
        }

        info!(
            "🗂️ Node {} marked {} on tracker {}",
            node_id,
            if running { "running" } else { "stopped" },
            self.address
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockHttp;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_set_running_posts_status() {
        let tracker = MockHttp::serve(200, "{}");
        let client = TrackerClient::new(tracker.address(), TIMEOUT).unwrap();

        client.set_running(7, true).unwrap();
        client.set_running(7, false).unwrap();

        let requests = tracker.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].target, "/set-node-status");
        let first: NodeStatusUpdate = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(first, NodeStatusUpdate { id: 7, running: true });
        let second: NodeStatusUpdate = serde_json::from_str(&requests[1].body).unwrap();
        assert!(!second.running);
    }

    #[test]
    fn test_error_status_is_registry_error() {
        let tracker = MockHttp::serve(500, "{}");
        let client = TrackerClient::new(tracker.address(), TIMEOUT).unwrap();
        assert!(matches!(
            client.set_running(1, true),
            Err(NodeError::Registry(_))
        ));
    }

    #[test]
    fn test_unreachable_tracker_is_registry_error() {
        let client = TrackerClient::new("127.0.0.1:1", TIMEOUT).unwrap();
        assert!(matches!(
            client.set_running(1, true),
            Err(NodeError::Registry(_))
        ));
    }
}
