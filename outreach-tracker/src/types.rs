//! Core types shared across the tracker.

use crate::dom::{DomError, NodeId};
use outreach_store::{OutreachKind, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A clicked element that classified as an outreach action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedElement {
    pub node: NodeId,
    pub kind: OutreachKind,
}

impl TrackedElement {
    pub fn new(node: NodeId, kind: OutreachKind) -> Self {
        Self { node, kind }
    }
}

/// Errors that can occur while tracking or reporting an action
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Document error: {0}")]
    Dom(#[from] DomError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote rejected {endpoint}: {status}")]
    RemoteStatus { endpoint: String, status: u16 },

    #[error("No endpoint configured for {0}")]
    NoEndpoint(OutreachKind),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
