//! Browser extension bridge via Native Messaging.
//!
//! The extension's content script forwards the page structure, every
//! mutation it observes, and every click (in capture order) as
//! length-prefixed JSON frames on stdin. Each frame is acknowledged on
//! stdout. Messages are applied to the [`Document`] mirror in arrival order,
//! so a click is always routed before the host mutations that follow it.

use crate::dom::{Document, NodeId, NodeSnapshot};
use crate::router::ClickRouter;
use crate::types::TrackerError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Upper bound on one incoming frame (the extension-to-host limit)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Message from the browser extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Full page after load or a hard navigation
    Snapshot { url: String, root: NodeSnapshot },
    Insert {
        parent: NodeId,
        #[serde(default)]
        before: Option<NodeId>,
        node: NodeSnapshot,
    },
    Remove { id: NodeId },
    /// `value: null` removes the attribute
    SetAttribute {
        id: NodeId,
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
    SetText { id: NodeId, text: String },
    /// Client-side route change
    Navigate { url: String },
    Click { target: NodeId },
}

impl HostMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::Snapshot { .. } => "snapshot",
            HostMessage::Insert { .. } => "insert",
            HostMessage::Remove { .. } => "remove",
            HostMessage::SetAttribute { .. } => "set_attribute",
            HostMessage::SetText { .. } => "set_text",
            HostMessage::Navigate { .. } => "navigate",
            HostMessage::Click { .. } => "click",
        }
    }
}

/// Acknowledgement sent back to the extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResponse {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub received: bool,
}

impl HostResponse {
    pub fn status(received: bool) -> Self {
        Self {
            msg_type: "status".to_string(),
            received,
        }
    }
}

/// Read one length-prefixed frame
pub fn read_frame<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Write one length-prefixed frame
pub fn write_frame<W: Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(bytes)?;
    writer.flush()
}

pub fn read_message<R: Read>(reader: &mut R) -> Result<HostMessage, TrackerError> {
    let frame = read_frame(reader)?;
    Ok(serde_json::from_slice(&frame)?)
}

pub fn write_response<W: Write>(writer: &mut W, response: &HostResponse) -> Result<(), TrackerError> {
    let json = serde_json::to_vec(response)?;
    write_frame(writer, &json)?;
    Ok(())
}

/// Run the native messaging reader loop (blocking, run in separate thread)
///
/// Stops when the extension disconnects, the stream breaks, or the
/// receiving side goes away. Frames that are not valid messages are
/// acknowledged with `received: false` and skipped.
pub fn run_native_messaging_loop<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    sender: mpsc::Sender<HostMessage>,
) {
    debug!("Starting native messaging loop");

    loop {
        let frame = match read_frame(&mut reader) {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Browser extension disconnected");
                break;
            }
            Err(e) => {
                error!("Error reading extension message: {}", e);
                break;
            }
        };

        let parsed = serde_json::from_slice::<HostMessage>(&frame);
        if let Err(e) = write_response(&mut writer, &HostResponse::status(parsed.is_ok())) {
            warn!("Failed to send response: {}", e);
        }

        match parsed {
            Ok(message) => {
                trace!("Received {} message", message.kind());
                if sender.blocking_send(message).is_err() {
                    error!("Message channel closed, exiting native messaging loop");
                    break;
                }
            }
            Err(e) => warn!("Skipping malformed extension message: {}", e),
        }
    }
}

/// Apply one message to the mirror, routing clicks
pub fn apply(doc: &Document, router: &ClickRouter, message: HostMessage) -> Result<(), TrackerError> {
    match message {
        HostMessage::Snapshot { url, root } => {
            debug!("Page snapshot for {}", url);
            doc.load(&url, &root);
        }
        HostMessage::Insert { parent, before, node } => {
            doc.insert(parent, before, &node)?;
        }
        HostMessage::Remove { id } => doc.remove(id)?,
        HostMessage::SetAttribute { id, name, value } => {
            doc.set_attribute(id, &name, value.as_deref())?;
        }
        HostMessage::SetText { id, text } => doc.set_text(id, &text)?,
        HostMessage::Navigate { url } => {
            debug!("Navigated to {}", url);
            doc.set_location(&url);
        }
        HostMessage::Click { target } => {
            router.on_click(target);
        }
    }
    Ok(())
}

/// Drain bridge messages into the mirror until the channel closes
pub async fn pump(mut rx: mpsc::Receiver<HostMessage>, doc: Arc<Document>, router: Arc<ClickRouter>) {
    while let Some(message) = rx.recv().await {
        let kind = message.kind();
        if let Err(e) = apply(&doc, &router, message) {
            // Mirror drift is expected; the next snapshot repairs it
            warn!("Could not apply {} message: {}", kind, e);
        }
    }
    debug!("Bridge channel closed");
}
