//! Outreach Tracker - click confirmation for social outreach actions
//!
//! This crate watches a mirrored copy of a third-party web page for clicks
//! on outreach actions and works out, without any API from the host, whether
//! each action actually took effect:
//!
//! - **Classification**: declared-intent labels, send-button classes and
//!   visible text decide whether a click is a connect request or a direct
//!   message
//! - **Identity**: recipient name and profile URL come from labels, headings
//!   and nearby profile links
//! - **Confirmation**: element removal, terminal relabelling and a timeout
//!   race to a single outcome per action
//!
//! # Architecture
//!
//! The browser extension streams the page and every click over Native
//! Messaging ([`bridge`]). Clicks go through the [`ClickRouter`], which arms a
//! confirmation per action and hands finalized events to the
//! [`ActionReporter`].

pub mod bridge;
pub mod classifier;
pub mod config;
pub mod dom;
pub mod identity;
pub mod reporter;
pub mod router;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use bridge::{HostMessage, HostResponse};
pub use classifier::ElementClassifier;
pub use config::{Config, ConfigError};
pub use dom::{Document, DocumentView, NodeId, NodeSnapshot};
pub use identity::{Identity, IdentityExtractor};
pub use reporter::{ActionReporter, HttpRemoteSink, OutreachMessage, RemoteSink};
pub use router::{ClickRouter, RouterStatus};
pub use tracker::{ConfirmationMachine, ConfirmationState, ConfirmationTracker, Signal};
pub use types::{TrackedElement, TrackerError};
