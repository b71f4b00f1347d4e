//! Confirmation tracking.
//!
//! After a tracked click the host page gives no success signal, so each
//! action races three channels:
//!
//! - **detachment**: the element leaves the document (the host usually
//!   removes a suggestion card once the invite went out)
//! - **self-mutation**: the element's own label or text turns into one of
//!   the terminal markers ("Pending", "Withdraw", ...)
//! - **timeout**: nothing happened within the configured window
//!
//! The first channel to fire decides the outcome. A [`ConfirmationMachine`]
//! enforces that only one transition ever happens, no matter how many
//! signals arrive afterwards.
//!
//! The detachment channel is shared: one [`DetachmentWatcher`] observes the
//! whole document and re-broadcasts "something structural changed" to every
//! pending action, which then checks its own element.

use crate::classifier::INTENT_LABEL;
use crate::config::TrackingConfig;
use crate::dom::{Document, DocumentView, DomError, MutationObserver, NodeId, ObserveOptions, ROOT};
use crate::types::{TrackedElement, TrackerError};
use outreach_store::{OutreachKind, OutreachStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Buffered structural notifications per subscriber
const DETACH_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of one tracked action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    TimedOut,
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationState::Pending)
    }

    /// Recorded outcome, `None` while still pending
    pub fn status(&self) -> Option<OutreachStatus> {
        match self {
            ConfirmationState::Pending => None,
            ConfirmationState::Confirmed => Some(OutreachStatus::Confirmed),
            ConfirmationState::TimedOut => Some(OutreachStatus::ClickedOnly),
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Tracked element is no longer connected to the document
    Detached,
    /// A terminal marker appeared on the element
    MarkerMatched,
    /// The confirmation window elapsed
    TimerFired,
}

/// One-way state machine: `Pending` to exactly one terminal state
#[derive(Debug)]
pub struct ConfirmationMachine {
    state: ConfirmationState,
}

impl ConfirmationMachine {
    pub fn new() -> Self {
        Self {
            state: ConfirmationState::Pending,
        }
    }

    /// Apply a signal. Returns the new state if this signal caused the
    /// transition, `None` if the machine had already resolved.
    pub fn fire(&mut self, signal: Signal) -> Option<ConfirmationState> {
        if self.state.is_terminal() {
            trace!("Ignoring {:?}, already {:?}", signal, self.state);
            return None;
        }
        self.state = match signal {
            Signal::Detached | Signal::MarkerMatched => ConfirmationState::Confirmed,
            Signal::TimerFired => ConfirmationState::TimedOut,
        };
        Some(self.state)
    }

    pub fn state(&self) -> ConfirmationState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl Default for ConfirmationMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Label and text fragments that mean the action settled
#[derive(Debug, Clone)]
pub struct TerminalMarkers {
    pending_prefix: String,
    vocabulary: Vec<String>,
}

impl TerminalMarkers {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            pending_prefix: config.pending_label_prefix.trim().to_lowercase(),
            vocabulary: config
                .terminal_markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Whether `el` currently carries a terminal marker
    pub fn matches(&self, view: &DocumentView<'_>, el: NodeId) -> bool {
        let label = view
            .attribute(el, INTENT_LABEL)
            .map(|l| l.trim().to_lowercase())
            .unwrap_or_default();
        if !self.pending_prefix.is_empty() && label.starts_with(&self.pending_prefix) {
            trace!("{} label {:?} is terminal", el, label);
            return true;
        }

        let text = view.text_content(el).trim().to_lowercase();
        self.vocabulary.iter().any(|marker| text.contains(marker.as_str()))
    }
}

impl Default for TerminalMarkers {
    fn default() -> Self {
        Self::new(&TrackingConfig::default())
    }
}

/// Document-wide structural watcher shared by every pending action
pub struct DetachmentWatcher {
    tx: broadcast::Sender<()>,
    pump: JoinHandle<()>,
}

impl DetachmentWatcher {
    /// Observe the document root. Must be called inside a tokio runtime.
    pub fn spawn(doc: &Arc<Document>) -> Result<Self, TrackerError> {
        let mut observer = doc.observe(ROOT, ObserveOptions::structure())?;
        let (tx, _) = broadcast::channel(DETACH_CHANNEL_CAPACITY);
        let pump_tx = tx.clone();

        let pump = tokio::spawn(async move {
            while observer.next().await.is_some() {
                // Coalesce a burst of records into one notification
                while observer.try_next().is_some() {}
                // No subscribers is fine
                let _ = pump_tx.send(());
            }
            debug!("Detachment watcher stopped");
        });

        Ok(Self { tx, pump })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn shutdown(&self) {
        self.pump.abort();
    }
}

impl Drop for DetachmentWatcher {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Arms confirmations against one document
pub struct ConfirmationTracker {
    doc: Arc<Document>,
    detach: DetachmentWatcher,
    markers: TerminalMarkers,
    timeout: Duration,
}

impl ConfirmationTracker {
    /// Must be called inside a tokio runtime
    pub fn new(doc: Arc<Document>, config: &TrackingConfig) -> Result<Self, TrackerError> {
        let detach = DetachmentWatcher::spawn(&doc)?;
        Ok(Self {
            doc,
            detach,
            markers: TerminalMarkers::new(config),
            timeout: config.confirm_timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Enter `Pending` for `el`. Observers and the timer are armed before
    /// this returns; await [`Confirmation::resolve`] for the outcome.
    ///
    /// Fails if `el` is unknown or already out of the document.
    pub fn track(&self, el: NodeId, kind: OutreachKind) -> Result<Confirmation, TrackerError> {
        if !self.doc.view().is_connected(el) {
            return Err(if self.doc.view().contains(el) {
                DomError::Disconnected(el)
            } else {
                DomError::UnknownNode(el)
            }
            .into());
        }
        let self_observer = self.doc.observe(
            el,
            ObserveOptions {
                child_list: true,
                character_data: true,
                attributes: true,
                subtree: true,
                attribute_filter: Some(vec![INTENT_LABEL.to_string()]),
            },
        )?;
        let detached = self.detach.subscribe();
        let deadline = Instant::now() + self.timeout;

        debug!("Tracking {} ({}) for {:?}", el, kind, self.timeout);

        Ok(Confirmation {
            doc: Arc::clone(&self.doc),
            element: TrackedElement::new(el, kind),
            markers: self.markers.clone(),
            machine: ConfirmationMachine::new(),
            self_observer,
            detached,
            deadline,
        })
    }

    pub fn shutdown(&self) {
        self.detach.shutdown();
    }
}

/// A pending action. Dropping it releases its observers and timer.
pub struct Confirmation {
    doc: Arc<Document>,
    element: TrackedElement,
    markers: TerminalMarkers,
    machine: ConfirmationMachine,
    self_observer: MutationObserver,
    detached: broadcast::Receiver<()>,
    deadline: Instant,
}

impl Confirmation {
    pub fn element(&self) -> TrackedElement {
        self.element
    }

    fn marker_present(&self) -> bool {
        self.markers.matches(&self.doc.view(), self.element.node)
    }

    fn is_detached(&self) -> bool {
        !self.doc.view().is_connected(self.element.node)
    }

    /// Race the three channels and return the terminal state
    pub async fn resolve(mut self) -> ConfirmationState {
        let node = self.element.node;

        if self.marker_present() {
            self.machine.fire(Signal::MarkerMatched);
        }

        let timer = tokio::time::sleep_until(self.deadline);
        tokio::pin!(timer);
        let mut observing_self = true;
        let mut observing_detach = true;

        while !self.machine.is_terminal() {
            let signal = tokio::select! {
                biased;

                record = self.self_observer.next(), if observing_self => match record {
                    Some(record) => {
                        trace!("{} mutated: {:?}", node, record.kind);
                        while self.self_observer.try_next().is_some() {}
                        self.marker_present().then_some(Signal::MarkerMatched)
                    }
                    None => {
                        observing_self = false;
                        None
                    }
                },

                notice = self.detached.recv(), if observing_detach => match notice {
                    Ok(()) => self.is_detached().then_some(Signal::Detached),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!("Detachment subscriber for {} skipped {} notices", node, skipped);
                        self.is_detached().then_some(Signal::Detached)
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Detachment watcher closed while tracking {}", node);
                        observing_detach = false;
                        None
                    }
                },

                _ = &mut timer => Some(Signal::TimerFired),
            };

            if let Some(signal) = signal {
                if let Some(state) = self.machine.fire(signal) {
                    debug!("{} resolved {:?} by {:?}", node, state, signal);
                }
            }
        }

        self.machine.state()
    }
}
