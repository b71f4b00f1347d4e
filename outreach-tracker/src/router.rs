//! Click routing.
//!
//! The router is the single entry point for clicks forwarded from the page.
//! It gates each click through the classifier, snapshots the target identity
//! while the page still shows it, arms a confirmation, and reports the
//! finalized event once the confirmation resolves.

use crate::classifier::{interactive_ancestor, ElementClassifier};
use crate::config::Config;
use crate::dom::{Document, NodeId};
use crate::identity::{Identity, IdentityExtractor};
use crate::reporter::ActionReporter;
use crate::tracker::{ConfirmationState, ConfirmationTracker};
use crate::types::{TrackedElement, TrackerError};
use outreach_store::{OutreachEvent, OutreachStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Counters {
    tracked: AtomicUsize,
    confirmed: AtomicUsize,
    clicked_only: AtomicUsize,
    ignored: AtomicUsize,
    failed: AtomicUsize,
}

/// Router status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStatus {
    pub accepting: bool,
    pub tracked: usize,
    pub in_flight: usize,
    pub confirmed: usize,
    pub clicked_only: usize,
    pub ignored: usize,
    /// Classified clicks whose confirmation could not be armed
    pub failed: usize,
}

/// Process-scoped click dispatcher
pub struct ClickRouter {
    doc: Arc<Document>,
    classifier: ElementClassifier,
    identity: IdentityExtractor,
    tracker: ConfirmationTracker,
    reporter: ActionReporter,
    counters: Arc<Counters>,
    in_flight: Arc<Mutex<HashMap<Uuid, AbortHandle>>>,
    tasks: Mutex<JoinSet<()>>,
    accepting: AtomicBool,
}

impl ClickRouter {
    /// Attach to `doc`. Must be called inside a tokio runtime.
    pub fn install(doc: Arc<Document>, config: &Config, reporter: ActionReporter) -> Result<Self, TrackerError> {
        let tracker = ConfirmationTracker::new(Arc::clone(&doc), &config.tracking)?;
        info!(
            "Click router installed (confirm timeout {:?})",
            tracker.timeout()
        );

        Ok(Self {
            doc,
            classifier: ElementClassifier::new(&config.classifier),
            identity: IdentityExtractor::new(&config.identity, config.tracking.max_ancestor_depth),
            tracker,
            reporter,
            counters: Arc::new(Counters::default()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(JoinSet::new()),
            accepting: AtomicBool::new(true),
        })
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify and, on a match, start tracking. Returns the action id.
    ///
    /// Never fails: anything that goes wrong is logged and the click is
    /// dropped.
    pub fn on_click(&self, target: NodeId) -> Option<Uuid> {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!("Router shut down, ignoring click on {}", target);
            return None;
        }

        let Some((tracked, identity)) = self.inspect(target) else {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let confirmation = match self.tracker.track(tracked.node, tracked.kind) {
            Ok(confirmation) => confirmation,
            Err(e) => {
                warn!("Could not track {}: {}", tracked.node, e);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let id = Uuid::new_v4();
        let base = OutreachEvent {
            ts: chrono::Utc::now().timestamp_millis(),
            url: identity.url,
            name: identity.name,
            kind: tracked.kind,
            status: OutreachStatus::ClickedOnly,
        };
        self.counters.tracked.fetch_add(1, Ordering::Relaxed);
        info!("🖱️  {} click on {} ({}) as {}", tracked.kind, tracked.node, base.display_name(), id);

        // Resolution runs on its own task so a panic stays contained
        let resolution = tokio::spawn(confirmation.resolve());
        lock(&self.in_flight).insert(id, resolution.abort_handle());

        let reporter = self.reporter.clone();
        let counters = Arc::clone(&self.counters);
        let in_flight = Arc::clone(&self.in_flight);
        self.tasks().spawn(async move {
            let state = match resolution.await {
                Ok(state) => state,
                Err(e) if e.is_panic() => {
                    error!("Confirmation for {} panicked", id);
                    ConfirmationState::TimedOut
                }
                Err(_) => {
                    debug!("Confirmation for {} cancelled", id);
                    ConfirmationState::TimedOut
                }
            };
            lock(&in_flight).remove(&id);

            let status = state.status().unwrap_or(OutreachStatus::ClickedOnly);
            match status {
                OutreachStatus::Confirmed => counters.confirmed.fetch_add(1, Ordering::Relaxed),
                OutreachStatus::ClickedOnly => counters.clicked_only.fetch_add(1, Ordering::Relaxed),
            };

            reporter.report(OutreachEvent { status, ..base }).await;
        });

        // Reap finished reporting tasks so the set stays small
        while let Some(done) = self.tasks().try_join_next() {
            if let Err(e) = done {
                error!("Reporting task failed: {}", e);
            }
        }

        Some(id)
    }

    /// Resolve the clicked element and its identity while the page still
    /// shows them
    fn inspect(&self, target: NodeId) -> Option<(TrackedElement, Identity)> {
        let view = self.doc.view();

        let Some(el) = interactive_ancestor(&view, target) else {
            trace!("Click on {} has no interactive ancestor", target);
            return None;
        };
        let Some(kind) = self.classifier.classify(&view, el) else {
            trace!("Click on {} is not an outreach action", el);
            return None;
        };

        let identity = self.identity.extract(&view, el, kind);
        Some((TrackedElement::new(el, kind), identity))
    }

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            accepting: self.accepting.load(Ordering::SeqCst),
            tracked: self.counters.tracked.load(Ordering::Relaxed),
            in_flight: lock(&self.in_flight).len(),
            confirmed: self.counters.confirmed.load(Ordering::Relaxed),
            clicked_only: self.counters.clicked_only.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting clicks and cancel pending confirmations. Cancelled
    /// actions are still reported, as clicked-only.
    pub fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        let pending: Vec<AbortHandle> = lock(&self.in_flight).values().cloned().collect();
        info!("Click router shutting down, cancelling {} pending actions", pending.len());
        for handle in pending {
            handle.abort();
        }
        self.tracker.shutdown();
    }

    /// Wait until every started action has been reported
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks());
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = done {
                error!("Reporting task failed: {}", e);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeSnapshot;
    use crate::reporter::OutreachMessage;
    use outreach_store::{EventQueue, OutreachKind, DEFAULT_CAPACITY};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const PAGE: &str = "https://www.linkedin.com/mynetwork/";

    fn setup() -> (Arc<Document>, ClickRouter, mpsc::Receiver<OutreachMessage>) {
        let doc = Document::new(PAGE);
        doc.load(
            PAGE,
            &NodeSnapshot::element("main").with_id(1).child(
                NodeSnapshot::element("li")
                    .with_id(2)
                    .child(
                        NodeSnapshot::element("a")
                            .attr("href", "/in/davepayne/")
                            .with_text("Dave Payne"),
                    )
                    .child(
                        NodeSnapshot::element("button")
                            .with_id(3)
                            .attr("aria-label", "Invite Dave Payne to connect")
                            .child(NodeSnapshot::element("span").with_id(4).with_text("Connect")),
                    )
                    .child(
                        NodeSnapshot::element("button")
                            .with_id(5)
                            .attr("aria-label", "Follow Dave Payne")
                            .child(NodeSnapshot::element("span").with_id(6).with_text("Follow")),
                    ),
            ),
        );

        let (tx, rx) = mpsc::channel(16);
        let queue = Arc::new(tokio::sync::Mutex::new(
            EventQueue::open_in_memory(DEFAULT_CAPACITY).unwrap(),
        ));
        let reporter = ActionReporter::new(None, tx, queue);
        let router = ClickRouter::install(Arc::clone(&doc), &Config::default(), reporter).unwrap();
        (doc, router, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_click_is_ignored() {
        let (doc, router, mut rx) = setup();
        let observers = doc.observer_count();

        assert!(router.on_click(NodeId(6)).is_none());
        assert_eq!(doc.observer_count(), observers);

        router.drain().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(router.status().ignored, 1);
        assert_eq!(router.status().tracked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_outside_button_is_ignored() {
        let (_doc, router, _rx) = setup();
        assert!(router.on_click(NodeId(2)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_connect_is_reported() {
        let (doc, router, mut rx) = setup();

        assert!(router.on_click(NodeId(4)).is_some());
        assert_eq!(router.status().in_flight, 1);

        tokio::time::sleep(Duration::from_millis(800)).await;
        doc.remove(NodeId(2)).unwrap();
        router.drain().await;

        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload.name, "Dave Payne");
        assert_eq!(message.payload.url, "https://www.linkedin.com/in/davepayne/");
        assert_eq!(message.payload.kind, OutreachKind::Connect);
        assert_eq!(message.payload.status, OutreachStatus::Confirmed);

        let status = router.status();
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.confirmed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_click_reports_clicked_only() {
        let (_doc, router, mut rx) = setup();

        router.on_click(NodeId(3)).unwrap();
        router.drain().await;

        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload.status, OutreachStatus::ClickedOnly);
        assert_eq!(router.status().clicked_only, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_snapshotted_at_click_time() {
        let (doc, router, mut rx) = setup();

        router.on_click(NodeId(3)).unwrap();
        // The host relabels the button once the invite is out
        doc.set_attribute(NodeId(3), "aria-label", Some("Pending, click to withdraw invitation"))
            .unwrap();
        router.drain().await;

        let message = rx.recv().await.unwrap();
        assert_eq!(message.payload.name, "Dave Payne");
        assert_eq!(message.payload.status, OutreachStatus::Confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_pending_as_clicked_only() {
        let (_doc, router, mut rx) = setup();

        router.on_click(NodeId(3)).unwrap();
        tokio::task::yield_now().await;
        router.shutdown();
        router.drain().await;

        assert_eq!(rx.recv().await.unwrap().payload.status, OutreachStatus::ClickedOnly);
        assert!(!router.status().accepting);
        assert!(router.on_click(NodeId(3)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_counts_each_outcome() {
        let (doc, router, mut rx) = setup();
        doc.insert(
            NodeId(1),
            None,
            &NodeSnapshot::element("li").with_id(20).child(
                NodeSnapshot::element("button")
                    .with_id(21)
                    .attr("aria-label", "Invite Sam Lee to connect")
                    .with_text("Connect"),
            ),
        )
        .unwrap();

        assert!(router.on_click(NodeId(4)).is_some());
        assert!(router.on_click(NodeId(21)).is_some());
        assert!(router.on_click(NodeId(6)).is_none());
        assert!(router.on_click(NodeId(1)).is_none());

        // Dave's card goes away; a late click on it cannot be tracked
        doc.remove(NodeId(2)).unwrap();
        assert!(router.on_click(NodeId(4)).is_none());

        assert_eq!(
            router.status(),
            RouterStatus {
                accepting: true,
                tracked: 2,
                in_flight: 2,
                confirmed: 0,
                clicked_only: 0,
                ignored: 2,
                failed: 1,
            }
        );

        router.drain().await;
        assert_eq!(
            router.status(),
            RouterStatus {
                accepting: true,
                tracked: 2,
                in_flight: 0,
                confirmed: 1,
                clicked_only: 1,
                ignored: 2,
                failed: 1,
            }
        );

        let mut events = vec![rx.recv().await.unwrap().payload, rx.recv().await.unwrap().payload];
        events.sort_by_key(|event| event.name.clone());
        assert_eq!(events[0].name, "Dave Payne");
        assert_eq!(events[0].status, OutreachStatus::Confirmed);
        assert_eq!(events[1].name, "Sam Lee");
        assert_eq!(events[1].status, OutreachStatus::ClickedOnly);
        assert!(rx.try_recv().is_err());
    }
}
