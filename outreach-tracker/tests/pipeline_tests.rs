//! End-to-end tests: extension messages in, stored events out.

use async_trait::async_trait;
use outreach_store::{EventQueue, OutreachEvent, OutreachKind, OutreachStatus, DEFAULT_CAPACITY};
use outreach_tracker::reporter::persist_messages;
use outreach_tracker::{
    bridge, ActionReporter, ClickRouter, Config, Document, HostMessage, NodeId, NodeSnapshot,
    RemoteSink, TrackerError,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

const SUGGESTIONS: &str = "https://www.linkedin.com/mynetwork/";
const THREAD: &str = "https://www.linkedin.com/messaging/thread/2-abc/";

#[derive(Default)]
struct RecordingRemote {
    pushed: StdMutex<Vec<(OutreachKind, String)>>,
}

#[async_trait]
impl RemoteSink for RecordingRemote {
    async fn push(&self, event: &OutreachEvent) -> Result<(), TrackerError> {
        self.pushed
            .lock()
            .unwrap()
            .push((event.kind, event.name.clone()));
        Ok(())
    }
}

struct Harness {
    doc: Arc<Document>,
    router: Arc<ClickRouter>,
    queue: Arc<Mutex<EventQueue>>,
    remote: Arc<RecordingRemote>,
    host_tx: mpsc::Sender<HostMessage>,
    pump: tokio::task::JoinHandle<()>,
    persistence: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start() -> Self {
        let queue = Arc::new(Mutex::new(EventQueue::open_in_memory(DEFAULT_CAPACITY).unwrap()));
        let remote = Arc::new(RecordingRemote::default());

        let (sink_tx, sink_rx) = mpsc::channel(16);
        let persistence = tokio::spawn(persist_messages(sink_rx, Arc::clone(&queue)));
        let reporter = ActionReporter::new(
            Some(remote.clone() as Arc<dyn RemoteSink>),
            sink_tx,
            Arc::clone(&queue),
        );

        let doc = Document::new("about:blank");
        let router = Arc::new(ClickRouter::install(Arc::clone(&doc), &Config::default(), reporter).unwrap());

        let (host_tx, host_rx) = mpsc::channel(64);
        let pump = tokio::spawn(bridge::pump(host_rx, Arc::clone(&doc), Arc::clone(&router)));

        Self {
            doc,
            router,
            queue,
            remote,
            host_tx,
            pump,
            persistence,
        }
    }

    async fn send(&self, message: HostMessage) {
        self.host_tx.send(message).await.unwrap();
        // Let the pump apply it
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    /// Close the bridge, wait for every action to be reported and persisted
    async fn finish(self) -> (Vec<OutreachEvent>, Vec<(OutreachKind, String)>) {
        drop(self.host_tx);
        self.pump.await.unwrap();
        self.router.drain().await;
        // Remote pushes run on their own tasks
        tokio::time::sleep(Duration::from_millis(1)).await;

        let pushed = self.remote.pushed.lock().unwrap().clone();
        drop(self.router);
        self.persistence.await.unwrap();

        let events = self.queue.lock().await.all().unwrap();
        drop(self.doc);
        (events, pushed)
    }
}

fn suggestion_card(card: u64, button: u64, name: &str, slug: &str) -> NodeSnapshot {
    NodeSnapshot::element("li")
        .with_id(card)
        .child(
            NodeSnapshot::element("a")
                .attr("href", &format!("/in/{}/", slug))
                .child(NodeSnapshot::element("span").with_text(name)),
        )
        .child(
            NodeSnapshot::element("button")
                .with_id(button)
                .attr("aria-label", &format!("Invite {} to connect", name))
                .child(
                    NodeSnapshot::element("span")
                        .with_id(button + 1)
                        .with_text("Connect"),
                ),
        )
        .child(
            NodeSnapshot::element("button")
                .attr("aria-label", &format!("Follow {}", name))
                .with_text("Follow"),
        )
}

fn suggestions_page() -> HostMessage {
    HostMessage::Snapshot {
        url: SUGGESTIONS.to_string(),
        root: NodeSnapshot::element("body").with_id(1).child(
            NodeSnapshot::element("main")
                .with_id(2)
                .child(NodeSnapshot::element("h2").with_text("People you may know"))
                .child(
                    NodeSnapshot::element("ul")
                        .with_id(3)
                        .child(suggestion_card(10, 11, "Dave Payne", "davepayne"))
                        .child(suggestion_card(20, 21, "Alex Ripoll Piera", "alexripoll")),
                ),
        ),
    }
}

#[tokio::test(start_paused = true)]
async fn test_card_removal_confirms_connect() {
    let harness = Harness::start();
    harness.send(suggestions_page()).await;

    // Click lands on the inner span of Dave's connect button
    harness.send(HostMessage::Click { target: NodeId(12) }).await;
    tokio::time::sleep(Duration::from_millis(700)).await;
    harness.send(HostMessage::Remove { id: NodeId(10) }).await;

    let (events, pushed) = harness.finish().await;

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.name, "Dave Payne");
    assert_eq!(event.url, "https://www.linkedin.com/in/davepayne/");
    assert_eq!(event.kind, OutreachKind::Connect);
    assert_eq!(event.status, OutreachStatus::Confirmed);
    assert!(event.ts > 0);

    assert_eq!(pushed, vec![(OutreachKind::Connect, "Dave Payne".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_relabel_confirms_and_ignored_click_emits_nothing() {
    let harness = Harness::start();
    harness.send(suggestions_page()).await;

    harness.send(HostMessage::Click { target: NodeId(21) }).await;
    harness
        .send(HostMessage::SetAttribute {
            id: NodeId(21),
            name: "aria-label".to_string(),
            value: Some("Pending, click to withdraw invitation sent to Alex Ripoll Piera".to_string()),
        })
        .await;

    // Follow button: no event
    let follow = harness.doc.view().children(NodeId(10))[2];
    harness.send(HostMessage::Click { target: follow }).await;

    let status = harness.router.status();
    assert_eq!(status.tracked, 1);
    assert_eq!(status.ignored, 1);

    let (events, _) = harness.finish().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "Alex Ripoll Piera");
    assert_eq!(events[0].status, OutreachStatus::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn test_no_change_times_out_as_clicked_only() {
    let harness = Harness::start();
    harness.send(suggestions_page()).await;

    harness.send(HostMessage::Click { target: NodeId(11) }).await;
    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert_eq!(harness.router.status().in_flight, 1);

    let (events, _) = harness.finish().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, OutreachStatus::ClickedOnly);
}

#[tokio::test(start_paused = true)]
async fn test_direct_message_send() {
    let harness = Harness::start();
    harness
        .send(HostMessage::Snapshot {
            url: THREAD.to_string(),
            root: NodeSnapshot::element("body").with_id(1).child(
                NodeSnapshot::element("div")
                    .with_id(2)
                    .child(
                        NodeSnapshot::element("h2")
                            .attr("class", "msg-entity-lockup__entity-title")
                            .with_text("Sam Lee"),
                    )
                    .child(
                        NodeSnapshot::element("form").child(
                            NodeSnapshot::element("button")
                                .with_id(30)
                                .attr("class", "msg-form__send-button artdeco-button")
                                .with_text("Send"),
                        ),
                    ),
            ),
        })
        .await;

    harness.send(HostMessage::Click { target: NodeId(30) }).await;
    // The composer re-renders and the old button goes away
    harness.send(HostMessage::Remove { id: NodeId(30) }).await;

    let (events, pushed) = harness.finish().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, OutreachKind::Message);
    assert_eq!(events[0].name, "Sam Lee");
    assert_eq!(events[0].url, THREAD);
    assert_eq!(events[0].status, OutreachStatus::Confirmed);
    assert_eq!(pushed, vec![(OutreachKind::Message, "Sam Lee".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_actions_each_emit_once() {
    let harness = Harness::start();
    harness.send(suggestions_page()).await;

    harness.send(HostMessage::Click { target: NodeId(11) }).await;
    harness.send(HostMessage::Click { target: NodeId(21) }).await;
    tokio::time::sleep(Duration::from_millis(1000)).await;
    harness.send(HostMessage::Remove { id: NodeId(20) }).await;

    let (events, pushed) = harness.finish().await;

    // Newest first: Dave timed out after Alex was confirmed
    let summary: Vec<_> = events.iter().map(|e| (e.name.as_str(), e.status)).collect();
    assert_eq!(
        summary,
        vec![
            ("Dave Payne", OutreachStatus::ClickedOnly),
            ("Alex Ripoll Piera", OutreachStatus::Confirmed),
        ]
    );
    assert_eq!(pushed.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mirror_errors_do_not_stop_the_pump() {
    let harness = Harness::start();
    harness.send(suggestions_page()).await;

    harness.send(HostMessage::Remove { id: NodeId(999) }).await;
    harness
        .send(HostMessage::SetText {
            id: NodeId(404),
            text: "Pending".to_string(),
        })
        .await;
    harness.send(HostMessage::Click { target: NodeId(999) }).await;
    harness.send(HostMessage::Click { target: NodeId(11) }).await;

    assert_eq!(harness.router.status().tracked, 1);
    let (events, _) = harness.finish().await;
    assert_eq!(events.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_updates_location_fallback() {
    let harness = Harness::start();
    let profile = "https://www.linkedin.com/in/jordan/";
    harness
        .send(HostMessage::Snapshot {
            url: SUGGESTIONS.to_string(),
            root: NodeSnapshot::element("body").with_id(1).child(
                NodeSnapshot::element("main")
                    .with_id(2)
                    .child(NodeSnapshot::element("h1").with_text("Jordan Smith"))
                    .child(
                        NodeSnapshot::element("button")
                            .with_id(5)
                            .child(NodeSnapshot::element("span").with_text("Connect")),
                    ),
            ),
        })
        .await;
    harness
        .send(HostMessage::Navigate {
            url: profile.to_string(),
        })
        .await;
    harness.send(HostMessage::Click { target: NodeId(5) }).await;

    let (events, _) = harness.finish().await;
    assert_eq!(events[0].name, "Jordan Smith");
    assert_eq!(events[0].url, profile);
}

#[tokio::test(start_paused = true)]
async fn test_resent_page_with_pending_label_confirms() {
    let harness = Harness::start();
    harness.send(suggestions_page()).await;
    harness.send(HostMessage::Click { target: NodeId(11) }).await;

    // Same ids, Dave's button now reads as pending
    harness
        .send(HostMessage::Snapshot {
            url: SUGGESTIONS.to_string(),
            root: NodeSnapshot::element("body").with_id(1).child(
                NodeSnapshot::element("main").with_id(2).child(
                    NodeSnapshot::element("ul").with_id(3).child(
                        NodeSnapshot::element("li").with_id(10).child(
                            NodeSnapshot::element("button")
                                .with_id(11)
                                .attr("aria-label", "Pending, click to withdraw invitation sent to Dave Payne")
                                .child(NodeSnapshot::element("span").with_id(12).with_text("Pending")),
                        ),
                    ),
                ),
            ),
        })
        .await;

    let (events, _) = harness.finish().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "Dave Payne");
    assert_eq!(events[0].status, OutreachStatus::Confirmed);
}
