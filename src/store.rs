use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::events::{EventData, EventRecord};
use crate::host::{Browser, TabId, WindowId};

/// The store's wire contract. Agents send `UserEvent`, panels send the
/// query/control messages, the host feeds the two observer messages, and
/// `AppendResolved` is the store's own tab-query completion re-entering
/// the channel.
#[derive(Debug)]
pub enum StoreMessage {
    UserEvent {
        record: EventRecord,
        sender_tab: Option<TabId>,
    },
    AppendResolved {
        record: EventRecord,
    },
    GetEvents {
        reply: Sender<Vec<EventRecord>>,
    },
    ClearEvents,
    SetTracking {
        enabled: bool,
    },
    GetTracking {
        reply: Sender<bool>,
    },
    TabActivated {
        at: DateTime<Utc>,
        tab_id: TabId,
    },
    WindowFocused {
        at: DateTime<Utc>,
        window_id: WindowId,
    },
    Shutdown,
}

/// Session-wide event log service. All state lives behind the handler
/// loop of one thread; nothing else touches the log or the tracking
/// flag. A port to a multi-writer runtime would need a lock around both.
pub struct EventStore {
    events: Vec<EventRecord>,
    tracking: bool,
    browser: Arc<dyn Browser>,
    self_tx: Sender<StoreMessage>,
}

impl EventStore {
    pub fn new(browser: Arc<dyn Browser>, tracking: bool, self_tx: Sender<StoreMessage>) -> Self {
        Self {
            events: Vec::new(),
            tracking,
            browser,
            self_tx,
        }
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn tracking(&self) -> bool {
        self.tracking
    }

    /// Process one message; returns false once the loop should stop.
    pub fn handle(&mut self, msg: StoreMessage) -> bool {
        match msg {
            StoreMessage::UserEvent { record, sender_tab } => {
                self.receive_event(record, sender_tab);
            }
            StoreMessage::AppendResolved { record } => {
                // Gate and ordering were decided when the query was
                // issued; the resolved record appends as-is.
                self.events.push(record);
            }
            StoreMessage::GetEvents { reply } => {
                if reply.send(self.events.clone()).is_err() {
                    debug!("get_events caller went away before the reply");
                }
            }
            StoreMessage::ClearEvents => {
                info!("clearing {} buffered records", self.events.len());
                self.events.clear();
            }
            StoreMessage::SetTracking { enabled } => {
                self.tracking = enabled;
            }
            StoreMessage::GetTracking { reply } => {
                if reply.send(self.tracking).is_err() {
                    debug!("get_tracking caller went away before the reply");
                }
            }
            StoreMessage::TabActivated { at, tab_id } => {
                self.on_tab_activated(at, tab_id);
            }
            StoreMessage::WindowFocused { at, window_id } => {
                self.on_window_focused(at, window_id);
            }
            StoreMessage::Shutdown => return false,
        }
        true
    }

    fn receive_event(&mut self, mut record: EventRecord, sender_tab: Option<TabId>) {
        if !self.tracking {
            return;
        }
        if record.tab_id.is_none() {
            record.tab_id = sender_tab;
        }
        if record.tab_id.is_some() {
            self.events.push(record);
            return;
        }

        // No id from the record or the delivery context: ask the host for
        // the focused window's active tab and append once resolved. The
        // reply may arrive after later records, so append order across
        // concurrently unresolved records is not guaranteed.
        let tx = self.self_tx.clone();
        self.browser.query_active_tab(Box::new(move |info| {
            let mut record = record;
            record.tab_id = info.map(|t| t.id);
            if tx.send(StoreMessage::AppendResolved { record }).is_err() {
                debug!("event store stopped before a tab query resolved");
            }
        }));
    }

    fn on_tab_activated(&mut self, at: DateTime<Utc>, tab_id: TabId) {
        if !self.tracking {
            return;
        }
        let (url, title) = match self.browser.tab(tab_id) {
            Some(tab) => (tab.url, tab.title),
            None => (String::new(), String::new()),
        };
        let record = EventRecord {
            timestamp: at,
            delta_ms: 0,
            frame_chain: Vec::new(),
            tab_id: Some(tab_id),
            data: EventData::TabActivated { url, title },
        };
        self.receive_event(record, None);
    }

    fn on_window_focused(&mut self, at: DateTime<Utc>, window_id: WindowId) {
        if !self.tracking {
            return;
        }
        let Some(tab) = self.browser.window_active_tab(window_id) else {
            debug!("focused window {:?} vanished before lookup", window_id);
            return;
        };
        let record = EventRecord {
            timestamp: at,
            delta_ms: 0,
            frame_chain: Vec::new(),
            tab_id: Some(tab.id),
            data: EventData::WindowFocus {
                url: tab.url,
                title: tab.title,
            },
        };
        self.receive_event(record, None);
    }
}

/// Cloneable sender side of the store. Event submission is
/// fire-and-forget; queries block on a bounded reply channel.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: Sender<StoreMessage>,
}

impl StoreHandle {
    pub fn new(tx: Sender<StoreMessage>) -> Self {
        Self { tx }
    }

    /// At-most-once delivery: a record the store never receives is lost,
    /// not retried.
    pub fn submit(&self, record: EventRecord, sender_tab: Option<TabId>) {
        if self
            .tx
            .send(StoreMessage::UserEvent { record, sender_tab })
            .is_err()
        {
            debug!("event store gone; record dropped");
        }
    }

    pub fn events(&self) -> Result<Vec<EventRecord>> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(StoreMessage::GetEvents { reply: reply_tx })
            .map_err(|_| anyhow!("event store is not running"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("event store stopped before replying"))
    }

    pub fn clear(&self) {
        if self.tx.send(StoreMessage::ClearEvents).is_err() {
            debug!("event store gone; clear ignored");
        }
    }

    pub fn set_tracking(&self, enabled: bool) {
        if self.tx.send(StoreMessage::SetTracking { enabled }).is_err() {
            debug!("event store gone; set_tracking ignored");
        }
    }

    pub fn tracking(&self) -> Result<bool> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(StoreMessage::GetTracking { reply: reply_tx })
            .map_err(|_| anyhow!("event store is not running"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("event store stopped before replying"))
    }

    pub fn notify_tab_activated(&self, at: DateTime<Utc>, tab_id: TabId) {
        if self.tx.send(StoreMessage::TabActivated { at, tab_id }).is_err() {
            debug!("event store gone; tab activation dropped");
        }
    }

    pub fn notify_window_focused(&self, at: DateTime<Utc>, window_id: WindowId) {
        if self
            .tx
            .send(StoreMessage::WindowFocused { at, window_id })
            .is_err()
        {
            debug!("event store gone; window focus dropped");
        }
    }

    pub fn shutdown(&self) {
        if self.tx.send(StoreMessage::Shutdown).is_err() {
            warn!("event store already stopped");
        }
    }
}

/// Run a store on its own named thread; the handle is the only way in.
pub fn spawn_store(
    browser: Arc<dyn Browser>,
    tracking: bool,
) -> Result<(StoreHandle, JoinHandle<()>)> {
    let (tx, rx): (Sender<StoreMessage>, Receiver<StoreMessage>) = unbounded();
    let mut store = EventStore::new(browser, tracking, tx.clone());
    let join = thread::Builder::new()
        .name("event-store".to_string())
        .spawn(move || {
            while let Ok(msg) = rx.recv() {
                if !store.handle(msg) {
                    break;
                }
            }
            debug!("event store loop finished");
        })
        .map_err(|e| anyhow!("failed to spawn event store thread: {e}"))?;
    Ok((StoreHandle::new(tx), join))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{ActiveTabReply, TabInfo};
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FakeBrowser {
        tabs: Vec<TabInfo>,
        active: Option<TabId>,
        defer: bool,
        deferred: Mutex<Vec<ActiveTabReply>>,
    }

    impl FakeBrowser {
        fn new(tabs: Vec<TabInfo>, active: Option<TabId>, defer: bool) -> Arc<Self> {
            Arc::new(Self {
                tabs,
                active,
                defer,
                deferred: Mutex::new(Vec::new()),
            })
        }

        fn active_info(&self) -> Option<TabInfo> {
            self.active
                .and_then(|id| self.tabs.iter().find(|t| t.id == id).cloned())
        }

        fn resolve_deferred_reversed(&self) {
            let mut pending = self.deferred.lock().unwrap();
            while let Some(reply) = pending.pop() {
                reply(self.active_info());
            }
        }
    }

    impl Browser for FakeBrowser {
        fn tab(&self, id: TabId) -> Option<TabInfo> {
            self.tabs.iter().find(|t| t.id == id).cloned()
        }

        fn window_active_tab(&self, _id: WindowId) -> Option<TabInfo> {
            self.active_info()
        }

        fn query_active_tab(&self, reply: ActiveTabReply) {
            if self.defer {
                self.deferred.lock().unwrap().push(reply);
            } else {
                reply(self.active_info());
            }
        }
    }

    fn tab(id: u32, url: &str, title: &str) -> TabInfo {
        TabInfo {
            id: TabId(id),
            url: url.to_string(),
            title: title.to_string(),
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn scroll_record(secs: i64, y: f64) -> EventRecord {
        EventRecord {
            timestamp: ts(secs),
            delta_ms: 0,
            frame_chain: Vec::new(),
            tab_id: None,
            data: EventData::Scroll { x: 0.0, y },
        }
    }

    fn store_with(
        browser: Arc<FakeBrowser>,
        tracking: bool,
    ) -> (EventStore, Receiver<StoreMessage>) {
        let (tx, rx) = unbounded();
        (EventStore::new(browser, tracking, tx), rx)
    }

    fn drain(store: &mut EventStore, rx: &Receiver<StoreMessage>) {
        while let Ok(msg) = rx.try_recv() {
            store.handle(msg);
        }
    }

    #[test]
    fn disabled_tracking_never_buffers() {
        let browser = FakeBrowser::new(vec![tab(1, "https://a", "A")], Some(TabId(1)), false);
        let (mut store, rx) = store_with(browser, false);

        store.handle(StoreMessage::UserEvent {
            record: scroll_record(0, 1.0),
            sender_tab: Some(TabId(1)),
        });
        store.handle(StoreMessage::TabActivated {
            at: ts(1),
            tab_id: TabId(1),
        });
        drain(&mut store, &rx);
        assert!(store.events().is_empty());

        // Re-enabling must not flush anything captured while disabled.
        store.handle(StoreMessage::SetTracking { enabled: true });
        drain(&mut store, &rx);
        assert!(store.events().is_empty());
    }

    #[test]
    fn explicit_tab_id_wins_over_sender_tab() {
        let browser = FakeBrowser::new(vec![], None, false);
        let (mut store, _rx) = store_with(browser, true);

        let mut record = scroll_record(0, 1.0);
        record.tab_id = Some(TabId(9));
        store.handle(StoreMessage::UserEvent {
            record,
            sender_tab: Some(TabId(2)),
        });
        assert_eq!(store.events()[0].tab_id, Some(TabId(9)));
    }

    #[test]
    fn sender_tab_fills_missing_id_without_a_query() {
        let browser = FakeBrowser::new(vec![], None, true);
        let (mut store, _rx) = store_with(browser.clone(), true);

        store.handle(StoreMessage::UserEvent {
            record: scroll_record(0, 1.0),
            sender_tab: Some(TabId(4)),
        });
        assert_eq!(store.events()[0].tab_id, Some(TabId(4)));
        assert!(browser.deferred.lock().unwrap().is_empty());
    }

    #[test]
    fn fallback_query_appends_on_resolution() {
        let browser = FakeBrowser::new(vec![tab(7, "https://x", "X")], Some(TabId(7)), false);
        let (mut store, rx) = store_with(browser, true);

        store.handle(StoreMessage::UserEvent {
            record: scroll_record(0, 1.0),
            sender_tab: None,
        });
        // Immediate resolution still lands via the channel.
        assert!(store.events().is_empty());
        drain(&mut store, &rx);
        assert_eq!(store.events().len(), 1);
        assert_eq!(store.events()[0].tab_id, Some(TabId(7)));
    }

    #[test]
    fn slow_resolutions_may_append_out_of_order() {
        let browser = FakeBrowser::new(vec![tab(3, "https://x", "X")], Some(TabId(3)), true);
        let (mut store, rx) = store_with(browser.clone(), true);

        store.handle(StoreMessage::UserEvent {
            record: scroll_record(0, 1.0),
            sender_tab: None,
        });
        store.handle(StoreMessage::UserEvent {
            record: scroll_record(1, 2.0),
            sender_tab: None,
        });
        browser.resolve_deferred_reversed();
        drain(&mut store, &rx);

        // Second-submitted record resolved first: accepted relaxation.
        assert_eq!(store.events().len(), 2);
        assert!(matches!(store.events()[0].data, EventData::Scroll { y, .. } if y == 2.0));
        assert!(matches!(store.events()[1].data, EventData::Scroll { y, .. } if y == 1.0));
        assert!(store.events().iter().all(|r| r.tab_id == Some(TabId(3))));
    }

    #[test]
    fn clear_empties_the_log_but_keeps_tracking() {
        let browser = FakeBrowser::new(vec![], None, false);
        let (mut store, _rx) = store_with(browser, true);

        store.handle(StoreMessage::UserEvent {
            record: scroll_record(0, 1.0),
            sender_tab: Some(TabId(1)),
        });
        assert_eq!(store.events().len(), 1);
        store.handle(StoreMessage::ClearEvents);
        assert!(store.events().is_empty());
        assert!(store.tracking());
    }

    #[test]
    fn tab_activation_synthesizes_a_record_with_lookup_fields() {
        let browser = FakeBrowser::new(vec![tab(5, "https://t", "Tab")], None, false);
        let (mut store, _rx) = store_with(browser, true);

        store.handle(StoreMessage::TabActivated {
            at: ts(2),
            tab_id: TabId(5),
        });
        let record = &store.events()[0];
        assert_eq!(record.tab_id, Some(TabId(5)));
        assert_eq!(
            record.data,
            EventData::TabActivated {
                url: "https://t".to_string(),
                title: "Tab".to_string()
            }
        );

        // Unknown tab still records the activation, with empty fields.
        store.handle(StoreMessage::TabActivated {
            at: ts(3),
            tab_id: TabId(99),
        });
        assert_eq!(
            store.events()[1].data,
            EventData::TabActivated {
                url: String::new(),
                title: String::new()
            }
        );
    }

    #[test]
    fn window_focus_reports_the_active_tab() {
        let browser = FakeBrowser::new(vec![tab(2, "https://w", "W")], Some(TabId(2)), false);
        let (mut store, _rx) = store_with(browser, true);

        store.handle(StoreMessage::WindowFocused {
            at: ts(4),
            window_id: WindowId(1),
        });
        let record = &store.events()[0];
        assert_eq!(record.tab_id, Some(TabId(2)));
        assert_eq!(
            record.data,
            EventData::WindowFocus {
                url: "https://w".to_string(),
                title: "W".to_string()
            }
        );
    }

    #[test]
    fn dump_returns_a_snapshot_by_value() {
        let browser = FakeBrowser::new(vec![], None, false);
        let (mut store, _rx) = store_with(browser, true);
        store.handle(StoreMessage::UserEvent {
            record: scroll_record(0, 1.0),
            sender_tab: Some(TabId(1)),
        });

        let (reply_tx, reply_rx) = bounded(1);
        store.handle(StoreMessage::GetEvents { reply: reply_tx });
        let mut snapshot = reply_rx.recv().unwrap();
        snapshot.clear();
        assert_eq!(store.events().len(), 1);
    }
}
