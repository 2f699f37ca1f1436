use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Receiver;
use log::{debug, warn};
use serde_json::Value;

use crate::capture::descriptor::{element_descriptor, selector_for, shadow_path};
use crate::capture::frames::frame_chain;
use crate::capture::history::{HistoryMutation, HistoryOps, TracedHistory};
use crate::events::{DomNodeSummary, EventData, EventRecord, PointerMeta};
use crate::host::{Navigator, TabId};
use crate::page::{Document, FrameId, FrameTree, NodeId};
use crate::store::StoreHandle;

/// Capture timing knobs, all in milliseconds except the retry cap.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub motion_debounce_ms: u64,
    pub scroll_debounce_ms: u64,
    pub mutation_batch_ms: u64,
    pub navigation_delay_ms: u64,
    pub gesture_recency_ms: u64,
    pub attach_max_retries: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            motion_debounce_ms: 100,
            scroll_debounce_ms: 150,
            mutation_batch_ms: 200,
            navigation_delay_ms: 120,
            gesture_recency_ms: 5_000,
            attach_max_retries: 20,
        }
    }
}

/// Control broadcasts delivered to an agent by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentControl {
    SetTracking(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    NotReady,
    GaveUp,
}

/// Raw interaction delivered by the page context. Every event carries its
/// capture instant; the agent never reads a clock of its own.
#[derive(Debug, Clone)]
pub enum PageEvent {
    Click {
        at: DateTime<Utc>,
        target: NodeId,
        x: f64,
        y: f64,
        meta: PointerMeta,
    },
    Keydown {
        at: DateTime<Utc>,
        target: NodeId,
        key: String,
        code: String,
        repeat: bool,
        meta: PointerMeta,
    },
    Input {
        at: DateTime<Utc>,
        target: NodeId,
    },
    MouseOver {
        at: DateTime<Utc>,
        target: NodeId,
        meta: PointerMeta,
    },
    MouseMove {
        at: DateTime<Utc>,
        target: NodeId,
        x: f64,
        y: f64,
        meta: PointerMeta,
    },
    Wheel {
        at: DateTime<Utc>,
        delta_x: f64,
        delta_y: f64,
        meta: PointerMeta,
    },
    Scroll {
        at: DateTime<Utc>,
        x: f64,
        y: f64,
    },
    Submit {
        at: DateTime<Utc>,
        target: NodeId,
    },
    MutationAdded {
        at: DateTime<Utc>,
        nodes: Vec<NodeId>,
    },
    PopState {
        at: DateTime<Utc>,
    },
    BeforeUnload {
        at: DateTime<Utc>,
    },
    Load {
        at: DateTime<Utc>,
    },
    Visibility {
        at: DateTime<Utc>,
        visible: bool,
    },
}

struct PendingMove {
    due: DateTime<Utc>,
    target: NodeId,
    x: f64,
    y: f64,
    meta: PointerMeta,
}

struct PendingScroll {
    due: DateTime<Utc>,
    x: f64,
    y: f64,
}

struct PendingNavigation {
    due: DateTime<Utc>,
    href: String,
    target: Option<String>,
}

/// Observes one frame and emits normalized event records to the store.
/// Single-threaded by usage: owned by the context that drives it with
/// `on_event` and periodic `on_tick` calls.
pub struct CaptureAgent {
    cfg: CaptureConfig,
    frame: FrameId,
    sender_tab: Option<TabId>,
    store: StoreHandle,
    control: Receiver<AgentControl>,
    navigator: Box<dyn Navigator>,
    raw_history: Option<Box<dyn HistoryOps>>,
    history: Option<TracedHistory>,
    tracking: bool,
    attached: bool,
    attach_attempts: u32,
    gave_up: bool,
    last_timestamp: Option<DateTime<Utc>>,
    last_gesture: Option<DateTime<Utc>>,
    last_hover: Option<String>,
    pending_move: Option<PendingMove>,
    pending_scroll: Option<PendingScroll>,
    mutation_queue: Vec<DomNodeSummary>,
    next_batch_flush: Option<DateTime<Utc>>,
    pending_nav: Option<PendingNavigation>,
}

impl CaptureAgent {
    pub fn new(
        cfg: CaptureConfig,
        frame: FrameId,
        sender_tab: Option<TabId>,
        store: StoreHandle,
        control: Receiver<AgentControl>,
        navigator: Box<dyn Navigator>,
        history: Box<dyn HistoryOps>,
        tracking: bool,
    ) -> Self {
        Self {
            cfg,
            frame,
            sender_tab,
            store,
            control,
            navigator,
            raw_history: Some(history),
            history: None,
            tracking,
            attached: false,
            attach_attempts: 0,
            gave_up: false,
            last_timestamp: None,
            last_gesture: None,
            last_hover: None,
            pending_move: None,
            pending_scroll: None,
            mutation_queue: Vec::new(),
            next_batch_flush: None,
            pending_nav: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn tracking(&self) -> bool {
        self.tracking
    }

    /// Install observers once the document body exists. Callers retry on
    /// a fixed delay until Attached or GaveUp; after the retry cap the
    /// agent stays alive but inert.
    pub fn try_attach(&mut self, tree: &FrameTree, at: DateTime<Utc>) -> AttachOutcome {
        self.drain_control();
        if self.attached {
            return AttachOutcome::Attached;
        }
        if self.gave_up {
            return AttachOutcome::GaveUp;
        }
        if tree.document(self.frame).body().is_some() {
            self.attached = true;
            self.history = self.raw_history.take().map(TracedHistory::wrap);
            self.next_batch_flush = Some(at + Duration::milliseconds(self.cfg.mutation_batch_ms as i64));
            debug!("capture agent attached (frame {:?})", self.frame);
            return AttachOutcome::Attached;
        }
        self.attach_attempts += 1;
        if self.attach_attempts >= self.cfg.attach_max_retries {
            self.gave_up = true;
            warn!(
                "document body never appeared after {} attempts; frame {:?} stays silent",
                self.attach_attempts, self.frame
            );
            AttachOutcome::GaveUp
        } else {
            AttachOutcome::NotReady
        }
    }

    pub fn on_event(&mut self, tree: &FrameTree, event: &PageEvent) {
        self.drain_control();
        if !self.attached {
            return;
        }
        let doc = tree.document(self.frame);
        match event {
            PageEvent::Click {
                at,
                target,
                x,
                y,
                meta,
            } => self.handle_click(tree, doc, *at, *target, *x, *y, meta),
            PageEvent::Keydown {
                at,
                target,
                key,
                code,
                repeat,
                meta,
            } => {
                self.last_gesture = Some(*at);
                let descriptor = element_descriptor(doc, *target);
                self.emit(
                    tree,
                    *at,
                    EventData::Keydown {
                        key: key.clone(),
                        code: code.clone(),
                        repeat: *repeat,
                        meta: meta.clone(),
                        descriptor,
                    },
                );
            }
            PageEvent::Input { at, target } => {
                if !is_editable(doc, *target) {
                    return;
                }
                let value = doc
                    .attr(*target, "value")
                    .or_else(|| doc.text(*target))
                    .unwrap_or_default()
                    .to_string();
                let descriptor = element_descriptor(doc, *target);
                self.emit(tree, *at, EventData::Input { value, descriptor });
            }
            PageEvent::MouseOver { at, target, meta } => {
                let descriptor = element_descriptor(doc, *target);
                if self.last_hover.as_deref() == Some(descriptor.selector.as_str()) {
                    return;
                }
                self.last_hover = Some(descriptor.selector.clone());
                self.emit(
                    tree,
                    *at,
                    EventData::Hover {
                        descriptor,
                        meta: meta.clone(),
                    },
                );
            }
            PageEvent::MouseMove {
                at,
                target,
                x,
                y,
                meta,
            } => {
                // Reset-on-new-event debounce: only silence flushes it.
                self.pending_move = Some(PendingMove {
                    due: *at + Duration::milliseconds(self.cfg.motion_debounce_ms as i64),
                    target: *target,
                    x: *x,
                    y: *y,
                    meta: meta.clone(),
                });
            }
            PageEvent::Wheel {
                at,
                delta_x,
                delta_y,
                meta,
            } => self.emit(
                tree,
                *at,
                EventData::Wheel {
                    delta_x: *delta_x,
                    delta_y: *delta_y,
                    meta: meta.clone(),
                },
            ),
            PageEvent::Scroll { at, x, y } => {
                self.pending_scroll = Some(PendingScroll {
                    due: *at + Duration::milliseconds(self.cfg.scroll_debounce_ms as i64),
                    x: *x,
                    y: *y,
                });
            }
            PageEvent::Submit { at, target } => {
                self.last_gesture = Some(*at);
                let descriptor = element_descriptor(doc, *target);
                let action = doc.attr(*target, "action").map(str::to_string);
                let method = doc.attr(*target, "method").map(str::to_string);
                self.emit(
                    tree,
                    *at,
                    EventData::FormSubmit {
                        descriptor: descriptor.clone(),
                        action: action.clone(),
                        method,
                    },
                );
                let href = action.unwrap_or_else(|| doc.url.clone());
                let was_recent_gesture = self.gesture_recent(*at);
                self.emit(
                    tree,
                    *at,
                    EventData::NavigateIntent {
                        href,
                        descriptor,
                        was_recent_gesture,
                        click_x: None,
                        click_y: None,
                    },
                );
            }
            PageEvent::MutationAdded { at: _, nodes } => {
                for &node in nodes {
                    if doc.tag(node) == "script" || doc.is_shadow_root(node) {
                        continue;
                    }
                    self.mutation_queue.push(DomNodeSummary {
                        selector: selector_for(doc, node),
                        tag: doc.tag(node).to_string(),
                        shadow_path: shadow_path(doc, node),
                    });
                }
            }
            PageEvent::PopState { at } => {
                let url = doc.url.clone();
                self.emit(tree, *at, EventData::HistoryPopstate { url });
            }
            PageEvent::BeforeUnload { at } => {
                let url = doc.url.clone();
                self.emit(tree, *at, EventData::Beforeunload { url });
            }
            PageEvent::Load { at } => {
                let url = doc.url.clone();
                let title = doc.title.clone();
                self.emit(tree, *at, EventData::CompletedNavigation { url, title });
            }
            PageEvent::Visibility { at, visible } => {
                let url = doc.url.clone();
                self.emit(
                    tree,
                    *at,
                    EventData::Visibility {
                        url,
                        visible: *visible,
                    },
                );
            }
        }
    }

    fn handle_click(
        &mut self,
        tree: &FrameTree,
        doc: &Document,
        at: DateTime<Utc>,
        target: NodeId,
        x: f64,
        y: f64,
        meta: &PointerMeta,
    ) {
        self.last_gesture = Some(at);
        let Some(clickable) = closest_interactive(doc, target) else {
            return;
        };
        let descriptor = element_descriptor(doc, clickable);
        let href = doc.attr(clickable, "href").map(str::to_string);
        let target_attr = doc.attr(clickable, "target").map(str::to_string);
        self.emit(
            tree,
            at,
            EventData::Click {
                x,
                y,
                descriptor: descriptor.clone(),
                meta: meta.clone(),
                href: href.clone(),
                target: target_attr.clone(),
            },
        );

        // Navigational anchors: suppress the default, record the intent,
        // navigate ourselves once the intent has had time to flush.
        if doc.tag(clickable) == "a" {
            if let Some(href) = href {
                if !href.starts_with("javascript:") {
                    let was_recent_gesture = self.gesture_recent(at);
                    self.emit(
                        tree,
                        at,
                        EventData::NavigateIntent {
                            href: href.clone(),
                            descriptor,
                            was_recent_gesture,
                            click_x: Some(x),
                            click_y: Some(y),
                        },
                    );
                    self.pending_nav = Some(PendingNavigation {
                        due: at + Duration::milliseconds(self.cfg.navigation_delay_ms as i64),
                        href,
                        target: target_attr,
                    });
                }
            }
        }
    }

    /// Time-based work: debounce flushes, the mutation batch interval,
    /// and deferred link navigation. Drive this on a fixed cadence.
    pub fn on_tick(&mut self, tree: &FrameTree, now: DateTime<Utc>) {
        self.drain_control();
        if !self.attached {
            return;
        }

        if let Some(nav) = self.pending_nav.take_if(|n| now >= n.due) {
            let blank = nav
                .target
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("_blank"));
            if blank {
                self.navigator.open_new(&nav.href);
            } else {
                self.navigator.navigate(&nav.href);
            }
        }

        if let Some(m) = self.pending_move.take_if(|m| now >= m.due) {
            let descriptor = element_descriptor(tree.document(self.frame), m.target);
            self.emit(
                tree,
                now,
                EventData::MouseMove {
                    x: m.x,
                    y: m.y,
                    meta: m.meta,
                    descriptor,
                },
            );
        }

        if let Some(s) = self.pending_scroll.take_if(|s| now >= s.due) {
            self.emit(tree, now, EventData::Scroll { x: s.x, y: s.y });
        }

        if self.next_batch_flush.is_some_and(|due| now >= due) {
            let added = std::mem::take(&mut self.mutation_queue);
            if !added.is_empty() {
                self.emit(tree, now, EventData::DomBatch { added });
            }
            self.next_batch_flush =
                Some(now + Duration::milliseconds(self.cfg.mutation_batch_ms as i64));
        }
    }

    /// Intercepted history entry point: forwards to the wrapped history
    /// and emits one navigation record per successful mutation.
    pub fn history_push_state(
        &mut self,
        tree: &FrameTree,
        at: DateTime<Utc>,
        state: Value,
        title: &str,
        url: &str,
    ) -> Result<()> {
        self.drain_control();
        let ret = match self.history.as_mut() {
            Some(history) => history.push_state(state, title, url),
            None => {
                // Not attached yet: the page still navigates, untraced.
                return match self.raw_history.as_mut() {
                    Some(raw) => raw.push_state(state, title, url),
                    None => Ok(()),
                };
            }
        };
        self.emit_history_mutations(tree, at);
        ret
    }

    pub fn history_replace_state(
        &mut self,
        tree: &FrameTree,
        at: DateTime<Utc>,
        state: Value,
        title: &str,
        url: &str,
    ) -> Result<()> {
        self.drain_control();
        let ret = match self.history.as_mut() {
            Some(history) => history.replace_state(state, title, url),
            None => {
                return match self.raw_history.as_mut() {
                    Some(raw) => raw.replace_state(state, title, url),
                    None => Ok(()),
                };
            }
        };
        self.emit_history_mutations(tree, at);
        ret
    }

    fn emit_history_mutations(&mut self, tree: &FrameTree, at: DateTime<Utc>) {
        let mutations = self
            .history
            .as_mut()
            .map(TracedHistory::take_mutations)
            .unwrap_or_default();
        for mutation in mutations {
            let data = match mutation {
                HistoryMutation::Push { url } => EventData::HistoryPushstate { url },
                HistoryMutation::Replace { url } => EventData::HistoryReplacestate { url },
            };
            self.emit(tree, at, data);
        }
    }

    fn gesture_recent(&self, at: DateTime<Utc>) -> bool {
        self.last_gesture
            .is_some_and(|g| at - g <= Duration::milliseconds(self.cfg.gesture_recency_ms as i64))
    }

    fn drain_control(&mut self) {
        while let Ok(msg) = self.control.try_recv() {
            match msg {
                AgentControl::SetTracking(enabled) => {
                    if self.tracking != enabled {
                        debug!("tracking {} (frame {:?})", enabled, self.frame);
                    }
                    self.tracking = enabled;
                }
            }
        }
    }

    fn emit(&mut self, tree: &FrameTree, at: DateTime<Utc>, data: EventData) {
        if !self.tracking {
            return;
        }
        let delta_ms = match self.last_timestamp {
            Some(prev) => (at - prev).num_milliseconds().max(0) as u64,
            None => 0,
        };
        self.last_timestamp = Some(at);
        let record = EventRecord {
            timestamp: at,
            delta_ms,
            frame_chain: frame_chain(tree, self.frame),
            tab_id: None,
            data,
        };
        self.store.submit(record, self.sender_tab);
    }
}

fn is_interactive(doc: &Document, node: NodeId) -> bool {
    matches!(doc.tag(node), "a" | "button")
        || doc.attr(node, "onclick").is_some()
        || matches!(doc.attr(node, "role"), Some("button") | Some("link"))
        || doc
            .classes(node)
            .iter()
            .any(|c| c == "btn" || c == "clickable")
}

/// Nearest interactive ancestor, the element itself included. Stops at
/// shadow roots like a closest() call would.
fn closest_interactive(doc: &Document, node: NodeId) -> Option<NodeId> {
    let mut cur = Some(node);
    while let Some(n) = cur {
        if doc.is_shadow_root(n) {
            break;
        }
        if is_interactive(doc, n) {
            return Some(n);
        }
        cur = doc.parent(n);
    }
    None
}

fn is_editable(doc: &Document, node: NodeId) -> bool {
    matches!(doc.tag(node), "input" | "textarea")
        || matches!(doc.attr(node, "contenteditable"), Some("") | Some("true"))
}
