use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::capture::history::PageHistory;
use crate::capture::{CaptureAgent, PageEvent};
use crate::events::PointerMeta;
use crate::host::{ActiveTabReply, Browser, Navigator, TabId, TabInfo, WindowId};
use crate::page::{Document, FrameTree, NodeId, NodeSpec, PageSpec};
use crate::session::Session;
use crate::util::config::AppConfig;

/// A recorded session: the page to rebuild, host fixtures, and a timed
/// event script. Everything the live pipeline needs, declared as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedSession {
    pub page: PageSpec,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub sender_tab: Option<u32>,
    #[serde(default)]
    pub tabs: Vec<TabFixture>,
    #[serde(default)]
    pub active_tab: Option<u32>,
    #[serde(default)]
    pub events: Vec<RecordedEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabFixture {
    pub id: u32,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    // Offset from replay start
    pub at_ms: i64,
    #[serde(flatten)]
    pub action: RecordedAction,
}

/// Elements are addressed by id attribute ("body" for the body itself);
/// events against elements the page never declared are skipped with a
/// warning rather than failing the replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecordedAction {
    Click { target: String, x: f64, y: f64 },
    Keydown { target: String, key: String, code: String },
    Input { target: String, value: Option<String> },
    MouseOver { target: String },
    MouseMove { target: String, x: f64, y: f64 },
    Wheel { delta_x: f64, delta_y: f64 },
    Scroll { x: f64, y: f64 },
    Submit { target: String },
    AddNode { parent: String, node: NodeSpec },
    HistoryPush { url: String },
    HistoryReplace { url: String },
    PopState,
    BeforeUnload,
    Load,
    Visibility { visible: bool },
    TabActivated { tab: u32 },
    WindowFocused { window: u32 },
    SetTracking { enabled: bool },
}

pub struct ReplaySummary {
    pub records: usize,
    pub navigations: usize,
    pub export_path: PathBuf,
}

/// Host fixture backing a replay (and handy for tests): a fixed tab list
/// with one active tab, answering active-tab queries immediately.
pub struct FixtureBrowser {
    tabs: Vec<TabInfo>,
    active: Option<TabId>,
}

impl FixtureBrowser {
    pub fn new(tabs: Vec<TabInfo>, active: Option<TabId>) -> Self {
        Self { tabs, active }
    }

    fn active_info(&self) -> Option<TabInfo> {
        self.active
            .and_then(|id| self.tabs.iter().find(|t| t.id == id).cloned())
    }
}

impl Browser for FixtureBrowser {
    fn tab(&self, id: TabId) -> Option<TabInfo> {
        self.tabs.iter().find(|t| t.id == id).cloned()
    }

    fn window_active_tab(&self, _id: WindowId) -> Option<TabInfo> {
        self.active_info()
    }

    fn query_active_tab(&self, reply: ActiveTabReply) {
        reply(self.active_info());
    }
}

struct CountingNavigator {
    log: Arc<Mutex<Vec<String>>>,
}

impl Navigator for CountingNavigator {
    fn navigate(&mut self, url: &str) {
        info!("replay navigation: {url}");
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(url.to_string());
    }

    fn open_new(&mut self, url: &str) {
        info!("replay navigation (new context): {url}");
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(url.to_string());
    }
}

pub fn run_replay(cfg: &AppConfig, input: &Path) -> Result<ReplaySummary> {
    let raw = fs::read_to_string(input)
        .with_context(|| format!("failed to read recorded session {input:?}"))?;
    let recorded: RecordedSession =
        serde_json::from_str(&raw).with_context(|| format!("malformed recorded session {input:?}"))?;
    run_recorded(cfg, &recorded)
}

/// Drive a recorded session through a real agent/store pipeline and
/// export the resulting log. Time is virtual: every recorded offset maps
/// onto one tick-then-dispatch step, so no replay ever sleeps.
pub fn run_recorded(cfg: &AppConfig, recorded: &RecordedSession) -> Result<ReplaySummary> {
    let doc = Document::from_spec(&recorded.page);
    let origin = recorded
        .origin
        .clone()
        .unwrap_or_else(|| recorded.page.url.clone());
    let mut tree = FrameTree::new(&origin, doc);
    let frame = tree.top();

    let tabs = recorded
        .tabs
        .iter()
        .map(|t| TabInfo {
            id: TabId(t.id),
            url: t.url.clone(),
            title: t.title.clone(),
        })
        .collect();
    let browser = Arc::new(FixtureBrowser::new(
        tabs,
        recorded.active_tab.map(TabId),
    ));

    let mut session = Session::start(cfg.clone(), browser)?;
    let navigations = Arc::new(Mutex::new(Vec::new()));
    let mut agent = session.register_agent(
        frame,
        recorded.sender_tab.map(TabId),
        Box::new(CountingNavigator {
            log: Arc::clone(&navigations),
        }),
        Box::new(PageHistory::new(&recorded.page.url)),
    );

    let base = Utc::now();
    let mut attach_at = base;
    for _ in 0..cfg.attach_max_retries {
        match agent.try_attach(&tree, attach_at) {
            crate::capture::AttachOutcome::NotReady => {
                attach_at += Duration::milliseconds(cfg.attach_retry_ms as i64);
            }
            _ => break,
        }
    }
    if !agent.is_attached() {
        warn!("recorded page has no body; replay will capture nothing");
    }

    let mut last_at = 0;
    for event in &recorded.events {
        let now = base + Duration::milliseconds(event.at_ms);
        last_at = last_at.max(event.at_ms);
        agent.on_tick(&tree, now);
        dispatch(&mut tree, &mut agent, &session, now, &event.action)?;
    }

    // One final tick past every debounce/batch/navigation window.
    let settle_ms = [
        cfg.motion_debounce_ms,
        cfg.scroll_debounce_ms,
        cfg.mutation_batch_ms,
        cfg.navigation_delay_ms,
    ]
    .into_iter()
    .max()
    .unwrap_or(0) as i64;
    agent.on_tick(&tree, base + Duration::milliseconds(last_at + settle_ms + 1));

    let export_path = session.export()?;
    let records = session.dump()?.len();
    session.shutdown()?;

    let navigations = navigations.lock().unwrap_or_else(|e| e.into_inner()).len();
    Ok(ReplaySummary {
        records,
        navigations,
        export_path,
    })
}

fn resolve(doc: &Document, target: &str) -> Option<NodeId> {
    if target == "body" {
        doc.body()
    } else {
        doc.find_by_dom_id(target)
    }
}

fn dispatch(
    tree: &mut FrameTree,
    agent: &mut CaptureAgent,
    session: &Session,
    now: DateTime<Utc>,
    action: &RecordedAction,
) -> Result<()> {
    let frame = tree.top();
    let resolve_or_skip = |tree: &FrameTree, target: &str| -> Option<NodeId> {
        let node = resolve(tree.document(frame), target);
        if node.is_none() {
            warn!("recorded event targets unknown element '{target}'; skipped");
        }
        node
    };

    match action {
        RecordedAction::Click { target, x, y } => {
            if let Some(node) = resolve_or_skip(tree, target) {
                agent.on_event(
                    tree,
                    &PageEvent::Click {
                        at: now,
                        target: node,
                        x: *x,
                        y: *y,
                        meta: PointerMeta::default(),
                    },
                );
            }
        }
        RecordedAction::Keydown { target, key, code } => {
            if let Some(node) = resolve_or_skip(tree, target) {
                agent.on_event(
                    tree,
                    &PageEvent::Keydown {
                        at: now,
                        target: node,
                        key: key.clone(),
                        code: code.clone(),
                        repeat: false,
                        meta: PointerMeta::default(),
                    },
                );
            }
        }
        RecordedAction::Input { target, value } => {
            if let Some(node) = resolve_or_skip(tree, target) {
                if let Some(value) = value {
                    tree.document_mut(frame).set_attr(node, "value", value);
                }
                agent.on_event(tree, &PageEvent::Input { at: now, target: node });
            }
        }
        RecordedAction::MouseOver { target } => {
            if let Some(node) = resolve_or_skip(tree, target) {
                agent.on_event(
                    tree,
                    &PageEvent::MouseOver {
                        at: now,
                        target: node,
                        meta: PointerMeta::default(),
                    },
                );
            }
        }
        RecordedAction::MouseMove { target, x, y } => {
            if let Some(node) = resolve_or_skip(tree, target) {
                agent.on_event(
                    tree,
                    &PageEvent::MouseMove {
                        at: now,
                        target: node,
                        x: *x,
                        y: *y,
                        meta: PointerMeta::default(),
                    },
                );
            }
        }
        RecordedAction::Wheel { delta_x, delta_y } => {
            agent.on_event(
                tree,
                &PageEvent::Wheel {
                    at: now,
                    delta_x: *delta_x,
                    delta_y: *delta_y,
                    meta: PointerMeta::default(),
                },
            );
        }
        RecordedAction::Scroll { x, y } => {
            agent.on_event(tree, &PageEvent::Scroll { at: now, x: *x, y: *y });
        }
        RecordedAction::Submit { target } => {
            if let Some(node) = resolve_or_skip(tree, target) {
                agent.on_event(tree, &PageEvent::Submit { at: now, target: node });
            }
        }
        RecordedAction::AddNode { parent, node } => {
            if let Some(parent_node) = resolve_or_skip(tree, parent) {
                let added = tree.document_mut(frame).insert_spec(parent_node, node);
                agent.on_event(
                    tree,
                    &PageEvent::MutationAdded {
                        at: now,
                        nodes: vec![added],
                    },
                );
            }
        }
        RecordedAction::HistoryPush { url } => {
            agent
                .history_push_state(tree, now, serde_json::Value::Null, "", url)
                .context("history push failed")?;
            tree.document_mut(frame).url = url.clone();
        }
        RecordedAction::HistoryReplace { url } => {
            agent
                .history_replace_state(tree, now, serde_json::Value::Null, "", url)
                .context("history replace failed")?;
            tree.document_mut(frame).url = url.clone();
        }
        RecordedAction::PopState => {
            agent.on_event(tree, &PageEvent::PopState { at: now });
        }
        RecordedAction::BeforeUnload => {
            agent.on_event(tree, &PageEvent::BeforeUnload { at: now });
        }
        RecordedAction::Load => {
            agent.on_event(tree, &PageEvent::Load { at: now });
        }
        RecordedAction::Visibility { visible } => {
            agent.on_event(
                tree,
                &PageEvent::Visibility {
                    at: now,
                    visible: *visible,
                },
            );
        }
        RecordedAction::TabActivated { tab } => {
            session.store().notify_tab_activated(now, TabId(*tab));
        }
        RecordedAction::WindowFocused { window } => {
            session.store().notify_window_focused(now, WindowId(*window));
        }
        RecordedAction::SetTracking { enabled } => {
            session.set_tracking(*enabled);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::export::read_export;

    fn sample_session() -> RecordedSession {
        serde_json::from_str(
            r#"{
                "page": {
                    "url": "https://example.com/",
                    "title": "Example",
                    "body": {
                        "tag": "body",
                        "children": [
                            { "tag": "button", "id": "go", "text": "Go" },
                            { "tag": "input", "id": "q", "attrs": { "type": "text" } }
                        ]
                    }
                },
                "sender_tab": 11,
                "tabs": [ { "id": 11, "url": "https://example.com/", "title": "Example" } ],
                "active_tab": 11,
                "events": [
                    { "at_ms": 0, "action": "load" },
                    { "at_ms": 100, "action": "click", "target": "go", "x": 10.0, "y": 20.0 },
                    { "at_ms": 300, "action": "input", "target": "q", "value": "hello" },
                    { "at_ms": 400, "action": "scroll", "x": 0.0, "y": 250.0 }
                ]
            }"#,
        )
        .expect("sample session parses")
    }

    #[test]
    fn recorded_sessions_drive_the_full_pipeline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig {
            export_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };

        let summary = run_recorded(&cfg, &sample_session()).expect("replay succeeds");
        assert_eq!(summary.records, 4);
        assert_eq!(summary.navigations, 0);

        let events = read_export(&summary.export_path).expect("export readable");
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::CompletedNavigation,
                EventKind::Click,
                EventKind::Input,
                EventKind::Scroll,
            ]
        );
        assert!(events.iter().all(|e| e.tab_id == Some(TabId(11))));
    }

    #[test]
    fn unknown_targets_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig {
            export_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let mut recorded = sample_session();
        recorded.events.push(RecordedEvent {
            at_ms: 500,
            action: RecordedAction::Click {
                target: "missing".to_string(),
                x: 0.0,
                y: 0.0,
            },
        });

        let summary = run_recorded(&cfg, &recorded).expect("replay succeeds");
        assert_eq!(summary.records, 4);
    }
}
