use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::TabId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Snapshot of a DOM element's identifying attributes and geometry.
/// Computed fresh per event; never stored independently of the record
/// that embeds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub selector: String,
    pub tag: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub class_list: Vec<String>,
    pub input_type: Option<String>,
    pub placeholder: Option<String>,
    pub text: Option<String>,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    // None when the element is detached or has no layout
    pub bounding_rect: Option<Rect>,
    // Host-element tags, outermost first, when nested in shadow trees
    pub shadow_path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerMeta {
    pub pointer_type: String,
    pub buttons: u8,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Default for PointerMeta {
    fn default() -> Self {
        Self {
            pointer_type: "mouse".to_string(),
            buttons: 0,
            ctrl: false,
            shift: false,
            alt: false,
            meta: false,
        }
    }
}

/// One coalesced entry of a `dom_batch` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomNodeSummary {
    pub selector: String,
    pub tag: String,
    pub shadow_path: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Click,
    NavigateIntent,
    FormSubmit,
    Keydown,
    Input,
    Hover,
    MouseMove,
    Wheel,
    Scroll,
    DomBatch,
    Beforeunload,
    CompletedNavigation,
    HistoryPushstate,
    HistoryReplacestate,
    HistoryPopstate,
    Visibility,
    TabActivated,
    WindowFocus,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::NavigateIntent => "navigate_intent",
            EventKind::FormSubmit => "form_submit",
            EventKind::Keydown => "keydown",
            EventKind::Input => "input",
            EventKind::Hover => "hover",
            EventKind::MouseMove => "mouse_move",
            EventKind::Wheel => "wheel",
            EventKind::Scroll => "scroll",
            EventKind::DomBatch => "dom_batch",
            EventKind::Beforeunload => "beforeunload",
            EventKind::CompletedNavigation => "completed_navigation",
            EventKind::HistoryPushstate => "history_pushstate",
            EventKind::HistoryReplacestate => "history_replacestate",
            EventKind::HistoryPopstate => "history_popstate",
            EventKind::Visibility => "visibility",
            EventKind::TabActivated => "tab_activated",
            EventKind::WindowFocus => "window_focus",
        }
    }
}

/// Event-specific payload, one variant per vocabulary tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventData {
    Click {
        x: f64,
        y: f64,
        descriptor: ElementDescriptor,
        meta: PointerMeta,
        href: Option<String>,
        target: Option<String>,
    },
    NavigateIntent {
        href: String,
        descriptor: ElementDescriptor,
        was_recent_gesture: bool,
        click_x: Option<f64>,
        click_y: Option<f64>,
    },
    FormSubmit {
        descriptor: ElementDescriptor,
        action: Option<String>,
        method: Option<String>,
    },
    Keydown {
        key: String,
        code: String,
        repeat: bool,
        meta: PointerMeta,
        descriptor: ElementDescriptor,
    },
    Input {
        value: String,
        descriptor: ElementDescriptor,
    },
    Hover {
        descriptor: ElementDescriptor,
        meta: PointerMeta,
    },
    MouseMove {
        x: f64,
        y: f64,
        meta: PointerMeta,
        descriptor: ElementDescriptor,
    },
    Wheel {
        delta_x: f64,
        delta_y: f64,
        meta: PointerMeta,
    },
    Scroll {
        x: f64,
        y: f64,
    },
    DomBatch {
        added: Vec<DomNodeSummary>,
    },
    Beforeunload {
        url: String,
    },
    CompletedNavigation {
        url: String,
        title: String,
    },
    HistoryPushstate {
        url: String,
    },
    HistoryReplacestate {
        url: String,
    },
    HistoryPopstate {
        url: String,
    },
    Visibility {
        url: String,
        visible: bool,
    },
    TabActivated {
        url: String,
        title: String,
    },
    WindowFocus {
        url: String,
        title: String,
    },
}

impl EventData {
    pub fn kind(&self) -> EventKind {
        match self {
            EventData::Click { .. } => EventKind::Click,
            EventData::NavigateIntent { .. } => EventKind::NavigateIntent,
            EventData::FormSubmit { .. } => EventKind::FormSubmit,
            EventData::Keydown { .. } => EventKind::Keydown,
            EventData::Input { .. } => EventKind::Input,
            EventData::Hover { .. } => EventKind::Hover,
            EventData::MouseMove { .. } => EventKind::MouseMove,
            EventData::Wheel { .. } => EventKind::Wheel,
            EventData::Scroll { .. } => EventKind::Scroll,
            EventData::DomBatch { .. } => EventKind::DomBatch,
            EventData::Beforeunload { .. } => EventKind::Beforeunload,
            EventData::CompletedNavigation { .. } => EventKind::CompletedNavigation,
            EventData::HistoryPushstate { .. } => EventKind::HistoryPushstate,
            EventData::HistoryReplacestate { .. } => EventKind::HistoryReplacestate,
            EventData::HistoryPopstate { .. } => EventKind::HistoryPopstate,
            EventData::Visibility { .. } => EventKind::Visibility,
            EventData::TabActivated { .. } => EventKind::TabActivated,
            EventData::WindowFocus { .. } => EventKind::WindowFocus,
        }
    }
}

/// One captured interaction. Immutable once appended to the session log;
/// the log preserves append order, not timestamp order, because tab-id
/// resolution may complete out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    // Elapsed milliseconds since the previous record from the same agent
    pub delta_ms: u64,
    // Frame indices from the top document down to the originating frame
    pub frame_chain: Vec<usize>,
    pub tab_id: Option<TabId>,
    pub data: EventData,
}

impl EventRecord {
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }
}
