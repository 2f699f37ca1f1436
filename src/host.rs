use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    pub title: String,
}

/// Completion callback for the active-tab fallback query. The host may
/// invoke it immediately or later, on any thread.
pub type ActiveTabReply = Box<dyn FnOnce(Option<TabInfo>) + Send + 'static>;

/// The browser surface the event store queries. Implemented by the
/// embedder; tests and replay provide fixture implementations.
pub trait Browser: Send + Sync {
    /// Look up a tab by id.
    fn tab(&self, id: TabId) -> Option<TabInfo>;

    /// The active tab of a specific window, if the window still exists.
    fn window_active_tab(&self, id: WindowId) -> Option<TabInfo>;

    /// Ask for the active tab of the currently focused window. The reply
    /// resolves independently per call and may race with later queries;
    /// a rapid tab switch between event and reply attributes the record
    /// to whichever tab is active when the host answers.
    fn query_active_tab(&self, reply: ActiveTabReply);
}

/// Navigation entry points of the page context owning a capture agent.
/// Used when the agent performs a suppressed link navigation itself.
pub trait Navigator {
    fn navigate(&mut self, url: &str);
    fn open_new(&mut self, url: &str);
}
