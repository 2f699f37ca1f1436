use anyhow::{Result, anyhow};
use chrono::Utc;
use crossbeam_channel::{Sender, unbounded};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::capture::history::HistoryOps;
use crate::capture::{AgentControl, CaptureAgent};
use crate::events::EventRecord;
use crate::export;
use crate::host::{Browser, Navigator, TabId, WindowId};
use crate::page::FrameId;
use crate::store::{StoreHandle, spawn_store};
use crate::util::config::AppConfig;

/// One browser session: the store service plus the roster of capture
/// agents it feeds. The session acts as the control channel: tracking
/// changes go to the store and are broadcast to every agent.
pub struct Session {
    cfg: AppConfig,
    store: StoreHandle,
    store_thread: Option<JoinHandle<()>>,
    agents: Vec<Sender<AgentControl>>,
}

impl Session {
    pub fn start(cfg: AppConfig, browser: Arc<dyn Browser>) -> Result<Self> {
        let (store, store_thread) = spawn_store(browser, cfg.tracking_default)?;
        info!(
            "session started (tracking {})",
            if cfg.tracking_default { "enabled" } else { "disabled" }
        );
        Ok(Self {
            cfg,
            store,
            store_thread: Some(store_thread),
            agents: Vec::new(),
        })
    }

    pub fn store(&self) -> StoreHandle {
        self.store.clone()
    }

    /// Create an agent for one frame. `sender_tab` is the delivery-context
    /// tab id the store sees on every record this agent submits; contexts
    /// without one leave the store to its active-tab fallback. The agent
    /// starts with the store's current tracking state, the way a freshly
    /// injected frame asks for the status before observing anything.
    pub fn register_agent(
        &mut self,
        frame: FrameId,
        sender_tab: Option<TabId>,
        navigator: Box<dyn Navigator>,
        history: Box<dyn HistoryOps>,
    ) -> CaptureAgent {
        let (ctl_tx, ctl_rx) = unbounded();
        self.agents.push(ctl_tx);
        let tracking = self.store.tracking().unwrap_or(self.cfg.tracking_default);
        CaptureAgent::new(
            self.cfg.capture(),
            frame,
            sender_tab,
            self.store.clone(),
            ctl_rx,
            navigator,
            history,
            tracking,
        )
    }

    /// Flip the session-wide gate: the store first, then a broadcast to
    /// every registered agent so disabled frames stop emitting at the
    /// source.
    pub fn set_tracking(&self, enabled: bool) {
        self.store.set_tracking(enabled);
        for agent in &self.agents {
            let _ = agent.send(AgentControl::SetTracking(enabled));
        }
    }

    pub fn tracking(&self) -> Result<bool> {
        self.store.tracking()
    }

    pub fn dump(&self) -> Result<Vec<EventRecord>> {
        self.store.events()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn notify_tab_activated(&self, tab_id: TabId) {
        self.store.notify_tab_activated(Utc::now(), tab_id);
    }

    pub fn notify_window_focused(&self, window_id: WindowId) {
        self.store.notify_window_focused(Utc::now(), window_id);
    }

    /// Export the current log to the configured directory.
    pub fn export(&self) -> Result<PathBuf> {
        let events = self.dump()?;
        let path = export::write_export(&self.cfg.export_dir, &events)?;
        info!("exported {} records to {:?}", events.len(), path);
        Ok(path)
    }

    pub fn shutdown(mut self) -> Result<()> {
        self.store.shutdown();
        if let Some(thread) = self.store_thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("event store thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Explicit shutdown() already took the handle; otherwise stop the
        // store without blocking on the join.
        if self.store_thread.is_some() {
            self.store.shutdown();
        }
    }
}
