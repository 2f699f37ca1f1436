use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

use crate::events::EventRecord;
use crate::util::paths;

/// Write the ordered log as a session-stamped JSON artifact. This is the
/// only thing the system ever persists; it is written once and never
/// read back except by `read_export`.
pub fn write_export(export_dir: &Path, events: &[EventRecord]) -> Result<PathBuf> {
    fs::create_dir_all(export_dir)
        .with_context(|| format!("failed to create export directory {export_dir:?}"))?;
    let path = paths::session_export_file(export_dir, Utc::now().timestamp_millis());
    let json = serde_json::to_string_pretty(events).context("failed to serialize event log")?;
    fs::write(&path, json).with_context(|| format!("failed to write export {path:?}"))?;
    Ok(path)
}

pub fn read_export(path: &Path) -> Result<Vec<EventRecord>> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read export {path:?}"))?;
    serde_json::from_str(&raw).with_context(|| format!("malformed export {path:?}"))
}
