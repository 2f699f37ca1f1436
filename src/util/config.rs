use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub workspace_dir: PathBuf,
    pub export_dir: PathBuf,
    // Capture starts enabled unless a control command says otherwise
    pub tracking_default: bool,
    pub motion_debounce_ms: u64,
    pub scroll_debounce_ms: u64,
    pub mutation_batch_ms: u64,
    pub navigation_delay_ms: u64,
    pub gesture_recency_ms: u64,
    pub attach_retry_ms: u64,
    pub attach_max_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let base_dir = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let workspace_dir = base_dir.join(".webtrail");
        let export_dir = crate::util::paths::exports_dir(&workspace_dir);

        Self {
            workspace_dir,
            export_dir,
            tracking_default: true,
            motion_debounce_ms: 100,
            scroll_debounce_ms: 150,
            mutation_batch_ms: 200,
            navigation_delay_ms: 120,
            gesture_recency_ms: 5_000,
            attach_retry_ms: 300,
            attach_max_retries: 20,
        }
    }
}

impl AppConfig {
    /// Defaults, overridden by an optional workspace config.toml,
    /// overridden by WEBTRAIL_* environment variables.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let config_path = crate::util::paths::config_file(&defaults.workspace_dir);

        let mut builder = Config::builder()
            .set_default(
                "workspace_dir",
                defaults.workspace_dir.to_string_lossy().as_ref(),
            )?
            .set_default(
                "export_dir",
                defaults.export_dir.to_string_lossy().as_ref(),
            )?
            .set_default("tracking_default", true)?
            .set_default("motion_debounce_ms", 100)?
            .set_default("scroll_debounce_ms", 150)?
            .set_default("mutation_batch_ms", 200)?
            .set_default("navigation_delay_ms", 120)?
            .set_default("gesture_recency_ms", 5_000)?
            .set_default("attach_retry_ms", 300)?
            .set_default("attach_max_retries", 20)?;

        if config_path.exists() {
            builder = builder.add_source(File::from(config_path));
        }

        builder = builder.add_source(Environment::with_prefix("WEBTRAIL"));

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }

    pub fn capture(&self) -> crate::capture::CaptureConfig {
        crate::capture::CaptureConfig {
            motion_debounce_ms: self.motion_debounce_ms,
            scroll_debounce_ms: self.scroll_debounce_ms,
            mutation_batch_ms: self.mutation_batch_ms,
            navigation_delay_ms: self.navigation_delay_ms,
            gesture_recency_ms: self.gesture_recency_ms,
            attach_max_retries: self.attach_max_retries,
        }
    }
}
