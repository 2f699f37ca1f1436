use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";
const EXPORTS_DIR_NAME: &str = "exports";

pub fn config_file(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(CONFIG_FILE_NAME)
}

pub fn exports_dir(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(EXPORTS_DIR_NAME)
}

/// Session-stamped export artifact name.
pub fn session_export_file(export_dir: &Path, stamp_millis: i64) -> PathBuf {
    export_dir.join(format!("user_session_{stamp_millis}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_names_carry_the_session_stamp() {
        let path = session_export_file(Path::new("/tmp/exports"), 1_750_000_000_123);
        assert_eq!(
            path,
            PathBuf::from("/tmp/exports/user_session_1750000000123.json")
        );
    }
}
