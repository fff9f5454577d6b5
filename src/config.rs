use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that relocates the config directory (tests, portable installs).
pub(crate) const CONFIG_DIR_ENV: &str = "SIDEBOT_BRIDGE_CONFIG_DIR";

const BRIDGE_CONFIG_FILE: &str = "config.json";

/// Get the config directory using platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/sidebot-bridge/`
/// - Linux: `~/.config/sidebot-bridge/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/sidebot-bridge/`
///
/// `$SIDEBOT_BRIDGE_CONFIG_DIR` wins when set. Falls back to
/// `~/.sidebot-bridge/` if the platform dir is unavailable.
pub(crate) fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|d| d.join("sidebot-bridge"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".sidebot-bridge")
        })
}

/// Load a JSON file from `dir`, returning Default if missing or corrupt.
/// A file that exists but cannot be read or parsed is logged, so a corrupt
/// file shows up in logs instead of silently resetting state.
pub(crate) fn load_json_in<T: DeserializeOwned + Default>(dir: &Path, filename: &str) -> T {
    let path = dir.join(filename);
    if !path.exists() {
        return T::default();
    }
    let content = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Could not read config {}: {e}", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Corrupt config {}: {e}. Using defaults.", path.display());
            T::default()
        }
    }
}

/// Create a new file readable only by the owner (0600 on Unix) from the
/// moment it exists.
fn create_private(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Save a JSON file into `dir` atomically (temp file + rename).
/// Creates `dir` if needed. The temp file is created 0600 on Unix, since the
/// credential record lives next to the config.
pub(crate) fn save_json_in<T: Serialize>(dir: &Path, filename: &str, value: &T) -> Result<(), String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create config directory: {e}"))?;

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to serialize config: {e}"))?;

    let target = dir.join(filename);
    let temp = dir.join(format!("{filename}.tmp.{}", uuid::Uuid::new_v4().simple()));

    let written = create_private(&temp).and_then(|mut file| {
        use std::io::Write;
        file.write_all(json.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp);
        return Err(format!("Failed to write temp config: {e}"));
    }

    // Either the old file or the new one exists, never a partial write
    std::fs::rename(&temp, &target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        format!("Failed to commit config: {e}")
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// BridgeConfig
// ---------------------------------------------------------------------------

/// Runtime settings for the bridge. Every field has a default so an old or
/// partial `config.json` still loads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host both listeners bind to
    pub bind_host: String,
    /// HTTP command surface port
    pub http_port: u16,
    /// Plugin WebSocket port
    pub ws_port: u16,
    /// Claude model used for chat and analysis
    pub model: String,
    /// Base URL of the Messages API (overridable for proxies and tests)
    pub api_base_url: String,
    pub chat_max_tokens: u32,
    pub analysis_max_tokens: u32,
    /// Upper bound for one provider call, retries included
    pub ai_timeout_secs: u64,
    /// Extra attempts for transient provider failures
    pub max_retries: u32,
    /// Base URL of the Notion REST API
    pub notion_base_url: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            http_port: 3000,
            ws_port: 3001,
            model: "claude-sonnet-4-20250514".to_string(),
            api_base_url: "https://api.anthropic.com".to_string(),
            chat_max_tokens: 4096,
            analysis_max_tokens: 4096,
            ai_timeout_secs: 120,
            max_retries: 2,
            notion_base_url: "https://api.notion.com".to_string(),
        }
    }
}

pub(crate) fn load_bridge_config(dir: &Path) -> BridgeConfig {
    load_json_in(dir, BRIDGE_CONFIG_FILE)
}

#[cfg(test)]
pub(crate) fn save_bridge_config(dir: &Path, config: &BridgeConfig) -> Result<(), String> {
    save_json_in(dir, BRIDGE_CONFIG_FILE, config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
