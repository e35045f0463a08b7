use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const FILE_NAME: &str = "parley.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Address disclosed to other peers for media and voice notes.
    /// Defaults to the local address of the control connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
}

/// Settings live next to the executable, so separate installs keep
/// separate configurations. Falls back to the working directory when the
/// executable path is unknowable.
fn settings_path() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    exe_dir.unwrap_or_default().join(FILE_NAME)
}

impl UserSettings {
    /// A missing or unparseable file is the same as an empty one.
    pub fn load() -> Self {
        std::fs::read_to_string(settings_path())
            .ok()
            .and_then(|text| toml::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) {
        let serialized = match toml::to_string_pretty(self) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("settings not serializable: {}", e);
                return;
            }
        };
        let path = settings_path();
        if let Err(e) = std::fs::write(&path, serialized) {
            tracing::warn!("could not write {}: {}", path.display(), e);
        }
    }
}
