use crate::persist::{load_json, save_json_best_effort};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::{Display, EnumString};
use tracing::warn;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Serialize, Deserialize)]
struct ThemeFile {
    #[serde(rename = "Theme")]
    theme: Theme,
}

/// Persisted theme preference, `{ "Theme": "Light" }` on disk.
#[derive(Debug, Clone)]
pub struct ThemeStore {
    path: PathBuf,
}

impl ThemeStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Stored theme, `Light` when the file is missing or unreadable.
    pub async fn load(&self) -> Theme {
        match load_json::<ThemeFile>(&self.path).await {
            Ok(Some(file)) => file.theme,
            Ok(None) => Theme::default(),
            Err(e) => {
                warn!("Theme preference ignored: {:#}", e);
                Theme::default()
            }
        }
    }

    pub async fn save(&self, theme: Theme) -> bool {
        save_json_best_effort(&self.path, &ThemeFile { theme }).await
    }
}
