//! Settings-related commands

use crate::app::AppState;
use crate::database::{Settings, SettingsPatch};
use crate::error::{AppError, Result};

/// Get current settings
pub async fn get_settings(state: &AppState) -> Result<Settings> {
    state.settings_service.read().await
}

/// Apply a partial update to the settings
pub async fn update_settings(state: &AppState, patch: SettingsPatch) -> Result<Settings> {
    if patch.is_empty() {
        return Err(AppError::Generic("No settings given to change".to_string()));
    }
    if let Some(line_height) = patch.line_height {
        if !line_height.is_finite() || line_height <= 0.0 {
            return Err(AppError::Generic(format!(
                "Line height must be a positive number, got {}",
                line_height
            )));
        }
    }

    state.settings_service.merge(patch).await
}
