//! Commands exposed to the command-line front end
//!
//! This module organizes commands into logical submodules:
//! - `entries`: Entry creation and the list views
//! - `attachments`: Attaching files to entries
//! - `interchange`: Export and import
//! - `settings`: Application settings

pub mod attachments;
pub mod entries;
pub mod interchange;
pub mod settings;

use crate::app::AppState;

pub use attachments::*;
pub use entries::*;
pub use interchange::*;
pub use settings::*;

/// Application information structure
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub version: String,
    pub data_dir: String,
}

/// Get application information
pub fn get_app_info(state: &AppState) -> AppInfo {
    AppInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir: state.config.data_dir.to_string_lossy().to_string(),
    }
}
