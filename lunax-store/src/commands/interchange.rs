//! Export and import commands

use crate::app::AppState;
use crate::error::Result;
use crate::services::ImportReport;
use std::path::{Path, PathBuf};

/// Export the journal into `out`, or the default exports directory
pub async fn export_journal(state: &AppState, out: Option<PathBuf>) -> Result<PathBuf> {
    let dir = out.unwrap_or_else(|| state.config.exports_dir());
    state.interchange_service.export_to_dir(&dir).await
}

/// Merge an interchange file into the journal
pub async fn import_journal(state: &AppState, file: &Path) -> Result<ImportReport> {
    state.import_service.import_from_file(file).await
}
