//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.
//! The process-wide handle is created on first use; concurrent first
//! callers wait on the same initialization.

use crate::config::Config;
use crate::database::{create_pool, open_journal_store, RecordStore, Repository};
use crate::error::Result;
use crate::services::{
    AttachmentsService, EntriesService, ImportService, InterchangeService, SettingsService,
};
use tokio::sync::OnceCell;

static APP_STATE: OnceCell<AppState> = OnceCell::const_new();

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repo: Repository,
    pub entries_service: EntriesService,
    pub attachments_service: AttachmentsService,
    pub settings_service: SettingsService,
    pub interchange_service: InterchangeService,
    pub import_service: ImportService,
}

impl AppState {
    /// Wire every service over an opened store
    pub fn new(config: Config, store: RecordStore) -> Self {
        let repo = Repository::new(store.clone());
        let settings_service = SettingsService::new(store);

        Self {
            entries_service: EntriesService::new(repo.clone(), config.auto_save_interval()),
            attachments_service: AttachmentsService::new(repo.clone()),
            interchange_service: InterchangeService::new(repo.clone(), settings_service.clone()),
            import_service: ImportService::new(repo.clone(), settings_service.clone()),
            settings_service,
            repo,
            config,
        }
    }

    /// Create directories, open the database and build the services
    pub async fn init(config: Config) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("Data directory: {:?}", config.data_dir);

        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(config.exports_dir())?;

        let pool = create_pool(&config.db_path()).await?;
        let store = open_journal_store(pool).await?;

        tracing::info!("Application initialized successfully");

        Ok(Self::new(config, store))
    }
}

/// The process-wide state, initialized from `config` on first call.
///
/// Later calls return the existing state and ignore their `config`.
pub async fn global(config: Config) -> Result<&'static AppState> {
    APP_STATE.get_or_try_init(|| AppState::init(config)).await
}
