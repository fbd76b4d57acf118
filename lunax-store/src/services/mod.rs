//! Services module
//!
//! Business logic services that coordinate between commands and repository.

pub mod attachments;
pub mod autosave;
pub mod entries;
pub mod import;
pub mod interchange;
pub mod settings;

pub use attachments::AttachmentsService;
pub use autosave::AutosaveSession;
pub use entries::{EntriesService, EntryUpdate};
pub use import::{ImportReport, ImportService, RecordKind, SkippedRecord};
pub use interchange::{InterchangeBlob, InterchangeDocument, InterchangeService};
pub use settings::SettingsService;
