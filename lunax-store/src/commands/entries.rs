//! Entry-related commands
//!
//! Creating entries and reading them through the list views.

use crate::app::AppState;
use crate::config::DEFAULT_RECENT_LIMIT;
use crate::database::Entry;
use crate::error::{AppError, Result};
use crate::services::EntryUpdate;
use chrono::NaiveDate;

/// Which list view to read
#[derive(Debug, Clone, PartialEq)]
pub enum EntryFilter {
    Recent(usize),
    Tag(String),
    Category(String),
    /// Inclusive range of days, as epoch milliseconds
    DateRange(i64, i64),
    Favorites,
    Locked,
}

impl Default for EntryFilter {
    fn default() -> Self {
        EntryFilter::Recent(DEFAULT_RECENT_LIMIT)
    }
}

/// Create a new entry, optionally tagged and categorized
pub async fn create_entry(
    state: &AppState,
    title: String,
    tags: Vec<String>,
    category: Option<String>,
) -> Result<Entry> {
    state
        .entries_service
        .create_entry_with(
            title,
            EntryUpdate {
                tags: (!tags.is_empty()).then_some(tags),
                category: category.map(Some),
                ..Default::default()
            },
        )
        .await
}

/// List entries through one of the views
pub async fn list_entries(state: &AppState, filter: EntryFilter) -> Result<Vec<Entry>> {
    let repo = &state.repo;
    match filter {
        EntryFilter::Recent(limit) => repo.list_recent(limit).await,
        EntryFilter::Tag(tag) => repo.list_by_tag(&tag).await,
        EntryFilter::Category(category) => repo.list_by_category(&category).await,
        EntryFilter::DateRange(from, to) => repo.list_by_date_range(from, to).await,
        EntryFilter::Favorites => repo.list_favorites().await,
        EntryFilter::Locked => repo.list_locked().await,
    }
}

/// `YYYY-MM-DD` as the epoch-ms start of that UTC day
pub fn parse_day(text: &str) -> Result<i64> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| AppError::Generic(format!("Invalid date '{}': {}", text, e)))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::Generic(format!("Invalid date '{}'", text)))?;
    Ok(midnight.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::{create_memory_pool, open_journal_store};

    async fn create_test_state() -> AppState {
        let store = open_journal_store(create_memory_pool().await.unwrap())
            .await
            .unwrap();
        AppState::new(Config::with_data_dir("lunax-test-unused"), store)
    }

    #[tokio::test]
    async fn test_create_entry_lands_tagged() {
        let state = create_test_state().await;

        let entry = create_entry(
            &state,
            "Resa".to_string(),
            vec!["tåg".to_string()],
            Some("Minnen".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(entry.tags, vec!["tåg"]);
        assert_eq!(entry.category.as_deref(), Some("Minnen"));

        let tagged = list_entries(&state, EntryFilter::Tag("tåg".into())).await.unwrap();
        assert_eq!(tagged, vec![entry.clone()]);
        let filed = list_entries(&state, EntryFilter::Category("Minnen".into()))
            .await
            .unwrap();
        assert_eq!(filed, vec![entry]);
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(parse_day("2024-03-10").unwrap(), 1_710_028_800_000);
        assert_eq!(parse_day("1970-01-01").unwrap(), 0);
        assert!(parse_day("10/03/2024").is_err());
        assert!(parse_day("2024-02-30").is_err());
    }
}
