//! Command-line arguments

use crate::commands::{parse_day, EntryFilter};
use crate::config::DEFAULT_RECENT_LIMIT;
use crate::database::{SettingsPatch, TextSize, ThemeKey};
use crate::error::Result;
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lunax")]
#[command(about = "Lunax - local-first journal store", long_about = None)]
pub struct Cli {
    /// Directory holding the journal database (overrides LUNAX_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export the whole journal to a JSON file
    Export {
        /// Directory to write into (defaults to the exports directory)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Merge an exported JSON file into the journal
    Import {
        file: PathBuf,
    },
    /// List entries
    List(ListArgs),
    /// Create a new entry
    New {
        title: String,

        /// Tag to add; repeat for more
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        category: Option<String>,
    },
    /// Attach a file to an entry
    Attach {
        entry_id: String,
        file: PathBuf,

        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        mime: Option<String>,
    },
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommands,
    },
    /// Show version and data directory
    Info,
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Most recently updated entries
    #[arg(long, conflicts_with_all = ["tag", "category", "from", "favorites", "locked"])]
    pub limit: Option<usize>,

    #[arg(long, conflicts_with_all = ["category", "from", "favorites", "locked"])]
    pub tag: Option<String>,

    #[arg(long, conflicts_with_all = ["from", "favorites", "locked"])]
    pub category: Option<String>,

    /// First day, YYYY-MM-DD
    #[arg(long, requires = "to", conflicts_with_all = ["favorites", "locked"])]
    pub from: Option<String>,

    /// Last day, YYYY-MM-DD
    #[arg(long, requires = "from")]
    pub to: Option<String>,

    #[arg(long, conflicts_with = "locked")]
    pub favorites: bool,

    #[arg(long)]
    pub locked: bool,
}

impl ListArgs {
    pub fn filter(&self) -> Result<EntryFilter> {
        if let Some(tag) = &self.tag {
            return Ok(EntryFilter::Tag(tag.clone()));
        }
        if let Some(category) = &self.category {
            return Ok(EntryFilter::Category(category.clone()));
        }
        if let (Some(from), Some(to)) = (&self.from, &self.to) {
            return Ok(EntryFilter::DateRange(parse_day(from)?, parse_day(to)?));
        }
        if self.favorites {
            return Ok(EntryFilter::Favorites);
        }
        if self.locked {
            return Ok(EntryFilter::Locked);
        }
        Ok(EntryFilter::Recent(self.limit.unwrap_or(DEFAULT_RECENT_LIMIT)))
    }
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print the current settings
    Show,
    /// Change one or more settings
    Set(SetArgs),
}

#[derive(Args, Debug, Default)]
pub struct SetArgs {
    /// light, dark, parchment, obsidian, forest or midnight
    #[arg(long, value_parser = parse_lowercase::<ThemeKey>)]
    pub theme: Option<ThemeKey>,

    #[arg(long)]
    pub font_body: Option<String>,

    #[arg(long)]
    pub font_heading: Option<String>,

    #[arg(long)]
    pub line_height: Option<f64>,

    /// sm, md or lg
    #[arg(long, value_parser = parse_lowercase::<TextSize>)]
    pub text_size: Option<TextSize>,

    #[arg(long)]
    pub lock_enabled: Option<bool>,

    #[arg(long)]
    pub lock_hint: Option<String>,

    #[arg(long)]
    pub high_contrast: Option<bool>,

    #[arg(long)]
    pub reduce_motion: Option<bool>,
}

impl SetArgs {
    pub fn into_patch(self) -> SettingsPatch {
        SettingsPatch {
            theme: self.theme,
            font_body: self.font_body,
            font_heading: self.font_heading,
            line_height: self.line_height,
            text_size: self.text_size,
            lock_enabled: self.lock_enabled,
            lock_hint: self.lock_hint,
            api_keys: None,
            high_contrast: self.high_contrast,
            reduce_motion: self.reduce_motion,
        }
    }
}

/// Parse a lowercase enum name the way it is stored
fn parse_lowercase<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::String(text.to_ascii_lowercase()))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_defaults_to_recent() {
        let cli = Cli::try_parse_from(vec!["lunax", "list"]).unwrap();
        match cli.command {
            Commands::List(args) => {
                assert_eq!(args.filter().unwrap(), EntryFilter::Recent(DEFAULT_RECENT_LIMIT));
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_list_date_range() {
        let cli = Cli::try_parse_from(vec![
            "lunax", "list", "--from", "1970-01-01", "--to", "1970-01-02",
        ])
        .unwrap();
        match cli.command {
            Commands::List(args) => {
                assert_eq!(args.filter().unwrap(), EntryFilter::DateRange(0, 86_400_000));
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_list_filters_conflict() {
        assert!(Cli::try_parse_from(vec!["lunax", "list", "--tag", "a", "--favorites"]).is_err());
        assert!(Cli::try_parse_from(vec!["lunax", "list", "--from", "2024-01-01"]).is_err());
    }

    #[test]
    fn test_new_with_tags() {
        let cli = Cli::try_parse_from(vec![
            "lunax", "new", "Kväll", "--tag", "sorg", "--tag", "minne", "--category", "Personligt",
        ])
        .unwrap();
        match cli.command {
            Commands::New {
                title,
                tags,
                category,
            } => {
                assert_eq!(title, "Kväll");
                assert_eq!(tags, vec!["sorg", "minne"]);
                assert_eq!(category.as_deref(), Some("Personligt"));
            }
            _ => panic!("Expected New command"),
        }
    }

    #[test]
    fn test_settings_set() {
        let cli = Cli::try_parse_from(vec![
            "lunax", "--data-dir", "/tmp/j", "settings", "set", "--theme", "Forest", "--text-size",
            "lg", "--reduce-motion", "true",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/j")));
        match cli.command {
            Commands::Settings {
                action: SettingsCommands::Set(args),
            } => {
                let patch = args.into_patch();
                assert_eq!(patch.theme, Some(ThemeKey::Forest));
                assert_eq!(patch.text_size, Some(TextSize::Lg));
                assert_eq!(patch.reduce_motion, Some(true));
                assert!(patch.font_body.is_none());
            }
            _ => panic!("Expected Settings Set command"),
        }

        assert!(Cli::try_parse_from(vec!["lunax", "settings", "set", "--theme", "neon"]).is_err());
    }
}
