//! Lunax library
//!
//! Local-first persistence for the Lunax journal: an indexed record store
//! over SQLite, the journal's entities and settings, and whole-journal
//! export and merge-import.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod services;
