// ABOUTME: Library module for subset-export
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod assembly;
pub mod cleanup;
pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod filters;
pub mod postgres;
pub mod presets;
pub mod probe;
pub mod registry;
pub mod rules;
pub mod shadow;
pub mod sqlite;
pub mod subset;
pub mod tenant;
pub mod utils;
