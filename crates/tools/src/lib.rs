//! Built-in tool handlers for Palaver.

pub mod history_search;

pub use history_search::HistorySearchTool;
