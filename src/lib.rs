pub mod app;
pub mod area;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod earthexplorer;
pub mod error;
pub mod fallback;
pub mod fs_util;
pub mod grid;
pub mod http;
pub mod ledger;
pub mod output;
pub mod reconcile;
pub mod store;
pub mod tui;
pub mod worker;
