pub mod classify;
pub mod config;
pub mod destination;
pub mod http;
pub mod ledger;
pub mod relay;
pub mod source;
pub mod track;

/// Application name for XDG paths
pub const APP_NAME: &str = "ratingrelay";
