pub mod config;
pub mod credentials;
pub mod lifecycle;
pub mod sink;
pub mod utils;
pub mod watcher;
