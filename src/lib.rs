pub mod cli;
pub mod config;
pub mod core;
pub mod detect;
pub mod engine;
pub mod exit;
pub mod export;
pub mod logs;
pub mod platform;
pub mod provider;
pub mod registry;
pub mod remediate;
pub mod ui;
