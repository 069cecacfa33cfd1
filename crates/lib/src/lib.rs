//! Coach core library: session guard, webhook client, view models, and flows
//! shared by the CLI and desktop applications.

pub mod api;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod credential;
pub mod detail;
pub mod events;
pub mod guard;
pub mod init;
pub mod message;
pub mod route;
pub mod sidebar;

#[cfg(test)]
pub(crate) mod fake;
