// Session core for the desktop-mode front-end
// Shared by the CLI front-end and the service host binaries

pub mod config;
pub mod controller;
pub mod error;
pub mod launcher;
pub mod link;
pub mod protocol;
pub mod service_client;
pub mod settings;
pub mod store;

#[cfg(test)]
mod fakes;
