// Session management core (shared between the CLI front-end and the service host)
pub mod session;

// Locating the service host binary
pub mod service_paths;

// Tracing subscriber setup for both binaries
pub mod logging;
