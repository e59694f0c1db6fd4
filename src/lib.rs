// Chinta - Background service daemon
// Library exports

pub mod config;
pub mod daemon; // Detachment, signals, heartbeat loop
pub mod errors;
pub mod server; // Routable HTTP service shell
