pub mod auth;
pub mod client;
pub mod logging;
pub mod progress;
pub mod push;
pub mod server;
pub mod storage;
