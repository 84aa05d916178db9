pub mod refresh;
pub mod server;
