pub mod config;
pub mod game_server;
pub mod transport;
