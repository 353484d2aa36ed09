pub mod adapter;
pub mod config;
pub mod directory;
pub mod downstream;
pub mod logger;
pub mod model;
pub mod monitor;
pub mod session;
pub mod sim;
pub mod state;
