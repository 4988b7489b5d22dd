pub mod compose;
pub mod config;
pub mod export;
pub mod info;
