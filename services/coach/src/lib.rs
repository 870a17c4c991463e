pub mod config;
pub mod prompt_loader;
pub mod terminal_speech;
