pub mod completion;
pub mod console;
pub mod format;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod repository;
pub mod server;
pub mod session;
pub mod settings;
pub mod storage;
