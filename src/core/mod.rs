pub mod data;
pub mod directory;
pub mod engine;
pub mod exchange;
pub mod generation;
pub mod history;
pub mod options;
pub mod prompt;
pub mod retrieval;
