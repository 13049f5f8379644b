pub mod agent;
pub mod exchange;
pub mod knowledge;
