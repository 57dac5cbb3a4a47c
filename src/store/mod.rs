pub mod memory;
pub mod retry;
pub mod sheets;
pub mod token;
