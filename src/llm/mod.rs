pub mod client;
pub mod factory;
pub mod gateway;
pub mod prompts;
