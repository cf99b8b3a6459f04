pub mod insights;
pub mod pipeline;
pub mod receiver;
pub mod settings;
pub mod simulator;
pub mod state;
pub mod store;
pub mod trigger;
pub mod web;
