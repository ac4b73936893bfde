//! Core data model types: messages, accounts, and user settings.

pub mod account;
pub mod message;
pub mod settings;
