//! Courier core library: relays chat messages to a local LLM and forwards the
//! commands it emits to a phone-side actuator, LAN first with an internet fallback.

pub mod actuator;
pub mod auth;
pub mod channels;
pub mod command;
pub mod config;
pub mod gateway;
pub mod init;
pub mod llm;
pub mod prompt;
pub mod relay;
