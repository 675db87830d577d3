//! Core logic for devzat-rs: identity, rooms, sessions, commands, the
//! plugin RPC bridge, and the ambient persistence/anti-abuse/rendering
//! machinery they all lean on. The SSH transport and the heavy rendering
//! collaborators (Markdown, syntax highlighting, emoji tables) stay behind
//! the traits in [`transport`] and [`render`] so this crate never has to
//! know how bytes actually reach a terminal.

pub mod antiabuse;
pub mod autocomplete;
pub mod backlog;
pub mod ban;
pub mod bot;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod image;
pub mod plugin;
pub mod prefs;
pub mod render;
pub mod room;
pub mod session;
pub mod shutdown;
pub mod time_fmt;
pub mod token;
pub mod transport;

pub use error::DevzatError;
