//! streamgate: given a live room id, answer with the one stream URL to play
//! right now.
//!
//! The selection itself lives in the `selector-engine` crate; this crate
//! wires it to the outside world with an HTTP surface, WBI request signing,
//! cookie resolution and logging.

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod logging;
pub mod panic_hook;
pub mod wbi;

pub use error::{Error, Result};
