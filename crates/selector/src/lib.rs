//! Hedged multi-mirror fetch and tiered candidate selection for live-stream
//! playback URLs.
//!
//! Given a room identifier, the engine queries several equivalent upstream
//! mirrors concurrently (each logical fetch hedged), aggregates which quality
//! levels each codec offers, enumerates concrete edge-host URLs, ranks them
//! against an ordered CDN preference policy, and resolves the one URL to play
//! right now.

pub mod aggregate;
pub mod candidate;
pub mod config;
pub mod error;
pub mod hedge;
pub mod models;
pub mod orchestrator;
pub mod signer;
pub mod upstream;

pub use candidate::{Candidate, compare_candidates, enumerate_candidates, sort_candidates};
pub use config::{CdnRuleSet, Codec, PatternHit, QualityGroup, SelectionConfig};
pub use error::SelectionError;
pub use hedge::hedged_get;
pub use models::{CodecItem, MirrorReport, UrlInfo};
pub use orchestrator::{Selection, SelectionEngine};
pub use signer::ParamSigner;
pub use upstream::{DEFAULT_UA, UpstreamClient, browser_headers};
