//! Classifieds listing scraper.
//!
//! Each listing page ships its app state as an inline bootstrap script. The
//! script is run in a boa sandbox, the resulting `window` object is decoded,
//! and the ads found in it are collected across pages into one JSON file.

pub mod config;
pub mod error;
pub mod fetch;
pub mod inspect;
pub mod listing;
pub mod locate;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod sandbox;

pub use config::ScrapeConfig;
pub use error::ScrapeError;
pub use listing::AdCollection;
pub use pipeline::{RunSummary, run};
