//! Keyword-filtered feed aggregation with self-expanding source discovery.
//!
//! A run polls every registered feed, keeps entries whose title or
//! description contains the keyword, follows each entry link to discover
//! further feeds, and publishes the newest matches as one RSS document.

pub mod aggregator;
pub mod config;
pub mod control;
pub mod feed;
pub mod storage;
pub mod util;
