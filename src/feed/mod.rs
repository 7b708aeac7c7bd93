//! Network-facing feed handling: polling, parsing, discovery and output.
//!
//! - [`parser`] - feed documents into [`Entry`] values using `feed-rs`
//! - [`fetcher`] - throttled HTTP retrieval with typed soft failures
//! - [`discovery`] - finding new feeds from linked pages
//! - [`throttle`] - per-origin request spacing shared by all of the above
//! - [`publish`] - writing the aggregated RSS 2.0 document
//!
//! # Example
//!
//! ```ignore
//! let throttle = Arc::new(DomainThrottle::default());
//! let parsed = fetch_feed(&clients.verified, &throttle, url, clients.timeout).await?;
//! let discoverer = Discoverer::new(clients, throttle, DiscoveryOptions::default(), control);
//! let feeds = discoverer.discover(&parsed.entries[0].link, &blacklist).await;
//! ```

pub mod discovery;
pub mod fetcher;
pub mod parser;
pub mod publish;
pub mod throttle;

pub use discovery::{DiscoveryOptions, Discoverer};
pub use fetcher::{fetch_feed, FetchError, HttpClients};
pub use parser::{parse_feed, Entry, ParseResult};
pub use publish::{publish_to_file, render_rss, ChannelInfo};
pub use throttle::DomainThrottle;
