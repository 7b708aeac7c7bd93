//! Utility functions shared by the crawler and the aggregator.
//!
//! - **URL handling**: dedup normalization, throttle origins, and the policy
//!   check applied to URLs found in fetched documents
//! - **Text processing**: stripping characters that cannot appear in XML output
//!
//! # Examples
//!
//! ```
//! use feedscout::util::{normalize, origin_of};
//!
//! assert_eq!(normalize("https://example.com/a?ref=rss"), "https://example.com/a");
//! assert_eq!(origin_of("https://example.com/a/b"), "https://example.com");
//! ```

mod text;
mod urls;

pub use text::strip_control_chars;
pub use urls::{normalize, origin_of, validate_url, UrlValidationError};
