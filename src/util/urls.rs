use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
///
/// Covers parsing failures and the policy checks applied to URLs that come
/// from untrusted documents (entry links, discovered feed links).
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Canonicalizes a URL into the deduplication key used across runs.
///
/// The query component is removed; scheme, host, port, path and fragment are
/// kept. Input that does not parse as a URL is returned unchanged, so the
/// function is total and idempotent.
///
/// # Examples
///
/// ```
/// use feedscout::util::normalize;
///
/// assert_eq!(
///     normalize("https://example.com/a?utm_source=x#top"),
///     "https://example.com/a#top"
/// );
/// assert_eq!(normalize("not a url"), "not a url");
/// ```
pub fn normalize(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.to_string()
        }
        Err(_) => raw.to_owned(),
    }
}

/// Returns the throttle key (scheme + host + port) for a URL.
///
/// Unparseable input is its own origin, which still gives it a throttle slot.
pub fn origin_of(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.origin().ascii_serialization(),
        Err(_) => raw.to_owned(),
    }
}

/// Validates a URL taken from fetched content before it is requested or
/// registered as a source.
///
/// Rejects non-HTTP(S) schemes always. When `allow_private` is false,
/// localhost and private/link-local addresses are rejected as well.
pub fn validate_url(url_str: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if allow_private {
        return Ok(url);
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => ipv4.is_private() || ipv4.is_link_local() || ipv4.is_unspecified(),
        IpAddr::V6(ipv6) => {
            if ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // fc00::/7
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // fe80::/10
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
