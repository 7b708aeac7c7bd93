use crate::control::RunControl;
use crate::feed::fetcher::{
    read_limited_bytes, throttled_get, FetchError, HttpClients, DEFAULT_TIMEOUT,
};
use crate::feed::throttle::DomainThrottle;
use crate::util::validate_url;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;

const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const FEED_LINK_TYPE: &str = "application/rss+xml";
/// Conventional feed paths tried under every directory of a page's path.
const PROBE_NAMES: [&str; 2] = ["rss", "feed"];

/// Tunables for a [`Discoverer`].
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Pages at this depth or deeper are never fetched.
    pub max_depth: usize,
    pub timeout: Duration,
    /// Permit localhost/private hosts in discovered links.
    pub allow_private: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            timeout: DEFAULT_TIMEOUT,
            allow_private: false,
        }
    }
}

/// A 200 response body fetched during a run.
#[derive(Debug)]
struct Page {
    body: String,
    /// Certificate verification was skipped to get it.
    insecure: bool,
}

/// Outcome of the single GET a URL gets per run: the page on a 200, `None`
/// for any other status or failure.
type FetchSlot = Arc<OnceCell<Option<Arc<Page>>>>;

/// Finds syndication feeds reachable from web pages.
///
/// One `Discoverer` lives for exactly one run. It owns the run's visited set
/// (pages already scanned) and a cache of every page and probe response, so
/// no URL is requested twice in a run. A probed feed that is later scanned
/// reuses the probe's body. It shares the run's [`DomainThrottle`] with the
/// feed poller.
pub struct Discoverer {
    clients: HttpClients,
    throttle: Arc<DomainThrottle>,
    options: DiscoveryOptions,
    control: RunControl,
    visited: Mutex<HashSet<String>>,
    fetched: Mutex<HashMap<String, FetchSlot>>,
}

impl Discoverer {
    pub fn new(
        clients: HttpClients,
        throttle: Arc<DomainThrottle>,
        options: DiscoveryOptions,
        control: RunControl,
    ) -> Self {
        Self {
            clients,
            throttle,
            options,
            control,
            visited: Mutex::new(HashSet::new()),
            fetched: Mutex::new(HashMap::new()),
        }
    }

    /// Discovers feed URLs starting from `url` at depth 0.
    pub async fn discover(&self, url: &str, blacklist: &HashSet<String>) -> BTreeSet<String> {
        self.discover_from(url, blacklist, 0).await
    }

    /// Discovers feed URLs reachable from `url`, which sits at `current_depth`.
    ///
    /// The crawl is a breadth-first work-list of `(page, depth)` pairs; every
    /// feed found on a page is enqueued one level deeper. A page is skipped
    /// without any request when its depth reaches `max_depth`, when it is
    /// blacklisted, or when it was already visited this run.
    ///
    /// Never fails: unreachable pages and failed probes contribute nothing.
    /// Returned URLs may include blacklisted or already-known feeds; the
    /// caller decides what to register.
    pub async fn discover_from(
        &self,
        url: &str,
        blacklist: &HashSet<String>,
        current_depth: usize,
    ) -> BTreeSet<String> {
        let mut discovered = BTreeSet::new();
        let mut queue = VecDeque::from([(url.to_owned(), current_depth)]);

        while let Some((page, depth)) = queue.pop_front() {
            if self.control.is_stopped() {
                break;
            }
            if depth >= self.options.max_depth || blacklist.contains(&page) {
                continue;
            }
            if !self.mark_visited(&page) {
                continue;
            }
            if let Err(e) = validate_url(&page, self.options.allow_private) {
                tracing::debug!(url = %page, error = %e, "Skipping discovery for rejected URL");
                continue;
            }

            for feed in self.scan_page(&page).await {
                if discovered.insert(feed.clone()) {
                    queue.push_back((feed, depth + 1));
                }
            }
        }

        discovered
    }

    /// Whether `url` was scanned (or skipped as visited) earlier in this run.
    pub fn was_visited(&self, url: &str) -> bool {
        let visited = self.visited.lock().unwrap_or_else(|e| e.into_inner());
        visited.contains(url)
    }

    pub fn visited_count(&self) -> usize {
        let visited = self.visited.lock().unwrap_or_else(|e| e.into_inner());
        visited.len()
    }

    /// Returns false if `url` had already been visited.
    fn mark_visited(&self, url: &str) -> bool {
        let mut visited = self.visited.lock().unwrap_or_else(|e| e.into_inner());
        visited.insert(url.to_owned())
    }

    /// The cache slot for `url`. Concurrent callers share one slot, so the
    /// second waits on the first's request instead of issuing its own.
    fn slot(&self, url: &str) -> FetchSlot {
        let mut fetched = self.fetched.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(fetched.entry(url.to_owned()).or_default())
    }

    fn client(&self, insecure: bool) -> &reqwest::Client {
        if insecure {
            &self.clients.unverified
        } else {
            &self.clients.verified
        }
    }

    /// Collects the advertised feed links of one page, then probes the
    /// conventional feed paths up its directory chain.
    async fn scan_page(&self, url: &str) -> Vec<String> {
        let slot = self.slot(url);
        let Some(page) = slot.get_or_init(|| self.fetch_page(url)).await.clone() else {
            return Vec::new();
        };

        let mut found: Vec<String> = find_feed_links_in_html(&page.body, url)
            .into_iter()
            .filter(|href| validate_url(href, self.options.allow_private).is_ok())
            .collect();

        for candidate in directory_candidates(url) {
            if self.control.is_stopped() {
                break;
            }
            if found.contains(&candidate) {
                continue;
            }
            if self.probe(&candidate, page.insecure).await {
                found.push(candidate);
            }
        }

        if !found.is_empty() {
            tracing::debug!(url = %url, feeds = found.len(), "Feed links discovered");
        }
        found
    }

    /// Fetches a page, falling back to an unverified client once if the
    /// initial request fails certificate verification. Probes made from the
    /// page then use the same client.
    async fn fetch_page(&self, url: &str) -> Option<Arc<Page>> {
        let (body, insecure) = match self.fetch_body(self.client(false), url).await {
            Ok(body) => (body, false),
            Err(e) if e.is_tls() => {
                tracing::warn!(url = %url, error = %e, "TLS failure, retrying without certificate verification");
                match self.fetch_body(self.client(true), url).await {
                    Ok(body) => (body, true),
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Discovery retry failed");
                        return None;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Discovery fetch failed");
                return None;
            }
        };
        body.map(|body| Arc::new(Page { body, insecure }))
    }

    /// Requests a candidate feed URL once per run; true when it answered 200.
    async fn probe(&self, candidate: &str, insecure: bool) -> bool {
        let slot = self.slot(candidate);
        let page = slot
            .get_or_init(|| async move {
                match self.fetch_body(self.client(insecure), candidate).await {
                    Ok(body) => body.map(|body| Arc::new(Page { body, insecure })),
                    Err(e) => {
                        tracing::trace!(url = %candidate, error = %e, "Probe failed");
                        None
                    }
                }
            })
            .await;
        page.is_some()
    }

    /// GETs `url` and returns its body on a 200, `Ok(None)` on other statuses.
    async fn fetch_body(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<Option<String>, FetchError> {
        let response = throttled_get(client, &self.throttle, url, self.options.timeout).await?;
        if response.status() != reqwest::StatusCode::OK {
            tracing::debug!(url = %url, status = response.status().as_u16(), "Discovery target not available");
            return Ok(None);
        }

        let bytes = read_limited_bytes(response, MAX_PAGE_SIZE).await?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Builds the `rss`/`feed` candidates for every directory of `url`'s path,
/// from the root down to the directory holding the last segment.
///
/// `https://a.com/x/y/page` yields candidates under `/`, `/x/` and `/x/y/`.
fn directory_candidates(url: &str) -> Vec<String> {
    let Ok(mut base) = url::Url::parse(url) else {
        return Vec::new();
    };
    if base.cannot_be_a_base() {
        return Vec::new();
    }
    base.set_query(None);
    base.set_fragment(None);

    let segments: Vec<String> = base
        .path_segments()
        .map(|s| s.map(str::to_owned).collect())
        .unwrap_or_default();

    let mut candidates = Vec::new();
    for depth in 0..segments.len().max(1) {
        let mut dir = String::from("/");
        for segment in &segments[..depth] {
            dir.push_str(segment);
            dir.push('/');
        }
        for name in PROBE_NAMES {
            base.set_path(&format!("{dir}{name}"));
            candidates.push(base.to_string());
        }
    }
    candidates
}

/// Collects the `href` of every `<link>` tag whose `type` is
/// `application/rss+xml`, resolved against `base_url`, in document order.
///
/// Uses plain string scanning rather than an HTML parser.
fn find_feed_links_in_html(html: &str, base_url: &str) -> Vec<String> {
    // ASCII lowercasing keeps byte offsets aligned with `html`
    let html_lower = html.to_ascii_lowercase();
    let mut links = Vec::new();
    let mut search_from = 0;

    while let Some(link_start) = html_lower[search_from..].find("<link") {
        let abs_start = search_from + link_start;
        let after_name = abs_start + "<link".len();

        // Reject tags like <linkset>
        let boundary = html_lower[after_name..].chars().next();
        if !matches!(boundary, Some(c) if c.is_ascii_whitespace() || c == '/' || c == '>') {
            search_from = after_name;
            continue;
        }

        let Some(tag_len) = html_lower[abs_start..].find('>') else {
            break;
        };
        let tag = &html[after_name..abs_start + tag_len];
        let attrs = parse_attributes(tag);

        let is_feed = attrs
            .iter()
            .any(|(name, value)| name == "type" && value.trim().eq_ignore_ascii_case(FEED_LINK_TYPE));
        if is_feed {
            if let Some((_, href)) = attrs.iter().find(|(name, _)| name == "href") {
                let href = decode_entities(href.trim());
                if !href.is_empty() {
                    let resolved = resolve_url(&href, base_url);
                    if !links.contains(&resolved) {
                        links.push(resolved);
                    }
                }
            }
        }

        search_from = abs_start + tag_len + 1;
    }

    links
}

/// Splits the inside of a tag into `(lowercased name, raw value)` pairs.
/// Handles double-quoted, single-quoted, unquoted and valueless attributes.
fn parse_attributes(tag: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut chars = tag.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace() || *c == '/').is_some() {}
        let Some(&(name_start, _)) = chars.peek() else {
            break;
        };

        let mut name_end = tag.len();
        while let Some(&(i, c)) = chars.peek() {
            if c == '=' || c.is_whitespace() || c == '/' {
                name_end = i;
                break;
            }
            chars.next();
        }
        let name = tag[name_start..name_end.min(tag.len())].to_ascii_lowercase();

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next_if(|(_, c)| *c == '=').is_none() {
            if !name.is_empty() {
                attrs.push((name, String::new()));
            }
            continue;
        }
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let value = match chars.peek().copied() {
            Some((i, quote @ ('"' | '\''))) => {
                chars.next();
                let start = i + 1;
                let mut end = tag.len();
                for (j, c) in chars.by_ref() {
                    if c == quote {
                        end = j;
                        break;
                    }
                }
                &tag[start..end]
            }
            Some((start, _)) => {
                let mut end = tag.len();
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_whitespace() {
                        end = j;
                        break;
                    }
                    chars.next();
                }
                &tag[start..end]
            }
            None => "",
        };
        attrs.push((name, value.to_owned()));
    }

    attrs
}

/// Decodes the handful of entities that show up in `href` values.
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_owned();
    }
    value
        .replace("&amp;", "&")
        .replace("&#38;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Resolves a potentially relative URL against a base URL.
fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    // Relative and protocol-relative hrefs both resolve through the parser
    if let Ok(base) = url::Url::parse(base_url) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}
