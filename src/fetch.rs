//! Listing page retrieval: page URL building, browser-like headers, body
//! decoding, robots.txt.

use std::time::Duration;

use encoding_rs::{Encoding, UTF_8};
use rand::{Rng, rng};
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderName,
    HeaderValue, PRAGMA, REFERER, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use robotstxt::DefaultMatcher;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::config::ScrapeConfig;
use crate::error::ScrapeError;

const ROBOTS_AGENT: &str = "Mozilla";
/// How far into the body a `<meta charset>` declaration is looked for.
const META_PRESCAN_BYTES: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Profile {
    Desktop,
    Mobile,
}

impl Profile {
    fn flip(self) -> Self {
        match self {
            Profile::Desktop => Profile::Mobile,
            Profile::Mobile => Profile::Desktop,
        }
    }
}

pub struct PageFetcher {
    client: reqwest::Client,
    accept_language: HeaderValue,
    retries: u32,
}

impl PageFetcher {
    pub fn new(config: &ScrapeConfig) -> Result<Self, ScrapeError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(8))
            .timeout(config.request_timeout());
        if !config.system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| ScrapeError::Config(format!("http client: {e}")))?;
        let accept_language = HeaderValue::from_str(&config.accept_language)
            .map_err(|e| ScrapeError::Config(format!("accept_language: {e}")))?;

        Ok(Self {
            client,
            accept_language,
            retries: config.retries,
        })
    }

    /// GET `url` and return the body. Non-2xx responses are `Network` errors.
    pub async fn fetch(&self, url: &Url, referer: &str) -> Result<String, ScrapeError> {
        let mut profile = Profile::Desktop;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_once(url, referer, profile).await {
                Ok(body) => return Ok(body),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retryable(e)) => {
                    if attempt > self.retries {
                        return Err(e);
                    }
                    warn!(%url, attempt, error = %e, "fetch failed, retrying");
                    profile = profile.flip();
                    let backoff = rng().random_range(600..1500);
                    sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &Url, referer: &str, profile: Profile) -> Result<String, Attempt> {
        let headers = self.headers(profile, referer);
        let rsp = self
            .client
            .get(url.as_str())
            .headers(headers)
            .send()
            .await
            .map_err(|e| Attempt::Retryable(ScrapeError::network(url, e)))?;

        let status = rsp.status();
        let final_url = rsp.url().clone();
        if !status.is_success() {
            let err = ScrapeError::network(url, format!("HTTP {status}"));
            return Err(if status.is_server_error() {
                Attempt::Retryable(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let content_type = rsp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = rsp
            .bytes()
            .await
            .map_err(|e| Attempt::Retryable(ScrapeError::network(url, e)))?;
        let text = decode_html(&body, content_type.as_deref());
        debug!(
            %url,
            ?profile,
            status = status.as_u16(),
            %final_url,
            len = text.len(),
            referer,
            "fetched"
        );
        Ok(text)
    }

    /// Returns `RobotsDisallowed` when the site's robots.txt forbids `url`.
    /// A missing or unreachable robots.txt allows everything.
    pub async fn check_robots(&self, url: &Url) -> Result<(), ScrapeError> {
        let Some(host) = url.host_str() else {
            return Err(ScrapeError::Config("url has no host".into()));
        };
        let origin = origin_of(url);
        let robots_url = format!("{origin}/robots.txt");
        let robots_txt = match self
            .client
            .get(&robots_url)
            .headers(self.headers(Profile::Desktop, &origin))
            .send()
            .await
        {
            Ok(rsp) if rsp.status() == StatusCode::OK => match rsp.text().await {
                Ok(txt) => txt,
                Err(e) => {
                    warn!(%robots_url, error = %e, "robots.txt body unreadable, allowing crawl");
                    String::new()
                }
            },
            Ok(rsp) => {
                debug!(%robots_url, status = rsp.status().as_u16(), "no robots.txt");
                String::new()
            }
            Err(e) => {
                warn!(%robots_url, error = %e, "robots.txt unreachable");
                String::new()
            }
        };

        if robots_allows(&robots_txt, url.as_str()) {
            debug!(host, "robots.txt allows crawl");
            Ok(())
        } else {
            Err(ScrapeError::RobotsDisallowed(url.to_string()))
        }
    }

    fn headers(&self, profile: Profile, referer: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        let ua = match profile {
            Profile::Desktop => random_desktop_ua(),
            Profile::Mobile => random_mobile_ua(),
        };
        h.insert(USER_AGENT, HeaderValue::from_static(ua));
        h.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        h.insert(ACCEPT_LANGUAGE, self.accept_language.clone());
        if let Ok(v) = HeaderValue::from_str(referer) {
            h.insert(REFERER, v);
        }
        h.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        h.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        h.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        h.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        h.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("same-origin"),
        );
        h.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("navigate"),
        );
        h.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("document"),
        );
        h
    }
}

enum Attempt {
    Retryable(ScrapeError),
    Fatal(ScrapeError),
}

fn robots_allows(robots_txt: &str, url: &str) -> bool {
    let mut matcher = DefaultMatcher::default();
    matcher.one_agent_allowed_by_robots(robots_txt, ROBOTS_AGENT, url)
}

pub fn origin_of(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        origin.push_str(&format!(":{port}"));
    }
    origin
}

// -------------------------
// Body decoding
// -------------------------

/// Decodes an HTML body. A byte order mark wins, then the `Content-Type`
/// charset, then a `<meta>` declaration near the top; UTF-8 otherwise.
pub fn decode_html(body: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| {
            meta_charset(body)
                .and_then(|label| Encoding::for_label(label.as_bytes()))
                .map(Encoding::output_encoding)
        })
        .unwrap_or(UTF_8);

    let (text, used, malformed) = encoding.decode(body);
    if malformed {
        debug!(encoding = used.name(), "body has malformed sequences");
    }
    text.into_owned()
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
    })
}

/// Finds `charset=` inside a `<meta>` tag in the first bytes of the body.
/// Covers both `<meta charset=..>` and the `http-equiv` content form.
fn meta_charset(body: &[u8]) -> Option<String> {
    let head = &body[..body.len().min(META_PRESCAN_BYTES)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();

    head.match_indices("<meta").find_map(|(start, _)| {
        let tag = &head[start..];
        let tag = &tag[..tag.find('>').unwrap_or(tag.len())];
        let at = tag.find("charset=")? + "charset=".len();
        let label: String = tag[at..]
            .trim_start_matches(['"', '\''])
            .chars()
            .take_while(|c| !matches!(c, '"' | '\'' | ';' | '/' | '>') && !c.is_whitespace())
            .collect();
        (!label.is_empty()).then_some(label)
    })
}

// -------------------------
// Pager helpers (page=N scheme)
// -------------------------

/// Strips `param` from the query. Returns the bare URL and the page it named, if any.
pub fn normalize_pager(url: &Url, param: &str) -> (Url, Option<u32>) {
    let mut base = url.clone();
    let mut named_page = None;

    let mut qp: Vec<(String, String)> = vec![];
    for (k, v) in url.query_pairs() {
        if k == param {
            if let Ok(n) = v.parse::<u32>() {
                named_page = Some(n.max(1));
            }
        } else {
            qp.push((k.into_owned(), v.into_owned()));
        }
    }
    if qp.is_empty() {
        base.set_query(None);
    } else {
        base.query_pairs_mut()
            .clear()
            .extend_pairs(qp.iter().map(|(k, v)| (&**k, &**v)));
    }

    (base, named_page)
}

pub fn build_page_url(base: &Url, param: &str, page: u32) -> Url {
    let mut u = base.clone();
    u.query_pairs_mut().append_pair(param, &page.to_string());
    u
}

// -------------------------
// Misc helpers
// -------------------------

fn random_desktop_ua() -> &'static str {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
    ];
    UAS[rng().random_range(0..UAS.len())]
}

fn random_mobile_ua() -> &'static str {
    const UAS: &[&str] = &[
        "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Mobile Safari/537.36",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
    ];
    UAS[rng().random_range(0..UAS.len())]
}
