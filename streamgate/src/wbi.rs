//! WBI request signing for the upstream web API.
//!
//! Key material comes from the nav endpoint and stays cached inside the
//! signer until it goes stale; signing itself is a pure function over the
//! sorted, percent-encoded parameter list.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use selector_engine::{ParamSigner, SelectionError, browser_headers, hedged_get};

const NAV_URL: &str = "https://api.bilibili.com/x/web-interface/nav";

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

#[derive(Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Deserialize)]
struct NavData {
    wbi_img: WbiImg,
}

#[derive(Deserialize)]
struct NavResponse {
    data: NavData,
}

#[derive(Clone, Debug)]
struct WbiKeys {
    img_key: String,
    sub_key: String,
    fetched_at: Instant,
}

impl WbiKeys {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// Signs upstream queries with the WBI scheme. Keys are fetched lazily and
/// refreshed after `refresh_interval`.
pub struct WbiSigner {
    client: Client,
    nav_url: String,
    refresh_interval: Duration,
    hedge_count: usize,
    attempt_timeout: Duration,
    keys: Mutex<Option<WbiKeys>>,
}

impl WbiSigner {
    pub fn new(
        client: Client,
        refresh_interval: Duration,
        hedge_count: usize,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            nav_url: NAV_URL.to_string(),
            refresh_interval,
            hedge_count,
            attempt_timeout,
            keys: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_nav_url(mut self, nav_url: impl Into<String>) -> Self {
        self.nav_url = nav_url.into();
        self
    }

    /// Current key pair, refreshed when missing or stale. The lock is held
    /// across the refresh so concurrent callers share one fetch.
    async fn current_keys(&self, cookie: &str) -> Result<(String, String), SelectionError> {
        let mut cached = self.keys.lock().await;
        if let Some(keys) = cached.as_ref()
            && !keys.is_stale(self.refresh_interval)
        {
            return Ok((keys.img_key.clone(), keys.sub_key.clone()));
        }

        debug!("refreshing wbi keys");
        let headers = browser_headers(cookie)
            .map_err(|e| SelectionError::Signing(format!("cookie header: {e}")))?;
        let response = hedged_get(
            &self.client,
            &self.nav_url,
            &headers,
            self.hedge_count,
            self.attempt_timeout,
        )
        .await
        .map_err(|e| SelectionError::Signing(format!("nav fetch failed: {e}")))?;
        let nav: NavResponse = response
            .json()
            .await
            .map_err(|e| SelectionError::Signing(format!("nav response: {e}")))?;

        let img_key = take_filename(&nav.data.wbi_img.img_url)
            .ok_or_else(|| SelectionError::Signing("malformed wbi img_url".to_string()))?;
        let sub_key = take_filename(&nav.data.wbi_img.sub_url)
            .ok_or_else(|| SelectionError::Signing("malformed wbi sub_url".to_string()))?;
        info!("wbi keys refreshed");

        *cached = Some(WbiKeys {
            img_key: img_key.clone(),
            sub_key: sub_key.clone(),
            fetched_at: Instant::now(),
        });
        Ok((img_key, sub_key))
    }
}

#[async_trait]
impl ParamSigner for WbiSigner {
    async fn signed_query(
        &self,
        params: Vec<(&str, String)>,
        cookie: &str,
    ) -> Result<String, SelectionError> {
        let (img_key, sub_key) = self.current_keys(cookie).await?;
        let mixin = mixin_key((img_key + &sub_key).as_bytes())
            .ok_or_else(|| SelectionError::Signing("unexpected wbi key length".to_string()))?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| SelectionError::Signing("system time before unix epoch".to_string()))?
            .as_secs();
        Ok(sign_params(params, &mixin, timestamp))
    }
}

/// Shuffles the concatenated key pair through the fixed table and keeps the
/// first 32 characters. `None` when the input is shorter than the table
/// expects.
fn mixin_key(orig: &[u8]) -> Option<String> {
    MIXIN_KEY_ENC_TAB
        .iter()
        .take(32)
        .map(|&i| orig.get(i).map(|&b| b as char))
        .collect()
}

fn url_encoded(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            // Filtered outright, per the scheme.
            '!' | '\'' | '(' | ')' | '*' => {}
            _ => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    encoded
}

/// Builds the final query: `wts` appended, parameters sorted by key,
/// percent-encoded, and `w_rid = md5(query + mixin_key)` at the end.
fn sign_params(mut params: Vec<(&str, String)>, mixin_key: &str, timestamp: u64) -> String {
    params.push(("wts", timestamp.to_string()));
    params.sort_by(|a, b| a.0.cmp(b.0));
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", url_encoded(k), url_encoded(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(query.clone() + mixin_key);
    let signature = hasher.finalize();
    format!("{query}&w_rid={signature:x}")
}

fn take_filename(url: &str) -> Option<String> {
    url.rsplit_once('/')
        .and_then(|(_, s)| s.rsplit_once('.'))
        .map(|(s, _)| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    const IMG_KEY: &str = "7cd084941338484aae1ad9425b84077c";
    const SUB_KEY: &str = "4932caff0ff746eab6f01bf08b70ac45";

    #[test]
    fn filename_stem_is_extracted() {
        assert_eq!(
            take_filename("https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png"),
            Some("7cd084941338484aae1ad9425b84077c".to_string())
        );
        assert_eq!(take_filename("no-slash-or-dot"), None);
    }

    #[test]
    fn mixin_key_matches_documented_vector() {
        let concat = format!("{IMG_KEY}{SUB_KEY}");
        assert_eq!(
            mixin_key(concat.as_bytes()).as_deref(),
            Some("ea1db124af3c7062474693fa704f4ff8")
        );
        assert_eq!(mixin_key(b"short"), None);
    }

    #[test]
    fn encoding_filters_and_escapes() {
        assert_eq!(url_encoded("a b!c*"), "a%20bc");
        assert_eq!(url_encoded("safe-._~09Az"), "safe-._~09Az");
    }

    #[test]
    fn signed_query_matches_documented_vector() {
        let params = vec![
            ("foo", String::from("114")),
            ("bar", String::from("514")),
            ("zab", String::from("1919810")),
        ];
        let concat = format!("{IMG_KEY}{SUB_KEY}");
        let mixin = mixin_key(concat.as_bytes()).unwrap();
        assert_eq!(
            sign_params(params, &mixin, 1702204169),
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
        );
    }

    #[tokio::test]
    async fn keys_are_fetched_once_and_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/x/web-interface/nav",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "code": 0,
                        "data": {
                            "wbi_img": {
                                "img_url": format!("https://i0.hdslb.com/bfs/wbi/{IMG_KEY}.png"),
                                "sub_url": format!("https://i0.hdslb.com/bfs/wbi/{SUB_KEY}.png"),
                            }
                        }
                    }))
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let signer = WbiSigner::new(
            Client::new(),
            Duration::from_secs(3600),
            0,
            Duration::from_secs(2),
        )
        .with_nav_url(format!("http://{addr}/x/web-interface/nav"));

        let first = signer
            .signed_query(vec![("foo", "1".to_string())], "")
            .await
            .unwrap();
        let second = signer
            .signed_query(vec![("foo", "1".to_string())], "")
            .await
            .unwrap();

        assert!(first.contains("&w_rid="));
        assert!(second.contains("&w_rid="));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
