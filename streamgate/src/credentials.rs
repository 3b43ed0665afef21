//! Cookie resolution.
//!
//! Sources are tried in order: cached manager pool, manager batch refresh,
//! manager single fetch, the `BILI_COOKIE` environment variable, and the
//! fixed cookie from configuration. The first hit wins and carries a source
//! tag for logging.

use std::fmt;
use std::time::{Duration, Instant};

use rand::seq::IndexedRandom;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use selector_engine::hedged_get;

use crate::config::CookieManagerConfig;
use crate::error::{Error, Result};

const ENV_COOKIE: &str = "BILI_COOKIE";

/// Where a resolved cookie came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSource {
    ManagerPool,
    ManagerSingle,
    Environment,
    Fixed,
}

impl fmt::Display for CookieSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CookieSource::ManagerPool => "manager-pool",
            CookieSource::ManagerSingle => "manager-single",
            CookieSource::Environment => "env",
            CookieSource::Fixed => "fixed",
        })
    }
}

struct CookiePool {
    entries: Vec<String>,
    refreshed_at: Instant,
}

/// Resolves the Cookie header value for upstream requests.
pub struct CookieProvider {
    client: Client,
    manager: CookieManagerConfig,
    fixed_cookie: Option<String>,
    hedge_count: usize,
    attempt_timeout: Duration,
    pool: RwLock<Option<CookiePool>>,
}

impl CookieProvider {
    pub fn new(
        client: Client,
        manager: CookieManagerConfig,
        fixed_cookie: Option<String>,
        hedge_count: usize,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            manager,
            fixed_cookie,
            hedge_count,
            attempt_timeout,
            pool: RwLock::new(None),
        }
    }

    /// Walks the source chain and returns the first cookie found.
    pub async fn resolve(&self) -> Result<(String, CookieSource)> {
        if self.manager.enable {
            if let Some(cookie) = self.pick_cached().await {
                debug!("cookie served from cached pool");
                return Ok((cookie, CookieSource::ManagerPool));
            }

            match self.refresh_pool().await {
                Ok(Some(cookie)) => return Ok((cookie, CookieSource::ManagerPool)),
                Ok(None) => debug!("cookie pool refresh returned no usable entries"),
                Err(e) => warn!(error = %e, "cookie pool refresh failed"),
            }

            match self.fetch_single().await {
                Ok(cookie) => return Ok((cookie, CookieSource::ManagerSingle)),
                Err(e) => warn!(error = %e, "single cookie fetch failed, falling back"),
            }
        }

        if let Ok(cookie) = std::env::var(ENV_COOKIE)
            && !cookie.trim().is_empty()
        {
            info!("using BILI_COOKIE environment fallback");
            return Ok((cookie, CookieSource::Environment));
        }

        if let Some(cookie) = self.fixed_cookie.as_ref().filter(|c| !c.trim().is_empty()) {
            info!("using fixed cookie fallback");
            return Ok((cookie.clone(), CookieSource::Fixed));
        }

        Err(Error::MissingCredentials)
    }

    async fn pick_cached(&self) -> Option<String> {
        let ttl = Duration::from_millis(self.manager.cache_ttl_ms);
        let pool = self.pool.read().await;
        let pool = pool.as_ref()?;
        if pool.entries.is_empty() || pool.refreshed_at.elapsed() > ttl {
            return None;
        }
        pool.entries.choose(&mut rand::rng()).cloned()
    }

    /// Batch endpoint: every enabled, valid entry goes into the pool; one
    /// random entry is returned.
    async fn refresh_pool(&self) -> Result<Option<String>> {
        // Trailing slash matters: some deployments 307 without it.
        let url = format!(
            "{}/api/v1/cookies/",
            self.manager.api_url.trim_end_matches('/')
        );
        debug!(url = %url, "refreshing cookie pool");

        let response = hedged_get(
            &self.client,
            &url,
            &self.auth_headers()?,
            self.hedge_count,
            self.attempt_timeout,
        )
        .await
        .map_err(|e| Error::CookieManager(format!("batch fetch: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::CookieManager(format!("batch response: {e}")))?;
        let Some(items) = body.as_array() else {
            return Err(Error::CookieManager(
                "batch endpoint did not return an array".to_string(),
            ));
        };

        let entries: Vec<String> = items.iter().filter_map(managed_header_string).collect();
        info!(count = entries.len(), "cookie pool refreshed");

        let picked = entries.choose(&mut rand::rng()).cloned();
        *self.pool.write().await = Some(CookiePool {
            entries,
            refreshed_at: Instant::now(),
        });
        Ok(picked)
    }

    /// Single-cookie endpoint, tolerant of every response shape the manager
    /// family is known to produce.
    async fn fetch_single(&self) -> Result<String> {
        let url = format!(
            "{}{}",
            self.manager.api_url.trim_end_matches('/'),
            self.manager.path
        );
        debug!(url = %url, "falling back to single cookie fetch");

        let response = hedged_get(
            &self.client,
            &url,
            &self.auth_headers()?,
            self.hedge_count,
            self.attempt_timeout,
        )
        .await
        .map_err(|e| Error::CookieManager(format!("single fetch: {e}")))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::CookieManager(format!("single response: {e}")))?;

        // Some servers answer with a bare header string instead of JSON.
        let body = match serde_json::from_str::<Value>(&text) {
            Ok(value) => value,
            Err(_) => Value::String(text.trim().to_string()),
        };
        cookie_from_response(&body)
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.manager.token.as_ref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::CookieManager(format!("manager token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

fn managed_header_string(item: &Value) -> Option<String> {
    let managed = item.get("managed")?;
    if !managed
        .get("is_enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return None;
    }
    if managed.get("status").and_then(Value::as_str) != Some("valid") {
        return None;
    }
    managed
        .get("header_string")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Unifies the known single-cookie response shapes into one header string.
fn cookie_from_response(body: &Value) -> Result<String> {
    if let Value::String(s) = body {
        return Ok(s.clone());
    }
    if let Some(header) = body.get("header_string").and_then(Value::as_str)
        && body.get("DedeUserID").is_some_and(|v| !v.is_null())
    {
        return Ok(header.to_string());
    }
    if let Some(header) = body.pointer("/managed/header_string").and_then(Value::as_str) {
        return Ok(header.to_string());
    }
    if let Some(cookie) = body.get("cookie").and_then(Value::as_str) {
        return Ok(cookie.to_string());
    }
    if let Some(cookie) = body.pointer("/data/cookie").and_then(Value::as_str) {
        return Ok(cookie.to_string());
    }

    let pairs = body
        .get("cookies")
        .and_then(Value::as_array)
        .or_else(|| body.pointer("/cookie_info/cookies").and_then(Value::as_array));
    if let Some(pairs) = pairs {
        return Ok(pairs
            .iter()
            .filter_map(cookie_pair)
            .collect::<Vec<_>>()
            .join("; "));
    }

    Err(Error::CookieManager(
        "unrecognized cookie response shape".to_string(),
    ))
}

fn cookie_pair(item: &Value) -> Option<String> {
    let key = item
        .get("key")
        .and_then(Value::as_str)
        .or_else(|| item.get("name").and_then(Value::as_str))?;
    let value = match item.get("value")? {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    Some(format!("{key}={value}"))
}
