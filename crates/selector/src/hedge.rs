//! Hedged GET: race `hedge_count + 1` identical attempts against one URL,
//! first HTTP-success wins and the losers are cooperatively cancelled.

use std::time::Duration;

use reqwest::{Client, Response, header::HeaderMap};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SelectionError;

enum AttemptOutcome {
    Completed {
        index: usize,
        result: Result<Response, reqwest::Error>,
    },
    Cancelled,
}

/// Issues `hedge_count + 1` concurrent identical attempts and returns the
/// first response with a success status. Cancellation of the losers may race
/// with their completion; their results are suppressed either way. When every
/// attempt fails, one representative failure is returned.
pub async fn hedged_get(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    hedge_count: usize,
    attempt_timeout: Duration,
) -> Result<Response, SelectionError> {
    let attempts = hedge_count + 1;
    let endpoint = short_endpoint(url);

    if attempts == 1 {
        debug!(endpoint = %endpoint, "GET");
    } else {
        debug!(endpoint = %endpoint, parallel = attempts, "GET (hedged)");
    }

    let cancel = CancellationToken::new();
    let mut tasks: JoinSet<AttemptOutcome> = JoinSet::new();
    for index in 0..attempts {
        let request = client
            .get(url)
            .headers(headers.clone())
            .timeout(attempt_timeout);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => AttemptOutcome::Cancelled,
                result = request.send() => AttemptOutcome::Completed { index, result },
            }
        });
    }

    let mut last_failure: Option<String> = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                last_failure = Some(format!("attempt task failed: {e}"));
                continue;
            }
        };
        let (index, result) = match outcome {
            AttemptOutcome::Completed { index, result } => (index, result),
            AttemptOutcome::Cancelled => continue,
        };
        match result.and_then(|r| r.error_for_status()) {
            Ok(response) => {
                cancel.cancel();
                if attempts > 1 {
                    info!(
                        endpoint = %endpoint,
                        attempt = index + 1,
                        parallel = attempts,
                        "hedged request won"
                    );
                }
                return Ok(response);
            }
            Err(e) => {
                let detail = failure_detail(&e);
                debug!(endpoint = %endpoint, attempt = index + 1, detail = %detail, "attempt failed");
                last_failure = Some(detail);
            }
        }
    }

    let detail = last_failure.unwrap_or_else(|| "no attempt completed".to_string());
    warn!(endpoint = %endpoint, parallel = attempts, detail = %detail, "all attempts failed");
    Err(SelectionError::AllAttemptsFailed { attempts, detail })
}

fn failure_detail(error: &reqwest::Error) -> String {
    match error.status() {
        Some(status) => format!("status={}", status.as_u16()),
        None if error.is_timeout() => "timeout".to_string(),
        None => error.to_string(),
    }
}

/// host+path form for logs; query strings carry signatures and stay out.
fn short_endpoint(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => url.to_string(),
    }
}
