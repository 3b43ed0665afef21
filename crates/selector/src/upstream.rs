//! Signed room play-info queries against a single mirror, normalized into
//! per-codec reports.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT,
};
use serde_json::Value;
use tracing::debug;

use crate::config::Codec;
use crate::error::SelectionError;
use crate::hedge::hedged_get;
use crate::models::{CodecItem, MirrorReport, RoomPlayInfo, StreamEntry, unwrap_lb_envelope};
use crate::signer::ParamSigner;

const PLAY_INFO_PATH: &str = "/xlive/web-room/v2/index/getRoomPlayInfo";

const LIVE_ORIGIN: &str = "https://live.bilibili.com";

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36 Edg/132.0.0.0";

/// Issues play-info queries through the hedged fetcher. One instance is
/// shared across mirrors; the mirror base address is a per-call argument.
pub struct UpstreamClient {
    client: Client,
    signer: Arc<dyn ParamSigner>,
    hedge_count: usize,
    attempt_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(
        client: Client,
        signer: Arc<dyn ParamSigner>,
        hedge_count: usize,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            client,
            signer,
            hedge_count,
            attempt_timeout,
        }
    }

    /// One mirror's answer at one quality level.
    pub async fn room_play_info(
        &self,
        mirror: &str,
        room_id: &str,
        qn: u32,
        cookie: &str,
    ) -> Result<MirrorReport, SelectionError> {
        let params = vec![
            ("room_id", room_id.to_string()),
            ("no_playurl", "0".to_string()),
            ("mask", "1".to_string()),
            ("platform", "web".to_string()),
            ("protocol", "0,1".to_string()),
            ("format", "0,1,2".to_string()),
            ("codec", "0,1,2".to_string()),
            ("hdr_type", "0,1".to_string()),
            ("qn", qn.to_string()),
            ("dolby", "5".to_string()),
            ("panorama", "1".to_string()),
            ("web_location", "444.8".to_string()),
        ];
        let query = self.signer.signed_query(params, cookie).await?;
        let url = format!(
            "{}{}?{}",
            mirror.trim_end_matches('/'),
            PLAY_INFO_PATH,
            query
        );
        let headers = browser_headers(cookie)?;

        let response = hedged_get(
            &self.client,
            &url,
            &headers,
            self.hedge_count,
            self.attempt_timeout,
        )
        .await?;

        let body: Value = response.json().await?;
        let body = unwrap_lb_envelope(body);
        let info: RoomPlayInfo = serde_json::from_value(body)
            .map_err(|e| SelectionError::MalformedPayload(e.to_string()))?;

        if info.code != 0 {
            return Err(SelectionError::UpstreamCode {
                code: info.code,
                message: info.message,
            });
        }
        if let Some(status) = info.live_status() {
            debug!(mirror = %mirror, live_status = status, "room status");
        }

        let streams = info.streams();
        Ok(MirrorReport {
            avc: pick_codec(streams, Codec::Avc),
            hevc: pick_codec(streams, Codec::Hevc),
        })
    }
}

/// Browser-shaped headers the upstream expects, plus the resolved cookie.
pub fn browser_headers(cookie: &str) -> Result<HeaderMap, SelectionError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9"));
    headers.insert(ORIGIN, HeaderValue::from_static(LIVE_ORIGIN));
    headers.insert(
        REFERER,
        HeaderValue::from_static("https://live.bilibili.com/"),
    );
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
    if !cookie.is_empty() {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| SelectionError::InvalidCredential(e.to_string()))?;
        headers.insert(COOKIE, value);
    }
    Ok(headers)
}

/// Picks the offering to use for one codec when several (protocol, format)
/// entries carry it: FLV-flavored entries first, then the widest accept list.
fn pick_codec(streams: &[StreamEntry], codec: Codec) -> Option<CodecItem> {
    let mut offerings = Vec::new();
    for stream in streams {
        for format in &stream.format {
            for entry in &format.codec {
                if entry.tag() == Some(codec) {
                    offerings.push((flv_flavored(&format.format_name, &entry.base_url), entry));
                }
            }
        }
    }
    offerings.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.accept_qn.len().cmp(&a.1.accept_qn.len()))
    });
    let (_, entry) = offerings.first()?;
    Some(CodecItem {
        codec,
        accept_qn: entry.accept_qn.clone(),
        base_url: entry.base_url.clone(),
        url_info: entry.url_info.clone(),
    })
}

fn flv_flavored(format_name: &str, base_url: &str) -> bool {
    format_name.to_ascii_lowercase().contains("flv")
        || base_url.to_ascii_lowercase().contains("flv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{Json, Router, routing::get};
    use serde_json::json;
    use tokio::net::TcpListener;

    struct PlainSigner;

    #[async_trait]
    impl ParamSigner for PlainSigner {
        async fn signed_query(
            &self,
            params: Vec<(&str, String)>,
            _cookie: &str,
        ) -> Result<String, SelectionError> {
            Ok(params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&"))
        }
    }

    fn codec_json(name: &str, accept: &[u32], base_url: &str) -> Value {
        json!({
            "codec_name": name,
            "current_qn": 10000,
            "accept_qn": accept,
            "base_url": base_url,
            "url_info": [{ "host": "https://edge.example.com", "extra": "sig=1" }]
        })
    }

    async fn spawn_mirror(payload: Value) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            PLAY_INFO_PATH,
            get(move || {
                let payload = payload.clone();
                async move { Json(payload) }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client() -> UpstreamClient {
        UpstreamClient::new(
            Client::new(),
            Arc::new(PlainSigner),
            0,
            Duration::from_secs(2),
        )
    }

    #[test]
    fn picks_flv_over_wider_ts_offering() {
        let streams: Vec<StreamEntry> = serde_json::from_value(json!([
            {
                "protocol_name": "http_hls",
                "format": [{
                    "format_name": "ts",
                    "codec": [codec_json("avc", &[10000, 400, 250, 150], "/live.m3u8")]
                }]
            },
            {
                "protocol_name": "http_stream",
                "format": [{
                    "format_name": "flv",
                    "codec": [codec_json("avc", &[10000], "/live.flv")]
                }]
            }
        ]))
        .unwrap();

        let item = pick_codec(&streams, Codec::Avc).unwrap();
        assert_eq!(item.base_url, "/live.flv");
    }

    #[test]
    fn falls_back_to_widest_accept_list() {
        let streams: Vec<StreamEntry> = serde_json::from_value(json!([
            {
                "protocol_name": "http_hls",
                "format": [
                    { "format_name": "ts", "codec": [codec_json("hevc", &[10000], "/a.m3u8")] },
                    { "format_name": "fmp4", "codec": [codec_json("hevc", &[10000, 150], "/b.m3u8")] }
                ]
            }
        ]))
        .unwrap();

        let item = pick_codec(&streams, Codec::Hevc).unwrap();
        assert_eq!(item.base_url, "/b.m3u8");
        assert!(pick_codec(&streams, Codec::Avc).is_none());
    }

    #[tokio::test]
    async fn surfaces_upstream_business_code() {
        let mirror = spawn_mirror(json!({ "code": 19002003, "message": "room does not exist" })).await;

        let err = client()
            .room_play_info(&mirror, "42", 10000, "")
            .await
            .unwrap_err();
        match err {
            SelectionError::UpstreamCode { code, message } => {
                assert_eq!(code, 19002003);
                assert_eq!(message, "room does not exist");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unwraps_envelope_and_normalizes_codecs() {
        let inner = json!({
            "code": 0,
            "message": "0",
            "data": {
                "playurl_info": {
                    "playurl": {
                        "stream": [{
                            "protocol_name": "http_stream",
                            "format": [{
                                "format_name": "flv",
                                "codec": [
                                    codec_json("avc", &[10000, 150], "/live.flv"),
                                    codec_json("hevc", &[10000], "/live-h.flv")
                                ]
                            }]
                        }]
                    }
                }
            }
        });
        let mirror = spawn_mirror(json!({
            "lb": { "node": "edge-1" },
            "raw": serde_json::to_string(&inner).unwrap(),
        }))
        .await;

        let report = client()
            .room_play_info(&mirror, "42", 10000, "buvid3=x")
            .await
            .unwrap();
        assert_eq!(report.avc.as_ref().unwrap().accept_qn, vec![10000, 150]);
        assert_eq!(report.hevc.as_ref().unwrap().base_url, "/live-h.flv");
    }
}
