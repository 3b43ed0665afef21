//! Wire shapes of the room play-info payload, plus the normalized per-codec
//! form the selection pipeline works with.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::Codec;

#[derive(Debug, Deserialize)]
pub struct RoomPlayInfo {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<PlayData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlayData {
    #[serde(default)]
    pub playurl_info: Option<PlayUrlInfo>,
    /// Legacy payload location, still served by some mirrors.
    #[serde(default)]
    pub playurl: Option<PlayUrl>,
    #[serde(default)]
    pub room_info: Option<RoomInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoomInfo {
    #[serde(default)]
    pub live_status: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlayUrlInfo {
    #[serde(default)]
    pub playurl: Option<PlayUrl>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlayUrl {
    #[serde(default)]
    pub stream: Vec<StreamEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamEntry {
    #[serde(default)]
    pub protocol_name: String,
    /// Some mirrors serve a single format object instead of an array.
    #[serde(default, deserialize_with = "one_or_many")]
    pub format: Vec<FormatEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatEntry {
    #[serde(default, alias = "name")]
    pub format_name: String,
    #[serde(default)]
    pub codec: Vec<CodecEntry>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CodecEntry {
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub codec_id: Option<i64>,
    #[serde(default)]
    pub current_qn: Option<i64>,
    #[serde(default, deserialize_with = "lenient_qn_list")]
    pub accept_qn: Vec<u32>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub url_info: Vec<UrlInfo>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct UrlInfo {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub extra: String,
}

impl RoomPlayInfo {
    /// Stream entries, preferring the current payload location over the
    /// legacy one.
    pub fn streams(&self) -> &[StreamEntry] {
        if let Some(data) = &self.data {
            if let Some(info) = &data.playurl_info
                && let Some(playurl) = &info.playurl
                && !playurl.stream.is_empty()
            {
                return &playurl.stream;
            }
            if let Some(playurl) = &data.playurl {
                return &playurl.stream;
            }
        }
        &[]
    }

    pub fn live_status(&self) -> Option<i64> {
        self.data
            .as_ref()
            .and_then(|d| d.room_info.as_ref())
            .and_then(|r| r.live_status)
    }
}

impl CodecEntry {
    /// Codec tag of this entry. The reported name wins over the numeric id;
    /// a name outside the known set disqualifies the entry.
    pub fn tag(&self) -> Option<Codec> {
        if let Some(name) = self.codec_name.as_deref() {
            return match name.to_ascii_lowercase().as_str() {
                "avc" => Some(Codec::Avc),
                "hevc" => Some(Codec::Hevc),
                _ => None,
            };
        }
        match self.codec_id {
            Some(7) => Some(Codec::Avc),
            Some(12) => Some(Codec::Hevc),
            _ => None,
        }
    }
}

/// One codec's normalized offering from a single mirror at one quality level.
#[derive(Debug, Clone)]
pub struct CodecItem {
    pub codec: Codec,
    pub accept_qn: Vec<u32>,
    pub base_url: String,
    pub url_info: Vec<UrlInfo>,
}

impl CodecItem {
    pub fn accepts(&self, qn: u32) -> bool {
        self.accept_qn.contains(&qn)
    }
}

/// One mirror's answer at one quality level.
#[derive(Debug, Default, Clone)]
pub struct MirrorReport {
    pub avc: Option<CodecItem>,
    pub hevc: Option<CodecItem>,
}

impl MirrorReport {
    pub fn codec(&self, codec: Codec) -> Option<&CodecItem> {
        match codec {
            Codec::Avc => self.avc.as_ref(),
            Codec::Hevc => self.hevc.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.avc.is_none() && self.hevc.is_none()
    }
}

/// Some mirrors sit behind a load balancer that wraps the payload as
/// `{"lb": ..., "raw": "<json>"}`. Unwrap the inner document when present;
/// a broken inner body falls back to the outer document.
pub fn unwrap_lb_envelope(value: Value) -> Value {
    if value.get("lb").is_some()
        && let Some(raw) = value.get("raw").and_then(Value::as_str)
    {
        match serde_json::from_str(raw) {
            Ok(inner) => return inner,
            Err(e) => {
                tracing::warn!(error = %e, "load-balancer envelope carried unparseable raw body");
            }
        }
    }
    value
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
        Null,
    }

    Ok(match OneOrMany::<T>::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
        OneOrMany::Null => Vec::new(),
    })
}

/// Quality levels may arrive as numbers or numeric strings; keep the positive
/// integers and drop the rest.
fn lenient_qn_list<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items.iter().filter_map(qn_value).collect())
}

fn qn_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0),
        Value::String(s) => s.trim().parse::<u32>().ok().filter(|n| *n > 0),
        _ => None,
    }
}
