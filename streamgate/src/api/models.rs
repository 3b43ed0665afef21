//! Wire types of the service API.

use serde::Serialize;

use selector_engine::Selection;

/// Response envelope for `/api/stream-url`. Absent sections are omitted
/// entirely; absent meta indexes serialize as null.
#[derive(Debug, Serialize)]
pub struct StreamUrlReply {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<SelectionMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Why the returned URL won.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionMeta {
    pub codec: String,
    pub qn: u32,
    pub host: String,
    pub is_mcdn: bool,
    pub cdn_group_index: Option<usize>,
    pub pattern_index: Option<usize>,
}

impl StreamUrlReply {
    pub fn ok(selection: Selection) -> Self {
        Self {
            code: 0,
            url: Some(selection.url),
            meta: Some(SelectionMeta {
                codec: selection.codec.to_string(),
                qn: selection.qn,
                host: selection.host,
                is_mcdn: selection.is_mcdn,
                cdn_group_index: selection.cdn_group_index,
                pattern_index: selection.pattern_index,
            }),
            message: None,
            detail: None,
        }
    }

    pub fn no_candidate() -> Self {
        Self::plain(2, "no available stream url")
    }

    pub fn unauthorized() -> Self {
        Self::plain(401, "unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::plain(400, message)
    }

    pub fn failure(error: &crate::error::Error) -> Self {
        Self {
            code: 500,
            url: None,
            meta: None,
            message: Some(error.to_string()),
            detail: std::error::Error::source(error).map(|source| source.to_string()),
        }
    }

    fn plain(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            url: None,
            meta: None,
            message: Some(message.into()),
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selector_engine::Codec;
    use serde_json::{Value, json};

    #[test]
    fn success_reply_uses_camel_case_meta_keys() {
        let reply = StreamUrlReply::ok(Selection {
            url: "https://edge.example.com/live.flv?sig=x".to_string(),
            codec: Codec::Hevc,
            qn: 25000,
            group: "qn25000".to_string(),
            host: "https://edge.example.com".to_string(),
            is_mcdn: false,
            cdn_group_index: Some(1),
            pattern_index: Some(3),
        });
        let value: Value = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            value,
            json!({
                "code": 0,
                "url": "https://edge.example.com/live.flv?sig=x",
                "meta": {
                    "codec": "hevc",
                    "qn": 25000,
                    "host": "https://edge.example.com",
                    "isMcdn": false,
                    "cdnGroupIndex": 1,
                    "patternIndex": 3,
                }
            })
        );
    }

    #[test]
    fn unmatched_candidate_serializes_null_indexes() {
        let reply = StreamUrlReply::ok(Selection {
            url: "https://plain.example.com/live.flv".to_string(),
            codec: Codec::Avc,
            qn: 10000,
            group: "qn10000".to_string(),
            host: "https://plain.example.com".to_string(),
            is_mcdn: true,
            cdn_group_index: None,
            pattern_index: None,
        });
        let value: Value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["meta"]["cdnGroupIndex"], Value::Null);
        assert_eq!(value["meta"]["patternIndex"], Value::Null);
        assert_eq!(value["meta"]["isMcdn"], json!(true));
    }

    #[test]
    fn plain_replies_omit_url_and_meta() {
        let value: Value = serde_json::to_value(StreamUrlReply::no_candidate()).unwrap();
        assert_eq!(value, json!({ "code": 2, "message": "no available stream url" }));

        let value: Value = serde_json::to_value(StreamUrlReply::unauthorized()).unwrap();
        assert_eq!(value, json!({ "code": 401, "message": "unauthorized" }));
    }
}
