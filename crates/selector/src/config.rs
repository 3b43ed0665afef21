use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// Video codec tags the upstream API can report. Anything else is dropped
/// during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[serde(alias = "h264", alias = "264")]
    Avc,
    #[serde(alias = "h265", alias = "265")]
    Hevc,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Avc => "avc",
            Codec::Hevc => "hevc",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One quality tier to consider, in declaration order (earlier = preferred).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGroup {
    pub name: String,
    /// Upstream quality level (`qn` request parameter).
    pub qn: u32,
    /// Codec preference inside this tier. Empty falls back to avc-then-hevc.
    #[serde(default = "default_codec_order")]
    pub codec_order: Vec<Codec>,
    /// Pool candidates from every accepted codec and let CDN rank decide,
    /// instead of committing to one codec first.
    #[serde(default)]
    pub prefer_cdn_in_group: bool,
}

fn default_codec_order() -> Vec<Codec> {
    vec![Codec::Avc, Codec::Hevc]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Equivalent upstream API base addresses, queried concurrently.
    pub mirrors: Vec<String>,
    /// Extra parallel attempts per logical fetch. 0 disables hedging.
    pub hedge_count: usize,
    /// Per-attempt timeout in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Quality tiers, most preferred first.
    pub quality_groups: Vec<QualityGroup>,
    /// Ordered groups of URL patterns, most preferred group first.
    pub cdn_groups: Vec<Vec<String>>,
    /// Rank non-MCDN edges strictly ahead of MCDN edges.
    pub non_mcdn_first: bool,
    /// Rank CDN preference across quality tiers instead of committing to the
    /// best available tier.
    pub cross_group_prefer_cdn: bool,
    /// In cross-tier mode, fall back to the best-quality tier when no
    /// candidate matches any CDN pattern.
    pub prefer_quality_on_no_cdn_match: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            mirrors: vec!["https://api.live.bilibili.com".to_string()],
            hedge_count: 2,
            attempt_timeout_ms: 3000,
            quality_groups: vec![
                QualityGroup {
                    name: "qn25000".to_string(),
                    qn: 25000,
                    codec_order: default_codec_order(),
                    prefer_cdn_in_group: false,
                },
                QualityGroup {
                    name: "qn10000".to_string(),
                    qn: 10000,
                    codec_order: default_codec_order(),
                    prefer_cdn_in_group: false,
                },
            ],
            cdn_groups: vec![
                vec![
                    r"^https?://[^/]*cn-gotcha04\.bilivideo\.com".to_string(),
                    r"^https?://[^/]*cn-gotcha04b\.bilivideo\.com".to_string(),
                ],
                vec![
                    r"^https?://[^/]*cn-gotcha07\.bilivideo\.com".to_string(),
                    r"^https?://[^/]*cn-gotcha07b\.bilivideo\.com".to_string(),
                ],
                vec![
                    r"^https?://[^/]*cn-gotcha09\.bilivideo\.com".to_string(),
                    r"^https?://[^/]*cn-gotcha09b\.bilivideo\.com".to_string(),
                ],
                vec![r"^https?://[^/]*ov-gotcha05\.bilivideo\.com".to_string()],
            ],
            non_mcdn_first: true,
            cross_group_prefer_cdn: false,
            prefer_quality_on_no_cdn_match: true,
        }
    }
}

impl SelectionConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Quality level used for the first availability round.
    pub fn default_qn(&self) -> u32 {
        self.quality_groups.first().map(|g| g.qn).unwrap_or(10000)
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.mirrors.iter().all(|m| m.trim().is_empty()) {
            return Err(SelectionError::InvalidConfig(
                "at least one mirror is required".to_string(),
            ));
        }
        if self.quality_groups.is_empty() {
            return Err(SelectionError::InvalidConfig(
                "at least one quality group is required".to_string(),
            ));
        }
        if let Some(group) = self.quality_groups.iter().find(|g| g.qn == 0) {
            return Err(SelectionError::InvalidConfig(format!(
                "quality group `{}` has qn 0",
                group.name
            )));
        }
        Ok(())
    }
}

/// All configured CDN patterns, compiled once and flattened in preference
/// order. Each rule remembers which group it came from.
#[derive(Debug)]
pub struct CdnRuleSet {
    rules: Vec<CdnRule>,
}

#[derive(Debug)]
struct CdnRule {
    regex: Regex,
    group: usize,
    index_in_group: usize,
}

/// Where a URL matched inside the flattened pattern list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternHit {
    pub flat: usize,
    pub group: usize,
    pub in_group: usize,
}

impl CdnRuleSet {
    pub fn compile(groups: &[Vec<String>]) -> Result<Self, SelectionError> {
        let mut rules = Vec::new();
        for (group, patterns) in groups.iter().enumerate() {
            for (index_in_group, pattern) in patterns.iter().enumerate() {
                let regex =
                    Regex::new(pattern).map_err(|source| SelectionError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    })?;
                rules.push(CdnRule {
                    regex,
                    group,
                    index_in_group,
                });
            }
        }
        Ok(Self { rules })
    }

    /// First matching pattern wins; `None` when nothing matches.
    pub fn classify(&self, url: &str) -> Option<PatternHit> {
        self.rules.iter().enumerate().find_map(|(flat, rule)| {
            rule.regex.is_match(url).then_some(PatternHit {
                flat,
                group: rule.group,
                in_group: rule.index_in_group,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SelectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_qn(), 25000);
        assert_eq!(config.hedge_count, 2);
        assert!(config.non_mcdn_first);
        assert!(!config.cross_group_prefer_cdn);
    }

    #[test]
    fn codec_parses_aliases() {
        let avc: Codec = serde_json::from_str("\"h264\"").unwrap();
        let hevc: Codec = serde_json::from_str("\"h265\"").unwrap();
        assert_eq!(avc, Codec::Avc);
        assert_eq!(hevc, Codec::Hevc);
        assert!(serde_json::from_str::<Codec>("\"av1\"").is_err());
    }

    #[test]
    fn codec_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Codec::Hevc).unwrap(), "\"hevc\"");
    }

    #[test]
    fn ruleset_classifies_by_first_match() {
        let rules = CdnRuleSet::compile(&[
            vec!["alpha".to_string(), "beta".to_string()],
            vec!["gamma".to_string()],
        ])
        .unwrap();
        assert_eq!(rules.len(), 3);

        let hit = rules.classify("https://host/beta/path").unwrap();
        assert_eq!(hit.flat, 1);
        assert_eq!(hit.group, 0);
        assert_eq!(hit.in_group, 1);

        let hit = rules.classify("https://host/gamma").unwrap();
        assert_eq!(hit.flat, 2);
        assert_eq!(hit.group, 1);
        assert_eq!(hit.in_group, 0);

        assert!(rules.classify("https://host/delta").is_none());
    }

    #[test]
    fn ruleset_prefers_earlier_pattern_on_multiple_matches() {
        let rules = CdnRuleSet::compile(&[
            vec!["edge".to_string()],
            vec!["edge-b".to_string()],
        ])
        .unwrap();
        // Matches both patterns; the flattened order decides.
        let hit = rules.classify("https://edge-b.example.com/live").unwrap();
        assert_eq!(hit.flat, 0);
        assert_eq!(hit.group, 0);
    }

    #[test]
    fn ruleset_rejects_invalid_pattern() {
        let err = CdnRuleSet::compile(&[vec!["(".to_string()]]).unwrap_err();
        assert!(matches!(err, SelectionError::InvalidPattern { .. }));
    }

    #[test]
    fn validate_rejects_empty_mirrors_and_groups() {
        let config = SelectionConfig {
            mirrors: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SelectionConfig {
            quality_groups: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SelectionConfig {
            quality_groups: vec![QualityGroup {
                name: "bad".to_string(),
                qn: 0,
                codec_order: vec![],
                prefer_cdn_in_group: false,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_cdn_groups_match_gotcha_hosts() {
        let config = SelectionConfig::default();
        let rules = CdnRuleSet::compile(&config.cdn_groups).unwrap();
        let hit = rules
            .classify("https://d1--cn-gotcha07.bilivideo.com/live-bvc/1234.flv?sig=x")
            .unwrap();
        assert_eq!(hit.group, 1);
        assert_eq!(hit.in_group, 0);
        assert!(
            rules
                .classify("https://xy.mcdn.bilivideo.cn:486/live-bvc/1234.flv")
                .is_none()
        );
    }
}
