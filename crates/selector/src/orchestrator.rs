//! Two-round selection: qualify quality tiers across every mirror, narrow to
//! the tiers worth processing, and resolve one final URL.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::aggregate::QualityAvailability;
use crate::candidate::{Candidate, compare_candidates, enumerate_candidates};
use crate::config::{CdnRuleSet, Codec, QualityGroup, SelectionConfig};
use crate::error::SelectionError;
use crate::models::{CodecItem, MirrorReport};
use crate::signer::ParamSigner;
use crate::upstream::UpstreamClient;

/// The final answer: one URL plus why it won.
#[derive(Debug, Clone)]
pub struct Selection {
    pub url: String,
    pub codec: Codec,
    pub qn: u32,
    /// Name of the quality tier the URL came from.
    pub group: String,
    pub host: String,
    pub is_mcdn: bool,
    pub cdn_group_index: Option<usize>,
    pub pattern_index: Option<usize>,
}

/// One quality tier's winning candidate.
#[derive(Debug, Clone)]
struct GroupBest {
    group_index: usize,
    qn: u32,
    name: String,
    codec: Codec,
    candidate: Candidate,
}

pub struct SelectionEngine {
    config: Arc<SelectionConfig>,
    rules: CdnRuleSet,
    upstream: UpstreamClient,
}

impl SelectionEngine {
    /// Validates the configuration and compiles the CDN patterns once.
    pub fn new(
        client: Client,
        config: SelectionConfig,
        signer: Arc<dyn ParamSigner>,
    ) -> Result<Self, SelectionError> {
        config.validate()?;
        let rules = CdnRuleSet::compile(&config.cdn_groups)?;
        let upstream = UpstreamClient::new(
            client,
            signer,
            config.hedge_count,
            config.attempt_timeout(),
        );
        Ok(Self {
            config: Arc::new(config),
            rules,
            upstream,
        })
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Resolves the stream URL to use right now for `room_id`. `Ok(None)`
    /// means no usable candidate was found, a normal outcome.
    pub async fn select(
        &self,
        room_id: &str,
        cookie: &str,
    ) -> Result<Option<Selection>, SelectionError> {
        let config = &self.config;
        let default_qn = config.default_qn();
        info!(room_id = %room_id, default_qn, mirrors = config.mirrors.len(), "starting selection");

        // Qualifying round: every mirror at the default quality level.
        let round1 = self
            .query_round(&config.mirrors, room_id, default_qn, cookie)
            .await?;
        if round1.is_empty() {
            warn!(room_id = %room_id, "no mirror answered the qualifying round");
            return Ok(None);
        }

        let mut availability = QualityAvailability::default();
        for (_, report) in &round1 {
            availability.merge(report);
        }
        info!(
            avc = ?availability.set(Codec::Avc),
            hevc = ?availability.set(Codec::Hevc),
            "acceptable quality levels"
        );

        // Quality tiers with at least one codec available, declared order kept.
        let available_groups: Vec<(usize, &QualityGroup)> = config
            .quality_groups
            .iter()
            .enumerate()
            .filter(|(_, group)| availability.accepts_any(group.qn))
            .collect();
        if available_groups.is_empty() {
            warn!(room_id = %room_id, "no configured quality tier is available");
            return Ok(None);
        }

        // Narrowing: which tiers to process, and the reports per distinct
        // level. Levels other than the default need a second round, asked
        // only of the mirrors that answered the first.
        let groups_to_process: Vec<(usize, &QualityGroup)> = if config.cross_group_prefer_cdn {
            available_groups.clone()
        } else {
            vec![available_groups[0]]
        };

        let round1_mirrors: Vec<String> = round1.iter().map(|(m, _)| m.clone()).collect();
        let mut rounds: HashMap<u32, Vec<(String, MirrorReport)>> = HashMap::new();
        rounds.insert(default_qn, round1);
        for (_, group) in &groups_to_process {
            if rounds.contains_key(&group.qn) {
                continue;
            }
            let reports = self
                .query_round(&round1_mirrors, room_id, group.qn, cookie)
                .await?;
            rounds.insert(group.qn, reports);
        }

        // Resolving: per-tier candidate pools, ranked.
        let mut group_bests: Vec<GroupBest> = Vec::new();
        for (group_index, group) in &groups_to_process {
            let Some(reports) = rounds.get(&group.qn) else {
                continue;
            };
            let mut pool = self.build_pool(group, reports);
            debug!(group = %group.name, qn = group.qn, candidates = pool.len(), "tier pool built");
            if pool.is_empty() {
                continue;
            }
            pool.sort_by(|a, b| compare_candidates(&a.1, &b.1, config.non_mcdn_first));
            let (codec, candidate) = pool.remove(0);
            info!(
                group = %group.name,
                qn = group.qn,
                codec = %codec,
                host = %candidate.host,
                is_mcdn = candidate.is_mcdn,
                "tier best candidate"
            );
            group_bests.push(GroupBest {
                group_index: *group_index,
                qn: group.qn,
                name: group.name.clone(),
                codec,
                candidate,
            });
        }
        if group_bests.is_empty() {
            warn!(room_id = %room_id, "no tier produced a candidate");
            return Ok(None);
        }

        let Some(finalist) = self.resolve(&group_bests, &groups_to_process, &available_groups)
        else {
            return Ok(None);
        };

        let mode = if config.cross_group_prefer_cdn {
            "cdn-first"
        } else {
            "quality-first"
        };
        let selection = Selection {
            url: finalist.candidate.url,
            codec: finalist.codec,
            qn: finalist.qn,
            group: finalist.name,
            host: finalist.candidate.host,
            is_mcdn: finalist.candidate.is_mcdn,
            cdn_group_index: finalist.candidate.cdn_group_index,
            pattern_index: finalist.candidate.pattern_index_flat,
        };
        info!(
            room_id = %room_id,
            mode,
            group = %selection.group,
            qn = selection.qn,
            codec = %selection.codec,
            host = %selection.host,
            is_mcdn = selection.is_mcdn,
            "selected stream url"
        );
        Ok(Some(selection))
    }

    /// Queries `mirrors` concurrently at one quality level; failures are
    /// logged and dropped, except signing/credential problems, which would
    /// fail every mirror the same way.
    async fn query_round(
        &self,
        mirrors: &[String],
        room_id: &str,
        qn: u32,
        cookie: &str,
    ) -> Result<Vec<(String, MirrorReport)>, SelectionError> {
        let queries = mirrors.iter().map(|mirror| async move {
            let result = self
                .upstream
                .room_play_info(mirror, room_id, qn, cookie)
                .await;
            (mirror.clone(), result)
        });

        let mut ok = Vec::new();
        for (mirror, result) in join_all(queries).await {
            match result {
                Ok(report) => ok.push((mirror, report)),
                Err(e @ (SelectionError::Signing(_) | SelectionError::InvalidCredential(_))) => {
                    return Err(e);
                }
                Err(e) => warn!(mirror = %mirror, qn, error = %e, "mirror query failed"),
            }
        }
        Ok(ok)
    }

    /// One tier's deduplicated candidate pool, reports in mirror order.
    fn build_pool(
        &self,
        group: &QualityGroup,
        reports: &[(String, MirrorReport)],
    ) -> Vec<(Codec, Candidate)> {
        let mut pool: Vec<(Codec, Candidate)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (_, report) in reports {
            if group.prefer_cdn_in_group {
                // Pool every codec that accepts this level; CDN rank decides.
                for codec in [Codec::Avc, Codec::Hevc] {
                    if let Some(item) = report.codec(codec)
                        && item.accepts(group.qn)
                    {
                        self.extend_pool(&mut pool, &mut seen, codec, item);
                    }
                }
            } else if let Some((codec, item)) = choose_codec(group, report) {
                self.extend_pool(&mut pool, &mut seen, codec, item);
            }
        }
        pool
    }

    fn extend_pool(
        &self,
        pool: &mut Vec<(Codec, Candidate)>,
        seen: &mut HashSet<String>,
        codec: Codec,
        item: &CodecItem,
    ) {
        for candidate in enumerate_candidates(item, &self.rules) {
            if seen.insert(candidate.url.clone()) {
                pool.push((codec, candidate));
            }
        }
    }

    fn resolve(
        &self,
        group_bests: &[GroupBest],
        groups_to_process: &[(usize, &QualityGroup)],
        available_groups: &[(usize, &QualityGroup)],
    ) -> Option<GroupBest> {
        if !self.config.cross_group_prefer_cdn {
            // Quality-first: the first processed tier wins outright.
            let first_index = groups_to_process.first()?.0;
            return group_bests
                .iter()
                .find(|best| best.group_index == first_index)
                .or_else(|| group_bests.first())
                .cloned();
        }

        let any_cdn_hit = group_bests.iter().any(|best| best.candidate.matches_pattern);
        if !any_cdn_hit && self.config.prefer_quality_on_no_cdn_match {
            debug!("no candidate matched a CDN pattern; using best quality tier");
            let first_index = available_groups.first()?.0;
            return group_bests
                .iter()
                .find(|best| best.group_index == first_index)
                .or_else(|| group_bests.first())
                .cloned();
        }

        let mut ranked: Vec<&GroupBest> = group_bests.iter().collect();
        ranked.sort_by(|a, b| {
            compare_candidates(&a.candidate, &b.candidate, self.config.non_mcdn_first)
        });
        ranked.first().map(|best| (*best).clone())
    }
}

/// Codec to commit to for one tier on one mirror's report: first declared
/// codec the report accepts at this level, then avc, then hevc.
fn choose_codec<'a>(
    group: &QualityGroup,
    report: &'a MirrorReport,
) -> Option<(Codec, &'a CodecItem)> {
    let accepted =
        |codec: Codec| report.codec(codec).filter(|item| item.accepts(group.qn));

    for codec in &group.codec_order {
        if let Some(item) = accepted(*codec) {
            return Some((*codec, item));
        }
    }
    for codec in [Codec::Avc, Codec::Hevc] {
        if let Some(item) = accepted(codec) {
            return Some((codec, item));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UrlInfo;
    use async_trait::async_trait;

    struct NoopSigner;

    #[async_trait]
    impl ParamSigner for NoopSigner {
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

    fn test_engine() -> SelectionEngine {
        SelectionEngine::new(
            Client::new(),
            SelectionConfig::default(),
            Arc::new(NoopSigner),
        )
        .unwrap()
    }

    fn group(qn: u32, codec_order: Vec<Codec>) -> QualityGroup {
        QualityGroup {
            name: format!("qn{qn}"),
            qn,
            codec_order,
            prefer_cdn_in_group: false,
        }
    }

    fn codec_item(codec: Codec, accept_qn: Vec<u32>) -> CodecItem {
        CodecItem {
            codec,
            accept_qn,
            base_url: "/live.flv".to_string(),
            url_info: vec![UrlInfo {
                host: "https://edge.example.com".to_string(),
                extra: String::new(),
            }],
        }
    }

    #[test]
    fn choose_codec_walks_declared_order() {
        let report = MirrorReport {
            avc: Some(codec_item(Codec::Avc, vec![10000])),
            hevc: Some(codec_item(Codec::Hevc, vec![10000])),
        };
        let (codec, _) = choose_codec(&group(10000, vec![Codec::Hevc, Codec::Avc]), &report)
            .unwrap();
        assert_eq!(codec, Codec::Hevc);

        let (codec, _) = choose_codec(&group(10000, vec![Codec::Avc, Codec::Hevc]), &report)
            .unwrap();
        assert_eq!(codec, Codec::Avc);
    }

    #[test]
    fn choose_codec_skips_codecs_that_reject_the_level() {
        let report = MirrorReport {
            avc: Some(codec_item(Codec::Avc, vec![150])),
            hevc: Some(codec_item(Codec::Hevc, vec![10000])),
        };
        let (codec, _) = choose_codec(&group(10000, vec![Codec::Avc, Codec::Hevc]), &report)
            .unwrap();
        assert_eq!(codec, Codec::Hevc);
    }

    #[test]
    fn choose_codec_falls_back_when_order_is_empty() {
        let report = MirrorReport {
            avc: None,
            hevc: Some(codec_item(Codec::Hevc, vec![10000])),
        };
        let (codec, _) = choose_codec(&group(10000, vec![]), &report).unwrap();
        assert_eq!(codec, Codec::Hevc);

        let empty = MirrorReport::default();
        assert!(choose_codec(&group(10000, vec![]), &empty).is_none());
    }

    #[test]
    fn pool_keeps_first_occurrence_of_duplicate_urls() {
        let engine = test_engine();
        let shared = UrlInfo {
            host: "https://e1.example.com".to_string(),
            extra: String::new(),
        };
        let first = MirrorReport {
            avc: Some(CodecItem {
                codec: Codec::Avc,
                accept_qn: vec![10000],
                base_url: "/live.flv".to_string(),
                url_info: vec![
                    shared.clone(),
                    UrlInfo {
                        host: "https://e2.example.com".to_string(),
                        extra: String::new(),
                    },
                ],
            }),
            hevc: None,
        };
        let second = MirrorReport {
            avc: Some(CodecItem {
                codec: Codec::Avc,
                accept_qn: vec![10000],
                base_url: "/live.flv".to_string(),
                url_info: vec![shared],
            }),
            hevc: None,
        };

        let reports = vec![
            ("m1".to_string(), first),
            ("m2".to_string(), second),
        ];
        let pool = engine.build_pool(&group(10000, vec![Codec::Avc]), &reports);
        let urls: Vec<_> = pool.iter().map(|(_, c)| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://e1.example.com/live.flv",
                "https://e2.example.com/live.flv"
            ]
        );
    }
}
