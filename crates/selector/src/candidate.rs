//! Concrete URL candidates from one codec offering, and the total order that
//! ranks them against the CDN preference policy.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::CdnRuleSet;
use crate::models::CodecItem;

/// Hosts carrying `mcdn` as a DNS label are multicast-CDN edges.
static MCDN_HOST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(?:^|\.)mcdn\.").unwrap());

/// One playable URL with its CDN classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub host: String,
    pub is_mcdn: bool,
    pub matches_pattern: bool,
    pub cdn_group_index: Option<usize>,
    pub pattern_index_flat: Option<usize>,
    pub pattern_index_in_group: Option<usize>,
}

/// Expands a codec offering into candidates, one per edge host, preserving
/// the offering's declared host order.
pub fn enumerate_candidates(item: &CodecItem, rules: &CdnRuleSet) -> Vec<Candidate> {
    item.url_info
        .iter()
        .map(|info| {
            let url = format!(
                "{}{}",
                info.host,
                join_base_and_extra(&item.base_url, &info.extra)
            );
            classify(url, info.host.clone(), rules)
        })
        .collect()
}

fn classify(url: String, host: String, rules: &CdnRuleSet) -> Candidate {
    let hit = rules.classify(&url);
    Candidate {
        is_mcdn: MCDN_HOST.is_match(&host),
        matches_pattern: hit.is_some(),
        cdn_group_index: hit.map(|h| h.group),
        pattern_index_flat: hit.map(|h| h.flat),
        pattern_index_in_group: hit.map(|h| h.in_group),
        url,
        host,
    }
}

/// Joins the path-with-query base with the per-host extra query fragment.
fn join_base_and_extra(base: &str, extra: &str) -> String {
    let extra = extra.strip_prefix('?').unwrap_or(extra);
    if extra.is_empty() {
        return base.to_string();
    }
    if base.ends_with('?') {
        format!("{base}{extra}")
    } else if base.contains('?') {
        format!("{base}&{extra}")
    } else {
        format!("{base}?{extra}")
    }
}

/// Total order over candidates, best first:
/// 1. non-MCDN before MCDN (only when `non_mcdn_first` is set)
/// 2. matching any pattern before matching none
/// 3. earlier CDN group
/// 4. earlier flattened pattern
/// 5. earlier pattern within its group
/// 6. equal; a stable sort keeps encounter order
pub fn compare_candidates(a: &Candidate, b: &Candidate, non_mcdn_first: bool) -> Ordering {
    if non_mcdn_first && a.is_mcdn != b.is_mcdn {
        return if a.is_mcdn {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if a.matches_pattern != b.matches_pattern {
        return if a.matches_pattern {
            Ordering::Less
        } else {
            Ordering::Greater
        };
    }
    rank_index(a).cmp(&rank_index(b))
}

fn rank_index(c: &Candidate) -> (usize, usize, usize) {
    (
        c.cdn_group_index.unwrap_or(usize::MAX),
        c.pattern_index_flat.unwrap_or(usize::MAX),
        c.pattern_index_in_group.unwrap_or(usize::MAX),
    )
}

/// Stable in-place sort, best candidate first.
pub fn sort_candidates(candidates: &mut [Candidate], non_mcdn_first: bool) {
    candidates.sort_by(|a, b| compare_candidates(a, b, non_mcdn_first));
}
