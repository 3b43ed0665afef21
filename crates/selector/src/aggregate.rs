//! Union of accepted quality levels per codec across mirror reports.

use std::collections::BTreeSet;

use crate::config::Codec;
use crate::models::MirrorReport;

/// What quality levels the mirrors, taken together, claim to offer per codec.
#[derive(Debug, Default)]
pub struct QualityAvailability {
    avc: BTreeSet<u32>,
    hevc: BTreeSet<u32>,
}

impl QualityAvailability {
    pub fn merge(&mut self, report: &MirrorReport) {
        if let Some(item) = &report.avc {
            self.avc.extend(item.accept_qn.iter().copied());
        }
        if let Some(item) = &report.hevc {
            self.hevc.extend(item.accept_qn.iter().copied());
        }
    }

    pub fn accepts(&self, codec: Codec, qn: u32) -> bool {
        self.set(codec).contains(&qn)
    }

    /// At least one codec offers this quality level.
    pub fn accepts_any(&self, qn: u32) -> bool {
        self.avc.contains(&qn) || self.hevc.contains(&qn)
    }

    pub fn is_empty(&self) -> bool {
        self.avc.is_empty() && self.hevc.is_empty()
    }

    pub fn set(&self, codec: Codec) -> &BTreeSet<u32> {
        match codec {
            Codec::Avc => &self.avc,
            Codec::Hevc => &self.hevc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodecItem;

    fn report(avc_qn: &[u32], hevc_qn: &[u32]) -> MirrorReport {
        let item = |codec: Codec, qn: &[u32]| {
            (!qn.is_empty()).then(|| CodecItem {
                codec,
                accept_qn: qn.to_vec(),
                base_url: String::new(),
                url_info: vec![],
            })
        };
        MirrorReport {
            avc: item(Codec::Avc, avc_qn),
            hevc: item(Codec::Hevc, hevc_qn),
        }
    }

    #[test]
    fn unions_levels_across_reports() {
        let mut availability = QualityAvailability::default();
        availability.merge(&report(&[10000, 150], &[]));
        availability.merge(&report(&[25000], &[10000]));

        assert!(availability.accepts(Codec::Avc, 150));
        assert!(availability.accepts(Codec::Avc, 25000));
        assert!(availability.accepts(Codec::Hevc, 10000));
        assert!(!availability.accepts(Codec::Hevc, 25000));
        assert!(availability.accepts_any(25000));
        assert!(!availability.accepts_any(400));
    }

    #[test]
    fn empty_until_a_report_contributes() {
        let mut availability = QualityAvailability::default();
        assert!(availability.is_empty());
        availability.merge(&MirrorReport::default());
        assert!(availability.is_empty());
        availability.merge(&report(&[], &[150]));
        assert!(!availability.is_empty());
    }
}
