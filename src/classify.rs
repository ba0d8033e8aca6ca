//! Name-based device classification.
//!
//! Each supported vendor family advertises with a recognizable name fragment.
//! Classification is an ordered substring match: the first fragment that
//! appears in the advertised name decides the category. It runs on every
//! advertisement, including ones that are later discarded, so it must stay
//! a pure lookup with no side effects.

use crate::model::DeviceCategory;

/// Ordered (fragment, category) table. First match wins.
const NAME_RULES: &[(&str, DeviceCategory)] = &[
    ("AOJ-20A", DeviceCategory::Thermometer),
    ("iTherm", DeviceCategory::Thermometer),
    ("PC-60", DeviceCategory::Oximeter),
    ("SpO2", DeviceCategory::Oximeter),
    ("AES-U181", DeviceCategory::Sphygmometer),
    ("BP-", DeviceCategory::Sphygmometer),
    // "QN-Rope" must be checked before the bare "QN-" scale fragment.
    ("QN-Rope", DeviceCategory::JumpRope),
    ("QN-Scale", DeviceCategory::Scale),
    ("QN-", DeviceCategory::Scale),
    ("CL8", DeviceCategory::HeartRateBelt),
    ("HW-", DeviceCategory::HeartRateBelt),
];

/// Map an advertised name to its device category. Unrecognized names map to
/// `DeviceCategory::None`.
pub fn classify(name: &str) -> DeviceCategory {
    for (fragment, category) in NAME_RULES {
        if name.contains(fragment) {
            return *category;
        }
    }
    DeviceCategory::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_fragments_classify() {
        assert_eq!(classify("AOJ-20A-3F2B"), DeviceCategory::Thermometer);
        assert_eq!(classify("PC-60FW_SN01"), DeviceCategory::Oximeter);
        assert_eq!(classify("AES-U181 BPM"), DeviceCategory::Sphygmometer);
        assert_eq!(classify("QN-Scale1"), DeviceCategory::Scale);
        assert_eq!(classify("QN-Rope-01"), DeviceCategory::JumpRope);
        assert_eq!(classify("CL831-0042"), DeviceCategory::HeartRateBelt);
    }

    #[test]
    fn rope_wins_over_generic_qn_prefix() {
        // Both "QN-Rope" and "QN-" match; the rope rule is ordered first.
        assert_eq!(classify("QN-Rope-01"), DeviceCategory::JumpRope);
    }

    #[test]
    fn unknown_names_map_to_none() {
        assert_eq!(classify(""), DeviceCategory::None);
        assert_eq!(classify("JBL Flip 5"), DeviceCategory::None);
    }

    #[test]
    fn classification_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(classify("QN-Scale1"), DeviceCategory::Scale);
        }
    }
}
