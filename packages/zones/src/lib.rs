#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Taxi zone membership sets.
//!
//! The congestion pricing zone ("Manhattan south of 60th Street") and the
//! ring of border zones around it are fixed sets of TLC taxi zone ids.
//! Both are exposed as sorted constant slices plus pure membership
//! predicates; nothing in the system mutates them.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A TLC taxi zone identifier (`PULocationID` / `DOLocationID`).
pub type ZoneId = i32;

/// Zones inside the congestion relief zone. Sorted ascending.
pub const CONGESTION_ZONE_IDS: &[ZoneId] = &[
    12, 13, 43, 45, 48, 50, 68, 79, 87, 88, 90, 100, 107, 113, 114, 116, 120, 125, 137, 140, 141,
    142, 143, 144, 148, 151, 152, 153, 158, 161, 162, 163, 164, 166, 170, 186, 209, 211, 224, 229,
    230, 231, 232, 233, 234, 236, 237, 238, 239, 243, 244, 246, 249, 261, 262, 263,
];

/// Zones on either side of the congestion boundary, used to measure
/// displacement of drop-offs. Overlaps [`CONGESTION_ZONE_IDS`] for the
/// zones just inside the line. Sorted ascending.
pub const BORDER_ZONE_IDS: &[ZoneId] = &[
    43, 48, 50, 74, 75, 100, 142, 143, 161, 162, 163, 164, 230, 236, 237, 238, 239, 262, 263,
];

/// Returns `true` if `zone` is inside the congestion zone.
#[must_use]
pub fn is_congestion_zone(zone: ZoneId) -> bool {
    CONGESTION_ZONE_IDS.binary_search(&zone).is_ok()
}

/// Returns `true` if `zone` is one of the border zones.
#[must_use]
pub fn is_border_zone(zone: ZoneId) -> bool {
    BORDER_ZONE_IDS.binary_search(&zone).is_ok()
}

/// Which side of the congestion boundary a zone lies on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum LocationType {
    /// The zone is part of the congestion zone.
    #[serde(rename = "Inside Zone")]
    #[strum(serialize = "Inside Zone")]
    InsideZone,
    /// The zone is outside the congestion zone.
    #[serde(rename = "Outside Zone")]
    #[strum(serialize = "Outside Zone")]
    OutsideZone,
}

impl LocationType {
    /// Classifies a zone id.
    #[must_use]
    pub fn of(zone: ZoneId) -> Self {
        if is_congestion_zone(zone) {
            Self::InsideZone
        } else {
            Self::OutsideZone
        }
    }
}

/// Renders a zone set as a SQL `IN` list, e.g. `(12, 13, 43)`.
#[must_use]
pub fn sql_id_list(ids: &[ZoneId]) -> String {
    let mut out = String::with_capacity(ids.len() * 5 + 2);
    out.push('(');
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{id}");
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_sets_are_sorted_and_unique() {
        for set in [CONGESTION_ZONE_IDS, BORDER_ZONE_IDS] {
            assert!(
                set.windows(2).all(|w| w[0] < w[1]),
                "zone set must be strictly ascending for binary search"
            );
        }
    }

    #[test]
    fn zone_set_sizes() {
        assert_eq!(CONGESTION_ZONE_IDS.len(), 56);
        assert_eq!(BORDER_ZONE_IDS.len(), 19);
    }

    #[test]
    fn membership_predicates() {
        assert!(is_congestion_zone(161));
        assert!(is_congestion_zone(12));
        assert!(!is_congestion_zone(74));
        assert!(!is_congestion_zone(0));

        assert!(is_border_zone(74));
        assert!(is_border_zone(161));
        assert!(!is_border_zone(12));
    }

    #[test]
    fn border_overlap_is_partial() {
        let inside = BORDER_ZONE_IDS
            .iter()
            .filter(|z| is_congestion_zone(**z))
            .count();
        assert!(inside > 0);
        assert!(inside < BORDER_ZONE_IDS.len());
    }

    #[test]
    fn location_type_labels() {
        assert_eq!(LocationType::of(161).to_string(), "Inside Zone");
        assert_eq!(LocationType::of(74).to_string(), "Outside Zone");
        assert_eq!(
            "Outside Zone".parse::<LocationType>().unwrap(),
            LocationType::OutsideZone
        );
    }

    #[test]
    fn renders_sql_list() {
        assert_eq!(sql_id_list(&[1, 22, 333]), "(1, 22, 333)");
        assert_eq!(sql_id_list(&[]), "()");
    }
}
