//! Zone id to zone name matching.
//!
//! Upstream zone names are not consistent with zone ids: some facilities
//! label zones with letters ("Zone B"), others with numbers ("Zone 5", "05").
//! A zone id matches a name when the name equals any of the variants below.

/// Every name a zone id may appear under upstream, deduplicated, in
/// priority order.
pub fn name_variants(zone_id: &str) -> Vec<String> {
    let raw = zone_id.trim();
    let upper = raw.to_uppercase();
    let lower = raw.to_lowercase();

    let mut variants = vec![
        raw.to_string(),
        upper.clone(),
        lower.clone(),
        format!("Zone {raw}"),
        format!("Zone {upper}"),
        format!("Zone {lower}"),
    ];
    if let Ok(n) = raw.parse::<i64>() {
        variants.push(n.to_string());
        variants.push(format!("Zone {n}"));
    }

    let mut seen = std::collections::HashSet::new();
    variants.retain(|v| seen.insert(v.clone()));
    variants
}

pub fn zone_name_matches(zone_id: &str, zone_name: &str) -> bool {
    let name = zone_name.trim();
    name_variants(zone_id).iter().any(|v| v == name)
}

/// Operator-facing label for a backend zone: the name without its
/// `"Zone "` prefix when that leaves a single token, else the numeric id.
pub fn canonical_label(zone_id: i64, zone_name: &str) -> String {
    let name = zone_name.trim();
    let stripped = name
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("zone "))
        .map(|_| name[5..].trim())
        .unwrap_or(name);
    if !stripped.is_empty() && !stripped.contains(char::is_whitespace) {
        match stripped.parse::<i64>() {
            Ok(n) => n.to_string(),
            Err(_) => stripped.to_string(),
        }
    } else {
        zone_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_ids_match_in_either_case() {
        assert!(zone_name_matches("b", "Zone B"));
        assert!(zone_name_matches("B", "b"));
        assert!(zone_name_matches("a", "A"));
        assert!(!zone_name_matches("a", "Zone B"));
    }

    #[test]
    fn numeric_ids_are_normalised() {
        assert!(zone_name_matches("05", "Zone 5"));
        assert!(zone_name_matches("05", "5"));
        assert!(zone_name_matches("5", "Zone 5"));
        assert!(!zone_name_matches("5", "Zone 50"));
    }

    #[test]
    fn variants_are_deduplicated() {
        // "5" has no case, so upper/lower collapse into the raw form
        assert_eq!(name_variants("5"), vec!["5".to_string(), "Zone 5".to_string()]);
    }

    #[test]
    fn canonical_labels() {
        assert_eq!(canonical_label(1, "Zone A"), "A");
        assert_eq!(canonical_label(5, "Zone 05"), "5");
        assert_eq!(canonical_label(2, "zone b"), "b");
        assert_eq!(canonical_label(3, "C"), "C");
        assert_eq!(canonical_label(4, "North Lot"), "4");
        assert_eq!(canonical_label(6, "   "), "6");
    }

    #[test]
    fn canonical_label_round_trips_through_matching() {
        for (id, name) in [(1, "Zone A"), (5, "Zone 5"), (9, "Z9")] {
            assert!(zone_name_matches(&canonical_label(id, name), name));
        }
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert!(zone_name_matches(" 7 ", " Zone 7"));
    }
}
