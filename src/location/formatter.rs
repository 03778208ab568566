//! Address formatting: provider components → pin title and address line.
//!
//! Providers repeat themselves (a suburb that is also the neighbourhood, a
//! city that is also the town), so the line is assembled in a fixed order
//! and deduplicated before joining.

use super::types::{non_empty, AddressComponents};

pub const UNKNOWN_TITLE: &str = "Unknown Location";
const CURRENT_LOCATION: &str = "Current Location";

/// First of suburb, neighbourhood, city, town, village.
pub fn build_title(c: &AddressComponents) -> String {
    [&c.suburb, &c.neighbourhood, &c.city, &c.town, &c.village]
        .into_iter()
        .find_map(non_empty)
        .unwrap_or(UNKNOWN_TITLE)
        .to_string()
}

/// Street, suburb, neighbourhood, locality, state, postcode, joined with ", ".
///
/// Falls back to the provider's `display_name` when nothing is usable.
pub fn build_full_line(c: &AddressComponents, display_name: &str) -> String {
    let title = build_title(c);
    let mut parts: Vec<String> = Vec::new();

    let street = match (non_empty(&c.house_number), non_empty(&c.road)) {
        (Some(h), Some(r)) => Some(format!("{} {}", h, r)),
        (Some(h), None) => Some(h.to_string()),
        (None, Some(r)) => Some(r.to_string()),
        (None, None) => None,
    };
    parts.extend(street);

    // The title may open the line once; it is never repeated after that.
    for area in [non_empty(&c.suburb), non_empty(&c.neighbourhood)].into_iter().flatten() {
        if area == title && parts.iter().any(|p| *p == title) {
            continue;
        }
        parts.push(area.to_string());
    }

    parts.extend(c.locality().map(str::to_string));
    parts.extend(non_empty(&c.state).map(str::to_string));
    parts.extend(non_empty(&c.postcode).map(str::to_string));

    let parts = dedup_in_order(parts);
    if parts.is_empty() {
        return display_name.trim().to_string();
    }
    parts.join(", ")
}

/// Short area name for a GPS fix label.
pub fn area_label(c: &AddressComponents) -> String {
    [&c.suburb, &c.neighbourhood, &c.city]
        .into_iter()
        .find_map(non_empty)
        .unwrap_or(CURRENT_LOCATION)
        .to_string()
}

fn dedup_in_order(parts: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(parts.len());
    for p in parts {
        if !seen.contains(&p) {
            seen.push(p);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comps(pairs: &[(&str, &str)]) -> AddressComponents {
        let mut c = AddressComponents::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "road" => c.road = v,
                "house_number" => c.house_number = v,
                "suburb" => c.suburb = v,
                "neighbourhood" => c.neighbourhood = v,
                "city" => c.city = v,
                "town" => c.town = v,
                "village" => c.village = v,
                "state" => c.state = v,
                "postcode" => c.postcode = v,
                other => panic!("unknown key {other}"),
            }
        }
        c
    }

    fn assert_no_consecutive_duplicates(line: &str) {
        let segs: Vec<&str> = line.split(", ").collect();
        for w in segs.windows(2) {
            assert_ne!(w[0], w[1], "duplicate segment in '{line}'");
        }
    }

    #[test]
    fn test_title_priority() {
        assert_eq!(build_title(&comps(&[("city", "Bengaluru"), ("suburb", "Indiranagar")])), "Indiranagar");
        assert_eq!(build_title(&comps(&[("city", "Bengaluru"), ("neighbourhood", "HAL 2nd Stage")])), "HAL 2nd Stage");
        assert_eq!(build_title(&comps(&[("town", "Hoskote"), ("village", "Nandagudi")])), "Hoskote");
        assert_eq!(build_title(&comps(&[("village", "Nandagudi")])), "Nandagudi");
        assert_eq!(build_title(&comps(&[("road", "MG Road")])), "Unknown Location");
    }

    #[test]
    fn test_title_skips_blank_fields() {
        assert_eq!(build_title(&comps(&[("suburb", "  "), ("city", "Bengaluru")])), "Bengaluru");
    }

    #[test]
    fn test_full_line_mg_road() {
        let c = comps(&[
            ("road", "MG Road"),
            ("city", "Bengaluru"),
            ("state", "Karnataka"),
            ("postcode", "560001"),
        ]);
        assert_eq!(build_title(&c), "Bengaluru");
        assert_eq!(build_full_line(&c, "ignored"), "MG Road, Bengaluru, Karnataka, 560001");
    }

    #[test]
    fn test_full_line_dedups_suburb_and_neighbourhood() {
        let c = comps(&[("suburb", "Indiranagar"), ("neighbourhood", "Indiranagar"), ("city", "Bengaluru")]);
        let line = build_full_line(&c, "");
        assert_eq!(line, "Indiranagar, Bengaluru");
        assert_no_consecutive_duplicates(&line);
    }

    #[test]
    fn test_full_line_house_number_and_road() {
        let c = comps(&[("house_number", "42"), ("road", "12th Main"), ("suburb", "Indiranagar"), ("city", "Bengaluru")]);
        assert_eq!(build_full_line(&c, ""), "42 12th Main, Indiranagar, Bengaluru");

        let c = comps(&[("house_number", "42"), ("city", "Bengaluru")]);
        assert_eq!(build_full_line(&c, ""), "42, Bengaluru");
    }

    #[test]
    fn test_full_line_prefers_city_over_town() {
        let c = comps(&[("town", "Whitefield"), ("city", "Bengaluru"), ("state", "Karnataka")]);
        assert_eq!(build_full_line(&c, ""), "Bengaluru, Karnataka");
    }

    #[test]
    fn test_full_line_non_adjacent_duplicates_removed() {
        let c = comps(&[("road", "Bengaluru"), ("suburb", "Shivajinagar"), ("city", "Bengaluru"), ("state", "Karnataka")]);
        let line = build_full_line(&c, "");
        assert_eq!(line, "Bengaluru, Shivajinagar, Karnataka");
        assert_no_consecutive_duplicates(&line);
    }

    #[test]
    fn test_full_line_falls_back_to_display_name() {
        let c = AddressComponents::default();
        assert_eq!(build_full_line(&c, " Somewhere, Earth "), "Somewhere, Earth");
    }

    #[test]
    fn test_full_line_never_repeats_segments() {
        let cases = [
            comps(&[("suburb", "A"), ("neighbourhood", "A"), ("city", "A"), ("state", "A")]),
            comps(&[("neighbourhood", "Koramangala"), ("city", "Bengaluru"), ("town", "Bengaluru")]),
            comps(&[("road", "X"), ("suburb", "Y"), ("neighbourhood", "Y"), ("postcode", "X")]),
        ];
        for c in &cases {
            assert_no_consecutive_duplicates(&build_full_line(c, ""));
        }
        assert_eq!(build_full_line(&cases[1], ""), "Koramangala, Bengaluru");
    }

    #[test]
    fn test_area_label() {
        assert_eq!(area_label(&comps(&[("neighbourhood", "Domlur"), ("city", "Bengaluru")])), "Domlur");
        assert_eq!(area_label(&comps(&[("town", "Hoskote")])), "Current Location");
    }
}
