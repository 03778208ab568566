//! Plus code (Open Location Code) codec.
//!
//! A full code is eight pair digits, a `+`, then two pair digits and an
//! optional refinement digit: `7J4VXHCV+JR` is a ~14 m cell, `7J4VXHCV+JRQ`
//! a ~3 m cell. Abbreviated codes drop leading pairs and are only
//! meaningful next to a reference point.
//!
//! Integer arithmetic is used for every digit so that encoding the center of
//! a decoded cell lands back in the same cell.

use crate::coord::Coordinate;
use serde::Serialize;
use thiserror::Error;

const ALPHABET: &[u8; 20] = b"23456789CFGHJMPQRVWX";
const SEPARATOR: char = '+';
const SEPARATOR_POSITION: usize = 8;

/// Digits in the pair section of a full code.
pub const PAIR_CODE_LENGTH: usize = 10;
/// Longest code this codec produces (one refinement digit).
pub const MAX_CODE_LENGTH: usize = 11;
const GRID_CODE_LENGTH: usize = 5;

const ENCODING_BASE: i64 = 20;
const GRID_ROWS: i64 = 5;
const GRID_COLUMNS: i64 = 4;
const PAIR_PRECISION: i64 = 8_000;
const PAIR_FIRST_PLACE_VALUE: i64 = 160_000;
const GRID_LAT_FIRST_PLACE_VALUE: i64 = 625;
const GRID_LNG_FIRST_PLACE_VALUE: i64 = 256;
const FINAL_LAT_PRECISION: i64 = PAIR_PRECISION * 3_125;
const FINAL_LNG_PRECISION: i64 = PAIR_PRECISION * 1_024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    /// The string does not follow the plus code grammar.
    #[error("invalid plus code: {0}")]
    InvalidCodeFormat(String),
    /// Grammar-valid, but no full code can be rebuilt from it.
    #[error("cannot resolve plus code: {0}")]
    UnresolvableCode(String),
}

/// The rectangular cell a full code stands for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CodeArea {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
    pub code_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellSize {
    pub lat_delta: f64,
    pub lng_delta: f64,
}

impl CodeArea {
    pub fn center(&self) -> Coordinate {
        Coordinate {
            latitude: ((self.south + self.north) / 2.0).min(90.0),
            longitude: ((self.west + self.east) / 2.0).min(180.0),
        }
    }

    pub fn cell_size(&self) -> CellSize {
        CellSize {
            lat_delta: self.north - self.south,
            lng_delta: self.east - self.west,
        }
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        (self.south..self.north).contains(&c.latitude) && (self.west..self.east).contains(&c.longitude)
    }
}

fn digit_value(b: u8) -> Option<i64> {
    ALPHABET.iter().position(|&a| a == b).map(|p| p as i64)
}

fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn normalize_longitude(mut lng: f64) -> f64 {
    while lng < -180.0 {
        lng += 360.0;
    }
    while lng >= 180.0 {
        lng -= 360.0;
    }
    lng
}

/// Structural check only: alphabet, a single `+` at an even position no
/// later than 8, and a two or three digit suffix. Says nothing about land.
pub fn is_valid(code: &str) -> bool {
    separator_index(&normalize(code)).is_some()
}

/// Valid and abbreviated (fewer than eight digits before the `+`).
pub fn is_short(code: &str) -> bool {
    matches!(separator_index(&normalize(code)), Some(sep) if sep < SEPARATOR_POSITION)
}

/// Valid, eight digits before the `+`, and inside the coordinate range.
pub fn is_full(code: &str) -> bool {
    let code = normalize(code);
    if separator_index(&code) != Some(SEPARATOR_POSITION) {
        return false;
    }
    let bytes = code.as_bytes();
    // First pair: latitude digit covers 0..180 in 20° steps, longitude 0..360.
    matches!(digit_value(bytes[0]), Some(d) if d < 9) && matches!(digit_value(bytes[1]), Some(d) if d < 18)
}

fn separator_index(code: &str) -> Option<usize> {
    let sep = code.find(SEPARATOR)?;
    if code.matches(SEPARATOR).count() != 1 {
        return None;
    }
    if sep < 2 || sep > SEPARATOR_POSITION || sep % 2 == 1 {
        return None;
    }
    let suffix_len = code.len() - sep - 1;
    if !(2..=3).contains(&suffix_len) {
        return None;
    }
    if !code.bytes().filter(|&b| b != b'+').all(|b| digit_value(b).is_some()) {
        return None;
    }
    Some(sep)
}

/// Encode a coordinate as a full ten-digit code (`XXXXXXXX+XX`).
pub fn encode(coord: Coordinate) -> String {
    encode_digits(coord, PAIR_CODE_LENGTH)
}

/// Encode with an explicit digit count (10 or 11).
pub fn encode_with_length(coord: Coordinate, code_length: usize) -> Result<String, CodeError> {
    if !(PAIR_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code_length) {
        return Err(CodeError::InvalidCodeFormat(format!(
            "unsupported code length {} (expected {}..={})",
            code_length, PAIR_CODE_LENGTH, MAX_CODE_LENGTH
        )));
    }
    Ok(encode_digits(coord, code_length))
}

fn encode_digits(coord: Coordinate, code_length: usize) -> String {
    let lat = coord.latitude.clamp(-90.0, 90.0);
    let lng = normalize_longitude(coord.longitude);

    // Round away float noise before flooring, so 12.9716 stays 12.9716.
    let mut lat_val = (((lat + 90.0) * FINAL_LAT_PRECISION as f64 * 1e6).round() / 1e6).floor() as i64;
    let mut lng_val = (((lng + 180.0) * FINAL_LNG_PRECISION as f64 * 1e6).round() / 1e6).floor() as i64;
    lat_val = lat_val.clamp(0, 180 * FINAL_LAT_PRECISION - 1);
    lng_val = lng_val.rem_euclid(360 * FINAL_LNG_PRECISION);

    let mut digits = [0u8; PAIR_CODE_LENGTH + GRID_CODE_LENGTH];

    if code_length > PAIR_CODE_LENGTH {
        for i in (PAIR_CODE_LENGTH..PAIR_CODE_LENGTH + GRID_CODE_LENGTH).rev() {
            let lat_digit = lat_val % GRID_ROWS;
            let lng_digit = lng_val % GRID_COLUMNS;
            digits[i] = ALPHABET[(lat_digit * GRID_COLUMNS + lng_digit) as usize];
            lat_val /= GRID_ROWS;
            lng_val /= GRID_COLUMNS;
        }
    } else {
        lat_val /= GRID_ROWS.pow(GRID_CODE_LENGTH as u32);
        lng_val /= GRID_COLUMNS.pow(GRID_CODE_LENGTH as u32);
    }

    for pair in (0..PAIR_CODE_LENGTH / 2).rev() {
        digits[pair * 2 + 1] = ALPHABET[(lng_val % ENCODING_BASE) as usize];
        digits[pair * 2] = ALPHABET[(lat_val % ENCODING_BASE) as usize];
        lat_val /= ENCODING_BASE;
        lng_val /= ENCODING_BASE;
    }

    let mut code = String::with_capacity(code_length + 1);
    for (i, &d) in digits[..code_length].iter().enumerate() {
        if i == SEPARATOR_POSITION {
            code.push(SEPARATOR);
        }
        code.push(d as char);
    }
    code
}

/// Decode a full code into its cell.
///
/// Abbreviated codes are rejected here; they need a reference point and go
/// through [`recover_nearest`] first.
pub fn decode(code: &str) -> Result<CodeArea, CodeError> {
    let code = normalize(code);
    if !is_full(&code) {
        let reason = if is_short(&code) {
            format!("'{}' is abbreviated; recover it against a reference first", code)
        } else {
            format!("'{}'", code)
        };
        return Err(CodeError::InvalidCodeFormat(reason));
    }

    let digits: Vec<i64> = code.bytes().filter(|&b| b != b'+').filter_map(digit_value).collect();
    let pair_len = digits.len().min(PAIR_CODE_LENGTH);

    let mut normal_lat = -90 * PAIR_PRECISION;
    let mut normal_lng = -180 * PAIR_PRECISION;
    let mut place_value = PAIR_FIRST_PLACE_VALUE;
    for i in (0..pair_len).step_by(2) {
        normal_lat += digits[i] * place_value;
        normal_lng += digits[i + 1] * place_value;
        if i + 2 < pair_len {
            place_value /= ENCODING_BASE;
        }
    }
    let mut lat_precision = place_value as f64 / PAIR_PRECISION as f64;
    let mut lng_precision = place_value as f64 / PAIR_PRECISION as f64;

    let mut grid_lat = 0;
    let mut grid_lng = 0;
    if digits.len() > PAIR_CODE_LENGTH {
        let grid = &digits[PAIR_CODE_LENGTH..];
        let mut row_pv = GRID_LAT_FIRST_PLACE_VALUE;
        let mut col_pv = GRID_LNG_FIRST_PLACE_VALUE;
        for (i, d) in grid.iter().enumerate() {
            grid_lat += (d / GRID_COLUMNS) * row_pv;
            grid_lng += (d % GRID_COLUMNS) * col_pv;
            if i + 1 < grid.len() {
                row_pv /= GRID_ROWS;
                col_pv /= GRID_COLUMNS;
            }
        }
        lat_precision = row_pv as f64 / FINAL_LAT_PRECISION as f64;
        lng_precision = col_pv as f64 / FINAL_LNG_PRECISION as f64;
    }

    let south = normal_lat as f64 / PAIR_PRECISION as f64 + grid_lat as f64 / FINAL_LAT_PRECISION as f64;
    let west = normal_lng as f64 / PAIR_PRECISION as f64 + grid_lng as f64 / FINAL_LNG_PRECISION as f64;

    Ok(CodeArea {
        south,
        west,
        north: south + lat_precision,
        east: west + lng_precision,
        code_length: digits.len(),
    })
}

/// Drop `prefix_len` leading digits for display: `7J4VXHCV+JR` → `XHCV+JR`.
///
/// The result is never the stored value; the full code is.
pub fn shorten(code: &str, prefix_len: usize) -> Result<String, CodeError> {
    let code = normalize(code);
    if !is_full(&code) {
        return Err(CodeError::InvalidCodeFormat(format!("'{}' is not a full code", code)));
    }
    if !matches!(prefix_len, 2 | 4 | 6) {
        return Err(CodeError::InvalidCodeFormat(format!(
            "prefix length {} must be 2, 4 or 6",
            prefix_len
        )));
    }
    Ok(code[prefix_len..].to_string())
}

/// Rebuild the full code nearest to `reference` for an abbreviated code.
///
/// Full codes come back normalized and otherwise untouched.
pub fn recover_nearest(short: &str, reference: Coordinate) -> Result<String, CodeError> {
    let code = normalize(short);
    if is_full(&code) {
        return Ok(code);
    }
    let sep = match separator_index(&code) {
        Some(sep) if sep < SEPARATOR_POSITION => sep,
        _ => return Err(CodeError::UnresolvableCode(format!("'{}' is not an abbreviated code", short))),
    };

    let padding = SEPARATOR_POSITION - sep;
    let resolution = (ENCODING_BASE as f64).powi(2 - (padding / 2) as i32);
    let half = resolution / 2.0;

    let ref_lat = reference.latitude.clamp(-90.0, 90.0);
    let ref_lng = normalize_longitude(reference.longitude);
    let ref_code = encode(Coordinate { latitude: ref_lat, longitude: ref_lng });

    let expanded = format!("{}{}", &ref_code[..padding], code);
    let area = decode(&expanded).map_err(|e| CodeError::UnresolvableCode(e.to_string()))?;
    let center = area.center();
    let mut lat = center.latitude;
    let mut lng = center.longitude;

    // The reference's own cell may be the wrong neighbour: step one
    // resolution toward the reference when it is more than half a cell away.
    if ref_lat + half < lat && lat - resolution >= -90.0 {
        lat -= resolution;
    } else if ref_lat - half > lat && lat + resolution <= 90.0 {
        lat += resolution;
    }
    if ref_lng + half < lng {
        lng -= resolution;
    } else if ref_lng - half > lng {
        lng += resolution;
    }

    encode_with_length(
        Coordinate { latitude: lat, longitude: normalize_longitude(lng) },
        area.code_length,
    )
}

/// Move a coordinate to the center of its ten-digit cell.
pub fn snap(coord: Coordinate) -> Result<Coordinate, CodeError> {
    Ok(decode(&encode(coord))?.center())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const BENGALURU: Coordinate = Coordinate { latitude: 12.9716, longitude: 77.5946 };

    #[test]
    fn test_encode_bengaluru() {
        assert_eq!(encode(BENGALURU), "7J4VXHCV+JR");
    }

    #[test]
    fn test_encode_is_deterministic() {
        assert_eq!(encode(BENGALURU), encode(BENGALURU));
    }

    #[test]
    fn test_encode_with_refinement_digit() {
        let code = encode_with_length(BENGALURU, 11).unwrap();
        assert_eq!(code.len(), 12);
        assert!(code.starts_with("7J4VXHCV+JR"));
        assert!(is_full(&code));
    }

    #[test]
    fn test_encode_rejects_unsupported_length() {
        assert!(matches!(encode_with_length(BENGALURU, 8), Err(CodeError::InvalidCodeFormat(_))));
        assert!(matches!(encode_with_length(BENGALURU, 12), Err(CodeError::InvalidCodeFormat(_))));
    }

    #[test]
    fn test_decode_cell_size() {
        let area = decode("7J4VXHCV+JR").unwrap();
        let size = area.cell_size();
        assert_abs_diff_eq!(size.lat_delta, 0.000125, epsilon = 1e-9);
        assert_abs_diff_eq!(size.lng_delta, 0.000125, epsilon = 1e-9);
        assert_eq!(area.code_length, 10);
        assert!(area.contains(BENGALURU));

        let fine = decode(&encode_with_length(BENGALURU, 11).unwrap()).unwrap();
        assert_abs_diff_eq!(fine.cell_size().lat_delta, 0.000025, epsilon = 1e-9);
        assert_abs_diff_eq!(fine.cell_size().lng_delta, 0.00003125, epsilon = 1e-9);
        assert!(fine.contains(BENGALURU));
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        assert_eq!(decode("7j4vxhcv+jr").unwrap(), decode("7J4VXHCV+JR").unwrap());
    }

    #[test]
    fn test_decode_rejects_bad_grammar() {
        for bad in ["", "7J4VXHCV", "7J4VXHCV+J", "7J4VXHCV+JRQW", "7J4V+XHCV+JR", "ABCD+XY", "7J4VXHC+JR", "7J4VXHCV-JR"] {
            assert!(
                matches!(decode(bad), Err(CodeError::InvalidCodeFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_rejects_short_code() {
        let err = decode("XHCV+JR").unwrap_err();
        assert!(err.to_string().contains("abbreviated"));
    }

    #[test]
    fn test_full_code_first_pair_range() {
        // Latitude digit 'X' (19) would be 290°N.
        assert!(!is_full("X24VXHCV+JR"));
        assert!(!is_full("7X4VXHCV+JR"));
        assert!(is_valid("X24VXHCV+JR"));
    }

    #[test]
    fn test_round_trip_center_stays_in_cell() {
        let points = [
            BENGALURU,
            Coordinate { latitude: 59.3293, longitude: 18.0686 },
            Coordinate { latitude: -33.8688, longitude: 151.2093 },
            Coordinate { latitude: 40.7128, longitude: -74.0060 },
            Coordinate { latitude: -0.00001, longitude: -179.99999 },
        ];
        for p in points {
            let code = encode(p);
            let area = decode(&code).unwrap();
            assert!(area.contains(p), "{code} does not contain {p:?}");
            let center = area.center();
            assert!(area.contains(center));
            assert_eq!(encode(center), code, "re-encoding center of {code}");
        }
    }

    #[test]
    fn test_encode_clips_north_pole() {
        let code = encode(Coordinate { latitude: 90.0, longitude: 0.0 });
        let area = decode(&code).unwrap();
        assert!(area.north <= 90.0 + 1e-9);
        assert!(area.south < 90.0);
    }

    #[test]
    fn test_shorten_drops_prefix() {
        assert_eq!(shorten("7J4VXHCV+JR", 4).unwrap(), "XHCV+JR");
        assert_eq!(shorten("7j4vxhcv+jr", 2).unwrap(), "4VXHCV+JR");
        assert_eq!(shorten("7J4VXHCV+JR", 6).unwrap(), "CV+JR");
    }

    #[test]
    fn test_shorten_rejects_bad_input() {
        assert!(shorten("XHCV+JR", 4).is_err());
        assert!(shorten("7J4VXHCV+JR", 3).is_err());
        assert!(shorten("7J4VXHCV+JR", 8).is_err());
    }

    #[test]
    fn test_recover_nearest_inverts_shorten() {
        let full = encode(BENGALURU);
        let nearby = [
            BENGALURU,
            Coordinate { latitude: 12.70, longitude: 77.30 },
            Coordinate { latitude: 13.30, longitude: 77.95 },
        ];
        for prefix in [2, 4, 6] {
            let short = shorten(&full, prefix).unwrap();
            for reference in nearby {
                if prefix == 6 && reference != BENGALURU {
                    // A six-digit drop only spans 0.05°; far references pick another cell.
                    continue;
                }
                assert_eq!(recover_nearest(&short, reference).unwrap(), full, "{short} near {reference:?}");
            }
        }
    }

    #[test]
    fn test_recover_nearest_crosses_cell_boundary() {
        // Reference just south of the 13°N line; the code sits just north of it.
        let target = Coordinate { latitude: 13.0001, longitude: 77.5946 };
        let full = encode(target);
        let short = shorten(&full, 4).unwrap();
        let reference = Coordinate { latitude: 12.9, longitude: 77.5946 };
        assert_ne!(encode(reference)[..4], full[..4]);
        assert_eq!(recover_nearest(&short, reference).unwrap(), full);
    }

    #[test]
    fn test_recover_nearest_across_antimeridian() {
        let target = Coordinate { latitude: 10.0, longitude: 179.99 };
        let full = encode(target);
        let short = shorten(&full, 4).unwrap();
        let reference = Coordinate { latitude: 10.0, longitude: -179.9 };
        assert_eq!(recover_nearest(&short, reference).unwrap(), full);
    }

    #[test]
    fn test_recover_nearest_full_code_passthrough() {
        assert_eq!(recover_nearest("7j4vxhcv+jr", BENGALURU).unwrap(), "7J4VXHCV+JR");
    }

    #[test]
    fn test_recover_nearest_spec_example() {
        assert_eq!(recover_nearest("HXCV+JR", BENGALURU).unwrap(), "7J4VHXCV+JR");
    }

    #[test]
    fn test_recover_nearest_rejects_malformed() {
        for bad in ["ABCD+XY", "XHC+JR", "+JR", "XHCV+J", "XHCVJR"] {
            assert!(
                matches!(recover_nearest(bad, BENGALURU), Err(CodeError::UnresolvableCode(_))),
                "{bad} should be unresolvable"
            );
        }
    }

    #[test]
    fn test_snap_moves_to_cell_center() {
        let snapped = snap(BENGALURU).unwrap();
        assert_ne!(snapped, BENGALURU);
        assert_eq!(encode(snapped), encode(BENGALURU));
        assert_abs_diff_eq!(snapped.latitude, 12.9715625, epsilon = 1e-7);
        assert_abs_diff_eq!(snapped.longitude, 77.5945625, epsilon = 1e-7);
    }
}
