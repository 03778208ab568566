//! Hybrid search: a plus code anywhere in the query wins, otherwise text search.
//!
//! "meet me near HXCV+JR cafe" resolves the code against the reference
//! point and returns exactly one synthetic result at the cell center.
//! Anything that only looks like a code falls through to the geocoder.

use super::providers::GeocodingProvider;
use super::types::{AddressComponents, GeocodeError, GeocodeResult};
use crate::coord::Coordinate;
use crate::plus_code;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// 2-8 code characters, '+', then 2-3 more, as a whole word.
const CODE_PATTERN: &str = r"(?i)\b[A-Z0-9]{2,8}\+[A-Z0-9]{2,3}\b";

pub const PLUS_CODE_LABEL: &str = "Plus Code Location";

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(CODE_PATTERN).expect("plus code pattern compiles"))
}

#[derive(Clone)]
pub struct HybridSearch {
    geocoder: Arc<dyn GeocodingProvider>,
}

impl HybridSearch {
    pub fn new(geocoder: Arc<dyn GeocodingProvider>) -> Self {
        Self { geocoder }
    }

    /// Results for `query`, biased toward `reference`.
    ///
    /// Blank queries return nothing without touching the network.
    pub async fn resolve(&self, query: &str, reference: Coordinate) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(hit) = plus_code_hit(query, reference) {
            return Ok(vec![hit]);
        }
        self.geocoder.forward_geocode(query, Some(reference)).await
    }

    /// Like [`resolve`](Self::resolve), with provider failures logged and
    /// turned into an empty list.
    pub async fn resolve_or_empty(&self, query: &str, reference: Coordinate) -> Vec<GeocodeResult> {
        match self.resolve(query, reference).await {
            Ok(results) => results,
            Err(e) => {
                warn!(query, error = %e, "search failed");
                Vec::new()
            }
        }
    }
}

/// The first code-shaped token in `query` that recovers and decodes.
pub fn plus_code_hit(query: &str, reference: Coordinate) -> Option<GeocodeResult> {
    for m in code_pattern().find_iter(query) {
        let token = m.as_str().to_ascii_uppercase();
        let resolved = plus_code::recover_nearest(&token, reference)
            .and_then(|full| plus_code::decode(&full).map(|area| (full, area)));
        match resolved {
            Ok((full, area)) => {
                debug!(token, full, "query contains a plus code");
                return Some(GeocodeResult {
                    display_name: format!("{}: {}", PLUS_CODE_LABEL, full),
                    address: AddressComponents::default(),
                    coordinate: area.center(),
                });
            }
            Err(e) => debug!(token, error = %e, "code-shaped token did not resolve"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const BENGALURU: Coordinate = Coordinate { latitude: 12.9716, longitude: 77.5946 };

    /// Records every forward query; answers with one canned hit.
    #[derive(Default)]
    struct RecordingGeocoder {
        queries: Mutex<Vec<(String, Option<Coordinate>)>>,
        fail: bool,
    }

    #[async_trait]
    impl GeocodingProvider for RecordingGeocoder {
        async fn reverse_geocode(&self, _c: Coordinate) -> Result<GeocodeResult, GeocodeError> {
            Err(GeocodeError::NotFound("unused".into()))
        }

        async fn forward_geocode(
            &self,
            query: &str,
            bias: Option<Coordinate>,
        ) -> Result<Vec<GeocodeResult>, GeocodeError> {
            self.queries.lock().unwrap().push((query.to_string(), bias));
            if self.fail {
                return Err(GeocodeError::Network("offline".into()));
            }
            Ok(vec![GeocodeResult {
                display_name: format!("hit for {query}"),
                address: AddressComponents::default(),
                coordinate: BENGALURU,
            }])
        }
    }

    fn search(geocoder: &Arc<RecordingGeocoder>) -> HybridSearch {
        HybridSearch::new(geocoder.clone())
    }

    #[tokio::test]
    async fn test_embedded_short_code() {
        let geocoder = Arc::new(RecordingGeocoder::default());
        let results = search(&geocoder).resolve("meet me near HXCV+JR cafe", BENGALURU).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].display_name, "Plus Code Location: 7J4VHXCV+JR");
        assert_eq!(results[0].address, AddressComponents::default());
        let area = plus_code::decode("7J4VHXCV+JR").unwrap();
        assert_eq!(results[0].coordinate, area.center());
        assert!(geocoder.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lowercase_full_code() {
        let geocoder = Arc::new(RecordingGeocoder::default());
        let results = search(&geocoder).resolve("7j4vxhcv+jr", BENGALURU).await.unwrap();
        assert_eq!(results[0].display_name, "Plus Code Location: 7J4VXHCV+JR");
    }

    #[tokio::test]
    async fn test_lookalike_falls_through() {
        let geocoder = Arc::new(RecordingGeocoder::default());
        let results = search(&geocoder).resolve("ABCD+XY nonsense unresolvable", BENGALURU).await.unwrap();

        assert_eq!(results[0].display_name, "hit for ABCD+XY nonsense unresolvable");
        let queries = geocoder.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].1, Some(BENGALURU));
    }

    #[tokio::test]
    async fn test_second_token_can_resolve() {
        let geocoder = Arc::new(RecordingGeocoder::default());
        let results = search(&geocoder).resolve("ABCD+XY or HXCV+JR", BENGALURU).await.unwrap();
        assert_eq!(results[0].display_name, "Plus Code Location: 7J4VHXCV+JR");
    }

    #[tokio::test]
    async fn test_blank_query_skips_provider() {
        let geocoder = Arc::new(RecordingGeocoder::default());
        assert!(search(&geocoder).resolve("   ", BENGALURU).await.unwrap().is_empty());
        assert!(search(&geocoder).resolve("", BENGALURU).await.unwrap().is_empty());
        assert!(geocoder.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plain_text_goes_to_provider_trimmed() {
        let geocoder = Arc::new(RecordingGeocoder::default());
        search(&geocoder).resolve("  Indiranagar 100ft road ", BENGALURU).await.unwrap();
        assert_eq!(geocoder.queries.lock().unwrap()[0].0, "Indiranagar 100ft road");
    }

    #[tokio::test]
    async fn test_provider_failure() {
        let geocoder = Arc::new(RecordingGeocoder { fail: true, ..Default::default() });
        let s = search(&geocoder);
        assert!(matches!(s.resolve("MG Road", BENGALURU).await, Err(GeocodeError::Network(_))));
        assert!(s.resolve_or_empty("MG Road", BENGALURU).await.is_empty());
    }

    #[test]
    fn test_pattern_needs_word_boundaries() {
        assert!(plus_code_hit("XHCV+JRQQ", BENGALURU).is_none());
        assert!(plus_code_hit("ABCDEFGHIJ+JR", BENGALURU).is_none());
        assert!(plus_code_hit("(HXCV+JR)", BENGALURU).is_some());
    }
}
