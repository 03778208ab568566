use crate::config::EngineConfig;
use crate::location::{AddressStore, GeocodeResult, GeocodingProvider, HybridSearch};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct AppState {
    pub config: EngineConfig,
    pub geocoder: Arc<dyn GeocodingProvider>,
    pub search: HybridSearch,
    pub store: Arc<dyn AddressStore>,
    pub reverse_cache: Mutex<ReverseCache>,
}

impl AppState {
    pub fn new(config: EngineConfig, geocoder: Arc<dyn GeocodingProvider>, store: Arc<dyn AddressStore>) -> Self {
        Self {
            config,
            search: HybridSearch::new(geocoder.clone()),
            geocoder,
            store,
            reverse_cache: Mutex::new(ReverseCache::default()),
        }
    }

    pub fn reverse_cache(&self) -> MutexGuard<'_, ReverseCache> {
        self.reverse_cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reverse-geocode answers keyed by full plus code.
///
/// A ten-digit cell is about 14 m across, so nearby pins share an entry.
/// Cleared wholesale when full.
#[derive(Default)]
pub struct ReverseCache {
    entries: HashMap<String, GeocodeResult>,
}

const MAX_ENTRIES: usize = 512;

impl ReverseCache {
    pub fn get(&self, code: &str) -> Option<GeocodeResult> {
        self.entries.get(code).cloned()
    }

    pub fn insert(&mut self, code: String, result: GeocodeResult) {
        if self.entries.len() >= MAX_ENTRIES {
            self.entries.clear();
        }
        self.entries.insert(code, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
