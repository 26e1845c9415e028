/// Configuration for a page or extent cache.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}
