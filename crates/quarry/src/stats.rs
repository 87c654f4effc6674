use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Counters shared by every session of a factory.
///
/// Tests assert statement counts against these; they are never reset
/// implicitly.
#[derive(Debug, Default)]
pub struct Statistics {
    prepare_statement_count: AtomicU64,
    query_execution_count: AtomicU64,
    entity_load_count: AtomicU64,
    collection_load_count: AtomicU64,
    flush_count: AtomicU64,
    second_level_cache_hit_count: AtomicU64,
    second_level_cache_miss_count: AtomicU64,
    second_level_cache_put_count: AtomicU64,
}

/// Observes (and may rewrite) every SQL statement before it is executed.
pub trait StatementInspector: Send + Sync {
    /// Returns replacement SQL, or `None` to execute `sql` unchanged.
    fn inspect(&self, sql: &str) -> Option<String>;
}

impl Statistics {
    /// Statements sent to the database.
    pub fn prepare_statement_count(&self) -> u64 {
        self.prepare_statement_count.load(Relaxed)
    }

    /// Queries executed through `Query::list` and friends.
    pub fn query_execution_count(&self) -> u64 {
        self.query_execution_count.load(Relaxed)
    }

    /// Entity instances hydrated from database rows.
    pub fn entity_load_count(&self) -> u64 {
        self.entity_load_count.load(Relaxed)
    }

    /// Collections initialized from database rows.
    pub fn collection_load_count(&self) -> u64 {
        self.collection_load_count.load(Relaxed)
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Relaxed)
    }

    pub fn second_level_cache_hit_count(&self) -> u64 {
        self.second_level_cache_hit_count.load(Relaxed)
    }

    pub fn second_level_cache_miss_count(&self) -> u64 {
        self.second_level_cache_miss_count.load(Relaxed)
    }

    pub fn second_level_cache_put_count(&self) -> u64 {
        self.second_level_cache_put_count.load(Relaxed)
    }

    pub fn clear(&self) {
        for counter in [
            &self.prepare_statement_count,
            &self.query_execution_count,
            &self.entity_load_count,
            &self.collection_load_count,
            &self.flush_count,
            &self.second_level_cache_hit_count,
            &self.second_level_cache_miss_count,
            &self.second_level_cache_put_count,
        ] {
            counter.store(0, Relaxed);
        }
    }

    pub(crate) fn statement_prepared(&self) {
        self.prepare_statement_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn query_executed(&self) {
        self.query_execution_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn entity_loaded(&self) {
        self.entity_load_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn collection_loaded(&self) {
        self.collection_load_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn flushed(&self) {
        self.flush_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn cache_hit(&self) {
        self.second_level_cache_hit_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn cache_miss(&self) {
        self.second_level_cache_miss_count.fetch_add(1, Relaxed);
    }

    pub(crate) fn cache_put(&self) {
        self.second_level_cache_put_count.fetch_add(1, Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_resets_every_counter() {
        let stats = Statistics::default();
        stats.statement_prepared();
        stats.statement_prepared();
        stats.cache_hit();
        assert_eq!(stats.prepare_statement_count(), 2);
        assert_eq!(stats.second_level_cache_hit_count(), 1);

        stats.clear();
        assert_eq!(stats.prepare_statement_count(), 0);
        assert_eq!(stats.second_level_cache_hit_count(), 0);
    }
}
