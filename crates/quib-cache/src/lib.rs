//! # Quib Cache
//!
//! 以路徑粒度追蹤有效性的節點緩存
//!
//! 緩存按值的形狀族分成五種變體（由最特定到最一般）：記錄陣列、同質陣列、
//! 映射、序列、整體（不透明值）。每種變體都實作同一組操作。

pub mod array;
pub mod dirty_tracking;
pub mod holistic;
pub mod mapping;
pub mod record;
pub mod sequence;

use quib_core::{Indexer, Path, PathStep, Result, Value};

// Re-export 主要類型
pub use array::ArrayCache;
pub use dirty_tracking::DirtyTracker;
pub use holistic::HolisticCache;
pub use mapping::MappingCache;
pub use record::RecordCache;
pub use sequence::SequenceCache;

/// 緩存整體狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    AllValid,
    AllInvalid,
    Partial,
}

/// 節點緩存
#[derive(Debug, Clone)]
pub enum Cache {
    Holistic(HolisticCache),
    Mapping(MappingCache),
    Sequence(SequenceCache),
    Array(ArrayCache),
    Record(RecordCache),
}

impl Cache {
    /// 依結果的形狀族創建緩存（全部失效，只保留形狀範本）
    pub fn create(result: &Value) -> Self {
        match result {
            Value::Record(r) => Cache::Record(RecordCache::new(r.clone())),
            Value::Array(a) => Cache::Array(ArrayCache::new(a.clone())),
            Value::Map(m) => Cache::Mapping(MappingCache::new(m.clone())),
            Value::List(items) => Cache::Sequence(SequenceCache::new(items.clone(), false)),
            Value::Tuple(items) => Cache::Sequence(SequenceCache::new(items.clone(), true)),
            other => Cache::Holistic(HolisticCache::new(other.clone())),
        }
    }

    /// 緩存的形狀範本是否與結果相容
    pub fn matches_result(&self, value: &Value) -> bool {
        match self {
            Cache::Holistic(c) => c.matches_result(value),
            Cache::Mapping(c) => c.matches_result(value),
            Cache::Sequence(c) => c.matches_result(value),
            Cache::Array(c) => c.matches_result(value),
            Cache::Record(c) => c.matches_result(value),
        }
    }

    /// 路徑內尚未有效的最小子路徑集合；空集合代表路徑內全部有效
    pub fn get_uncached_paths(&mut self, path: &Path) -> Result<Vec<Path>> {
        self.ensure_representation(path)?;
        match self {
            Cache::Holistic(c) => c.get_uncached_paths(path),
            Cache::Mapping(c) => c.get_uncached_paths(path),
            Cache::Sequence(c) => c.get_uncached_paths(path),
            Cache::Array(c) => c.get_uncached_paths(path),
            Cache::Record(c) => c.get_uncached_paths(path),
        }
    }

    /// 把 `value`（完整的最新結果）在路徑處的內容存入並標為有效
    pub fn set_valid_value_at_path(&mut self, path: &Path, value: &Value) -> Result<()> {
        self.ensure_representation(path)?;
        match self {
            Cache::Holistic(c) => c.set_valid_value_at_path(path, value),
            Cache::Mapping(c) => c.set_valid_value_at_path(path, value),
            Cache::Sequence(c) => c.set_valid_value_at_path(path, value),
            Cache::Array(c) => c.set_valid_value_at_path(path, value),
            Cache::Record(c) => c.set_valid_value_at_path(path, value),
        }
    }

    /// 把路徑處標為失效
    pub fn set_invalid_at_path(&mut self, path: &Path) -> Result<()> {
        self.ensure_representation(path)?;
        match self {
            Cache::Holistic(c) => c.set_invalid_at_path(path),
            Cache::Mapping(c) => c.set_invalid_at_path(path),
            Cache::Sequence(c) => c.set_invalid_at_path(path),
            Cache::Array(c) => c.set_invalid_at_path(path),
            Cache::Record(c) => c.set_invalid_at_path(path),
        }
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        match self {
            Cache::Holistic(c) => c.get_cache_status(),
            Cache::Mapping(c) => c.get_cache_status(),
            Cache::Sequence(c) => c.get_cache_status(),
            Cache::Array(c) => c.get_cache_status(),
            Cache::Record(c) => c.get_cache_status(),
        }
    }

    /// 目前存儲的值（失效區域保留上一次的內容）
    pub fn get_value(&self) -> Value {
        match self {
            Cache::Holistic(c) => c.get_value(),
            Cache::Mapping(c) => c.get_value(),
            Cache::Sequence(c) => c.get_value(),
            Cache::Array(c) => c.get_value(),
            Cache::Record(c) => c.get_value(),
        }
    }

    /// 是否只支援整體有效／整體失效
    pub fn is_holistic(&self) -> bool {
        matches!(self, Cache::Holistic(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Cache::Holistic(_) => "holistic",
            Cache::Mapping(_) => "mapping",
            Cache::Sequence(_) => "sequence",
            Cache::Array(_) => "array",
            Cache::Record(_) => "record",
        }
    }

    /// 序列緩存被多軸索引定址時，改建成陣列緩存並帶上原有的失效區域
    fn ensure_representation(&mut self, path: &Path) -> Result<()> {
        let Cache::Sequence(seq) = self else {
            return Ok(());
        };
        let needs_array = matches!(
            path.steps().first(),
            Some(PathStep::Index(indexers))
                if indexers.len() > 1
                    || matches!(indexers.as_slice(), [Indexer::Mask(m)] if m.ndim() > 1)
        );
        if needs_array {
            tracing::debug!("序列緩存被多軸索引定址，改建為陣列緩存");
            *self = Cache::Array(seq.to_array_cache()?);
        }
        Ok(())
    }
}
