//! 記錄陣列緩存：每個欄位各自一張失效遮罩

use indexmap::IndexMap;
use quib_core::{NdArray, Path, PathStep, QuibError, RecordArray, Result, Value};

use crate::CacheStatus;

/// 記錄陣列緩存
#[derive(Debug, Clone)]
pub struct RecordCache {
    value: RecordArray,
    invalid: IndexMap<String, NdArray<bool>>,
}

impl RecordCache {
    pub fn new(template: RecordArray) -> Self {
        let invalid = template
            .field_names()
            .map(|name| (name.to_string(), NdArray::full(template.shape(), true)))
            .collect();
        Self {
            value: template,
            invalid,
        }
    }

    /// 形狀與欄位名稱必須相同
    pub fn matches_result(&self, value: &Value) -> bool {
        match value {
            Value::Record(r) => {
                r.shape() == self.value.shape() && r.field_names().eq(self.value.field_names())
            }
            _ => false,
        }
    }

    /// 路徑涉及的欄位與位置遮罩
    fn resolve(&self, path: &Path) -> Result<(Vec<String>, NdArray<bool>)> {
        let (positional, fields) = path.split_fields();
        let region = positional.region_mask(self.value.shape())?;
        let names = match fields.as_slice() {
            [] => self.invalid.keys().cloned().collect(),
            [PathStep::Field(name)] => {
                if !self.invalid.contains_key(name) {
                    return Err(QuibError::InvalidPath(format!("記錄陣列沒有欄位 {:?}", name)));
                }
                vec![name.clone()]
            }
            _ => {
                return Err(QuibError::InvalidPath(format!("記錄陣列路徑 {} 有多個欄位", path)));
            }
        };
        Ok((names, region))
    }

    pub fn get_uncached_paths(&self, path: &Path) -> Result<Vec<Path>> {
        let (names, region) = self.resolve(path)?;
        let pending: Vec<(String, NdArray<bool>)> = names
            .into_iter()
            .filter_map(|name| {
                let mask = self.invalid.get(&name)?.and(&region).ok()?;
                mask.any().then_some((name, mask))
            })
            .collect();
        if pending.len() == self.invalid.len() && pending.iter().all(|(_, m)| m.all()) {
            return Ok(vec![Path::root()]);
        }
        Ok(pending
            .into_iter()
            .map(|(name, mask)| {
                let path = Path::field(name);
                if mask.all() {
                    path
                } else {
                    path.with(PathStep::mask(mask))
                }
            })
            .collect())
    }

    pub fn set_valid_value_at_path(&mut self, path: &Path, value: &Value) -> Result<()> {
        let Value::Record(incoming) = value else {
            return Err(QuibError::TypeMismatch(format!("記錄緩存收到 {}", value.kind_name())));
        };
        if !self.matches_result(value) {
            return Err(QuibError::CacheShapeMismatch);
        }
        let (names, region) = self.resolve(path)?;
        let flat = region.true_indices();
        let mut updated = self.value.clone();
        for name in &names {
            let source = incoming.field(name).ok_or(QuibError::CacheShapeMismatch)?;
            let mut column = updated.field(name).cloned().ok_or(QuibError::CacheShapeMismatch)?;
            let picked = source.take(&flat, vec![flat.len()])?;
            column.scatter(&flat, picked.data())?;
            updated = updated.with_field(name, column)?;
            if let Some(mask) = self.invalid.get_mut(name) {
                mask.scatter(&flat, &vec![false; flat.len()])?;
            }
        }
        self.value = updated;
        Ok(())
    }

    pub fn set_invalid_at_path(&mut self, path: &Path) -> Result<()> {
        let (names, region) = self.resolve(path)?;
        for name in names {
            if let Some(mask) = self.invalid.get_mut(&name) {
                *mask = mask.or(&region)?;
            }
        }
        Ok(())
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        let invalid: usize = self.invalid.values().map(NdArray::count_true).sum();
        let total: usize = self.invalid.values().map(NdArray::len).sum();
        if invalid == 0 {
            CacheStatus::AllValid
        } else if invalid == total {
            CacheStatus::AllInvalid
        } else {
            CacheStatus::Partial
        }
    }

    pub fn get_value(&self) -> Value {
        Value::Record(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> RecordArray {
        RecordArray::new(vec![
            ("x".to_string(), NdArray::from_vec(vec![1.0, 2.0, 3.0])),
            ("y".to_string(), NdArray::from_vec(vec![10.0, 20.0, 30.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_record_field_granularity() {
        let mut cache = RecordCache::new(points());
        let value = Value::Record(points());
        cache.set_valid_value_at_path(&Path::field("x"), &value).unwrap();

        assert_eq!(cache.get_cache_status(), CacheStatus::Partial);
        assert!(cache.get_uncached_paths(&Path::field("x")).unwrap().is_empty());
        assert_eq!(cache.get_uncached_paths(&Path::root()).unwrap(), vec![Path::field("y")]);
    }

    #[test]
    fn test_record_index_then_field_is_orthogonal() {
        let mut cache = RecordCache::new(points());
        let value = Value::Record(points());
        cache.set_valid_value_at_path(&Path::root(), &value).unwrap();

        // 索引與欄位順序可互換
        let path = Path::new(vec![PathStep::at(1), PathStep::field("y")]);
        cache.set_invalid_at_path(&path).unwrap();

        let uncached = cache.get_uncached_paths(&Path::root()).unwrap();
        let mask = NdArray::from_indices(&[3], &[1]);
        assert_eq!(
            uncached,
            vec![Path::field("y").with(PathStep::mask(mask))]
        );
        assert!(cache.get_uncached_paths(&Path::field("x")).unwrap().is_empty());
    }

    #[test]
    fn test_record_unknown_field() {
        let cache = RecordCache::new(points());
        assert!(cache.get_uncached_paths(&Path::field("z")).is_err());
    }

    #[test]
    fn test_new_record_cache_reports_root() {
        let cache = RecordCache::new(points());
        assert_eq!(cache.get_uncached_paths(&Path::root()).unwrap(), vec![Path::root()]);
        assert_eq!(cache.get_cache_status(), CacheStatus::AllInvalid);
    }
}
