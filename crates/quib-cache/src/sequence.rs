//! 序列緩存：按元素追蹤有效性

use quib_core::{Indexer, NdArray, Path, PathStep, QuibError, Result, Selection, Value};

use crate::array::ArrayCache;
use crate::CacheStatus;

/// 序列（列表或元組）緩存
#[derive(Debug, Clone)]
pub struct SequenceCache {
    items: Vec<Value>,
    valid: Vec<bool>,
    is_tuple: bool,
    /// 空序列沒有元素可追蹤，以此旗標代表整體狀態
    empty_valid: bool,
}

impl SequenceCache {
    pub fn new(template: Vec<Value>, is_tuple: bool) -> Self {
        let valid = vec![false; template.len()];
        Self {
            items: template,
            valid,
            is_tuple,
            empty_valid: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 種類（列表／元組）與長度必須相同
    pub fn matches_result(&self, value: &Value) -> bool {
        match value {
            Value::List(items) => !self.is_tuple && items.len() == self.items.len(),
            Value::Tuple(items) => self.is_tuple && items.len() == self.items.len(),
            _ => false,
        }
    }

    /// 第一步選中的元素位置
    fn positions(&self, step: &PathStep) -> Result<Vec<usize>> {
        match step {
            PathStep::Index(indexers) if indexers.len() == 1 => {
                Ok(Selection::resolve(&[self.items.len()], indexers)?.flat)
            }
            other => Err(QuibError::InvalidPath(format!("序列無法以 {} 定址", other))),
        }
    }

    fn as_paths(&self, invalid: Vec<usize>) -> Vec<Path> {
        match invalid.as_slice() {
            [] => Vec::new(),
            [single] => vec![Path::at(*single as isize)],
            many => vec![Path::new(vec![PathStep::fancy(
                many.iter().map(|&i| i as isize).collect(),
            )])],
        }
    }

    pub fn get_uncached_paths(&self, path: &Path) -> Result<Vec<Path>> {
        let Some((step, rest)) = path.split_first() else {
            if self.items.is_empty() {
                return Ok(if self.empty_valid { Vec::new() } else { vec![Path::root()] });
            }
            if self.valid.iter().all(|v| !v) {
                return Ok(vec![Path::root()]);
            }
            let invalid = (0..self.items.len()).filter(|&i| !self.valid[i]).collect();
            return Ok(self.as_paths(invalid));
        };
        let invalid: Vec<usize> = self
            .positions(step)?
            .into_iter()
            .filter(|&i| !self.valid[i])
            .collect();
        // 深入到單一元素內部時，失效的話整個元素都要重算
        if !rest.is_empty() && matches!(step, PathStep::Index(ix) if matches!(ix.as_slice(), [Indexer::At(_)])) {
            return Ok(if invalid.is_empty() { Vec::new() } else { vec![Path::new(vec![step.clone()])] });
        }
        Ok(self.as_paths(invalid))
    }

    pub fn set_valid_value_at_path(&mut self, path: &Path, value: &Value) -> Result<()> {
        let incoming = match value {
            Value::List(items) | Value::Tuple(items) if self.matches_result(value) => items,
            _ => return Err(QuibError::CacheShapeMismatch),
        };
        match path.split_first() {
            None => {
                self.items = incoming.clone();
                self.valid = vec![true; incoming.len()];
                self.empty_valid = true;
            }
            Some((step, rest)) => {
                for i in self.positions(step)? {
                    self.items[i] = incoming[i].clone();
                    // 只算了元素內部的一部分時，元素仍視為失效
                    if rest.is_empty() {
                        self.valid[i] = true;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn set_invalid_at_path(&mut self, path: &Path) -> Result<()> {
        match path.split_first() {
            None => {
                self.valid.iter_mut().for_each(|v| *v = false);
                self.empty_valid = false;
            }
            Some((step, _)) => {
                for i in self.positions(step)? {
                    self.valid[i] = false;
                }
            }
        }
        Ok(())
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        if self.items.is_empty() {
            return if self.empty_valid { CacheStatus::AllValid } else { CacheStatus::AllInvalid };
        }
        let valid = self.valid.iter().filter(|v| **v).count();
        match valid {
            0 => CacheStatus::AllInvalid,
            n if n == self.items.len() => CacheStatus::AllValid,
            _ => CacheStatus::Partial,
        }
    }

    pub fn get_value(&self) -> Value {
        if self.is_tuple {
            Value::Tuple(self.items.clone())
        } else {
            Value::List(self.items.clone())
        }
    }

    /// 改建為陣列緩存；每個失效元素對應的整塊子陣列都標為失效
    pub fn to_array_cache(&self) -> Result<ArrayCache> {
        let nested = self.get_value();
        let value = nested.to_array()?;
        let block: usize = value.shape().iter().skip(1).product();
        let invalid_flat: Vec<usize> = (0..self.items.len())
            .filter(|&i| !self.valid[i])
            .flat_map(|i| i * block..(i + 1) * block)
            .collect();
        let invalid = NdArray::from_indices(value.shape(), &invalid_flat);
        ArrayCache::from_sequence(value, invalid, nested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> Value {
        Value::float_list(&[1.0, 2.0, 3.0])
    }

    fn cache() -> SequenceCache {
        let Value::List(items) = list() else { unreachable!() };
        SequenceCache::new(items, false)
    }

    #[test]
    fn test_sequence_element_validity() {
        let mut c = cache();
        assert_eq!(c.get_uncached_paths(&Path::root()).unwrap(), vec![Path::root()]);

        c.set_valid_value_at_path(&Path::at(0), &list()).unwrap();
        assert_eq!(c.get_cache_status(), CacheStatus::Partial);
        assert!(c.get_uncached_paths(&Path::at(0)).unwrap().is_empty());
        assert_eq!(
            c.get_uncached_paths(&Path::root()).unwrap(),
            vec![Path::new(vec![PathStep::fancy(vec![1, 2])])]
        );

        c.set_valid_value_at_path(&Path::new(vec![PathStep::range(1, 3)]), &list()).unwrap();
        assert_eq!(c.get_cache_status(), CacheStatus::AllValid);
        assert_eq!(c.get_value(), list());
    }

    #[test]
    fn test_sequence_single_invalid_is_index() {
        let mut c = cache();
        c.set_valid_value_at_path(&Path::root(), &list()).unwrap();
        c.set_invalid_at_path(&Path::at(-1)).unwrap();
        assert_eq!(c.get_uncached_paths(&Path::root()).unwrap(), vec![Path::at(2)]);
    }

    #[test]
    fn test_sequence_deeper_path_reports_whole_element() {
        let nested = Value::List(vec![Value::float_list(&[1.0, 2.0]), Value::float_list(&[3.0, 4.0])]);
        let Value::List(items) = nested.clone() else { unreachable!() };
        let mut c = SequenceCache::new(items, false);

        let deep = Path::new(vec![PathStep::at(0), PathStep::at(1)]);
        c.set_valid_value_at_path(&deep, &nested).unwrap();
        // 深層讀取回報整個元素
        assert_eq!(c.get_uncached_paths(&deep).unwrap(), vec![Path::at(0)]);

        c.set_valid_value_at_path(&Path::at(0), &nested).unwrap();
        assert!(c.get_uncached_paths(&deep).unwrap().is_empty());
        assert_eq!(c.get_uncached_paths(&Path::root()).unwrap(), vec![Path::at(1)]);
    }

    #[test]
    fn test_sequence_kind_must_match() {
        let c = cache();
        assert!(c.matches_result(&list()));
        assert!(!c.matches_result(&Value::Tuple(vec![Value::Float(1.0); 3])));
        assert!(!c.matches_result(&Value::float_list(&[1.0])));
    }

    #[test]
    fn test_empty_sequence() {
        let mut c = SequenceCache::new(Vec::new(), false);
        assert_eq!(c.get_cache_status(), CacheStatus::AllInvalid);
        c.set_valid_value_at_path(&Path::root(), &Value::List(Vec::new())).unwrap();
        assert!(c.get_uncached_paths(&Path::root()).unwrap().is_empty());
    }
}
