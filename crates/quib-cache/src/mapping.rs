//! 映射緩存：按鍵追蹤有效性

use std::collections::HashSet;

use indexmap::IndexMap;
use quib_core::{Path, PathStep, QuibError, Result, Value};

use crate::CacheStatus;

/// 映射緩存
#[derive(Debug, Clone)]
pub struct MappingCache {
    entries: IndexMap<String, Value>,
    invalid: HashSet<String>,
    /// 空映射沒有鍵可追蹤，以此旗標代表整體狀態
    empty_valid: bool,
}

impl MappingCache {
    pub fn new(template: IndexMap<String, Value>) -> Self {
        let invalid = template.keys().cloned().collect();
        Self {
            entries: template,
            invalid,
            empty_valid: false,
        }
    }

    /// 鍵集合必須相同
    pub fn matches_result(&self, value: &Value) -> bool {
        match value {
            Value::Map(m) => m.len() == self.entries.len() && m.keys().all(|k| self.entries.contains_key(k)),
            _ => false,
        }
    }

    pub fn get_uncached_paths(&self, path: &Path) -> Result<Vec<Path>> {
        match path.split_first() {
            None => {
                if self.entries.is_empty() {
                    return Ok(if self.empty_valid { Vec::new() } else { vec![Path::root()] });
                }
                if self.invalid.len() == self.entries.len() {
                    return Ok(vec![Path::root()]);
                }
                Ok(self
                    .entries
                    .keys()
                    .filter(|k| self.invalid.contains(*k))
                    .map(|k| Path::field(k.clone()))
                    .collect())
            }
            // 鍵底下任何深度的讀取都以整個鍵為單位重算
            Some((PathStep::Field(key), _)) => {
                if self.invalid.contains(key) || !self.entries.contains_key(key) {
                    Ok(vec![Path::field(key.clone())])
                } else {
                    Ok(Vec::new())
                }
            }
            Some((step, _)) => Err(QuibError::InvalidPath(format!("映射無法以 {} 定址", step))),
        }
    }

    pub fn set_valid_value_at_path(&mut self, path: &Path, value: &Value) -> Result<()> {
        let Value::Map(incoming) = value else {
            return Err(QuibError::TypeMismatch(format!("映射緩存收到 {}", value.kind_name())));
        };
        match path.split_first() {
            None => {
                self.entries = incoming.clone();
                self.invalid.clear();
                self.empty_valid = true;
            }
            Some((PathStep::Field(key), rest)) => {
                let entry = incoming
                    .get(key)
                    .ok_or_else(|| QuibError::InvalidPath(format!("結果沒有鍵 {:?}", key)))?;
                self.entries.insert(key.clone(), entry.clone());
                // 只計算了鍵底下的一部分時，整個鍵仍視為失效
                if rest.is_empty() {
                    self.invalid.remove(key);
                }
            }
            Some((step, _)) => {
                return Err(QuibError::InvalidPath(format!("映射無法以 {} 定址", step)));
            }
        }
        Ok(())
    }

    pub fn set_invalid_at_path(&mut self, path: &Path) -> Result<()> {
        match path.split_first() {
            None => {
                self.invalid = self.entries.keys().cloned().collect();
                self.empty_valid = false;
            }
            Some((PathStep::Field(key), _)) => {
                if self.entries.contains_key(key) {
                    self.invalid.insert(key.clone());
                }
            }
            Some((step, _)) => {
                return Err(QuibError::InvalidPath(format!("映射無法以 {} 定址", step)));
            }
        }
        Ok(())
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        if self.entries.is_empty() {
            return if self.empty_valid { CacheStatus::AllValid } else { CacheStatus::AllInvalid };
        }
        match self.invalid.len() {
            0 => CacheStatus::AllValid,
            n if n == self.entries.len() => CacheStatus::AllInvalid,
            _ => CacheStatus::Partial,
        }
    }

    pub fn get_value(&self) -> Value {
        Value::Map(self.entries.clone())
    }
}
