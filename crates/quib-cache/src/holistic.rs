//! 整體緩存：不透明值，只有全部有效或全部失效

use quib_core::{Path, QuibError, Result, Value};

use crate::CacheStatus;

/// 整體緩存
#[derive(Debug, Clone)]
pub struct HolisticCache {
    value: Value,
    valid: bool,
}

impl HolisticCache {
    pub fn new(template: Value) -> Self {
        Self {
            value: template,
            valid: false,
        }
    }

    /// 不透明值只比較類型
    pub fn matches_result(&self, value: &Value) -> bool {
        std::mem::discriminant(&self.value) == std::mem::discriminant(value)
    }

    pub fn get_uncached_paths(&self, path: &Path) -> Result<Vec<Path>> {
        Self::check_root(path)?;
        Ok(if self.valid { Vec::new() } else { vec![Path::root()] })
    }

    pub fn set_valid_value_at_path(&mut self, path: &Path, value: &Value) -> Result<()> {
        Self::check_root(path)?;
        self.value = value.clone();
        self.valid = true;
        Ok(())
    }

    pub fn set_invalid_at_path(&mut self, path: &Path) -> Result<()> {
        Self::check_root(path)?;
        self.valid = false;
        Ok(())
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        if self.valid {
            CacheStatus::AllValid
        } else {
            CacheStatus::AllInvalid
        }
    }

    pub fn get_value(&self) -> Value {
        self.value.clone()
    }

    fn check_root(path: &Path) -> Result<()> {
        if !path.is_empty() {
            return Err(QuibError::CacheStatus(format!(
                "整體緩存不支援子路徑 {}",
                path
            )));
        }
        Ok(())
    }
}
