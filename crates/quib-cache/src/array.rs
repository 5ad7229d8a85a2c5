//! 陣列緩存：以元素遮罩追蹤有效性

use quib_core::{NdArray, Path, PathStep, QuibError, Result, Value};

use crate::CacheStatus;

/// 同質 n 維陣列緩存
#[derive(Debug, Clone)]
pub struct ArrayCache {
    value: NdArray<f64>,
    /// true 代表該元素失效
    invalid: NdArray<bool>,
    /// 由序列緩存改建時保留原本的巢狀外形，取值時還原成序列
    nested: Option<Value>,
}

impl ArrayCache {
    pub fn new(template: NdArray<f64>) -> Self {
        let invalid = NdArray::full(template.shape(), true);
        Self {
            value: template,
            invalid,
            nested: None,
        }
    }

    /// 由序列緩存改建：既有的值、失效遮罩與原本的序列外形
    pub(crate) fn from_sequence(value: NdArray<f64>, invalid: NdArray<bool>, nested: Value) -> Result<Self> {
        if value.shape() != invalid.shape() {
            return Err(QuibError::CacheShapeMismatch);
        }
        Ok(Self {
            value,
            invalid,
            nested: Some(nested),
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// 形狀必須相同；由序列改建的緩存還要求同一種序列
    pub fn matches_result(&self, value: &Value) -> bool {
        if let Some(nested) = &self.nested {
            return std::mem::discriminant(nested) == std::mem::discriminant(value)
                && value.to_array().is_ok_and(|a| a.shape() == self.value.shape());
        }
        match value {
            Value::Array(a) => a.shape() == self.value.shape(),
            v if self.value.ndim() == 0 => v.as_f64().is_some(),
            _ => false,
        }
    }

    pub fn get_uncached_paths(&self, path: &Path) -> Result<Vec<Path>> {
        let region = path.region_mask(self.value.shape())?;
        let pending = region.and(&self.invalid)?;
        if !pending.any() {
            return Ok(Vec::new());
        }
        if pending.all() {
            return Ok(vec![Path::root()]);
        }
        Ok(vec![Path::new(vec![PathStep::mask(pending)])])
    }

    pub fn set_valid_value_at_path(&mut self, path: &Path, value: &Value) -> Result<()> {
        let incoming = value.to_array()?;
        if incoming.shape() != self.value.shape() {
            return Err(QuibError::CacheShapeMismatch);
        }
        let sel = path.select(self.value.shape())?;
        let picked = incoming.take(&sel.flat, vec![sel.flat.len()])?;
        self.value.scatter(&sel.flat, picked.data())?;
        self.invalid.scatter(&sel.flat, &vec![false; sel.flat.len()])?;
        Ok(())
    }

    pub fn set_invalid_at_path(&mut self, path: &Path) -> Result<()> {
        let region = path.region_mask(self.value.shape())?;
        self.invalid = self.invalid.or(&region)?;
        Ok(())
    }

    pub fn get_cache_status(&self) -> CacheStatus {
        let count = self.invalid.count_true();
        if count == 0 {
            CacheStatus::AllValid
        } else if count == self.invalid.len() {
            CacheStatus::AllInvalid
        } else {
            CacheStatus::Partial
        }
    }

    pub fn get_value(&self) -> Value {
        match &self.nested {
            Some(nested) => refill(nested, &mut self.value.data().iter().copied()),
            None => Value::from_array(self.value.clone()),
        }
    }
}

/// 依序列外形逐個填入葉節點的數值
fn refill(shape: &Value, data: &mut impl Iterator<Item = f64>) -> Value {
    match shape {
        Value::List(items) => Value::List(items.iter().map(|item| refill(item, &mut *data)).collect()),
        Value::Tuple(items) => Value::Tuple(items.iter().map(|item| refill(item, &mut *data)).collect()),
        Value::Array(a) => {
            let values: Vec<f64> = data.by_ref().take(a.len()).collect();
            NdArray::new(a.shape().to_vec(), values)
                .map(Value::Array)
                .unwrap_or_else(|_| shape.clone())
        }
        Value::Int(_) => Value::Int(data.next().unwrap_or_default() as i64),
        Value::Bool(_) => Value::Bool(data.next().unwrap_or_default() != 0.0),
        _ => Value::Float(data.next().unwrap_or_default()),
    }
}
