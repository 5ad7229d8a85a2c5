//! 值模型
//!
//! 節點計算出的值分成五種形狀族：純量／不透明值、序列、映射、
//! 同質 n 維陣列、記錄陣列（具名欄位，每個欄位是同形狀的陣列）。

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ndarray::NdArray;
use crate::path::Selection;
use crate::{QuibError, Result};

/// 值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(IndexMap<String, Value>),
    Array(NdArray<f64>),
    Record(RecordArray),
}

impl Value {
    /// 由浮點數建立序列
    pub fn float_list(items: &[f64]) -> Self {
        Value::List(items.iter().map(|v| Value::Float(*v)).collect())
    }

    /// 由形狀與資料建立陣列
    pub fn array(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        Ok(Value::Array(NdArray::new(shape, data)?))
    }

    /// 零維陣列轉回純量，其餘保持陣列
    pub fn from_array(array: NdArray<f64>) -> Self {
        if array.ndim() == 0 {
            Value::Float(array.data()[0])
        } else {
            Value::Array(array)
        }
    }

    /// 類型名稱（用於錯誤訊息與日誌）
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    /// 數值純量
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Array(a) if a.ndim() == 0 => Some(a.data()[0]),
            _ => None,
        }
    }

    /// 整數純量
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn is_numeric_scalar(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// 轉成數值陣列（巢狀序列必須規則）
    pub fn to_array(&self) -> Result<NdArray<f64>> {
        match self {
            Value::Array(a) => Ok(a.clone()),
            Value::List(items) | Value::Tuple(items) => {
                let subs = items
                    .iter()
                    .map(Value::to_array)
                    .collect::<Result<Vec<_>>>()?;
                let Some(first) = subs.first() else {
                    return Ok(NdArray::from_vec(Vec::new()));
                };
                if subs.iter().any(|s| s.shape() != first.shape()) {
                    return Err(QuibError::ShapeMismatch("不規則的巢狀序列".to_string()));
                }
                let mut shape = vec![subs.len()];
                shape.extend_from_slice(first.shape());
                let data = subs.into_iter().flat_map(NdArray::into_data).collect();
                NdArray::new(shape, data)
            }
            scalar => scalar.as_f64().map(NdArray::scalar).ok_or_else(|| {
                QuibError::TypeMismatch(format!("{} 無法轉為數值陣列", scalar.kind_name()))
            }),
        }
    }

    /// 位置定址用的形狀；無法以位置定址時為 `None`
    pub fn positional_shape(&self) -> Option<Vec<usize>> {
        match self {
            Value::Array(a) => Some(a.shape().to_vec()),
            Value::Record(r) => Some(r.shape().to_vec()),
            Value::List(items) | Value::Tuple(items) => Some(
                self.to_array()
                    .map(|a| a.shape().to_vec())
                    .unwrap_or_else(|_| vec![items.len()]),
            ),
            v if v.is_numeric_scalar() => Some(Vec::new()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            // 整數與浮點數按數值比較
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(NdArray::from_vec(v))
    }
}

impl From<NdArray<f64>> for Value {
    fn from(v: NdArray<f64>) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// 記錄陣列：每個具名欄位是同形狀的數值陣列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordArray {
    shape: Vec<usize>,
    fields: IndexMap<String, NdArray<f64>>,
}

impl RecordArray {
    /// 創建記錄陣列，所有欄位形狀必須一致
    pub fn new(fields: Vec<(String, NdArray<f64>)>) -> Result<Self> {
        let shape = fields
            .first()
            .map(|(_, a)| a.shape().to_vec())
            .ok_or_else(|| QuibError::ShapeMismatch("記錄陣列至少需要一個欄位".to_string()))?;
        if let Some((name, _)) = fields.iter().find(|(_, a)| a.shape() != shape.as_slice()) {
            return Err(QuibError::ShapeMismatch(format!("欄位 {:?} 的形狀不一致", name)));
        }
        Ok(Self {
            shape,
            fields: fields.into_iter().collect(),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn field(&self, name: &str) -> Option<&NdArray<f64>> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &IndexMap<String, NdArray<f64>> {
        &self.fields
    }

    /// 對所有欄位做同一個位置選取
    pub fn select(&self, sel: &Selection) -> Result<Self> {
        let fields = self
            .fields
            .iter()
            .map(|(name, a)| Ok((name.clone(), a.take(&sel.flat, sel.shape.clone())?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        Ok(Self {
            shape: sel.shape.clone(),
            fields,
        })
    }

    /// 單一元素（欄位名 → 純量）
    pub fn element(&self, flat: usize) -> IndexMap<String, Value> {
        self.fields
            .iter()
            .map(|(name, a)| (name.clone(), Value::Float(a.data()[flat])))
            .collect()
    }

    /// 替換整個欄位
    pub fn with_field(&self, name: &str, array: NdArray<f64>) -> Result<Self> {
        if !self.fields.contains_key(name) {
            return Err(QuibError::InvalidPath(format!("記錄陣列沒有欄位 {:?}", name)));
        }
        if array.shape() != self.shape.as_slice() {
            return Err(QuibError::ShapeMismatch(format!("欄位 {:?} 形狀不符", name)));
        }
        let mut out = self.clone();
        out.fields.insert(name.to_string(), array);
        Ok(out)
    }

    /// 在選取的位置寫入：新值可為記錄陣列、單一元素映射或數值
    pub fn scatter(&self, sel: &Selection, value: &Value) -> Result<Self> {
        let mut out = self.clone();
        for (name, array) in out.fields.iter_mut() {
            let incoming = match value {
                Value::Record(r) => r
                    .field(name)
                    .cloned()
                    .ok_or_else(|| QuibError::InvalidPath(format!("缺少欄位 {:?}", name)))?,
                Value::Map(m) => m
                    .get(name)
                    .ok_or_else(|| QuibError::InvalidPath(format!("缺少欄位 {:?}", name)))?
                    .to_array()?,
                other => other.to_array()?,
            };
            let incoming = incoming.broadcast_to(&sel.shape)?;
            array.scatter(&sel.flat, incoming.data())?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{get, set, Path, PathStep};

    fn points() -> RecordArray {
        RecordArray::new(vec![
            ("x".to_string(), NdArray::from_vec(vec![1.0, 2.0, 3.0])),
            ("y".to_string(), NdArray::from_vec(vec![10.0, 20.0, 30.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(Value::Int(7), Value::Float(7.0));
        assert_ne!(Value::Int(7), Value::Float(7.5));
        assert_ne!(Value::Bool(true), Value::Int(1));
    }

    #[test]
    fn test_to_array_nested() {
        let v = Value::List(vec![Value::float_list(&[1.0, 2.0]), Value::float_list(&[3.0, 4.0])]);
        let a = v.to_array().unwrap();
        assert_eq!(a.shape(), &[2, 2]);
        assert_eq!(a.data(), &[1.0, 2.0, 3.0, 4.0]);

        let ragged = Value::List(vec![Value::float_list(&[1.0]), Value::float_list(&[3.0, 4.0])]);
        assert!(ragged.to_array().is_err());
    }

    #[test]
    fn test_positional_shape() {
        assert_eq!(Value::Float(1.0).positional_shape(), Some(vec![]));
        assert_eq!(Value::float_list(&[1.0, 2.0]).positional_shape(), Some(vec![2]));
        assert_eq!(
            Value::List(vec![Value::from("a"), Value::None]).positional_shape(),
            Some(vec![2])
        );
        assert_eq!(Value::from("a").positional_shape(), None);
    }

    #[test]
    fn test_record_field_and_index_are_orthogonal() {
        let value = Value::Record(points());

        let by_field = get(&value, &Path::new(vec![PathStep::field("y"), PathStep::at(1)])).unwrap();
        let by_index = get(&value, &Path::new(vec![PathStep::at(1), PathStep::field("y")])).unwrap();
        assert_eq!(by_field, Value::Float(20.0));
        assert_eq!(by_index, Value::Float(20.0));
    }

    #[test]
    fn test_record_set_through_field() {
        let value = Value::Record(points());
        let updated = set(&value, &Path::new(vec![PathStep::field("x"), PathStep::at(0)]), Value::Float(-1.0)).unwrap();
        assert_eq!(get(&updated, &Path::new(vec![PathStep::field("x")])).unwrap(), Value::from(vec![-1.0, 2.0, 3.0]));
        assert_eq!(get(&updated, &Path::new(vec![PathStep::field("y")])).unwrap(), Value::from(vec![10.0, 20.0, 30.0]));
    }

    #[test]
    fn test_record_requires_uniform_shapes() {
        let err = RecordArray::new(vec![
            ("x".to_string(), NdArray::from_vec(vec![1.0])),
            ("y".to_string(), NdArray::from_vec(vec![1.0, 2.0])),
        ]);
        assert!(err.is_err());
    }
}
