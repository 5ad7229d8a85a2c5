//! 路徑模型：對值的子區域的統一定址
//!
//! 路徑是一串步驟，每一步是位置索引（整數、切片、布林遮罩、花式索引，
//! 可以多軸組合）或欄位名稱。空路徑代表整個值。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ndarray::NdArray;
use crate::value::Value;
use crate::{QuibError, Result};

/// 切片（語義同 Python 的 `start:stop:step`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: Option<isize>,
}

impl Range {
    pub fn new(start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> Self {
        Self { start, stop, step }
    }

    /// 整條軸
    pub fn full() -> Self {
        Self::new(None, None, None)
    }

    /// 在長度為 `len` 的軸上展開成索引
    pub fn indices(&self, len: usize) -> Result<Vec<usize>> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(QuibError::InvalidPath("切片步長不可為 0".to_string()));
        }
        let len = len as isize;
        let mut out = Vec::new();
        if step > 0 {
            let clamp = |v: isize| {
                let v = if v < 0 { v + len } else { v };
                v.clamp(0, len)
            };
            let mut i = self.start.map(clamp).unwrap_or(0);
            let stop = self.stop.map(clamp).unwrap_or(len);
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let clamp = |v: isize| {
                let v = if v < 0 { v + len } else { v };
                v.clamp(-1, len - 1)
            };
            let mut i = self.start.map(clamp).unwrap_or(len - 1);
            let stop = self.stop.map(clamp).unwrap_or(-1);
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }
}

/// 單一軸（或整個陣列）上的索引方式
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indexer {
    /// 整數索引（可為負），會消去該軸
    At(isize),
    /// 切片
    Range(Range),
    /// 花式索引（整數陣列）
    Fancy(Vec<isize>),
    /// 布林遮罩：單獨出現時形狀與整個被定址的陣列相同；
    /// 與其他索引並列時為一維，對應單一軸
    Mask(NdArray<bool>),
}

/// 路徑中的一步
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStep {
    /// 位置索引（多軸時為元組索引）
    Index(Vec<Indexer>),
    /// 欄位名稱或映射鍵
    Field(String),
}

impl PathStep {
    pub fn at(index: isize) -> Self {
        PathStep::Index(vec![Indexer::At(index)])
    }

    pub fn range(start: isize, stop: isize) -> Self {
        PathStep::Index(vec![Indexer::Range(Range::new(Some(start), Some(stop), None))])
    }

    pub fn slice(range: Range) -> Self {
        PathStep::Index(vec![Indexer::Range(range)])
    }

    pub fn fancy(indices: Vec<isize>) -> Self {
        PathStep::Index(vec![Indexer::Fancy(indices)])
    }

    pub fn mask(mask: NdArray<bool>) -> Self {
        PathStep::Index(vec![Indexer::Mask(mask)])
    }

    pub fn multi(indexers: Vec<Indexer>) -> Self {
        PathStep::Index(indexers)
    }

    pub fn field(name: impl Into<String>) -> Self {
        PathStep::Field(name.into())
    }

    /// 此步是否為欄位名稱（而非位置索引）
    pub fn references_field(&self) -> bool {
        matches!(self, PathStep::Field(_))
    }

    /// 單一整數、切片等可以直接用於一般序列的索引
    pub fn is_sequence_positional(&self) -> bool {
        matches!(
            self,
            PathStep::Index(ix) if matches!(ix.as_slice(), [Indexer::At(_)] | [Indexer::Range(_)])
        )
    }

    fn canonical(&self) -> PathStep {
        match self {
            PathStep::Index(indexers) => PathStep::Index(
                indexers
                    .iter()
                    .map(|ix| match ix {
                        Indexer::Range(Range {
                            start: Some(start),
                            stop: Some(stop),
                            step: None | Some(1),
                        }) if *start >= 0 && *stop == *start + 1 => Indexer::At(*start),
                        Indexer::Range(r) => Indexer::Range(Range::new(r.start, r.stop, Some(r.step.unwrap_or(1)))),
                        Indexer::Fancy(v) if v.len() == 1 => Indexer::At(v[0]),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            PathStep::Field(name) => PathStep::Field(name.clone()),
        }
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Field(name) => write!(f, "[{:?}]", name),
            PathStep::Index(indexers) => {
                let parts: Vec<String> = indexers
                    .iter()
                    .map(|ix| match ix {
                        Indexer::At(i) => i.to_string(),
                        Indexer::Range(r) => {
                            let fmt_opt = |v: Option<isize>| v.map(|v| v.to_string()).unwrap_or_default();
                            match r.step {
                                Some(step) => format!("{}:{}:{}", fmt_opt(r.start), fmt_opt(r.stop), step),
                                None => format!("{}:{}", fmt_opt(r.start), fmt_opt(r.stop)),
                            }
                        }
                        Indexer::Fancy(v) => format!("{:?}", v),
                        Indexer::Mask(m) => format!("mask{:?}", m.shape()),
                    })
                    .collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// 路徑
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathStep>);

impl Path {
    /// 空路徑（整個值）
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(steps: Vec<PathStep>) -> Self {
        Self(steps)
    }

    /// 單一整數索引的路徑
    pub fn at(index: isize) -> Self {
        Self(vec![PathStep::at(index)])
    }

    /// 單一欄位的路徑
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![PathStep::field(name)])
    }

    /// 建構器模式：追加一步
    pub fn with(mut self, step: PathStep) -> Self {
        self.0.push(step);
        self
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, step: PathStep) {
        self.0.push(step);
    }

    /// 第一步與剩餘路徑
    pub fn split_first(&self) -> Option<(&PathStep, Path)> {
        self.0
            .split_first()
            .map(|(first, rest)| (first, Path(rest.to_vec())))
    }

    /// 在前面加上一步
    pub fn prepend(&self, step: PathStep) -> Path {
        let mut steps = Vec::with_capacity(self.0.len() + 1);
        steps.push(step);
        steps.extend(self.0.iter().cloned());
        Path(steps)
    }

    /// 串接另一條路徑
    pub fn concat(&self, other: &Path) -> Path {
        let mut steps = self.0.clone();
        steps.extend(other.0.iter().cloned());
        Path(steps)
    }

    /// 拆成位置部分與欄位部分（欄位與索引可交換，欄位可延後處理）
    pub fn split_fields(&self) -> (Path, Vec<PathStep>) {
        let (fields, positional): (Vec<PathStep>, Vec<PathStep>) =
            self.0.iter().cloned().partition(|s| s.references_field());
        (Path(positional), fields)
    }

    /// 正規形式：結構上等價的步驟（如整數索引與單元素切片）得到同一個鍵
    pub fn canonical(&self) -> Path {
        Path(self.0.iter().map(PathStep::canonical).collect())
    }

    /// 在形狀為 `shape` 的陣列上解析純位置路徑
    pub fn select(&self, shape: &[usize]) -> Result<Selection> {
        let mut current = Selection::identity(shape);
        for step in &self.0 {
            match step {
                PathStep::Index(indexers) => {
                    let inner = Selection::resolve(&current.shape, indexers)?;
                    current = Selection {
                        flat: inner.flat.iter().map(|&i| current.flat[i]).collect(),
                        shape: inner.shape,
                    };
                }
                PathStep::Field(name) => {
                    return Err(QuibError::InvalidPath(format!(
                        "陣列位置路徑中不可出現欄位 {:?}",
                        name
                    )))
                }
            }
        }
        Ok(current)
    }

    /// 純位置路徑覆蓋的區域遮罩
    pub fn region_mask(&self, shape: &[usize]) -> Result<NdArray<bool>> {
        Ok(self.select(shape)?.mask(shape))
    }
}

impl From<Vec<PathStep>> for Path {
    fn from(steps: Vec<PathStep>) -> Self {
        Path(steps)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "[]");
        }
        for step in &self.0 {
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// 索引解析結果：被選中的扁平索引（按結果的行優先順序）與結果形狀
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub flat: Vec<usize>,
    pub shape: Vec<usize>,
}

impl Selection {
    /// 選取整個陣列
    pub fn identity(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self {
            flat: (0..len).collect(),
            shape: shape.to_vec(),
        }
    }

    /// 在形狀上解析一次（可能多軸的）位置索引
    ///
    /// 多個花式索引之間採正交（外積）語義。
    pub fn resolve(shape: &[usize], indexers: &[Indexer]) -> Result<Self> {
        if let [Indexer::Mask(mask)] = indexers {
            if mask.shape() == shape {
                let flat = mask.true_indices();
                let shape = vec![flat.len()];
                return Ok(Self { flat, shape });
            }
        }
        if indexers.len() > shape.len() {
            return Err(QuibError::InvalidPath(format!(
                "{} 個索引超過 {} 維",
                indexers.len(),
                shape.len()
            )));
        }

        let mut per_axis: Vec<Vec<usize>> = Vec::with_capacity(shape.len());
        let mut out_shape = Vec::new();
        for (axis, &len) in shape.iter().enumerate() {
            match indexers.get(axis) {
                Some(Indexer::At(i)) => {
                    per_axis.push(vec![normalize_index(*i, len)?]);
                }
                Some(Indexer::Range(r)) => {
                    let picks = r.indices(len)?;
                    out_shape.push(picks.len());
                    per_axis.push(picks);
                }
                Some(Indexer::Fancy(v)) => {
                    let picks = v
                        .iter()
                        .map(|&i| normalize_index(i, len))
                        .collect::<Result<Vec<_>>>()?;
                    out_shape.push(picks.len());
                    per_axis.push(picks);
                }
                Some(Indexer::Mask(m)) => {
                    if m.shape() != [len] {
                        return Err(QuibError::ShapeMismatch(format!(
                            "遮罩形狀 {:?} 與軸長度 {} 不符",
                            m.shape(),
                            len
                        )));
                    }
                    let picks = m.true_indices();
                    out_shape.push(picks.len());
                    per_axis.push(picks);
                }
                None => {
                    out_shape.push(len);
                    per_axis.push((0..len).collect());
                }
            }
        }

        let strides = crate::ndarray::strides(shape);
        let mut flat = vec![0usize];
        for (axis, picks) in per_axis.iter().enumerate() {
            let stride = strides[axis];
            flat = flat
                .iter()
                .flat_map(|base| picks.iter().map(move |p| base + p * stride))
                .collect();
        }
        Ok(Self {
            flat,
            shape: out_shape,
        })
    }

    /// 被選中區域的遮罩
    pub fn mask(&self, shape: &[usize]) -> NdArray<bool> {
        NdArray::from_indices(shape, &self.flat)
    }
}

/// 正規化（可為負的）索引
pub fn normalize_index(index: isize, len: usize) -> Result<usize> {
    let normalized = if index < 0 { index + len as isize } else { index };
    if normalized < 0 || normalized as usize >= len {
        return Err(QuibError::IndexOutOfBounds { index, len });
    }
    Ok(normalized as usize)
}

/// 取出路徑所指的子值
pub fn get(value: &Value, path: &Path) -> Result<Value> {
    get_steps(value, path.steps())
}

fn get_steps(value: &Value, steps: &[PathStep]) -> Result<Value> {
    match steps.split_first() {
        None => Ok(value.clone()),
        Some((step, rest)) => get_steps(&get_step(value, step)?, rest),
    }
}

/// 取出單一步驟所指的子值
pub fn get_step(value: &Value, step: &PathStep) -> Result<Value> {
    match (value, step) {
        (Value::Array(a), PathStep::Index(indexers)) => {
            let sel = Selection::resolve(a.shape(), indexers)?;
            Ok(Value::from_array(a.take(&sel.flat, sel.shape)?))
        }
        (Value::Record(r), PathStep::Field(name)) => r
            .field(name)
            .map(|f| Value::from_array(f.clone()))
            .ok_or_else(|| QuibError::InvalidPath(format!("記錄陣列沒有欄位 {:?}", name))),
        (Value::Record(r), PathStep::Index(indexers)) => {
            let sel = Selection::resolve(r.shape(), indexers)?;
            let selected = r.select(&sel)?;
            if selected.shape().is_empty() {
                Ok(Value::Map(selected.element(0)))
            } else {
                Ok(Value::Record(selected))
            }
        }
        (Value::Map(m), PathStep::Field(key)) => m
            .get(key)
            .cloned()
            .ok_or_else(|| QuibError::InvalidPath(format!("映射沒有鍵 {:?}", key))),
        (Value::List(items) | Value::Tuple(items), PathStep::Index(indexers)) => {
            let rebuild = |picked: Vec<Value>| match value {
                Value::Tuple(_) => Value::Tuple(picked),
                _ => Value::List(picked),
            };
            match indexers.as_slice() {
                [Indexer::At(i)] => Ok(items[normalize_index(*i, items.len())?].clone()),
                [single @ (Indexer::Range(_) | Indexer::Fancy(_) | Indexer::Mask(_))]
                    if single_axis_ok(single, items.len()) =>
                {
                    let picks = sequence_indices(single, items.len())?;
                    Ok(rebuild(picks.iter().map(|&i| items[i].clone()).collect()))
                }
                _ => get_step(&Value::Array(value.to_array()?), step),
            }
        }
        (other, step) => Err(QuibError::InvalidPath(format!(
            "無法以 {} 定址 {}",
            step,
            other.kind_name()
        ))),
    }
}

fn single_axis_ok(indexer: &Indexer, len: usize) -> bool {
    match indexer {
        Indexer::Mask(m) => m.shape() == [len],
        _ => true,
    }
}

fn sequence_indices(indexer: &Indexer, len: usize) -> Result<Vec<usize>> {
    match indexer {
        Indexer::At(i) => Ok(vec![normalize_index(*i, len)?]),
        Indexer::Range(r) => r.indices(len),
        Indexer::Fancy(v) => v.iter().map(|&i| normalize_index(i, len)).collect(),
        Indexer::Mask(m) => Ok(m.true_indices()),
    }
}

/// 產生在路徑處換成 `new_value` 的新值
///
/// 逐層重建被路徑經過的容器，不會改動其他兄弟資料。
pub fn set(value: &Value, path: &Path, new_value: Value) -> Result<Value> {
    set_steps(value, path.steps(), new_value)
}

fn set_steps(value: &Value, steps: &[PathStep], new_value: Value) -> Result<Value> {
    match steps.split_first() {
        None => Ok(new_value),
        Some((step, [])) => set_step(value, step, new_value),
        Some((step, rest)) => {
            let child = get_step(value, step)?;
            let updated = set_steps(&child, rest, new_value)?;
            set_step(value, step, updated)
        }
    }
}

fn set_step(value: &Value, step: &PathStep, new_value: Value) -> Result<Value> {
    match (value, step) {
        (Value::Array(a), PathStep::Index(indexers)) => {
            let sel = Selection::resolve(a.shape(), indexers)?;
            let incoming = new_value.to_array()?.broadcast_to(&sel.shape)?;
            let mut out = a.clone();
            out.scatter(&sel.flat, incoming.data())?;
            Ok(Value::Array(out))
        }
        (Value::Record(r), PathStep::Field(name)) => {
            let incoming = new_value.to_array()?.broadcast_to(r.shape())?;
            Ok(Value::Record(r.with_field(name, incoming)?))
        }
        (Value::Record(r), PathStep::Index(indexers)) => {
            let sel = Selection::resolve(r.shape(), indexers)?;
            Ok(Value::Record(r.scatter(&sel, &new_value)?))
        }
        (Value::Map(m), PathStep::Field(key)) => {
            let mut out = m.clone();
            out.insert(key.clone(), new_value);
            Ok(Value::Map(out))
        }
        (Value::List(items), PathStep::Index(indexers)) => match indexers.as_slice() {
            [Indexer::At(i)] => {
                let mut out = items.clone();
                out[normalize_index(*i, items.len())?] = new_value;
                Ok(Value::List(out))
            }
            [single] if single_axis_ok(single, items.len()) => {
                let picks = sequence_indices(single, items.len())?;
                let mut out = items.clone();
                for (slot, v) in picks.iter().zip(spread(&new_value, picks.len())?) {
                    out[*slot] = v;
                }
                Ok(Value::List(out))
            }
            _ => set_step(&Value::Array(value.to_array()?), step, new_value),
        },
        (Value::Tuple(items), PathStep::Index(indexers)) => match indexers.as_slice() {
            [Indexer::At(i)] => {
                let mut out = items.clone();
                out[normalize_index(*i, items.len())?] = new_value;
                Ok(Value::Tuple(out))
            }
            // 元組無法以非位置方式寫入，先提升為陣列（形狀資訊會遺失）
            _ => set_step(&Value::Array(value.to_array()?), step, new_value),
        },
        (other, step) => Err(QuibError::InvalidPath(format!(
            "無法以 {} 寫入 {}",
            step,
            other.kind_name()
        ))),
    }
}

/// 把新值展開成 `count` 個元素（純量會重複）
fn spread(value: &Value, count: usize) -> Result<Vec<Value>> {
    let items: Vec<Value> = match value {
        Value::List(items) | Value::Tuple(items) => items.clone(),
        Value::Array(a) if a.ndim() > 0 => {
            let first_len = a.shape()[0];
            (0..first_len)
                .map(|i| get_step(value, &PathStep::at(i as isize)))
                .collect::<Result<_>>()?
        }
        scalar => vec![scalar.clone(); count],
    };
    if items.len() == 1 && count != 1 {
        return Ok(vec![items[0].clone(); count]);
    }
    if items.len() != count {
        return Err(QuibError::ShapeMismatch(format!(
            "寫入 {} 個位置但提供 {} 個值",
            count,
            items.len()
        )));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn arange(shape: &[usize]) -> Value {
        let len: usize = shape.iter().product();
        Value::Array(NdArray::new(shape.to_vec(), (0..len).map(|i| i as f64).collect()).unwrap())
    }

    #[rstest]
    #[case(Range::new(None, None, None), 5, vec![0, 1, 2, 3, 4])]
    #[case(Range::new(Some(1), Some(3), None), 5, vec![1, 2])]
    #[case(Range::new(Some(-2), None, None), 5, vec![3, 4])]
    #[case(Range::new(None, None, Some(2)), 5, vec![0, 2, 4])]
    #[case(Range::new(None, None, Some(-1)), 4, vec![3, 2, 1, 0])]
    #[case(Range::new(Some(3), Some(0), Some(-2)), 5, vec![3, 1])]
    #[case(Range::new(Some(10), Some(20), None), 5, vec![])]
    fn test_range_indices(#[case] range: Range, #[case] len: usize, #[case] expected: Vec<usize>) {
        assert_eq!(range.indices(len).unwrap(), expected);
    }

    #[test]
    fn test_zero_step_is_rejected() {
        assert!(Range::new(None, None, Some(0)).indices(3).is_err());
    }

    #[test]
    fn test_select_composes_steps() {
        let path = Path::new(vec![PathStep::range(1, 3), PathStep::at(0)]);
        let sel = path.select(&[4, 2]).unwrap();
        // 第 1 列整列
        assert_eq!(sel.flat, vec![2, 3]);
        assert_eq!(sel.shape, vec![2]);
    }

    #[test]
    fn test_select_multi_axis() {
        let step = PathStep::multi(vec![Indexer::Range(Range::full()), Indexer::At(1)]);
        let sel = Path::new(vec![step]).select(&[3, 2]).unwrap();
        assert_eq!(sel.flat, vec![1, 3, 5]);
        assert_eq!(sel.shape, vec![3]);
    }

    #[test]
    fn test_selection_resolve_fancy_rows_with_column_range() {
        // 第 0、2 列的第 1..3 欄
        let indexers = vec![
            Indexer::Fancy(vec![0, 2]),
            Indexer::Range(Range::new(Some(1), Some(3), None)),
        ];
        let sel = Selection::resolve(&[3, 4], &indexers).unwrap();
        assert_eq!(sel.flat, vec![1, 2, 9, 10]);
        assert_eq!(sel.shape, vec![2, 2]);
    }

    #[test]
    fn test_select_rejects_fields() {
        assert!(Path::field("x").select(&[3]).is_err());
    }

    #[test]
    fn test_canonical_merges_index_and_single_slice() {
        let a = Path::at(2);
        let b = Path::new(vec![PathStep::range(2, 3)]);
        assert_ne!(a, b);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_get_and_set_on_array() {
        let value = arange(&[2, 3]);
        let path = Path::at(1);
        assert_eq!(get(&value, &path).unwrap(), Value::from(vec![3.0, 4.0, 5.0]));

        let updated = set(&value, &path.clone().with(PathStep::at(0)), Value::Float(99.0)).unwrap();
        assert_eq!(get(&updated, &Path::new(vec![PathStep::at(1), PathStep::at(0)])).unwrap(), Value::Float(99.0));
        // 原值不受影響
        assert_eq!(get(&value, &Path::new(vec![PathStep::at(1), PathStep::at(0)])).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_set_broadcasts_scalar_into_region() {
        let value = arange(&[4]);
        let updated = set(&value, &Path::new(vec![PathStep::range(1, 3)]), Value::Float(0.0)).unwrap();
        assert_eq!(updated, Value::from(vec![0.0, 0.0, 0.0, 3.0]));
    }

    #[test]
    fn test_list_paths() {
        let value = Value::float_list(&[1.0, 2.0, 3.0]);
        assert_eq!(get(&value, &Path::at(-1)).unwrap(), Value::Float(3.0));

        let updated = set(&value, &Path::at(1), Value::Float(10.0)).unwrap();
        assert_eq!(updated, Value::float_list(&[1.0, 10.0, 3.0]));

        let sliced = get(&value, &Path::new(vec![PathStep::range(0, 2)])).unwrap();
        assert_eq!(sliced, Value::float_list(&[1.0, 2.0]));

        let fancy = set(&value, &Path::new(vec![PathStep::fancy(vec![0, 2])]), Value::Float(0.0)).unwrap();
        assert_eq!(fancy, Value::float_list(&[0.0, 2.0, 0.0]));
    }

    #[test]
    fn test_nested_list_copy_on_write() {
        let inner = Value::float_list(&[1.0, 2.0]);
        let value = Value::List(vec![inner.clone(), inner]);
        let path = Path::new(vec![PathStep::at(0), PathStep::at(1)]);
        let updated = set(&value, &path, Value::Float(7.0)).unwrap();

        assert_eq!(get(&updated, &path).unwrap(), Value::Float(7.0));
        assert_eq!(get(&updated, &Path::new(vec![PathStep::at(1), PathStep::at(1)])).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_tuple_promoted_to_array_on_fancy_assignment() {
        let value = Value::Tuple(vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]);
        let updated = set(&value, &Path::new(vec![PathStep::fancy(vec![0, 1])]), Value::Float(0.0)).unwrap();
        assert_eq!(updated, Value::from(vec![0.0, 0.0, 3.0]));
    }

    #[test]
    fn test_map_fields() {
        let mut map = indexmap::IndexMap::new();
        map.insert("a".to_string(), Value::Float(1.0));
        let value = Value::Map(map);

        assert_eq!(get(&value, &Path::field("a")).unwrap(), Value::Float(1.0));
        assert!(get(&value, &Path::field("b")).is_err());

        let updated = set(&value, &Path::field("b"), Value::Int(2)).unwrap();
        assert_eq!(get(&updated, &Path::field("b")).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_references_field() {
        assert!(PathStep::field("x").references_field());
        assert!(!PathStep::at(0).references_field());
    }

    #[test]
    fn test_split_fields_defers_field_steps() {
        let path = Path::new(vec![PathStep::field("x"), PathStep::at(1)]);
        let (positional, fields) = path.split_fields();
        assert_eq!(positional, Path::at(1));
        assert_eq!(fields, vec![PathStep::field("x")]);
    }
}
