//! 路徑轉譯：父節點區域與子節點區域之間的對應
//!
//! 前向（父 → 子）用於失效傳播，反向（子 → 父）用於只讀取需要的父區域。
//! 兩個方向都以布林遮罩表達區域，最後才轉回路徑。

use quib_core::ndarray::{broadcast_source_index, unravel_index};
use quib_core::path::get_step;
use quib_core::{NdArray, Path, PathStep, QuibError, Result, Selection, Value};

use crate::quib::{Arg, NodeId};
use crate::registry::{CallArgs, Family, FunctionSpec, SourceArg};

/// 一個展開後的資料來源
#[derive(Debug, Clone, PartialEq)]
pub enum SlotArg {
    Quib(NodeId),
    Literal(Value),
    /// 內含節點的巢狀參數，無法逐元素追蹤
    Opaque,
}

fn classify(arg: &Arg) -> SlotArg {
    match arg {
        Arg::Quib(id) => SlotArg::Quib(*id),
        other => literal_value(other).map_or(SlotArg::Opaque, SlotArg::Literal),
    }
}

/// 不含節點的參數樹對應的字面值
pub fn literal_value(arg: &Arg) -> Option<Value> {
    match arg {
        Arg::Quib(_) => None,
        Arg::Value(v) => Some(v.clone()),
        Arg::List(items) => items
            .iter()
            .map(literal_value)
            .collect::<Option<Vec<_>>>()
            .map(Value::List),
    }
}

/// 按資料來源順序展開的參數
pub fn slots(spec: &FunctionSpec, args: &[Arg]) -> Vec<SlotArg> {
    let mut out = Vec::new();
    for source in &spec.sources {
        let Some(arg) = args.get(source.position()) else {
            out.push(SlotArg::Opaque);
            continue;
        };
        match (source, arg) {
            (SourceArg::Listed(_), Arg::List(items)) => out.extend(items.iter().map(classify)),
            (SourceArg::Listed(_), Arg::Value(Value::List(items) | Value::Tuple(items))) => {
                out.extend(items.iter().cloned().map(SlotArg::Literal))
            }
            (SourceArg::Listed(_), _) => out.push(SlotArg::Opaque),
            (SourceArg::Single(_), arg) => out.push(classify(arg)),
        }
    }
    out
}

/// 節點是否以控制參數的身份出現（任何變動都讓整個子節點失效）
///
/// 巢狀在資料來源參數內、無法逐元素追蹤的節點也視為控制參數。
pub fn is_parameter_of(
    spec: &FunctionSpec,
    args: &[Arg],
    kwargs: &indexmap::IndexMap<String, Arg>,
    parent: NodeId,
) -> bool {
    if kwargs.values().any(|a| a.contains(parent)) {
        return true;
    }
    if matches!(spec.family, Family::Unregistered) {
        return args.iter().any(|a| a.contains(parent));
    }
    args.iter().enumerate().any(|(position, arg)| {
        if !arg.contains(parent) {
            return false;
        }
        match (spec.source_at(position), arg) {
            (None, _) => true,
            (Some(SourceArg::Single(_)), Arg::Quib(_)) => false,
            (Some(SourceArg::Listed(_)), Arg::List(items)) => items
                .iter()
                .any(|item| !matches!(item, Arg::Quib(_)) && item.contains(parent)),
            _ => true,
        }
    })
}

/// 前向：資料來源 `slot` 的變動遮罩 → 結果的變動遮罩
pub fn forward_mask(
    spec: &FunctionSpec,
    params: &CallArgs,
    slot: usize,
    changed: &NdArray<bool>,
    slot_shapes: &[Vec<usize>],
    out_shape: &[usize],
) -> Result<NdArray<bool>> {
    match &spec.family {
        Family::Elementwise(_) => changed.broadcast_to(out_shape),
        Family::Transpositional(t) => {
            let probe = t.probe(slot_shapes, params)?;
            if probe.shape() != out_shape {
                return Err(QuibError::ShapeMismatch(format!(
                    "來源標記形狀 {:?} 與結果 {:?} 不符",
                    probe.shape(),
                    out_shape
                )));
            }
            Ok(probe.map(|p| p.source == slot && changed.data().get(p.flat).copied().unwrap_or(false)))
        }
        Family::AxisWise(a) => {
            let out = a.forward_mask(params, changed)?;
            if out.shape() != out_shape {
                return Err(QuibError::ShapeMismatch("歸約結果形狀不符".to_string()));
            }
            Ok(out)
        }
        Family::Unregistered => Err(QuibError::UnsupportedInversion(spec.id.to_string())),
    }
}

/// 反向：結果區域 → 資料來源 `slot` 需要的區域
pub fn backward_mask(
    spec: &FunctionSpec,
    params: &CallArgs,
    slot: usize,
    region: &NdArray<bool>,
    slot_shapes: &[Vec<usize>],
) -> Result<NdArray<bool>> {
    let source_shape = slot_shapes
        .get(slot)
        .ok_or_else(|| QuibError::ShapeMismatch(format!("沒有第 {} 個資料來源", slot)))?;
    match &spec.family {
        Family::Elementwise(_) => Ok(debroadcast_mask(region, source_shape)),
        Family::Transpositional(t) => {
            let probe = t.probe(slot_shapes, params)?;
            if probe.shape() != region.shape() {
                return Err(QuibError::ShapeMismatch("來源標記形狀與結果區域不符".to_string()));
            }
            let flat: Vec<usize> = probe
                .iter()
                .zip(region.iter())
                .filter(|(p, hit)| **hit && p.source == slot)
                .map(|(p, _)| p.flat)
                .collect();
            Ok(NdArray::from_indices(source_shape, &flat))
        }
        Family::AxisWise(a) => a.backward_mask(params, region, source_shape),
        Family::Unregistered => Err(QuibError::UnsupportedInversion(spec.id.to_string())),
    }
}

/// 反廣播：結果區域內每個位置對應的來源元素
pub fn debroadcast_mask(region: &NdArray<bool>, source_shape: &[usize]) -> NdArray<bool> {
    let flat: Vec<usize> = region
        .true_indices()
        .into_iter()
        .map(|k| broadcast_source_index(&unravel_index(k, region.shape()), source_shape))
        .collect();
    NdArray::from_indices(source_shape, &flat)
}

/// 區域遮罩 → 子節點上的路徑；空區域回傳空集合
///
/// 陣列與記錄陣列用單一遮罩路徑，一般序列用逐個位置的整數索引路徑。
pub fn mask_to_paths(mask: &NdArray<bool>, value: &Value) -> Vec<Path> {
    if !mask.any() {
        return Vec::new();
    }
    if mask.all() {
        return vec![Path::root()];
    }
    match value {
        Value::List(items) | Value::Tuple(items) => {
            let block = mask.len() / items.len().max(1);
            (0..items.len())
                .filter(|i| mask.data()[i * block..(i + 1) * block].iter().any(|b| *b))
                .map(|i| Path::at(i as isize))
                .collect()
        }
        _ => vec![Path::new(vec![PathStep::mask(mask.clone())])],
    }
}

/// 元素存取的前向轉譯：父節點的變動路徑 → 子節點 `parent[key]` 的變動路徑
///
/// 回傳空集合代表兩者沒有重疊。序列子節點得到逐個位置的路徑。
pub fn item_forward(key: &PathStep, changed: &Path, parent: &Value) -> Result<Vec<Path>> {
    let (positional, fields) = changed.split_fields();
    match key {
        PathStep::Field(name) => match fields.split_first() {
            None => Ok(vec![positional]),
            Some((PathStep::Field(first), rest)) if first == name => {
                Ok(vec![positional.concat(&Path::new(rest.to_vec()))])
            }
            Some(_) => Ok(Vec::new()),
        },
        PathStep::Index(indexers) => {
            let shape = parent.positional_shape().ok_or_else(|| {
                QuibError::InvalidPath(format!("{} 無法以位置定址", parent.kind_name()))
            })?;
            let selection = Selection::resolve(&shape, indexers)?;
            let region = positional.region_mask(&shape)?;
            let child = NdArray::new(
                selection.shape.clone(),
                selection.flat.iter().map(|&f| region.data()[f]).collect(),
            )?;
            let child_value = get_step(parent, key)?;
            let fields = Path::new(fields);
            Ok(mask_to_paths(&child, &child_value)
                .into_iter()
                .map(|path| path.concat(&fields))
                .collect())
        }
    }
}

/// 元素存取的反向轉譯：子節點路徑前面加上存取鍵
pub fn item_backward(key: &PathStep, child_path: &Path) -> Path {
    child_path.prepend(key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FunctionId, FunctionRegistry};
    use indexmap::IndexMap;

    fn id(index: u32) -> NodeId {
        NodeId { index, generation: 0 }
    }

    fn builtin(name: &str) -> FunctionSpec {
        FunctionRegistry::with_builtins().get(&FunctionId::from(name)).unwrap().clone()
    }

    #[test]
    fn test_slots_expand_listed_sources() {
        let spec = builtin("concatenate");
        let args = vec![Arg::List(vec![Arg::Quib(id(1)), Arg::Value(Value::float_list(&[8.0, 9.0]))])];
        let slots = slots(&spec, &args);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0], SlotArg::Quib(id(1)));
        assert!(matches!(slots[1], SlotArg::Literal(_)));
    }

    #[test]
    fn test_parameter_detection() {
        let spec = builtin("sum");
        let args = vec![Arg::Quib(id(1)), Arg::Quib(id(2))];
        let kwargs = IndexMap::new();
        assert!(!is_parameter_of(&spec, &args, &kwargs, id(1)));
        // 第二個位置是 axis
        assert!(is_parameter_of(&spec, &args, &kwargs, id(2)));
    }

    #[test]
    fn test_concatenate_forward_only_hits_own_positions() {
        let spec = builtin("concatenate");
        let shapes = vec![vec![3], vec![2]];
        let changed = NdArray::from_indices(&[3], &[0]);
        let out = forward_mask(&spec, &CallArgs::default(), 0, &changed, &shapes, &[5]).unwrap();
        assert_eq!(out.true_indices(), vec![0]);

        let changed = NdArray::full(&[2], true);
        let out = forward_mask(&spec, &CallArgs::default(), 1, &changed, &shapes, &[5]).unwrap();
        assert_eq!(out.true_indices(), vec![3, 4]);
    }

    #[test]
    fn test_elementwise_backward_debroadcasts() {
        let spec = builtin("add");
        let region = NdArray::from_indices(&[2, 3], &[4]);
        let shapes = vec![vec![3], vec![2, 1]];
        let row = backward_mask(&spec, &CallArgs::default(), 0, &region, &shapes).unwrap();
        assert_eq!(row.true_indices(), vec![1]);
        let column = backward_mask(&spec, &CallArgs::default(), 1, &region, &shapes).unwrap();
        assert_eq!(column.true_indices(), vec![1]);
    }

    #[test]
    fn test_mask_to_paths() {
        let array = Value::from(vec![1.0, 2.0, 3.0]);
        let mask = NdArray::from_indices(&[3], &[1]);
        assert_eq!(mask_to_paths(&mask, &array), vec![Path::new(vec![PathStep::mask(mask.clone())])]);

        let list = Value::float_list(&[1.0, 2.0, 3.0]);
        assert_eq!(mask_to_paths(&mask, &list), vec![Path::at(1)]);
        assert!(mask_to_paths(&NdArray::full(&[3], false), &list).is_empty());
        assert_eq!(mask_to_paths(&NdArray::full(&[3], true), &list), vec![Path::root()]);
    }

    #[test]
    fn test_item_forward_slice() {
        let parent = Value::from(vec![1.0, 2.0, 3.0]);
        let key = PathStep::range(0, 2);
        assert!(item_forward(&key, &Path::at(2), &parent).unwrap().is_empty());

        let hit = item_forward(&key, &Path::at(1), &parent).unwrap();
        let expected = Path::new(vec![PathStep::mask(NdArray::from_indices(&[2], &[1]))]);
        assert_eq!(hit, vec![expected]);
    }

    #[test]
    fn test_item_forward_nested_list_uses_positions() {
        // 列表的列表：子節點仍是列表，只回報受影響的位置
        let parent = Value::List(vec![
            Value::float_list(&[1.0, 2.0]),
            Value::float_list(&[3.0, 4.0]),
            Value::float_list(&[5.0, 6.0]),
        ]);
        let key = PathStep::range(0, 2);
        assert_eq!(item_forward(&key, &Path::at(0), &parent).unwrap(), vec![Path::at(0)]);
        assert!(item_forward(&key, &Path::at(2), &parent).unwrap().is_empty());
        assert_eq!(item_forward(&key, &Path::root(), &parent).unwrap(), vec![Path::root()]);
    }

    #[test]
    fn test_item_forward_fields() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::Float(1.0));
        let parent = Value::Map(map);
        let key = PathStep::field("a");
        assert!(item_forward(&key, &Path::field("b"), &parent).unwrap().is_empty());
        assert_eq!(item_forward(&key, &Path::field("a"), &parent).unwrap(), vec![Path::root()]);
        assert_eq!(item_forward(&key, &Path::root(), &parent).unwrap(), vec![Path::root()]);
    }

    #[test]
    fn test_item_backward_prepends_key() {
        let path = item_backward(&PathStep::field("x"), &Path::at(0));
        assert_eq!(path, Path::new(vec![PathStep::field("x"), PathStep::at(0)]));
    }
}
