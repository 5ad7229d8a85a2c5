//! 反向指派：把結果上的編輯轉成資料來源上的編輯
//!
//! 每個函數族各有一種反推方式；結果是零到多個子指派，
//! 每個落在一個資料來源上（節點或字面值）。

use quib_core::ndarray::{broadcast_source_index, unravel_index};
use quib_core::path::{get, get_step, set};
use quib_core::{NdArray, Path, PathStep, QuibError, Result, Selection, Value};

use crate::axiswise::AxisWiseSpec;
use crate::elementwise::ElementwiseSpec;
use crate::graph::Graph;
use crate::overrider::Assignment;
use crate::quib::{Arg, NodeId, Recipe};
use crate::registry::{CallArgs, Family, FunctionSpec};
use crate::transpositional::TranspositionalSpec;
use crate::translation::{slots, SlotArg};

/// 子指派落在哪裡
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Quib(NodeId),
    /// 字面值參數，無法覆寫
    Literal,
}

/// 一個反推結果
#[derive(Debug, Clone, PartialEq)]
pub struct Inversion {
    pub target: Target,
    pub assignment: Assignment,
}

impl Inversion {
    fn on(target: Target, assignment: Assignment) -> Self {
        Self { target, assignment }
    }
}

impl Graph {
    /// 把節點 `id` 上的指派反推到它的資料來源
    ///
    /// 輸入節點與未註冊函數回傳 [`QuibError::UnsupportedInversion`]。
    pub fn invert(&mut self, id: NodeId, assignment: &Assignment) -> Result<Vec<Inversion>> {
        let recipe = self.quib(id)?.recipe.clone();
        match recipe {
            Recipe::Source(_) => Err(QuibError::UnsupportedInversion(format!("{} 是輸入節點", self.label(id)))),
            Recipe::Item { source, key } => self.invert_item(&source, &key, assignment),
            Recipe::Call { func, args, kwargs } => {
                let spec = self.registry.get(&func)?.clone();
                // 欄位與索引可交換：先反推位置部分，欄位原樣接回
                let (positional, fields) = assignment.path.split_fields();
                let inner = Assignment {
                    path: positional,
                    value: assignment.value.clone(),
                };
                let inversions = match &spec.family {
                    Family::Elementwise(e) => self.invert_elementwise(id, &spec, e, &args, &inner)?,
                    Family::Transpositional(t) => self.invert_transpositional(id, &spec, t, &args, &kwargs, &inner)?,
                    Family::AxisWise(a) => self.invert_axiswise(id, &spec, *a, &args, &kwargs, &inner)?,
                    Family::Unregistered => {
                        return Err(QuibError::UnsupportedInversion(format!("{} 沒有註冊反推方式", func)))
                    }
                };
                let fields = Path::new(fields);
                Ok(inversions
                    .into_iter()
                    .map(|mut inv| {
                        inv.assignment.path = inv.assignment.path.concat(&fields);
                        inv
                    })
                    .collect())
            }
        }
    }

    fn invert_item(&mut self, source: &Arg, key: &PathStep, assignment: &Assignment) -> Result<Vec<Inversion>> {
        let target = match source {
            Arg::Quib(q) => Target::Quib(*q),
            Arg::Value(_) => Target::Literal,
            Arg::List(_) => {
                return Err(QuibError::UnsupportedInversion("元素存取的來源是巢狀參數".to_string()));
            }
        };
        let parent = self.read_arg(source, &Path::root(), 0)?;
        let (positional, fields) = assignment.path.split_fields();

        match (&parent, key) {
            (Value::Array(array), PathStep::Index(indexers)) if fields.is_empty() => {
                let sel = Selection::resolve(array.shape(), indexers)?;
                let child = array.take(&sel.flat, sel.shape.clone())?;
                let child_sel = positional.select(&sel.shape)?;
                let desired = set(&Value::Array(child), &positional, assignment.value.clone())?
                    .to_array()?
                    .broadcast_to(&sel.shape)?;

                let mut changed = NdArray::full(array.shape(), false);
                let mut updated = array.clone();
                for &c in &child_sel.flat {
                    let f = sel.flat[c];
                    updated.data_mut()[f] = desired.data()[c];
                    changed.data_mut()[f] = true;
                }
                Ok(sub_assignment(&parent, &changed, &updated)?
                    .map(|a| Inversion::on(target, a))
                    .into_iter()
                    .collect())
            }
            // 無法轉成索引運算時，把存取鍵接到路徑前面原樣往上推
            _ => Ok(vec![Inversion::on(
                target,
                Assignment {
                    path: assignment.path.prepend(key.clone()),
                    value: assignment.value.clone(),
                },
            )]),
        }
    }

    fn invert_elementwise(
        &mut self,
        id: NodeId,
        spec: &FunctionSpec,
        elementwise: &ElementwiseSpec,
        args: &[Arg],
        assignment: &Assignment,
    ) -> Result<Vec<Inversion>> {
        let slot_args = slots(spec, args);
        let quibs: Vec<(usize, NodeId)> = slot_args
            .iter()
            .enumerate()
            .filter_map(|(slot, arg)| match arg {
                SlotArg::Quib(q) => Some((slot, *q)),
                _ => None,
            })
            .collect();
        for (i, (_, a)) in quibs.iter().enumerate() {
            let ancestors = self.ancestors(*a)?;
            for (_, b) in &quibs[i + 1..] {
                if !ancestors.is_disjoint(&self.ancestors(*b)?) {
                    return Err(QuibError::AmbiguousInversion(format!(
                        "{} 的運算元 {} 與 {} 有共同祖先",
                        self.label(id),
                        a,
                        b
                    )));
                }
            }
        }
        let &(position, target) = quibs
            .first()
            .ok_or_else(|| QuibError::UnsupportedInversion(format!("{} 沒有節點運算元", self.label(id))))?;
        if !elementwise.is_invertible_at(position) {
            return Err(QuibError::UnsupportedInversion(format!("{} 沒有反函數", spec.id)));
        }

        let mut operands = Vec::with_capacity(slot_args.len());
        for slot in &slot_args {
            let value = match slot {
                SlotArg::Quib(q) => self.get_value(*q)?,
                SlotArg::Literal(v) => v.clone(),
                SlotArg::Opaque => {
                    return Err(QuibError::UnsupportedInversion(format!("{} 含有巢狀參數", spec.id)));
                }
            };
            operands.push(value.to_array()?);
        }
        let result = self.get_value(id)?.to_array()?;
        let out_shape = result.shape().to_vec();
        let desired = desired_result(&result, assignment)?;
        let region = assignment.path.region_mask(&out_shape)?;
        let broadcast = operands
            .iter()
            .map(|o| o.broadcast_to(&out_shape))
            .collect::<Result<Vec<_>>>()?;

        let source = &operands[position];
        let mut changed = NdArray::full(source.shape(), false);
        let mut updated = source.clone();
        for k in region.true_indices() {
            let at: Vec<f64> = broadcast.iter().map(|b| b.data()[k]).collect();
            let solved = elementwise.solve(position, desired.data()[k], &at)?;
            let j = broadcast_source_index(&unravel_index(k, &out_shape), source.shape());
            updated.data_mut()[j] = solved;
            changed.data_mut()[j] = true;
        }

        let parent = self.get_value(target)?;
        tracing::debug!("{} 逐元素反推到 {}", self.label(id), self.label(target));
        Ok(sub_assignment(&parent, &changed, &updated)?
            .map(|a| Inversion::on(Target::Quib(target), a))
            .into_iter()
            .collect())
    }

    fn invert_transpositional(
        &mut self,
        id: NodeId,
        spec: &FunctionSpec,
        transpositional: &TranspositionalSpec,
        args: &[Arg],
        kwargs: &indexmap::IndexMap<String, Arg>,
        assignment: &Assignment,
    ) -> Result<Vec<Inversion>> {
        let slot_args = slots(spec, args);
        if slot_args.iter().any(|s| matches!(s, SlotArg::Opaque)) {
            return Err(QuibError::UnsupportedInversion(format!("{} 含有巢狀參數", spec.id)));
        }
        let call = self.resolve_call(id, spec, args, kwargs, None, 0)?;
        let values = call.source_values(&spec.sources)?;
        let shapes = values
            .iter()
            .map(|v| {
                v.positional_shape()
                    .ok_or_else(|| QuibError::TypeMismatch(format!("{} 無法以位置定址", v.kind_name())))
            })
            .collect::<Result<Vec<_>>>()?;

        let result = self.get_value(id)?.to_array()?;
        let desired = desired_result(&result, assignment)?;
        let region = assignment.path.region_mask(result.shape())?;
        let probe = transpositional.probe(&shapes, &call)?;
        if probe.shape() != result.shape() {
            return Err(QuibError::ShapeMismatch(format!("{} 的來源標記形狀不符", self.label(id))));
        }

        let mut inversions = Vec::new();
        for (slot, arg) in slot_args.iter().enumerate() {
            let source = values[slot].to_array()?;
            let mut changed = NdArray::full(source.shape(), false);
            let mut updated = source;
            for k in region.true_indices() {
                let tag = probe.data()[k];
                if tag.source == slot {
                    updated.data_mut()[tag.flat] = desired.data()[k];
                    changed.data_mut()[tag.flat] = true;
                }
            }
            let target = match arg {
                SlotArg::Quib(q) => Target::Quib(*q),
                _ => Target::Literal,
            };
            if let Some(a) = sub_assignment(&values[slot], &changed, &updated)? {
                inversions.push(Inversion::on(target, a));
            }
        }
        tracing::debug!("{} 重排反推產生 {} 個子指派", self.label(id), inversions.len());
        Ok(inversions)
    }

    fn invert_axiswise(
        &mut self,
        id: NodeId,
        spec: &FunctionSpec,
        axiswise: AxisWiseSpec,
        args: &[Arg],
        kwargs: &indexmap::IndexMap<String, Arg>,
        assignment: &Assignment,
    ) -> Result<Vec<Inversion>> {
        let target = match slots(spec, args).first() {
            Some(SlotArg::Quib(q)) => Target::Quib(*q),
            Some(SlotArg::Literal(_)) => Target::Literal,
            _ => return Err(QuibError::UnsupportedInversion(format!("{} 的資料來源無法追蹤", spec.id))),
        };
        let call: CallArgs = self.resolve_call(id, spec, args, kwargs, None, 0)?;
        let result = self.get_value(id)?.to_array()?;
        let desired = desired_result(&result, assignment)?;
        let region = assignment.path.region_mask(result.shape())?;

        let (changed, updated) = axiswise.invert(&call, &region, &desired)?;
        let source = call.arg(axiswise.source_position())?.clone();
        Ok(sub_assignment(&source, &changed, &updated)?
            .map(|a| Inversion::on(target, a))
            .into_iter()
            .collect())
    }
}

/// 在目前結果上寫入指派值後的完整結果
fn desired_result(result: &NdArray<f64>, assignment: &Assignment) -> Result<NdArray<f64>> {
    set(&Value::Array(result.clone()), &assignment.path, assignment.value.clone())?
        .to_array()?
        .broadcast_to(result.shape())
}

/// 來源上被改動的元素 → 子指派；沒有改動時為 `None`
///
/// 單一元素用逐層整數索引，全部元素用根路徑，其餘用遮罩路徑。
pub(crate) fn sub_assignment(
    source: &Value,
    changed: &NdArray<bool>,
    updated: &NdArray<f64>,
) -> Result<Option<Assignment>> {
    let indices = changed.true_indices();
    if indices.is_empty() {
        return Ok(None);
    }
    if indices.len() == changed.len() {
        return Ok(Some(Assignment::new(Path::root(), shaped_like(source, updated)?)));
    }
    if let [flat] = indices.as_slice() {
        let steps = unravel_index(*flat, changed.shape())
            .into_iter()
            .map(|i| PathStep::at(i as isize))
            .collect();
        let path = Path::new(steps);
        let current = get(source, &path)?;
        let value = scalar_like(&current, updated.data()[*flat]);
        return Ok(Some(Assignment::new(path, value)));
    }
    let picked: Vec<f64> = indices.iter().map(|&i| updated.data()[i]).collect();
    Ok(Some(Assignment::new(
        Path::new(vec![PathStep::mask(changed.clone())]),
        Value::from(picked),
    )))
}

/// 以 `template` 的容器種類包裝陣列
fn shaped_like(template: &Value, array: &NdArray<f64>) -> Result<Value> {
    match template {
        Value::List(items) | Value::Tuple(items) if array.ndim() >= 1 && array.shape()[0] == items.len() => {
            let whole = Value::Array(array.clone());
            let rebuilt = items
                .iter()
                .enumerate()
                .map(|(i, item)| shaped_like(item, &get_step(&whole, &PathStep::at(i as isize))?.to_array()?))
                .collect::<Result<Vec<_>>>()?;
            Ok(match template {
                Value::Tuple(_) => Value::Tuple(rebuilt),
                _ => Value::List(rebuilt),
            })
        }
        scalar if array.ndim() == 0 => Ok(scalar_like(scalar, array.data()[0])),
        _ => Ok(Value::from_array(array.clone())),
    }
}

fn scalar_like(current: &Value, value: f64) -> Value {
    match current {
        Value::Int(_) if value.fract() == 0.0 => Value::Int(value as i64),
        Value::Bool(_) => Value::Bool(value != 0.0),
        _ => Value::Float(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers() -> Value {
        Value::from(vec![1.0, 2.0, 3.0])
    }

    fn only_quib(inversions: &[Inversion]) -> (NodeId, Assignment) {
        assert_eq!(inversions.len(), 1);
        match inversions[0].target {
            Target::Quib(q) => (q, inversions[0].assignment.clone()),
            Target::Literal => panic!("expected quib target"),
        }
    }

    #[test]
    fn test_source_is_not_invertible() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let result = graph.invert(a, &Assignment::new(Path::at(0), 1.0));
        assert!(matches!(result, Err(QuibError::UnsupportedInversion(_))));
    }

    #[test]
    fn test_elementwise_add_inverse() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let b = graph.call("add", vec![a.into(), 5.0.into()]).unwrap();

        let inversions = graph.invert(b, &Assignment::new(Path::at(0), 12.0)).unwrap();
        let (target, assignment) = only_quib(&inversions);
        assert_eq!(target, a);
        assert_eq!(assignment.path, Path::at(0));
        assert_eq!(assignment.value, Value::Float(7.0));
    }

    #[test]
    fn test_elementwise_debroadcast() {
        let mut graph = Graph::with_builtins();
        let scalar = graph.source(2.0);
        let b = graph.call("multiply", vec![scalar.into(), Value::from(vec![1.0, 1.0]).into()]).unwrap();

        let inversions = graph.invert(b, &Assignment::new(Path::at(1), 8.0)).unwrap();
        let (target, assignment) = only_quib(&inversions);
        assert_eq!(target, scalar);
        // 被廣播的純量以根路徑指派
        assert_eq!(assignment.path, Path::root());
        assert_eq!(assignment.value, Value::Float(8.0));
    }

    #[test]
    fn test_elementwise_nearest_branch() {
        let mut graph = Graph::with_builtins();
        let angle = graph.source(3.0);
        let s = graph.call("sin", vec![angle.into()]).unwrap();

        let inversions = graph.invert(s, &Assignment::new(Path::root(), 0.0)).unwrap();
        let (_, assignment) = only_quib(&inversions);
        // 最接近目前值 3.0 的解是 π
        let solved = assignment.value.as_f64().unwrap();
        assert!((solved - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn test_shared_ancestor_is_ambiguous() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let twice = graph.call("multiply", vec![a.into(), 2.0.into()]).unwrap();
        let sum = graph.call("add", vec![a.into(), twice.into()]).unwrap();

        let result = graph.invert(sum, &Assignment::new(Path::at(0), 0.0));
        assert!(matches!(result, Err(QuibError::AmbiguousInversion(_))));
    }

    #[test]
    fn test_concatenate_splits_per_source() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let b = graph.source(Value::from(vec![4.0, 5.0]));
        let c = graph
            .call("concatenate", vec![Arg::List(vec![a.into(), b.into()])])
            .unwrap();

        let path = Path::new(vec![PathStep::range(2, 4)]);
        let inversions = graph.invert(c, &Assignment::new(path, Value::from(vec![30.0, 40.0]))).unwrap();
        assert_eq!(inversions.len(), 2);
        assert_eq!(inversions[0].target, Target::Quib(a));
        assert_eq!(inversions[0].assignment, Assignment::new(Path::at(2), 30.0));
        assert_eq!(inversions[1].target, Target::Quib(b));
        assert_eq!(inversions[1].assignment, Assignment::new(Path::at(0), 40.0));
    }

    #[test]
    fn test_concatenate_literal_target() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let c = graph
            .call(
                "concatenate",
                vec![Arg::List(vec![a.into(), Value::from(vec![8.0, 9.0]).into()])],
            )
            .unwrap();

        let inversions = graph.invert(c, &Assignment::new(Path::at(4), 99.0)).unwrap();
        assert_eq!(inversions.len(), 1);
        assert_eq!(inversions[0].target, Target::Literal);
    }

    #[test]
    fn test_item_index_algebra() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let d = graph.item(a, PathStep::range(1, 3)).unwrap();

        let inversions = graph.invert(d, &Assignment::new(Path::at(0), 20.0)).unwrap();
        let (target, assignment) = only_quib(&inversions);
        assert_eq!(target, a);
        assert_eq!(assignment, Assignment::new(Path::at(1), 20.0));
    }

    #[test]
    fn test_item_field_is_pushed_down() {
        let mut graph = Graph::with_builtins();
        let mut entries = indexmap::IndexMap::new();
        entries.insert("x".to_string(), Value::Float(1.0));
        let m = graph.source(Value::Map(entries));
        let x = graph.item(m, PathStep::field("x")).unwrap();

        let inversions = graph.invert(x, &Assignment::new(Path::root(), 5.0)).unwrap();
        let (target, assignment) = only_quib(&inversions);
        assert_eq!(target, m);
        assert_eq!(assignment.path, Path::field("x"));
    }

    #[test]
    fn test_sum_inverse_spreads_delta() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let total = graph.call("sum", vec![a.into()]).unwrap();

        let inversions = graph.invert(total, &Assignment::new(Path::root(), 9.0)).unwrap();
        let (target, assignment) = only_quib(&inversions);
        assert_eq!(target, a);
        assert_eq!(assignment.path, Path::root());
        assert_eq!(assignment.value, Value::from(vec![2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_max_is_not_invertible() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let top = graph.call("max", vec![a.into()]).unwrap();
        let result = graph.invert(top, &Assignment::new(Path::root(), 9.0));
        assert!(matches!(result, Err(QuibError::UnsupportedInversion(_))));
    }

    #[test]
    fn test_sub_assignment_keeps_list_kind() {
        let source = Value::float_list(&[1.0, 2.0]);
        let changed = NdArray::full(&[2], true);
        let updated = NdArray::from_vec(vec![3.0, 4.0]);
        let assignment = sub_assignment(&source, &changed, &updated).unwrap().unwrap();
        assert_eq!(assignment.value, Value::float_list(&[3.0, 4.0]));
    }
}
