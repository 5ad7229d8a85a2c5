//! 沿軸函數族：歸約與沿軸套用
//!
//! 前向遮罩轉移把來源的變動遮罩沿被歸約的軸做 OR；反向轉移把結果區域
//! 展開回被歸約的軸。只有 `sum` 與 `mean` 支援反推。

use std::rc::Rc;

use quib_core::ndarray::{normalize_axis, ravel_index, reduced_shape, unravel_index};
use quib_core::{NdArray, QuibError, Result, Value};

use crate::registry::{CallArgs, Family, FunctionSpec, SourceArg};

/// 歸約運算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    Mean,
    Prod,
    Min,
    Max,
    Any,
    All,
}

impl Reduction {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sum" => Ok(Reduction::Sum),
            "mean" => Ok(Reduction::Mean),
            "prod" => Ok(Reduction::Prod),
            "min" => Ok(Reduction::Min),
            "max" => Ok(Reduction::Max),
            "any" => Ok(Reduction::Any),
            "all" => Ok(Reduction::All),
            other => Err(QuibError::UnknownFunction(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Mean => "mean",
            Reduction::Prod => "prod",
            Reduction::Min => "min",
            Reduction::Max => "max",
            Reduction::Any => "any",
            Reduction::All => "all",
        }
    }

    fn fold(&self, values: &[f64]) -> Result<f64> {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Reduction::Sum => Ok(values.iter().sum()),
            Reduction::Mean => Ok(values.iter().sum::<f64>() / values.len() as f64),
            Reduction::Prod => Ok(values.iter().product()),
            Reduction::Min | Reduction::Max if values.is_empty() => {
                Err(QuibError::ShapeMismatch(format!("{} 不可作用於空的歸約區域", self.name())))
            }
            Reduction::Min => Ok(values.iter().copied().fold(f64::INFINITY, f64::min)),
            Reduction::Max => Ok(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            Reduction::Any => Ok(truth(values.iter().any(|v| *v != 0.0))),
            Reduction::All => Ok(truth(values.iter().all(|v| *v != 0.0))),
        }
    }

    fn is_boolean(&self) -> bool {
        matches!(self, Reduction::Any | Reduction::All)
    }
}

/// 一次歸約的參數（已對來源形狀正規化）
#[derive(Debug, Clone)]
struct ReducePlan {
    source_shape: Vec<usize>,
    axes: Vec<usize>,
    keepdims: bool,
    /// `where` 遮罩（已廣播到來源形狀）
    included: Option<NdArray<bool>>,
}

impl ReducePlan {
    fn out_shape(&self) -> Vec<usize> {
        reduced_shape(&self.source_shape, &self.axes, self.keepdims)
    }

    fn is_included(&self, flat: usize) -> bool {
        self.included.as_ref().map_or(true, |m| m.data()[flat])
    }

    /// 每個來源元素歸約到的輸出扁平索引
    fn targets(&self) -> Vec<usize> {
        let kept = reduced_shape(&self.source_shape, &self.axes, true);
        let len: usize = self.source_shape.iter().product();
        (0..len)
            .map(|flat| {
                let mut index = unravel_index(flat, &self.source_shape);
                for &a in &self.axes {
                    index[a] = 0;
                }
                ravel_index(&index, &kept)
            })
            .collect()
    }

    /// 每個輸出位置收到的來源元素
    fn members(&self) -> Vec<Vec<usize>> {
        let out_len: usize = self.out_shape().iter().product();
        let mut groups = vec![Vec::new(); out_len];
        for (flat, target) in self.targets().into_iter().enumerate() {
            if self.is_included(flat) {
                groups[target].push(flat);
            }
        }
        groups
    }
}

/// 沿軸函數
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisWiseSpec {
    /// `sum(a, axis=None, keepdims=False, where=None)` 等歸約
    Reduce(Reduction),
    /// `apply_along_axis(func1d, axis, arr)`：`func1d` 為歸約名稱
    AlongAxis,
}

impl AxisWiseSpec {
    /// 資料來源在位置參數中的位置
    pub fn source_position(&self) -> usize {
        match self {
            AxisWiseSpec::Reduce(_) => 0,
            AxisWiseSpec::AlongAxis => 2,
        }
    }

    fn reduction(&self, args: &CallArgs) -> Result<Reduction> {
        match self {
            AxisWiseSpec::Reduce(r) => Ok(*r),
            AxisWiseSpec::AlongAxis => match args.param("func1d", 0) {
                Some(Value::Str(name)) => Reduction::from_name(name),
                _ => Err(QuibError::TypeMismatch("apply_along_axis 需要歸約名稱".to_string())),
            },
        }
    }

    fn plan(&self, args: &CallArgs, source_shape: &[usize]) -> Result<ReducePlan> {
        let ndim = source_shape.len();
        match self {
            AxisWiseSpec::Reduce(_) => {
                let axes = match args.axes("axis", 1)? {
                    None => (0..ndim).collect(),
                    Some(axes) => {
                        let mut normalized = axes
                            .into_iter()
                            .map(|a| normalize_axis(a, ndim))
                            .collect::<Result<Vec<_>>>()?;
                        normalized.sort_unstable();
                        normalized.dedup();
                        normalized
                    }
                };
                let included = match args.kwarg("where") {
                    None => None,
                    Some(w) => Some(w.to_array()?.broadcast_to(source_shape)?.map(|v| *v != 0.0)),
                };
                Ok(ReducePlan {
                    source_shape: source_shape.to_vec(),
                    axes,
                    keepdims: args.flag("keepdims", false),
                    included,
                })
            }
            AxisWiseSpec::AlongAxis => {
                let axis = args
                    .int("axis", 1)?
                    .ok_or_else(|| QuibError::TypeMismatch("apply_along_axis 需要 axis".to_string()))?;
                Ok(ReducePlan {
                    source_shape: source_shape.to_vec(),
                    axes: vec![normalize_axis(axis as isize, ndim)?],
                    keepdims: false,
                    included: None,
                })
            }
        }
    }

    pub fn evaluate(&self, args: &CallArgs) -> Result<Value> {
        let source = args.array(self.source_position())?;
        let reduction = self.reduction(args)?;
        let plan = self.plan(args, source.shape())?;
        let data = plan
            .members()
            .iter()
            .map(|group| {
                let values: Vec<f64> = group.iter().map(|&j| source.data()[j]).collect();
                reduction.fold(&values)
            })
            .collect::<Result<Vec<_>>>()?;
        let out = NdArray::new(plan.out_shape(), data)?;
        if out.ndim() == 0 && reduction.is_boolean() {
            return Ok(Value::Bool(out.data()[0] != 0.0));
        }
        Ok(Value::from_array(out))
    }

    /// 前向遮罩轉移：來源變動遮罩 → 結果變動遮罩
    pub fn forward_mask(&self, args: &CallArgs, changed: &NdArray<bool>) -> Result<NdArray<bool>> {
        let plan = self.plan(args, changed.shape())?;
        let out_shape = plan.out_shape();
        let mut out = NdArray::full(&out_shape, false);
        for (flat, target) in plan.targets().into_iter().enumerate() {
            if changed.data()[flat] && plan.is_included(flat) {
                out.data_mut()[target] = true;
            }
        }
        Ok(out)
    }

    /// 反向遮罩轉移：結果區域 → 需要的來源區域
    pub fn backward_mask(
        &self,
        args: &CallArgs,
        region: &NdArray<bool>,
        source_shape: &[usize],
    ) -> Result<NdArray<bool>> {
        let plan = self.plan(args, source_shape)?;
        if region.shape() != plan.out_shape().as_slice() {
            return Err(QuibError::ShapeMismatch(format!(
                "結果區域形狀 {:?} 與歸約結果 {:?} 不符",
                region.shape(),
                plan.out_shape()
            )));
        }
        let data = plan
            .targets()
            .into_iter()
            .enumerate()
            .map(|(flat, target)| region.data()[target] && plan.is_included(flat))
            .collect();
        NdArray::new(source_shape.to_vec(), data)
    }

    /// 反推：把結果在區域內的新值分攤回來源
    ///
    /// `sum` 把差值平均分給參與歸約的元素，`mean` 讓每個元素平移同一個差值。
    /// 回傳被改動的來源遮罩與新的來源陣列。
    pub fn invert(
        &self,
        args: &CallArgs,
        region: &NdArray<bool>,
        desired: &NdArray<f64>,
    ) -> Result<(NdArray<bool>, NdArray<f64>)> {
        let reduction = self.reduction(args)?;
        if !matches!(self, AxisWiseSpec::Reduce(Reduction::Sum | Reduction::Mean)) {
            return Err(QuibError::UnsupportedInversion(format!(
                "{} 無法反推",
                reduction.name()
            )));
        }
        let source = args.array(self.source_position())?;
        let plan = self.plan(args, source.shape())?;
        let members = plan.members();
        let current = self.evaluate(args)?.to_array()?;

        let mut changed = NdArray::full(source.shape(), false);
        let mut updated = source.clone();
        for out in region.true_indices() {
            let group = &members[out];
            if group.is_empty() {
                continue;
            }
            let delta = desired.data()[out] - current.data()[out];
            let step = match reduction {
                Reduction::Sum => delta / group.len() as f64,
                _ => delta,
            };
            for &j in group {
                updated.data_mut()[j] += step;
                changed.data_mut()[j] = true;
            }
        }
        Ok((changed, updated))
    }
}

fn reduce_spec(reduction: Reduction) -> FunctionSpec {
    let axiswise = AxisWiseSpec::Reduce(reduction);
    FunctionSpec::new(
        reduction.name(),
        Family::AxisWise(axiswise),
        vec![SourceArg::Single(0)],
        Rc::new(move |args: &CallArgs| axiswise.evaluate(args)),
    )
}

/// 內建沿軸函數
pub fn builtins() -> Vec<FunctionSpec> {
    let mut specs: Vec<FunctionSpec> = [
        Reduction::Sum,
        Reduction::Mean,
        Reduction::Prod,
        Reduction::Min,
        Reduction::Max,
        Reduction::Any,
        Reduction::All,
    ]
    .into_iter()
    .map(reduce_spec)
    .collect();
    let along = AxisWiseSpec::AlongAxis;
    specs.push(FunctionSpec::new(
        "apply_along_axis",
        Family::AxisWise(along),
        vec![SourceArg::Single(along.source_position())],
        Rc::new(move |args: &CallArgs| along.evaluate(args)),
    ));
    specs
}
