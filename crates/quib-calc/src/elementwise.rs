//! 逐元素函數族：標準廣播下的逐元素數學運算

use std::f64::consts::PI;
use std::rc::Rc;

use quib_core::ndarray::{broadcast_source_index, unravel_index};
use quib_core::{broadcast_shapes, NdArray, QuibError, Result, Value};

use crate::registry::{CallArgs, Family, FunctionSpec, SourceArg};

/// 前向運算
pub type ForwardFn = fn(&[f64]) -> f64;

/// 反函數：由結果與所有運算元的目前值，解出指定位置的運算元
pub type InverseFn = fn(f64, &[f64]) -> f64;

/// 反函數的一個分支
#[derive(Debug, Clone, Copy)]
pub struct InverseBranch {
    pub invert: InverseFn,
    /// 多對一函數的週期
    pub period: Option<f64>,
}

impl InverseBranch {
    pub fn new(invert: InverseFn) -> Self {
        Self { invert, period: None }
    }

    pub fn periodic(invert: InverseFn, period: f64) -> Self {
        Self {
            invert,
            period: Some(period),
        }
    }

    /// 加上週期偏移後最接近 `current` 的解
    fn nearest(&self, result: f64, operands: &[f64], current: f64) -> f64 {
        let candidate = (self.invert)(result, operands);
        match self.period {
            Some(period) if candidate.is_finite() && current.is_finite() => {
                candidate + period * ((current - candidate) / period).round()
            }
            _ => candidate,
        }
    }
}

/// 逐元素函數
#[derive(Debug, Clone)]
pub struct ElementwiseSpec {
    pub arity: usize,
    pub forward: ForwardFn,
    /// 每個運算元位置的反函數分支；空代表無法對該位置反推
    pub inverses: Vec<Vec<InverseBranch>>,
}

impl ElementwiseSpec {
    pub fn new(arity: usize, forward: ForwardFn, inverses: Vec<Vec<InverseBranch>>) -> Self {
        Self {
            arity,
            forward,
            inverses,
        }
    }

    /// 廣播後逐元素計算
    pub fn evaluate(&self, operands: &[NdArray<f64>]) -> Result<NdArray<f64>> {
        if operands.len() != self.arity {
            return Err(QuibError::TypeMismatch(format!(
                "需要 {} 個運算元，收到 {}",
                self.arity,
                operands.len()
            )));
        }
        let shapes: Vec<&[usize]> = operands.iter().map(|o| o.shape()).collect();
        let shape = broadcast_shapes(&shapes)?;
        let len: usize = shape.iter().product();
        let mut data = Vec::with_capacity(len);
        let mut scratch = vec![0.0; operands.len()];
        for flat in 0..len {
            let index = unravel_index(flat, &shape);
            for (slot, operand) in scratch.iter_mut().zip(operands) {
                *slot = operand.data()[broadcast_source_index(&index, operand.shape())];
            }
            data.push((self.forward)(&scratch));
        }
        NdArray::new(shape, data)
    }

    /// 該位置是否有反函數
    pub fn is_invertible_at(&self, position: usize) -> bool {
        self.inverses.get(position).is_some_and(|b| !b.is_empty())
    }

    /// 解出 `position` 位置運算元的新值：多個分支時取最接近目前值者
    pub fn solve(&self, position: usize, result: f64, operands: &[f64]) -> Result<f64> {
        let branches = self
            .inverses
            .get(position)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| QuibError::UnsupportedInversion(format!("第 {} 個運算元沒有反函數", position)))?;
        let current = operands[position];
        branches
            .iter()
            .map(|b| b.nearest(result, operands, current))
            .min_by(|a, b| (a - current).abs().total_cmp(&(b - current).abs()))
            .ok_or_else(|| QuibError::UnsupportedInversion("沒有可用的反函數分支".to_string()))
    }
}

fn spec(id: &str, arity: usize, forward: ForwardFn, inverses: Vec<Vec<InverseBranch>>) -> FunctionSpec {
    let elementwise = ElementwiseSpec::new(arity, forward, inverses);
    let sources = (0..arity).map(SourceArg::Single).collect();
    let evaluator = elementwise.clone();
    FunctionSpec::new(
        id,
        Family::Elementwise(elementwise),
        sources,
        Rc::new(move |args: &CallArgs| {
            let operands = (0..evaluator.arity)
                .map(|i| args.array(i))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::from_array(evaluator.evaluate(&operands)?))
        }),
    )
}

fn unary(id: &str, forward: ForwardFn, inverse: Vec<InverseBranch>) -> FunctionSpec {
    spec(id, 1, forward, vec![inverse])
}

fn binary(id: &str, forward: ForwardFn, left: Vec<InverseBranch>, right: Vec<InverseBranch>) -> FunctionSpec {
    spec(id, 2, forward, vec![left, right])
}

/// 內建逐元素函數
pub fn builtins() -> Vec<FunctionSpec> {
    vec![
        binary(
            "add",
            |x| x[0] + x[1],
            vec![InverseBranch::new(|r, x| r - x[1])],
            vec![InverseBranch::new(|r, x| r - x[0])],
        ),
        binary(
            "subtract",
            |x| x[0] - x[1],
            vec![InverseBranch::new(|r, x| r + x[1])],
            vec![InverseBranch::new(|r, x| x[0] - r)],
        ),
        binary(
            "multiply",
            |x| x[0] * x[1],
            vec![InverseBranch::new(|r, x| r / x[1])],
            vec![InverseBranch::new(|r, x| r / x[0])],
        ),
        binary(
            "divide",
            |x| x[0] / x[1],
            vec![InverseBranch::new(|r, x| r * x[1])],
            vec![InverseBranch::new(|r, x| x[0] / r)],
        ),
        binary(
            "power",
            |x| x[0].powf(x[1]),
            vec![
                InverseBranch::new(|r, x| r.powf(1.0 / x[1])),
                InverseBranch::new(|r, x| -r.powf(1.0 / x[1])),
            ],
            vec![InverseBranch::new(|r, x| r.ln() / x[0].ln())],
        ),
        unary("negative", |x| -x[0], vec![InverseBranch::new(|r, _| -r)]),
        unary("sqrt", |x| x[0].sqrt(), vec![InverseBranch::new(|r, _| r * r)]),
        unary("exp", |x| x[0].exp(), vec![InverseBranch::new(|r, _| r.ln())]),
        unary("log", |x| x[0].ln(), vec![InverseBranch::new(|r, _| r.exp())]),
        unary(
            "sin",
            |x| x[0].sin(),
            vec![
                InverseBranch::periodic(|r, _| r.asin(), 2.0 * PI),
                InverseBranch::periodic(|r, _| PI - r.asin(), 2.0 * PI),
            ],
        ),
        unary(
            "cos",
            |x| x[0].cos(),
            vec![
                InverseBranch::periodic(|r, _| r.acos(), 2.0 * PI),
                InverseBranch::periodic(|r, _| -r.acos(), 2.0 * PI),
            ],
        ),
        unary("tan", |x| x[0].tan(), vec![InverseBranch::periodic(|r, _| r.atan(), PI)]),
        unary("abs", |x| x[0].abs(), Vec::new()),
    ]
}
