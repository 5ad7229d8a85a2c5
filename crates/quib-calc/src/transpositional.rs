//! 重排函數族：只移動元素、不改變元素的函數（切片、重塑、串接、旋轉、重複）
//!
//! 重排函數以元素類型為泛型參數實作 [`Rearrange`]。同一個實作既能計算數值，
//! 也能對「來源標記」陣列執行一次，得知每個輸出位置來自哪個來源的哪個元素。

use std::fmt;
use std::rc::Rc;

use quib_core::ndarray::normalize_axis;
use quib_core::{NdArray, QuibError, Result, Value};

use crate::registry::{CallArgs, Family, FunctionSpec, SourceArg};

/// 以元素類型為泛型的重排
pub trait Rearrange<E: Clone> {
    fn rearrange(&self, sources: Vec<NdArray<E>>, args: &CallArgs) -> Result<NdArray<E>>;
}

/// 來源標記：第幾個資料來源的第幾個扁平元素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Provenance {
    pub source: usize,
    pub flat: usize,
}

/// 重排函數
#[derive(Clone)]
pub struct TranspositionalSpec {
    values: Rc<dyn Rearrange<f64>>,
    provenance: Rc<dyn Rearrange<Provenance>>,
}

impl TranspositionalSpec {
    pub fn new<R>(rearrange: R) -> Self
    where
        R: Rearrange<f64> + Rearrange<Provenance> + 'static,
    {
        let shared = Rc::new(rearrange);
        Self {
            values: shared.clone(),
            provenance: shared,
        }
    }

    pub fn evaluate(&self, sources: Vec<NdArray<f64>>, args: &CallArgs) -> Result<NdArray<f64>> {
        self.values.rearrange(sources, args)
    }

    /// 以來源標記陣列代替資料來源執行一次
    pub fn probe(&self, shapes: &[Vec<usize>], args: &CallArgs) -> Result<NdArray<Provenance>> {
        let tagged = shapes
            .iter()
            .enumerate()
            .map(|(source, shape)| {
                let len: usize = shape.iter().product();
                NdArray::new(shape.clone(), (0..len).map(|flat| Provenance { source, flat }).collect())
            })
            .collect::<Result<Vec<_>>>()?;
        self.provenance.rearrange(tagged, args)
    }
}

impl fmt::Debug for TranspositionalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TranspositionalSpec")
    }
}

fn only<E>(mut sources: Vec<NdArray<E>>) -> Result<NdArray<E>> {
    if sources.len() != 1 {
        return Err(QuibError::TypeMismatch(format!("需要一個資料來源，收到 {}", sources.len())));
    }
    sources
        .pop()
        .ok_or_else(|| QuibError::TypeMismatch("缺少資料來源".to_string()))
}

/// `array`：把列出的來源沿新的第 0 軸堆疊
pub struct Stack;

impl<E: Clone> Rearrange<E> for Stack {
    fn rearrange(&self, sources: Vec<NdArray<E>>, _args: &CallArgs) -> Result<NdArray<E>> {
        NdArray::stack(&sources, 0)
    }
}

/// `concatenate`
pub struct Concatenate;

impl<E: Clone> Rearrange<E> for Concatenate {
    fn rearrange(&self, sources: Vec<NdArray<E>>, args: &CallArgs) -> Result<NdArray<E>> {
        let axis = args.int("axis", 1)?.unwrap_or(0) as isize;
        NdArray::concatenate(&sources, axis)
    }
}

/// `transpose`
pub struct Transpose;

impl<E: Clone> Rearrange<E> for Transpose {
    fn rearrange(&self, sources: Vec<NdArray<E>>, args: &CallArgs) -> Result<NdArray<E>> {
        let source = only(sources)?;
        match args.axes("axes", 1)? {
            None => source.transpose(None),
            Some(axes) => {
                let axes = axes
                    .into_iter()
                    .map(|a| normalize_axis(a, source.ndim()))
                    .collect::<Result<Vec<_>>>()?;
                source.transpose(Some(&axes))
            }
        }
    }
}

/// `reshape`（允許一個 -1）
pub struct Reshape;

impl<E: Clone> Rearrange<E> for Reshape {
    fn rearrange(&self, sources: Vec<NdArray<E>>, args: &CallArgs) -> Result<NdArray<E>> {
        let source = only(sources)?;
        let requested = args
            .axes("shape", 1)?
            .ok_or_else(|| QuibError::TypeMismatch("reshape 需要 shape".to_string()))?;
        let known: usize = requested.iter().filter(|&&d| d >= 0).map(|&d| d as usize).product();
        let shape = requested
            .iter()
            .map(|&d| match d {
                -1 if known > 0 => Ok(source.len() / known),
                d if d >= 0 => Ok(d as usize),
                _ => Err(QuibError::ShapeMismatch(format!("無效的形狀 {:?}", requested))),
            })
            .collect::<Result<Vec<_>>>()?;
        source.reshape(&shape)
    }
}

/// `ravel`
pub struct Ravel;

impl<E: Clone> Rearrange<E> for Ravel {
    fn rearrange(&self, sources: Vec<NdArray<E>>, _args: &CallArgs) -> Result<NdArray<E>> {
        let source = only(sources)?;
        source.reshape(&[source.len()])
    }
}

/// `repeat`
pub struct Repeat;

impl<E: Clone> Rearrange<E> for Repeat {
    fn rearrange(&self, sources: Vec<NdArray<E>>, args: &CallArgs) -> Result<NdArray<E>> {
        let source = only(sources)?;
        let repeats = args
            .int("repeats", 1)?
            .ok_or_else(|| QuibError::TypeMismatch("repeat 需要 repeats".to_string()))?;
        let repeats = usize::try_from(repeats)
            .map_err(|_| QuibError::TypeMismatch("repeats 不可為負".to_string()))?;
        let axis = args.int("axis", 2)?.map(|a| a as isize);
        source.repeat(repeats, axis)
    }
}

/// `flip`
pub struct Flip;

impl<E: Clone> Rearrange<E> for Flip {
    fn rearrange(&self, sources: Vec<NdArray<E>>, args: &CallArgs) -> Result<NdArray<E>> {
        let source = only(sources)?;
        source.flip(args.int("axis", 1)?.map(|a| a as isize))
    }
}

/// `rot90`
pub struct Rot90;

impl<E: Clone> Rearrange<E> for Rot90 {
    fn rearrange(&self, sources: Vec<NdArray<E>>, args: &CallArgs) -> Result<NdArray<E>> {
        let source = only(sources)?;
        source.rot90(args.int("k", 1)?.unwrap_or(1))
    }
}

fn spec<R>(id: &str, sources: Vec<SourceArg>, rearrange: R) -> FunctionSpec
where
    R: Rearrange<f64> + Rearrange<Provenance> + 'static,
{
    let transpositional = TranspositionalSpec::new(rearrange);
    let evaluator = transpositional.clone();
    let layout = sources.clone();
    FunctionSpec::new(
        id,
        Family::Transpositional(transpositional),
        sources,
        Rc::new(move |args: &CallArgs| {
            let arrays = args.source_arrays(&layout)?;
            Ok(Value::from_array(evaluator.evaluate(arrays, args)?))
        }),
    )
}

/// 內建重排函數
pub fn builtins() -> Vec<FunctionSpec> {
    vec![
        spec("array", vec![SourceArg::Listed(0)], Stack),
        spec("concatenate", vec![SourceArg::Listed(0)], Concatenate),
        spec("transpose", vec![SourceArg::Single(0)], Transpose),
        spec("reshape", vec![SourceArg::Single(0)], Reshape),
        spec("ravel", vec![SourceArg::Single(0)], Ravel),
        spec("repeat", vec![SourceArg::Single(0)], Repeat),
        spec("flip", vec![SourceArg::Single(0)], Flip),
        spec("rot90", vec![SourceArg::Single(0)], Rot90),
    ]
}
