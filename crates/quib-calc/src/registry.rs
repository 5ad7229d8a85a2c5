//! 函數族註冊表
//!
//! 每個函數以穩定的字串識別碼註冊，並標記所屬的函數族（逐元素、重排、
//! 沿軸、未註冊）。族決定前向失效與反向指派如何穿過該函數。

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use quib_core::{NdArray, QuibError, Result, Value};
use serde::{Deserialize, Serialize};

use crate::axiswise::AxisWiseSpec;
use crate::elementwise::ElementwiseSpec;
use crate::transpositional::TranspositionalSpec;

/// 函數識別碼
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 呼叫時已解析成值的參數
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
}

impl CallArgs {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: IndexMap::new(),
        }
    }

    /// 建構器模式：加入關鍵字參數
    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    pub fn arg(&self, position: usize) -> Result<&Value> {
        self.args
            .get(position)
            .ok_or_else(|| QuibError::TypeMismatch(format!("缺少第 {} 個參數", position)))
    }

    /// 第 `position` 個參數轉成數值陣列
    pub fn array(&self, position: usize) -> Result<NdArray<f64>> {
        self.arg(position)?.to_array()
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name).filter(|v| !matches!(v, Value::None))
    }

    /// 關鍵字參數或（若未給）第 `position` 個位置參數
    pub fn param(&self, name: &str, position: usize) -> Option<&Value> {
        self.kwarg(name)
            .or_else(|| self.args.get(position).filter(|v| !matches!(v, Value::None)))
    }

    pub fn flag(&self, name: &str, default: bool) -> bool {
        match self.kwarg(name) {
            Some(Value::Bool(b)) => *b,
            Some(v) => v.as_f64().map(|x| x != 0.0).unwrap_or(default),
            None => default,
        }
    }

    pub fn int(&self, name: &str, position: usize) -> Result<Option<i64>> {
        match self.param(name, position) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| QuibError::TypeMismatch(format!("參數 {} 必須是整數", name))),
        }
    }

    /// 軸參數：未指定為 `None`（所有軸），可為單一整數或整數序列
    pub fn axes(&self, name: &str, position: usize) -> Result<Option<Vec<isize>>> {
        match self.param(name, position) {
            None => Ok(None),
            Some(Value::List(items) | Value::Tuple(items)) => items
                .iter()
                .map(|v| {
                    v.as_i64()
                        .map(|i| i as isize)
                        .ok_or_else(|| QuibError::TypeMismatch("軸必須是整數".to_string()))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(v) => v
                .as_i64()
                .map(|i| Some(vec![i as isize]))
                .ok_or_else(|| QuibError::TypeMismatch("軸必須是整數".to_string())),
        }
    }

    /// 資料來源參數展開後的各個值（序列位置的每個元素各自一個）
    pub fn source_values(&self, sources: &[SourceArg]) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for source in sources {
            match source {
                SourceArg::Single(position) => out.push(self.arg(*position)?.clone()),
                SourceArg::Listed(position) => match self.arg(*position)? {
                    Value::List(items) | Value::Tuple(items) => out.extend(items.iter().cloned()),
                    other => {
                        return Err(QuibError::TypeMismatch(format!(
                            "第 {} 個參數應為序列，收到 {}",
                            position,
                            other.kind_name()
                        )))
                    }
                },
            }
        }
        Ok(out)
    }

    /// 資料來源參數展開後的各個陣列
    pub fn source_arrays(&self, sources: &[SourceArg]) -> Result<Vec<NdArray<f64>>> {
        self.source_values(sources)?.iter().map(Value::to_array).collect()
    }
}

/// 資料來源參數的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceArg {
    /// 該位置的參數本身是一個資料來源
    Single(usize),
    /// 該位置是序列，序列的每個元素各自是資料來源
    Listed(usize),
}

impl SourceArg {
    pub fn position(&self) -> usize {
        match self {
            SourceArg::Single(p) | SourceArg::Listed(p) => *p,
        }
    }
}

/// 函數本體
pub type EvalFn = Rc<dyn Fn(&CallArgs) -> Result<Value>>;

/// 函數族
#[derive(Clone)]
pub enum Family {
    Elementwise(ElementwiseSpec),
    Transpositional(TranspositionalSpec),
    AxisWise(AxisWiseSpec),
    /// 不透明函數：無法轉譯路徑，也無法反推
    Unregistered,
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Elementwise(_) => "elementwise",
            Family::Transpositional(_) => "transpositional",
            Family::AxisWise(_) => "axis-wise",
            Family::Unregistered => "unregistered",
        }
    }
}

/// 已註冊的函數
#[derive(Clone)]
pub struct FunctionSpec {
    pub id: FunctionId,
    pub family: Family,
    /// 資料來源參數；其餘參數都是控制參數
    pub sources: Vec<SourceArg>,
    eval: EvalFn,
}

impl FunctionSpec {
    pub fn new(id: impl Into<FunctionId>, family: Family, sources: Vec<SourceArg>, eval: EvalFn) -> Self {
        Self {
            id: id.into(),
            family,
            sources,
            eval,
        }
    }

    /// 不透明函數
    pub fn opaque<F>(id: impl Into<FunctionId>, eval: F) -> Self
    where
        F: Fn(&CallArgs) -> Result<Value> + 'static,
    {
        Self::new(id, Family::Unregistered, Vec::new(), Rc::new(eval))
    }

    pub fn call(&self, args: &CallArgs) -> Result<Value> {
        (self.eval)(args)
    }

    /// 該位置是否為資料來源參數（以及是否為展開的序列）
    pub fn source_at(&self, position: usize) -> Option<SourceArg> {
        self.sources.iter().copied().find(|s| s.position() == position)
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("id", &self.id)
            .field("family", &self.family.name())
            .field("sources", &self.sources)
            .finish()
    }
}

/// 函數註冊表
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionId, FunctionSpec>,
}

impl FunctionRegistry {
    /// 空的註冊表
    pub fn new() -> Self {
        Self::default()
    }

    /// 含內建函數目錄的註冊表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for spec in crate::elementwise::builtins()
            .into_iter()
            .chain(crate::transpositional::builtins())
            .chain(crate::axiswise::builtins())
        {
            registry.register(spec);
        }
        tracing::debug!("已註冊 {} 個內建函數", registry.len());
        registry
    }

    /// 註冊（或取代）函數
    pub fn register(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.id.clone(), spec);
    }

    pub fn get(&self, id: &FunctionId) -> Result<&FunctionSpec> {
        self.functions
            .get(id)
            .ok_or_else(|| QuibError::UnknownFunction(id.to_string()))
    }

    pub fn contains(&self, id: &FunctionId) -> bool {
        self.functions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
