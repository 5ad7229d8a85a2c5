//! 依賴節點（Quib）

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use quib_cache::Cache;
use quib_core::{CacheMode, PathStep, Value};

use crate::overrider::Overrider;
use crate::registry::FunctionId;
use crate::template::AssignmentTemplate;

/// 節點在圖中的代號（含世代，用於偵測已回收的節點）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// 函數參數：節點、字面值，或可再巢狀的序列
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Quib(NodeId),
    Value(Value),
    List(Vec<Arg>),
}

impl Arg {
    /// 參數樹中直接或間接引用的所有節點
    pub fn quibs(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_quibs(&mut out);
        out
    }

    fn collect_quibs(&self, out: &mut Vec<NodeId>) {
        match self {
            Arg::Quib(id) => out.push(*id),
            Arg::Value(_) => {}
            Arg::List(items) => items.iter().for_each(|a| a.collect_quibs(out)),
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        match self {
            Arg::Quib(q) => *q == id,
            Arg::Value(_) => false,
            Arg::List(items) => items.iter().any(|a| a.contains(id)),
        }
    }
}

impl From<NodeId> for Arg {
    fn from(id: NodeId) -> Self {
        Arg::Quib(id)
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Value(Value::Float(value))
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(items: Vec<Arg>) -> Self {
        Arg::List(items)
    }
}

/// 節點如何產生值
#[derive(Debug, Clone)]
pub enum Recipe {
    /// 輸入節點：值就是字面值
    Source(Value),
    /// 呼叫已註冊的函數
    Call {
        func: FunctionId,
        args: Vec<Arg>,
        kwargs: IndexMap<String, Arg>,
    },
    /// 元素存取 `source[key]`
    Item { source: Arg, key: PathStep },
}

impl Recipe {
    /// 直接或間接引用的父節點（去重，保持順序）
    pub fn parents(&self) -> Vec<NodeId> {
        let all: Vec<NodeId> = match self {
            Recipe::Source(_) => Vec::new(),
            Recipe::Call { args, kwargs, .. } => args
                .iter()
                .chain(kwargs.values())
                .flat_map(Arg::quibs)
                .collect(),
            Recipe::Item { source, .. } => source.quibs(),
        };
        all.into_iter().collect::<IndexSet<_>>().into_iter().collect()
    }

    pub fn describe(&self) -> String {
        match self {
            Recipe::Source(v) => format!("source<{}>", v.kind_name()),
            Recipe::Call { func, .. } => func.to_string(),
            Recipe::Item { key, .. } => format!("getitem{}", key),
        }
    }
}

/// 依賴圖節點
#[derive(Debug, Clone)]
pub struct Quib {
    pub(crate) name: Option<String>,
    pub(crate) recipe: Recipe,
    pub(crate) cache: Option<Cache>,
    pub(crate) cache_mode: CacheMode,
    pub(crate) overrider: Overrider,
    pub(crate) allow_overriding: bool,
    pub(crate) template: Option<AssignmentTemplate>,
    pub(crate) is_graphics: bool,
    /// 子節點代號（不擁有子節點）
    pub(crate) children: IndexSet<NodeId>,
    pub(crate) evaluations: usize,
}

impl Quib {
    pub(crate) fn new(recipe: Recipe, cache_mode: CacheMode, allow_overriding: bool) -> Self {
        Self {
            name: None,
            recipe,
            cache: None,
            cache_mode,
            overrider: Overrider::new(),
            allow_overriding,
            template: None,
            is_graphics: false,
            children: IndexSet::new(),
            evaluations: 0,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn overrider(&self) -> &Overrider {
        &self.overrider
    }

    pub fn allows_overriding(&self) -> bool {
        self.allow_overriding
    }

    pub fn is_graphics(&self) -> bool {
        self.is_graphics
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// 函數被實際執行的次數
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().copied()
    }

    /// 日誌用的標籤
    pub fn label(&self, id: NodeId) -> String {
        match &self.name {
            Some(name) => format!("{}{}", name, id),
            None => format!("{}{}", self.recipe.describe(), id),
        }
    }
}
