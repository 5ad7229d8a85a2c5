//! 依賴圖：節點存儲與惰性讀取
//!
//! 圖以世代索引的 arena 擁有所有節點。節點只記錄子節點代號，
//! 不擁有子節點；清理由 [`Graph::collect_garbage`] 依可達性進行。

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use quib_cache::{Cache, CacheStatus, DirtyTracker};
use quib_core::path::get_step;
use quib_core::{CacheMode, GraphConfig, Path, PathStep, QuibError, Result, Value};

use crate::choice::{ChoiceKey, DecliningChooser, OverrideChoice, OverrideChooser};
use crate::history::History;
use crate::quib::{Arg, NodeId, Quib, Recipe};
use crate::registry::{CallArgs, FunctionId, FunctionRegistry, FunctionSpec, SourceArg};
use crate::template::AssignmentTemplate;
use crate::translation::{backward_mask, item_backward, slots, SlotArg};

struct Slot {
    generation: u32,
    quib: Option<Quib>,
}

/// 依賴圖
pub struct Graph {
    pub(crate) config: GraphConfig,
    pub(crate) registry: FunctionRegistry,
    slots: Vec<Slot>,
    free: Vec<u32>,
    pub(crate) chooser: Box<dyn OverrideChooser>,
    pub(crate) choices: HashMap<ChoiceKey, OverrideChoice>,
    pub(crate) prompts: usize,
    pub(crate) redraws: DirtyTracker<NodeId>,
    pub(crate) history: History,
}

impl Graph {
    /// 創建新的依賴圖
    pub fn new(config: GraphConfig, registry: FunctionRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, registry))
    }

    /// 預設配置與內建函數目錄
    pub fn with_builtins() -> Self {
        Self::assemble(GraphConfig::default(), FunctionRegistry::with_builtins())
    }

    fn assemble(config: GraphConfig, registry: FunctionRegistry) -> Self {
        Self {
            config,
            registry,
            slots: Vec::new(),
            free: Vec::new(),
            chooser: Box::new(DecliningChooser),
            choices: HashMap::new(),
            prompts: 0,
            redraws: DirtyTracker::new(),
            history: History::default(),
        }
    }

    /// 建構器模式：設置歧義指派的選擇器
    pub fn with_chooser(mut self, chooser: impl OverrideChooser + 'static) -> Self {
        self.chooser = Box::new(chooser);
        self
    }

    pub fn set_chooser(&mut self, chooser: impl OverrideChooser + 'static) {
        self.chooser = Box::new(chooser);
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// 註冊額外的函數
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// 存活節點數
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.quib.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.quib(id).is_ok()
    }

    /// 存活節點代號
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.quib.is_some())
            .map(|(index, s)| NodeId {
                index: index as u32,
                generation: s.generation,
            })
            .collect()
    }

    pub fn quib(&self, id: NodeId) -> Result<&Quib> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.quib.as_ref())
            .ok_or(QuibError::UnknownNode(id.index as usize))
    }

    pub(crate) fn quib_mut(&mut self, id: NodeId) -> Result<&mut Quib> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.quib.as_mut())
            .ok_or(QuibError::UnknownNode(id.index as usize))
    }

    pub(crate) fn label(&self, id: NodeId) -> String {
        self.quib(id).map(|q| q.label(id)).unwrap_or_else(|_| id.to_string())
    }

    // ---------------------------------------------------------------
    // 建立節點
    // ---------------------------------------------------------------

    fn alloc(&mut self, quib: Quib) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.quib = Some(quib);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    quib: Some(quib),
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    fn insert(&mut self, recipe: Recipe) -> Result<NodeId> {
        let parents = recipe.parents();
        for parent in &parents {
            self.quib(*parent)?;
        }
        let allow_overriding = match recipe {
            Recipe::Source(_) => true,
            _ => self.config.allow_overriding_functions,
        };
        let id = self.alloc(Quib::new(recipe, self.config.default_cache_mode, allow_overriding));
        for parent in parents {
            self.quib_mut(parent)?.children.insert(id);
        }
        tracing::debug!("建立節點 {}", self.label(id));
        Ok(id)
    }

    /// 輸入節點
    pub fn source(&mut self, value: impl Into<Value>) -> NodeId {
        let quib = Quib::new(Recipe::Source(value.into()), self.config.default_cache_mode, true);
        self.alloc(quib)
    }

    /// 呼叫已註冊函數的節點
    pub fn call(&mut self, func: impl Into<FunctionId>, args: Vec<Arg>) -> Result<NodeId> {
        self.call_with(func, args, IndexMap::new())
    }

    /// 帶關鍵字參數的函數節點
    pub fn call_with(
        &mut self,
        func: impl Into<FunctionId>,
        args: Vec<Arg>,
        kwargs: IndexMap<String, Arg>,
    ) -> Result<NodeId> {
        let func = func.into();
        self.registry.get(&func)?;
        self.insert(Recipe::Call { func, args, kwargs })
    }

    /// 元素存取節點 `source[key]`
    pub fn item(&mut self, source: impl Into<Arg>, key: PathStep) -> Result<NodeId> {
        self.insert(Recipe::Item {
            source: source.into(),
            key,
        })
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<()> {
        self.quib_mut(id)?.name = Some(name.into());
        Ok(())
    }

    pub fn set_allow_overriding(&mut self, id: NodeId, allow: bool) -> Result<()> {
        self.quib_mut(id)?.allow_overriding = allow;
        Ok(())
    }

    pub fn set_assignment_template(&mut self, id: NodeId, template: Option<AssignmentTemplate>) -> Result<()> {
        self.quib_mut(id)?.template = template;
        Ok(())
    }

    /// 標記為會產生可見副作用的圖形節點
    pub fn set_graphics(&mut self, id: NodeId, is_graphics: bool) -> Result<()> {
        self.quib_mut(id)?.is_graphics = is_graphics;
        Ok(())
    }

    /// 改變緩存模式；關閉時丟棄既有緩存
    pub fn set_cache_mode(&mut self, id: NodeId, mode: CacheMode) -> Result<()> {
        let quib = self.quib_mut(id)?;
        quib.cache_mode = mode;
        if mode == CacheMode::Off {
            quib.cache = None;
        }
        Ok(())
    }

    /// 緩存狀態；尚未計算過的節點為 `None`
    pub fn cache_status(&self, id: NodeId) -> Result<Option<CacheStatus>> {
        Ok(self.quib(id)?.cache.as_ref().map(Cache::get_cache_status))
    }

    /// 函數被實際執行的次數
    pub fn evaluations(&self, id: NodeId) -> Result<usize> {
        Ok(self.quib(id)?.evaluations)
    }

    pub fn is_overridable(&self, id: NodeId) -> Result<bool> {
        Ok(self.quib(id)?.allow_overriding)
    }

    /// 節點的所有祖先（含自身）
    pub fn ancestors(&self, id: NodeId) -> Result<HashSet<NodeId>> {
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                stack.extend(self.quib(current)?.recipe.parents());
            }
        }
        Ok(seen)
    }

    // ---------------------------------------------------------------
    // 讀取
    // ---------------------------------------------------------------

    /// 整個值
    pub fn get_value(&mut self, id: NodeId) -> Result<Value> {
        self.get_value_valid_at_path(id, &Path::root())
    }

    /// 回傳整個值，保證 `path` 內的部分是最新的（已套用覆寫）
    pub fn get_value_valid_at_path(&mut self, id: NodeId, path: &Path) -> Result<Value> {
        self.read(id, path, 0)
    }

    /// 路徑所指的子值
    pub fn get_value_at(&mut self, id: NodeId, path: &Path) -> Result<Value> {
        let value = self.get_value_valid_at_path(id, path)?;
        quib_core::path::get(&value, path)
    }

    pub(crate) fn read(&mut self, id: NodeId, path: &Path, depth: usize) -> Result<Value> {
        if depth > self.config.recursion_limit {
            return Err(QuibError::RecursionLimit(self.config.recursion_limit));
        }
        let computed = self.computed_value(id, path, depth)?;
        self.quib(id)?.overrider.apply(&computed)
    }

    /// 未套用覆寫的計算值，保證 `path` 內有效
    pub(crate) fn computed_value(&mut self, id: NodeId, path: &Path, depth: usize) -> Result<Value> {
        let quib = self.quib(id)?;
        let recipe = match &quib.recipe {
            Recipe::Source(value) => return Ok(value.clone()),
            recipe => recipe.clone(),
        };
        if quib.cache_mode == CacheMode::Off {
            return self.evaluate(id, &recipe, None, depth);
        }

        let uncached = self.uncached_paths(id, path)?;
        if !uncached.is_empty() {
            tracing::trace!("{} 需要重算 {} 個子路徑", self.label(id), uncached.len());
        }
        for sub in uncached {
            self.refresh(id, &recipe, &sub, depth)?;
        }
        self.quib(id)?
            .cache
            .as_ref()
            .map(Cache::get_value)
            .ok_or_else(|| QuibError::CacheStatus(format!("{} 沒有緩存", self.label(id))))
    }

    pub(crate) fn uncached_paths(&mut self, id: NodeId, path: &Path) -> Result<Vec<Path>> {
        let label = self.label(id);
        let Some(cache) = self.quib_mut(id)?.cache.as_mut() else {
            return Ok(vec![Path::root()]);
        };
        match cache.get_uncached_paths(path) {
            Ok(paths) => Ok(paths),
            Err(err) => {
                // 緩存無法以此路徑定址時，以整個值為單位
                tracing::debug!("{} 的 {} 緩存無法處理路徑 {}: {}", label, cache.kind_name(), path, err);
                cache.get_uncached_paths(&Path::root())
            }
        }
    }

    /// 重算 `sub` 並存入緩存；結果形狀改變時整個緩存重建
    fn refresh(&mut self, id: NodeId, recipe: &Recipe, sub: &Path, depth: usize) -> Result<()> {
        let partial = !sub.is_empty() && self.quib(id)?.cache.is_some();
        let value = self.evaluate(id, recipe, partial.then_some(sub), depth)?;

        let stored = match self.quib_mut(id)?.cache.as_mut() {
            Some(cache) if cache.matches_result(&value) => cache.set_valid_value_at_path(sub, &value).is_ok(),
            _ => false,
        };
        if stored {
            return Ok(());
        }

        let value = if partial {
            tracing::debug!("{} 的結果形狀改變，重建緩存", self.label(id));
            self.evaluate(id, recipe, None, depth)?
        } else {
            value
        };
        let mut cache = Cache::create(&value);
        cache.set_valid_value_at_path(&Path::root(), &value)?;
        self.quib_mut(id)?.cache = Some(cache);
        Ok(())
    }

    /// 執行節點的函數；`region` 給定時只保證結果在該區域內正確
    pub(crate) fn evaluate(&mut self, id: NodeId, recipe: &Recipe, region: Option<&Path>, depth: usize) -> Result<Value> {
        match recipe {
            Recipe::Source(value) => Ok(value.clone()),
            Recipe::Item { source, key } => {
                let parent_path = region.map(|r| item_backward(key, r)).unwrap_or_default();
                let parent = self.read_arg(source, &parent_path, depth + 1)?;
                self.quib_mut(id)?.evaluations += 1;
                get_step(&parent, key).map_err(|err| self.failure(id, err))
            }
            Recipe::Call { func, args, kwargs } => {
                let spec = self.registry.get(func)?.clone();
                let call = self.resolve_call(id, &spec, args, kwargs, region, depth)?;
                self.quib_mut(id)?.evaluations += 1;
                tracing::trace!("執行 {}", self.label(id));
                spec.call(&call).map_err(|err| self.failure(id, err))
            }
        }
    }

    fn failure(&self, id: NodeId, err: QuibError) -> QuibError {
        let node = self.label(id);
        tracing::warn!("節點 {} 計算失敗: {}", node, err);
        QuibError::FunctionFailed {
            node,
            message: err.to_string(),
        }
    }

    pub(crate) fn read_arg(&mut self, arg: &Arg, path: &Path, depth: usize) -> Result<Value> {
        match arg {
            Arg::Quib(id) => self.read(*id, path, depth),
            Arg::Value(value) => Ok(value.clone()),
            Arg::List(items) => items
                .iter()
                .map(|item| self.read_arg(item, &Path::root(), depth))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
        }
    }

    /// 把參數解析成值：控制參數整個讀取，資料來源只讀取 `region` 反推出的區域
    pub(crate) fn resolve_call(
        &mut self,
        id: NodeId,
        spec: &FunctionSpec,
        args: &[Arg],
        kwargs: &IndexMap<String, Arg>,
        region: Option<&Path>,
        depth: usize,
    ) -> Result<CallArgs> {
        let mut call = CallArgs::default();
        for (name, arg) in kwargs {
            let value = self.read_arg(arg, &Path::root(), depth + 1)?;
            call.kwargs.insert(name.clone(), value);
        }
        for (position, arg) in args.iter().enumerate() {
            let value = match spec.source_at(position) {
                None => self.read_arg(arg, &Path::root(), depth + 1)?,
                Some(_) => Value::None,
            };
            call.args.push(value);
        }

        let needed = match region {
            Some(region) => self.needed_source_paths(id, spec, args, &call, region),
            None => None,
        };
        let needed_path = |slot: usize| -> Path {
            needed
                .as_ref()
                .and_then(|paths| paths.get(slot).cloned().flatten())
                .unwrap_or_default()
        };

        let mut slot = 0;
        for source in &spec.sources {
            let position = source.position();
            let Some(arg) = args.get(position) else {
                slot += 1;
                continue;
            };
            let value = match (source, arg) {
                (SourceArg::Listed(_), Arg::List(items)) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        let path = needed_path(slot);
                        values.push(self.read_arg(item, &path, depth + 1)?);
                        slot += 1;
                    }
                    Value::List(values)
                }
                (SourceArg::Listed(_), Arg::Value(literal)) => {
                    slot += match literal {
                        Value::List(items) | Value::Tuple(items) => items.len(),
                        _ => 1,
                    };
                    literal.clone()
                }
                (_, arg) => {
                    let path = needed_path(slot);
                    slot += 1;
                    self.read_arg(arg, &path, depth + 1)?
                }
            };
            call.args[position] = value;
        }
        Ok(call)
    }

    /// 每個資料來源需要讀取的路徑；無法轉譯時回傳 `None`（全部整個讀取）
    fn needed_source_paths(
        &self,
        id: NodeId,
        spec: &FunctionSpec,
        args: &[Arg],
        params: &CallArgs,
        region: &Path,
    ) -> Option<Vec<Option<Path>>> {
        let own = self.peek_computed(id)?;
        let (positional, _) = region.split_fields();
        let region_mask = positional.region_mask(&own.positional_shape()?).ok()?;

        let slot_args = slots(spec, args);
        let mut templates = Vec::with_capacity(slot_args.len());
        for slot in &slot_args {
            let template = match slot {
                SlotArg::Quib(q) => self.peek(*q)?,
                SlotArg::Literal(v) => v.clone(),
                SlotArg::Opaque => return None,
            };
            templates.push(template);
        }
        let shapes = templates
            .iter()
            .map(Value::positional_shape)
            .collect::<Option<Vec<_>>>()?;

        slot_args
            .iter()
            .enumerate()
            .map(|(slot, arg)| match arg {
                SlotArg::Quib(_) => {
                    let mask = backward_mask(spec, params, slot, &region_mask, &shapes).ok()?;
                    Some(Some(read_path(&mask, &templates[slot])))
                }
                _ => Some(None),
            })
            .collect()
    }

    // ---------------------------------------------------------------
    // 不觸發計算的查看
    // ---------------------------------------------------------------

    /// 目前已知的計算值（不觸發計算）
    pub(crate) fn peek_computed(&self, id: NodeId) -> Option<Value> {
        let quib = self.quib(id).ok()?;
        match &quib.recipe {
            Recipe::Source(value) => Some(value.clone()),
            _ => quib.cache.as_ref().map(Cache::get_value),
        }
    }

    /// 目前已知的值（已套用覆寫，不觸發計算）
    pub(crate) fn peek(&self, id: NodeId) -> Option<Value> {
        let computed = self.peek_computed(id)?;
        self.quib(id).ok()?.overrider.apply(&computed).ok()
    }

    pub(crate) fn peek_arg(&self, arg: &Arg) -> Option<Value> {
        match arg {
            Arg::Quib(id) => self.peek(*id),
            Arg::Value(value) => Some(value.clone()),
            Arg::List(items) => items
                .iter()
                .map(|item| self.peek_arg(item))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
        }
    }

    /// 只含控制參數的呼叫參數（資料來源位置為 `None`）
    pub(crate) fn peek_params(
        &self,
        spec: &FunctionSpec,
        args: &[Arg],
        kwargs: &IndexMap<String, Arg>,
    ) -> Option<CallArgs> {
        let mut call = CallArgs::default();
        for (name, arg) in kwargs {
            call.kwargs.insert(name.clone(), self.peek_arg(arg)?);
        }
        for (position, arg) in args.iter().enumerate() {
            let value = match spec.source_at(position) {
                None => self.peek_arg(arg)?,
                Some(_) => Value::None,
            };
            call.args.push(value);
        }
        Some(call)
    }

    // ---------------------------------------------------------------
    // 清理
    // ---------------------------------------------------------------

    /// 移除所有無法從 `roots` 向上追溯到的節點，回傳移除數量
    pub fn collect_garbage(&mut self, roots: &[NodeId]) -> Result<usize> {
        let mut alive = HashSet::new();
        for root in roots {
            alive.extend(self.ancestors(*root)?);
        }
        let mut removed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let id = NodeId {
                index: index as u32,
                generation: slot.generation,
            };
            if slot.quib.is_some() && !alive.contains(&id) {
                slot.quib = None;
                slot.generation += 1;
                self.free.push(index as u32);
                removed += 1;
            }
        }
        for slot in self.slots.iter_mut() {
            if let Some(quib) = slot.quib.as_mut() {
                quib.children.retain(|c| alive.contains(c));
            }
        }
        self.redraws.retain(&alive);
        self.choices.retain(|key, _| key.nodes().all(|n| alive.contains(&n)));
        self.history.retain_nodes(&alive);
        tracing::info!("清理完成：移除 {} 個節點，保留 {} 個", removed, alive.len());
        Ok(removed)
    }
}

/// 區域遮罩 → 讀取父節點用的單一路徑
fn read_path(mask: &quib_core::NdArray<bool>, template: &Value) -> Path {
    if mask.all() {
        return Path::root();
    }
    match template {
        Value::List(items) | Value::Tuple(items) => {
            let block = mask.len() / items.len().max(1);
            let positions = (0..items.len())
                .filter(|i| mask.data()[i * block..(i + 1) * block].iter().any(|b| *b))
                .map(|i| i as isize)
                .collect();
            Path::new(vec![PathStep::fancy(positions)])
        }
        _ => Path::new(vec![PathStep::mask(mask.clone())]),
    }
}
