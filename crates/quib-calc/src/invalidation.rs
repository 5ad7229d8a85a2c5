//! 前向失效傳播
//!
//! 父節點的變動區域依子節點的函數族轉譯成子節點的變動區域；
//! 沒有重疊的子節點不受影響，無法轉譯時整個失效。

use quib_core::{CacheMode, NdArray, Path, QuibError, Result};

use crate::graph::Graph;
use crate::quib::{Arg, NodeId, Recipe};
use crate::registry::FunctionSpec;
use crate::translation::{forward_mask, is_parameter_of, item_forward, mask_to_paths, slots, SlotArg};

impl Graph {
    /// 讓節點在 `path` 處失效，並傳播到所有受影響的下游節點
    pub fn invalidate(&mut self, id: NodeId, path: &Path) -> Result<()> {
        tracing::info!("失效 {} 於 {}", self.label(id), path);
        self.invalidate_self(id, path)?;
        self.propagate(id, path, 0)
    }

    /// 只傳播到下游（節點自身的計算值未變，例如新增覆寫之後）
    pub(crate) fn invalidate_children(&mut self, id: NodeId, path: &Path) -> Result<()> {
        self.propagate(id, path, 0)
    }

    pub(crate) fn invalidate_self(&mut self, id: NodeId, path: &Path) -> Result<()> {
        let track = self.config.track_redraws;
        let quib = self.quib_mut(id)?;
        if let Some(cache) = quib.cache.as_mut() {
            if cache.set_invalid_at_path(path).is_err() && cache.set_invalid_at_path(&Path::root()).is_err() {
                quib.cache = None;
            }
        }
        if track && quib.is_graphics {
            self.redraws.mark_dirty(id);
        }
        Ok(())
    }

    /// 節點可見的值改變（例如覆寫變動）時登記重繪
    pub(crate) fn mark_redraw(&mut self, id: NodeId) -> Result<()> {
        if self.config.track_redraws && self.quib(id)?.is_graphics {
            self.redraws.mark_dirty(id);
        }
        Ok(())
    }

    fn propagate(&mut self, id: NodeId, path: &Path, depth: usize) -> Result<()> {
        if depth > self.config.recursion_limit {
            return Err(QuibError::RecursionLimit(self.config.recursion_limit));
        }
        let children: Vec<NodeId> = self.quib(id)?.children().collect();
        for child in children {
            for child_path in self.translate_to_child(id, child, path)? {
                if self.overrides_cover(child, &child_path)? {
                    tracing::debug!("{} 的覆寫蓋住 {}，停止傳播", self.label(child), child_path);
                    continue;
                }
                tracing::debug!("失效 {} 於 {}", self.label(child), child_path);
                self.invalidate_self(child, &child_path)?;
                self.propagate(child, &child_path, depth + 1)?;
            }
        }
        Ok(())
    }

    fn overrides_cover(&self, id: NodeId, path: &Path) -> Result<bool> {
        let quib = self.quib(id)?;
        if quib.overrider.is_empty() {
            return Ok(false);
        }
        Ok(self
            .peek_computed(id)
            .is_some_and(|template| quib.overrider.covers(path, &template)))
    }

    /// 父節點 `parent` 在 `path` 的變動對應到子節點的哪些路徑；空集合代表沒有重疊
    pub(crate) fn translate_to_child(&self, parent: NodeId, child: NodeId, path: &Path) -> Result<Vec<Path>> {
        let quib = self.quib(child)?;
        // 從未計算過的子節點沒有東西可失效
        if quib.cache.is_none() && quib.cache_mode == CacheMode::On {
            return Ok(Vec::new());
        }
        match &quib.recipe {
            Recipe::Source(_) => Ok(Vec::new()),
            Recipe::Item { source, key } => {
                if *source != Arg::Quib(parent) {
                    return Ok(vec![Path::root()]);
                }
                let Some(parent_value) = self.peek(parent) else {
                    return Ok(vec![Path::root()]);
                };
                Ok(item_forward(key, path, &parent_value).unwrap_or_else(|_| vec![Path::root()]))
            }
            Recipe::Call { func, args, kwargs } => {
                let spec = self.registry.get(func)?;
                if is_parameter_of(spec, args, kwargs, parent) {
                    return Ok(vec![Path::root()]);
                }
                Ok(self
                    .forward_call(parent, child, spec, args, kwargs, path)
                    .unwrap_or_else(|| vec![Path::root()]))
            }
        }
    }

    /// 資料來源的前向轉譯；無法計算時回傳 `None`
    fn forward_call(
        &self,
        parent: NodeId,
        child: NodeId,
        spec: &FunctionSpec,
        args: &[Arg],
        kwargs: &indexmap::IndexMap<String, Arg>,
        path: &Path,
    ) -> Option<Vec<Path>> {
        let params = self.peek_params(spec, args, kwargs)?;
        let slot_args = slots(spec, args);
        let mut shapes = Vec::with_capacity(slot_args.len());
        for slot in &slot_args {
            let template = match slot {
                SlotArg::Quib(q) => self.peek(*q)?,
                SlotArg::Literal(v) => v.clone(),
                SlotArg::Opaque => return None,
            };
            shapes.push(template.positional_shape()?);
        }

        let own = self.peek_computed(child)?;
        let out_shape = own.positional_shape()?;
        let (positional, fields) = path.split_fields();

        let mut mask = NdArray::full(&out_shape, false);
        for (slot, arg) in slot_args.iter().enumerate() {
            if *arg != SlotArg::Quib(parent) {
                continue;
            }
            let changed = positional.region_mask(&shapes[slot]).ok()?;
            let translated = forward_mask(spec, &params, slot, &changed, &shapes, &out_shape).ok()?;
            mask = mask.or(&translated).ok()?;
        }

        let paths = mask_to_paths(&mask, &own);
        if fields.is_empty() || !matches!(own, quib_core::Value::Record(_)) {
            return Some(paths);
        }
        let fields = Path::new(fields);
        Some(paths.into_iter().map(|p| p.concat(&fields)).collect())
    }

    /// 取出並清空待重繪的圖形節點
    pub fn take_pending_redraws(&mut self) -> Vec<NodeId> {
        self.redraws.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quib_core::{PathStep, Value};

    fn numbers() -> Value {
        Value::from(vec![1.0, 2.0, 3.0])
    }

    fn mask_path(len: usize, hits: &[usize]) -> Path {
        Path::new(vec![PathStep::mask(NdArray::from_indices(&[len], hits))])
    }

    #[test]
    fn test_slice_child_only_invalidated_on_overlap() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let d = graph.item(a, PathStep::range(0, 2)).unwrap();
        graph.get_value(d).unwrap();

        // 索引 2 不在切片內
        graph.invalidate(a, &Path::at(2)).unwrap();
        assert!(graph.uncached_paths(d, &Path::root()).unwrap().is_empty());

        graph.invalidate(a, &Path::at(1)).unwrap();
        assert_eq!(graph.uncached_paths(d, &Path::root()).unwrap(), vec![mask_path(2, &[1])]);
    }

    #[test]
    fn test_concatenate_invalidates_prefix_only() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let b = graph.source(Value::from(vec![4.0, 5.0]));
        let c = graph
            .call("concatenate", vec![Arg::List(vec![a.into(), b.into()])])
            .unwrap();
        graph.get_value(c).unwrap();

        graph.invalidate(a, &Path::at(0)).unwrap();
        assert_eq!(graph.uncached_paths(c, &Path::root()).unwrap(), vec![mask_path(5, &[0])]);

        graph.invalidate(b, &Path::at(1)).unwrap();
        assert_eq!(graph.uncached_paths(c, &Path::root()).unwrap(), vec![mask_path(5, &[0, 4])]);
    }

    #[test]
    fn test_elementwise_broadcast_invalidation() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let b = graph.call("add", vec![a.into(), 1.0.into()]).unwrap();
        let total = graph.call("sum", vec![b.into()]).unwrap();
        graph.get_value(total).unwrap();

        graph.invalidate(a, &Path::at(2)).unwrap();
        assert_eq!(graph.uncached_paths(b, &Path::root()).unwrap(), vec![mask_path(3, &[2])]);
        assert_eq!(graph.uncached_paths(total, &Path::root()).unwrap(), vec![Path::root()]);

        // 只重算失效的部分
        assert_eq!(graph.get_value(total).unwrap(), Value::Float(9.0));
        assert_eq!(graph.evaluations(b).unwrap(), 2);
    }

    #[test]
    fn test_parameter_change_invalidates_whole_child() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(Value::array(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap());
        let axis = graph.source(Value::Int(0));
        let mut kwargs = indexmap::IndexMap::new();
        kwargs.insert("axis".to_string(), Arg::Quib(axis));
        let s = graph.call_with("sum", vec![a.into()], kwargs).unwrap();
        graph.get_value(s).unwrap();

        graph.invalidate(axis, &Path::root()).unwrap();
        assert_eq!(graph.uncached_paths(s, &Path::root()).unwrap(), vec![Path::root()]);
    }

    #[test]
    fn test_uncomputed_child_is_skipped() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let b = graph.call("negative", vec![a.into()]).unwrap();
        graph.invalidate(a, &Path::at(0)).unwrap();
        assert!(graph.quib(b).unwrap().cache.is_none());
    }

    #[test]
    fn test_graphics_nodes_collected_for_redraw() {
        let mut graph = Graph::with_builtins();
        let a = graph.source(numbers());
        let plot = graph.call("negative", vec![a.into()]).unwrap();
        graph.set_graphics(plot, true).unwrap();
        graph.get_value(plot).unwrap();

        graph.invalidate(a, &Path::at(0)).unwrap();
        assert_eq!(graph.take_pending_redraws(), vec![plot]);
        assert!(graph.take_pending_redraws().is_empty());
    }
}
