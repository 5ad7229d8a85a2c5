//! 使用者指派
//!
//! 指派先建立覆寫選擇樹，解析出要寫入的節點，再把覆寫條目一次寫入。
//! 解析失敗或被取消時不會寫入任何覆寫層。

use indexmap::IndexMap;
use quib_core::{Path, QuibError, Result, Value};

use crate::graph::Graph;
use crate::history::Change;
use crate::overrider::{Assignment, AssignmentRemoval, OverrideEntry, Overrider};
use crate::quib::NodeId;

/// 指派結果
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOutcome {
    /// 已寫入的覆寫（節點與路徑）
    Applied { targets: Vec<(NodeId, Path)> },
    /// 選擇器放棄，沒有任何寫入
    Cancelled,
}

impl AssignOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AssignOutcome::Applied { .. })
    }

    pub fn targets(&self) -> &[(NodeId, Path)] {
        match self {
            AssignOutcome::Applied { targets } => targets,
            AssignOutcome::Cancelled => &[],
        }
    }
}

impl Graph {
    /// 在節點 `id` 的 `path` 處指派 `value`
    ///
    /// 指派沿反推鏈往上找可覆寫的節點；有多個候選時詢問選擇器。
    pub fn assign(&mut self, id: NodeId, path: Path, value: impl Into<Value>) -> Result<AssignOutcome> {
        let assignment = Assignment::new(path, value);
        tracing::info!("指派 {} 於 {}", self.label(id), assignment.path);

        tracing::debug!("Step 1: 建立覆寫選擇樹");
        let tree = self.build_choice_tree(id, assignment)?;
        tracing::debug!("反推鏈長度: {}，候選數量: {}", tree.chain.len(), tree.options.len());

        tracing::debug!("Step 2: 解析覆寫選擇");
        let Some(resolution) = self.resolve_choice_tree(&tree)? else {
            tracing::info!("指派已取消");
            return Ok(AssignOutcome::Cancelled);
        };

        tracing::debug!("Step 3: 準備覆寫條目");
        let mut entries = Vec::new();
        for link in &resolution.passed {
            let quib = self.quib(link.node)?;
            if quib.overrider.is_empty() {
                continue;
            }
            let template = self.peek_computed(link.node).unwrap_or(Value::None);
            if quib.overrider.overlaps(&link.assignment.path, &template) {
                tracing::debug!("移除 {} 上被取代的覆寫", self.label(link.node));
                entries.push((
                    link.node,
                    OverrideEntry::Removal(AssignmentRemoval {
                        path: link.assignment.path.clone(),
                    }),
                ));
            }
        }
        for link in &resolution.writes {
            let value = self.convert_with_template(link.node, &link.assignment.value)?;
            entries.push((
                link.node,
                OverrideEntry::Assignment(Assignment {
                    path: link.assignment.path.clone(),
                    value,
                }),
            ));
        }

        tracing::debug!("Step 4: 寫入 {} 個覆寫條目", entries.len());
        let targets: Vec<(NodeId, Path)> = resolution
            .writes
            .iter()
            .map(|link| (link.node, link.assignment.path.clone()))
            .collect();
        self.apply_entries(entries)?;

        tracing::info!("指派完成，覆寫 {} 個節點", targets.len());
        Ok(AssignOutcome::Applied { targets })
    }

    /// 直接覆寫節點本身，不經過反推
    pub fn override_at(&mut self, id: NodeId, path: Path, value: impl Into<Value>) -> Result<()> {
        if !self.quib(id)?.allow_overriding {
            return Err(QuibError::OverrideNotAllowed(format!("{} 不允許覆寫", self.label(id))));
        }
        let value = self.convert_with_template(id, &value.into())?;
        self.apply_entries(vec![(id, OverrideEntry::Assignment(Assignment { path, value }))])
    }

    /// 讓 `path` 處回到計算值
    pub fn remove_override(&mut self, id: NodeId, path: Path) -> Result<()> {
        tracing::info!("移除 {} 於 {} 的覆寫", self.label(id), path);
        self.apply_entries(vec![(id, OverrideEntry::Removal(AssignmentRemoval { path }))])
    }

    /// 節點覆寫層的完整有序條目
    pub fn overrides(&self, id: NodeId) -> Result<Vec<OverrideEntry>> {
        Ok(self.quib(id)?.overrider.entries().cloned().collect())
    }

    /// 以先前保存的條目整個取代覆寫層，並讓下游完全失效（不列入復原歷史）
    pub fn replace_overrides(&mut self, id: NodeId, entries: Vec<OverrideEntry>) -> Result<()> {
        tracing::info!("取代 {} 的覆寫層（{} 個條目）", self.label(id), entries.len());
        self.quib_mut(id)?.overrider = Overrider::from_entries(entries);
        self.invalidate_self(id, &Path::root())?;
        self.invalidate_children(id, &Path::root())
    }

    /// 復原上一次指派；沒有可復原的指派時回傳 `false`
    pub fn undo(&mut self) -> Result<bool> {
        let Some(change) = self.history.pop_undo() else {
            return Ok(false);
        };
        tracing::info!("復原 {} 個節點的覆寫", change.before.len());
        self.restore(change.before, &change.paths)?;
        Ok(true)
    }

    /// 重做上一次復原的指派
    pub fn redo(&mut self) -> Result<bool> {
        let Some(change) = self.history.pop_redo() else {
            return Ok(false);
        };
        tracing::info!("重做 {} 個節點的覆寫", change.after.len());
        self.restore(change.after, &change.paths)?;
        Ok(true)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn convert_with_template(&self, id: NodeId, value: &Value) -> Result<Value> {
        match &self.quib(id)?.template {
            Some(template) => template.convert(value),
            None => Ok(value.clone()),
        }
    }

    /// 先寫入全部條目，再讓下游失效；整批記為一次可復原的變更
    fn apply_entries(&mut self, entries: Vec<(NodeId, OverrideEntry)>) -> Result<()> {
        let mut before: IndexMap<NodeId, Overrider> = IndexMap::new();
        for (node, _) in &entries {
            if !before.contains_key(node) {
                before.insert(*node, self.quib(*node)?.overrider.clone());
            }
        }
        for (node, entry) in &entries {
            self.quib_mut(*node)?.overrider.insert(entry.clone());
        }
        let mut after = Vec::with_capacity(before.len());
        for node in before.keys() {
            after.push((*node, self.quib(*node)?.overrider.clone()));
        }

        if let Err(err) = self.invalidate_entries(&entries) {
            // 失效傳播中途失敗：覆寫還原成寫入前的狀態，已標記的失效保留
            tracing::warn!("覆寫後的失效傳播失敗，還原 {} 個節點: {}", before.len(), err);
            for (node, overrider) in before {
                self.quib_mut(node)?.overrider = overrider;
            }
            return Err(err);
        }

        let paths = entries
            .into_iter()
            .map(|(node, entry)| (node, entry.path().clone()))
            .collect();
        self.history.record(Change {
            before: before.into_iter().collect(),
            after,
            paths,
        });
        Ok(())
    }

    fn invalidate_entries(&mut self, entries: &[(NodeId, OverrideEntry)]) -> Result<()> {
        for (node, entry) in entries {
            // 被覆寫蓋住的緩存可能已過期，移除覆寫時自身也要失效
            if !entry.is_assignment() {
                self.invalidate_self(*node, entry.path())?;
            }
            self.mark_redraw(*node)?;
            self.invalidate_children(*node, entry.path())?;
        }
        Ok(())
    }

    fn restore(&mut self, states: Vec<(NodeId, Overrider)>, paths: &[(NodeId, Path)]) -> Result<()> {
        for (node, overrider) in states {
            self.quib_mut(node)?.overrider = overrider;
        }
        for (node, path) in paths {
            self.invalidate_self(*node, path)?;
            self.invalidate_children(*node, path)?;
        }
        Ok(())
    }
}
