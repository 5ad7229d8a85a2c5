//! 指派歷史（復原／重做）

use std::collections::HashSet;

use quib_core::Path;

use crate::overrider::Overrider;
use crate::quib::NodeId;

/// 一次指派對各節點覆寫層造成的變更
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub before: Vec<(NodeId, Overrider)>,
    pub after: Vec<(NodeId, Overrider)>,
    /// 受影響的路徑，復原後需要重新失效
    pub paths: Vec<(NodeId, Path)>,
}

impl Change {
    fn touches_only(&self, alive: &HashSet<NodeId>) -> bool {
        self.before.iter().all(|(n, _)| alive.contains(n))
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    undo: Vec<Change>,
    redo: Vec<Change>,
}

impl History {
    /// 記錄新變更；重做堆疊隨之清空
    pub fn record(&mut self, change: Change) {
        self.undo.push(change);
        self.redo.clear();
    }

    pub fn pop_undo(&mut self) -> Option<Change> {
        let change = self.undo.pop()?;
        self.redo.push(change.clone());
        Some(change)
    }

    pub fn pop_redo(&mut self) -> Option<Change> {
        let change = self.redo.pop()?;
        self.undo.push(change.clone());
        Some(change)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// 丟棄引用已移除節點的變更
    pub fn retain_nodes(&mut self, alive: &HashSet<NodeId>) {
        self.undo.retain(|c| c.touches_only(alive));
        self.redo.retain(|c| c.touches_only(alive));
    }
}
