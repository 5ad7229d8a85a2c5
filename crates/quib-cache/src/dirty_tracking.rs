//! 髒標記追蹤（收集需要重繪的圖形節點）

use std::collections::HashSet;
use std::hash::Hash;

use indexmap::IndexSet;

/// 髒標記追蹤器，保留標記的先後順序
#[derive(Debug, Clone)]
pub struct DirtyTracker<K: Hash + Eq> {
    dirty: IndexSet<K>,
}

impl<K: Hash + Eq + Clone> DirtyTracker<K> {
    /// 創建新的追蹤器
    pub fn new() -> Self {
        Self { dirty: IndexSet::new() }
    }

    /// 標記為髒；重複標記不改變順序
    pub fn mark_dirty(&mut self, key: K) {
        self.dirty.insert(key);
    }

    /// 檢查是否為髒
    pub fn is_dirty(&self, key: &K) -> bool {
        self.dirty.contains(key)
    }

    /// 移除單一標記
    pub fn clear_key(&mut self, key: &K) {
        self.dirty.shift_remove(key);
    }

    /// 清除所有髒標記
    pub fn clear(&mut self) {
        self.dirty.clear();
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }

    /// 取出所有髒標記並清空
    pub fn take(&mut self) -> Vec<K> {
        self.dirty.drain(..).collect()
    }

    /// 只保留仍存在的鍵
    pub fn retain(&mut self, alive: &HashSet<K>) {
        self.dirty.retain(|k| alive.contains(k));
    }
}

impl<K: Hash + Eq + Clone> Default for DirtyTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
