//! 覆寫層：疊加在計算值之上的使用者編輯
//!
//! 條目以正規路徑為鍵、按插入順序套用；重新指派同一路徑會把條目移到最後。

use indexmap::IndexMap;
use quib_core::path::{get, set};
use quib_core::{NdArray, Path, Result, Value};
use serde::{Deserialize, Serialize};

/// 指派：在路徑處寫入值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub path: Path,
    pub value: Value,
}

impl Assignment {
    pub fn new(path: Path, value: impl Into<Value>) -> Self {
        Self {
            path,
            value: value.into(),
        }
    }
}

/// 移除標記：該路徑回到計算值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRemoval {
    pub path: Path,
}

/// 覆寫條目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OverrideEntry {
    Assignment(Assignment),
    Removal(AssignmentRemoval),
}

impl OverrideEntry {
    pub fn path(&self) -> &Path {
        match self {
            OverrideEntry::Assignment(a) => &a.path,
            OverrideEntry::Removal(r) => &r.path,
        }
    }

    pub fn is_assignment(&self) -> bool {
        matches!(self, OverrideEntry::Assignment(_))
    }
}

impl From<Assignment> for OverrideEntry {
    fn from(assignment: Assignment) -> Self {
        OverrideEntry::Assignment(assignment)
    }
}

/// 覆寫層
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrider {
    entries: IndexMap<Path, OverrideEntry>,
}

impl Overrider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由有序條目重建
    pub fn from_entries(entries: impl IntoIterator<Item = OverrideEntry>) -> Self {
        let mut overrider = Self::new();
        for entry in entries {
            overrider.insert(entry);
        }
        overrider
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 按套用順序列出條目
    pub fn entries(&self) -> impl Iterator<Item = &OverrideEntry> {
        self.entries.values()
    }

    /// 加入條目；同一正規路徑的舊條目被取代並移到最後
    pub fn insert(&mut self, entry: OverrideEntry) {
        let key = entry.path().canonical();
        self.entries.shift_remove(&key);
        self.entries.insert(key, entry);
    }

    pub fn add_assignment(&mut self, assignment: Assignment) {
        self.insert(OverrideEntry::Assignment(assignment));
    }

    pub fn add_removal(&mut self, path: Path) {
        self.insert(OverrideEntry::Removal(AssignmentRemoval { path }));
    }

    /// 取得路徑上的條目
    pub fn get(&self, path: &Path) -> Option<&OverrideEntry> {
        self.entries.get(&path.canonical())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 把條目依序疊加到計算值上
    pub fn apply(&self, computed: &Value) -> Result<Value> {
        let mut value = computed.clone();
        for entry in self.entries.values() {
            value = match entry {
                OverrideEntry::Assignment(a) => set(&value, &a.path, a.value.clone())?,
                OverrideEntry::Removal(r) => set(&value, &r.path, get(computed, &r.path)?)?,
            };
        }
        Ok(value)
    }

    /// 覆寫是否完全蓋住 `path`（`template` 提供形狀）
    pub fn covers(&self, path: &Path, template: &Value) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        if let Some(region) = region_of(path, template) {
            let masks: Option<Vec<(bool, NdArray<bool>)>> = self
                .entries
                .values()
                .map(|e| region_of(e.path(), template).map(|m| (e.is_assignment(), m)))
                .collect();
            if let Some(masks) = masks {
                let mut covered = NdArray::full(region.shape(), false);
                for (is_assignment, mask) in masks {
                    let folded = if is_assignment {
                        covered.or(&mask)
                    } else {
                        covered.and(&mask.not())
                    };
                    match folded {
                        Ok(next) => covered = next,
                        Err(_) => return false,
                    }
                }
                return region.and(&covered.not()).map(|rest| !rest.any()).unwrap_or(false);
            }
        }
        let mut covered = false;
        for entry in self.entries.values() {
            if is_prefix(entry.path(), path) {
                covered = entry.is_assignment();
            } else if !entry.is_assignment() && is_prefix(path, entry.path()) {
                covered = false;
            }
        }
        covered
    }

    /// 是否有指派條目與 `path` 重疊
    pub fn overlaps(&self, path: &Path, template: &Value) -> bool {
        let region = region_of(path, template);
        self.entries.values().filter(|e| e.is_assignment()).any(|e| {
            match (&region, region_of(e.path(), template)) {
                (Some(a), Some(b)) => a.and(&b).map(|m| m.any()).unwrap_or(true),
                _ => is_prefix(e.path(), path) || is_prefix(path, e.path()),
            }
        })
    }

    /// 序列化為有序條目列表
    pub fn to_json(&self) -> Result<String> {
        let entries: Vec<&OverrideEntry> = self.entries.values().collect();
        Ok(serde_json::to_string(&entries)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<OverrideEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }
}

/// 純位置路徑在值上的區域遮罩；含欄位或無法解析時為 `None`
fn region_of(path: &Path, template: &Value) -> Option<NdArray<bool>> {
    if path.steps().iter().any(|s| s.references_field()) {
        return None;
    }
    let shape = template.positional_shape()?;
    path.region_mask(&shape).ok()
}

fn is_prefix(prefix: &Path, path: &Path) -> bool {
    let prefix = prefix.canonical();
    let path = path.canonical();
    prefix.len() <= path.len() && prefix.steps().iter().zip(path.steps()).all(|(a, b)| a == b)
}
