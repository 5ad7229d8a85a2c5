//! # Quib Core
//!
//! 核心資料模型：值、n 維陣列、路徑與錯誤類型

pub mod config;
pub mod ndarray;
pub mod path;
pub mod value;

// Re-export 主要類型
pub use config::{CacheMode, GraphConfig};
pub use ndarray::{broadcast_shapes, NdArray};
pub use path::{Indexer, Path, PathStep, Range, Selection};
pub use value::{RecordArray, Value};

/// 引擎錯誤類型
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuibError {
    #[error("函數不支援反向指派: {0}")]
    UnsupportedInversion(String),

    #[error("反向指派有歧義: {0}")]
    AmbiguousInversion(String),

    #[error("緩存形狀與結果不符")]
    CacheShapeMismatch,

    #[error("緩存狀態錯誤: {0}")]
    CacheStatus(String),

    #[error("不允許覆寫: {0}")]
    OverrideNotAllowed(String),

    #[error("無效的路徑: {0}")]
    InvalidPath(String),

    #[error("索引 {index} 超出長度 {len}")]
    IndexOutOfBounds { index: isize, len: usize },

    #[error("形狀不符: {0}")]
    ShapeMismatch(String),

    #[error("類型不符: {0}")]
    TypeMismatch(String),

    #[error("節點 {node} 計算失敗: {message}")]
    FunctionFailed { node: String, message: String },

    #[error("找不到函數: {0}")]
    UnknownFunction(String),

    #[error("找不到節點: {0}")]
    UnknownNode(usize),

    #[error("遞迴深度超過上限 {0}")]
    RecursionLimit(usize),

    #[error("序列化錯誤: {0}")]
    Serialization(String),

    #[error("配置錯誤: {0}")]
    Config(String),
}

impl From<serde_json::Error> for QuibError {
    fn from(err: serde_json::Error) -> Self {
        QuibError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuibError>;
