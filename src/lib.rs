//! # Quibs
//!
//! 可覆寫的惰性依賴圖：節點的值由函數計算並按路徑粒度緩存，
//! 使用者對任何節點的編輯會反推到可覆寫的上游節點。
//!
//! ```no_run
//! use quibs::{Graph, Path, Value};
//!
//! let mut graph = Graph::with_builtins();
//! let a = graph.source(Value::from(vec![1.0, 2.0, 3.0]));
//! let b = graph.call("add", vec![a.into(), 5.0.into()])?;
//! graph.assign(b, Path::at(0), 12.0)?;
//! assert_eq!(graph.get_value(a)?, Value::from(vec![7.0, 2.0, 3.0]));
//! # Ok::<(), quibs::QuibError>(())
//! ```

pub use quib_cache::{Cache, CacheStatus};
pub use quib_calc::*;
pub use quib_core::{
    CacheMode, GraphConfig, Indexer, NdArray, Path, PathStep, QuibError, Range, RecordArray, Result, Selection, Value,
};
