//! # Quib Calculation Engine
//!
//! 依賴圖、惰性讀取、前向失效、反向指派與覆寫選擇

pub mod assignment;
pub mod axiswise;
pub mod choice;
pub mod elementwise;
pub mod graph;
pub mod history;
pub mod invalidation;
pub mod inversion;
pub mod overrider;
pub mod quib;
pub mod registry;
pub mod template;
pub mod translation;
pub mod transpositional;

// Re-export 主要類型
pub use assignment::AssignOutcome;
pub use axiswise::{AxisWiseSpec, Reduction};
pub use choice::{
    ChainLink, ChoiceKey, DecliningChooser, OverrideChoice, OverrideChoiceTree, OverrideChooser, Resolution,
    ScriptedChooser,
};
pub use elementwise::{ElementwiseSpec, InverseBranch};
pub use graph::Graph;
pub use history::{Change, History};
pub use inversion::{Inversion, Target};
pub use overrider::{Assignment, AssignmentRemoval, OverrideEntry, Overrider};
pub use quib::{Arg, NodeId, Quib, Recipe};
pub use registry::{CallArgs, EvalFn, Family, FunctionId, FunctionRegistry, FunctionSpec, SourceArg};
pub use template::AssignmentTemplate;
pub use transpositional::{Provenance, Rearrange, TranspositionalSpec};
