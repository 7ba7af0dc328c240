pub mod merge;
pub mod pool;
pub mod report;
pub mod split;

pub use merge::{run_merge, MergeRun};
pub use report::{GroupReport, GroupStatus, RunKind, RunReport};
pub use split::{run_split, SplitRun};
