pub mod class;
pub mod config;
pub mod descriptor;
pub mod ident;
pub mod logging;
pub mod schema;
pub mod store;

pub use class::{Body, ClassTree, Insn, MemberDecl, MemberKey, MemberKind, RuntimeFault};
pub use config::Settings;
pub use ident::{ClassIdentity, VersionId, Visibility};
pub use store::{ClassTreeStore, DirStore, GroupLease, MemoryStore, StoreError};
