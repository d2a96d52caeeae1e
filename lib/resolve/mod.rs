/// Per-transaction lock memo.
pub mod memo;
/// Path syntax.
pub mod path;
/// The path walk itself.
pub mod resolver;

pub use memo::{LockLevel, LockTree, NodeId};
pub use path::parse_path;
pub use resolver::{Resolution, ResolveKind};
