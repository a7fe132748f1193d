//! Hierarchical tag index built from the record store.

mod builder;
mod counts;
mod exclude;
mod natural;
mod tree;

pub use builder::{TagTreeBuilder, TagTreeSnapshot};
pub use counts::NoteCountCache;
pub use exclude::{exclude_from_tag_tree, TagPattern};
pub use natural::natural_cmp;
pub use tree::{NodeId, TagTree, TagTreeNode};
