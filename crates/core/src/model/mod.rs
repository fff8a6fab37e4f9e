pub mod issue;
pub mod span;
pub mod trace;
pub mod tree;
