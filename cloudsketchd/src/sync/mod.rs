pub mod decoration;
pub mod engine;
pub mod path_cache;
pub mod tree;
