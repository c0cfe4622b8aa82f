mod client;
mod secrets;
mod sketch_cache;

pub use client::{
    CreateClient, CreateError, ErrorClass, ListOptions, Resource, ResourceKind, Sketch,
    SketchEdit, SketchSecret, normalize_remote_path, parent_path,
};
pub use secrets::{
    INCLUDE_LINE, SECRETS_FILE, ensure_include, has_include, is_main_file, is_secrets_file,
    parse_defines, render_defines, strip_include,
};
pub use sketch_cache::SketchCache;
