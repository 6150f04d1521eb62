//! SQL helpers: comment annotations and table reference inference.

mod annotations;
mod refs;

pub use annotations::{NestingError, expand_dotted, extract_annotations};
pub use refs::{SqlParseError, infer_table_refs};
