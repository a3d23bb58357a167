mod conagua;
pub(crate) mod schema;

pub use conagua::{ConaguaCsvParser, ConaguaSemicolonParser};
pub use schema::{normalize_header, resolve_column};
