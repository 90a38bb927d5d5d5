//! Built-in tools agents can register out of the box.

mod fs;
mod shell;
mod visit_webpage;
mod web_search;

pub use fs::{EditFileArgs, EditFileTool, ListDirArgs, ListDirTool, ReadFileArgs, ReadFileTool};
pub use fs::{WriteFileArgs, WriteFileTool};
pub use shell::{ExecArgs, ExecResult, ExecTool};
pub use visit_webpage::{VisitWebpageArgs, VisitWebpageTool};
pub use web_search::{
    DuckDuckGoSearchTool, SearchEngine, SearchResult, WebSearchArgs, WebSearchTool,
};

use crate::tool::BoxedTool;

/// Built-in tools with no configuration required, suitable as defaults.
#[must_use]
pub fn default_tools() -> Vec<BoxedTool> {
    vec![
        Box::new(ReadFileTool::new()),
        Box::new(WriteFileTool),
        Box::new(EditFileTool),
        Box::new(ListDirTool::new()),
        Box::new(ExecTool::new()),
    ]
}

/// Names of the tools returned by [`default_tools`].
pub const BUILTIN_TOOL_NAMES: &[&str] =
    &["read_file", "write_file", "edit_file", "list_dir", "exec"];
