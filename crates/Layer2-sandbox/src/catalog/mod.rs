//! Template & Tool catalogs

mod template;
mod tool;

pub use template::{Template, TemplateCatalog, TemplatePatch, TEMPLATES_FILE};
pub use tool::{CustomTool, ToolCatalog, ToolPatch, ToolRuntime, TOOLS_FILE};
