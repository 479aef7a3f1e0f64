/*!
Per-process inputs of the analysis: threads and modules.
*/

pub mod thread_map;
pub use thread_map::{ThreadInfo, ThreadMap};

pub mod module_dir;
pub use module_dir::{ModuleDirectory, ModuleInfo, ModuleSegment};
