//! External recovery: re-save an encrypted document through a
//! format-capable program, working on a scoped copy.

pub mod engine;
pub mod process;
pub mod workspace;

pub use engine::{RecoveryEngine, RecoverySettings};
pub use process::ExternalProgram;
pub use workspace::{alongside_path, TempWorkspace, WORKSPACE_PREFIX};
