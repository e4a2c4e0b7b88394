//! Sound effect scripts: 32-bit opcodes grouped into banks (`.sem`) and packages
//! (`.spkg`).

pub mod bank;
pub mod opcode;
pub mod package;
pub mod sem;

pub use bank::Script;
pub use opcode::{Layout, Opcode, OpcodeKind};
pub use package::ScriptPackage;
pub use sem::SemBank;
