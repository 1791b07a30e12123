//! # Prelude - Re-exportações Convenientes
//!
//! ```
//! use regvm_core::prelude::*;
//! ```

// Máquina
pub use crate::vm::{
    Machine,
    RunReport,
    VmConfig,
};

// Programas
pub use crate::vm::{
    CodeBuilder,
    Opcode,
    ProgramImage,
};

// I/O e módulos nativos
pub use crate::vm::{
    BufferConsole,
    BuiltinModule,
    Console,
    NativeFn,
    StackView,
    StdConsole,
};

// Erros
pub use crate::vm::{VmError, VmResult};
