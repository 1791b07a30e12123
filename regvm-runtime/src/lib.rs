//! # 🏃 regvm-runtime - Runtime for RegVM Programs
//!
//! Carrega imagens `.rvmc` do disco e as executa na VM de `regvm-core`.
//!
//! ## Fluxo de Execução
//!
//! ```text
//! imagem (.rvmc)
//!      ↓
//! ProgramLoader (header, checksum)
//!      ↓
//! Machine (tabela de saltos, segmento de dados, módulos -M)
//!      ↓
//! CPU 0 ... CPU n
//!      ↓
//! RunReport (código de retorno)
//! ```
//!
//! ## Exemplo
//!
//! ```no_run
//! use regvm_runtime::{Runtime, RuntimeConfig};
//!
//! let mut runtime = Runtime::new(RuntimeConfig::from_env());
//! let report = runtime.run_file("program.rvmc")?;
//! std::process::exit(report.return_code as i32);
//! # Ok::<(), regvm_runtime::RuntimeError>(())
//! ```

pub mod error;
pub mod loader;
pub mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use loader::ProgramLoader;
pub use runtime::{Runtime, RuntimeConfig};

// Re-export core types
pub use regvm_core::prelude::*;
