//! # ⚙️ RegVM-Core
//!
//! Máquina virtual de bytecode baseada em registradores, com cores virtuais
//! sobre threads do SO e módulos nativos.
//!
//! ## O Modelo
//!
//! 1. O **código** é imutável e compartilhado por todos os cores
//! 2. O **segmento de dados** é compartilhado, sem sincronização implícita
//! 3. Cada **core** tem 256 registradores inteiros, 256 double, pilha de
//!    operandos própria e pilha de retorno própria
//! 4. Saltos usam uma **tabela pré-calculada**: o stream inteiro é validado
//!    antes do primeiro dispatch
//!
//! ## Módulos
//!
//! - [`vm`]: máquina virtual (ISA, dispatch, cores, módulos, formato .rvmc)
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use regvm_core::prelude::*;
//!
//! let mut b = CodeBuilder::new();
//! b.loadl(5, 0)
//!     .loadl(7, 1)
//!     .op(Opcode::Addi, 0, 1, 2)
//!     .intr0(4, 2, 0, 0)
//!     .intr0(255, 2, 0, 0);
//!
//! let console = Arc::new(BufferConsole::new());
//! let mut machine = Machine::new(b.build()?, VmConfig::default())?
//!     .with_console(console.clone());
//!
//! let report = machine.run();
//! assert_eq!(console.output(), "12");
//! assert_eq!(report.return_code, 12);
//! # Ok::<(), VmError>(())
//! ```

pub mod prelude;
pub mod vm;
