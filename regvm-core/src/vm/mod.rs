//! # 🖥️ VM - Register Bytecode Machine
//!
//! Máquina virtual de registradores com múltiplos cores sobre um segmento de
//! dados compartilhado.
//!
//! ## Arquitetura
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          MACHINE                                │
//! │  ┌──────────────┐  ┌─────────────┐  ┌────────────────────────┐  │
//! │  │ code (read-  │  │ jump table  │  │ data segment (shared)  │  │
//! │  │ only, Arc)   │  │ (Arc)       │  │ globals │ stack × N    │  │
//! │  └──────────────┘  └─────────────┘  └────────────────────────┘  │
//! │         │                 │                     │               │
//! │         ▼                 ▼                     ▼               │
//! │  ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐    │
//! │  │ CPU 0           │ │ CPU 1           │ │ CPU n           │    │
//! │  │ 256×R 256×D     │ │ 256×R 256×D     │ │ ...             │    │
//! │  │ stack + returns │ │ stack + returns │ │                 │    │
//! │  └─────────────────┘ └─────────────────┘ └─────────────────┘    │
//! │                            │                                    │
//! │                            ▼                                    │
//! │        Mutex<Tables> (cores, modules) · SegmentLock             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Módulos
//!
//! - [`opcode`] - ISA (61 opcodes, larguras)
//! - [`jumptable`] - Pré-cálculo de destinos de salto
//! - [`registers`] - Bancos de registradores
//! - [`stack`] - Pilha de operandos e pilha de retorno
//! - [`memory`] - Segmento de dados compartilhado
//! - [`cores`] - Tabela de cores e lock do segmento
//! - [`modules`] - Módulos nativos e ABI
//! - [`interpreter`] - Dispatch
//! - [`intr`] - Serviços de interrupção
//! - [`image`] - Formato .rvmc
//! - [`builder`] - Construção programática de programas
//! - [`console`] - I/O dos serviços de print/input
//! - [`machine`] - Instância da VM
//!
//! ## Uso
//!
//! ```
//! use regvm_core::vm::{CodeBuilder, Machine, VmConfig};
//!
//! let mut b = CodeBuilder::new();
//! b.loadl(12, 0).intr0(255, 0, 0, 0);
//!
//! let mut machine = Machine::new(b.build()?, VmConfig::default())?;
//! assert_eq!(machine.run().return_code, 12);
//! # Ok::<(), regvm_core::vm::VmError>(())
//! ```

pub mod builder;
pub mod config;
pub mod console;
pub mod cores;
pub mod error;
pub mod image;
pub mod interpreter;
pub mod intr;
pub mod jumptable;
pub mod machine;
pub mod memory;
pub mod modules;
pub mod opcode;
pub mod registers;
pub mod stack;

pub use builder::CodeBuilder;
pub use config::VmConfig;
pub use console::{BufferConsole, Console, StdConsole};
pub use cores::{CoreStatus, CoreTable, SegmentLock};
pub use error::{VmError, VmResult};
pub use image::{ImageHeader, ProgramImage, RVMC_MAGIC, RVMC_VERSION};
pub use interpreter::{Core, Flow};
pub use jumptable::JumpTable;
pub use machine::{Machine, RunReport};
pub use memory::DataSegment;
pub use modules::{BuiltinModule, NativeFn, StackView};
pub use opcode::{Opcode, OpcodeCategory};
pub use registers::{REGISTER_COUNT, RegisterFile};
pub use stack::{OperandStack, ReturnStack};
