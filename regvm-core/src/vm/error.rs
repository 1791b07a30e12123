//! Erros da VM
//!
//! Every variant here ends the core that raised it. Recoverable conditions
//! (malformed console input) never become a `VmError`.

use thiserror::Error;

/// Tipo de resultado da VM
pub type VmResult<T> = Result<T, VmError>;

/// Erros da VM
#[derive(Debug, Error)]
pub enum VmError {
    /// Opcode sem largura conhecida (stream corrompido ou não suportado)
    #[error("setting jump offset failed at {addr}: opcode {opcode}")]
    UnknownStride { addr: usize, opcode: u8 },

    /// Opcode inválido durante o dispatch
    #[error("invalid opcode {opcode} at ep {ep}")]
    InvalidOpcode { ep: usize, opcode: u8 },

    /// Instrução truncada
    #[error("instruction at {addr} truncated: needs {needed} bytes, code ends at {code_len}")]
    InstructionTruncated {
        addr: usize,
        needed: usize,
        code_len: usize,
    },

    /// Execution pointer fora do segmento de código
    #[error("execution pointer {0} outside code segment")]
    EpOutOfRange(i64),

    /// Acesso a dados fora dos limites
    #[error("data access out of range: address {address}, offset {offset}, width {width}")]
    DataOutOfRange {
        address: i64,
        offset: i64,
        width: usize,
    },

    /// Stack overflow
    #[error("stack overflow: sp {sp} cannot move below bottom {bottom}")]
    StackOverflow { sp: usize, bottom: usize },

    /// Stack underflow
    #[error("stack underflow: cannot pop empty stack (sp {sp}, top {top})")]
    StackUnderflow { sp: usize, top: usize },

    /// Native function returned a stack pointer outside its window
    #[error("stack corrupted by native call: sp {sp:?} outside [{bottom}, {top}]")]
    StackCorrupted {
        sp: Option<usize>,
        bottom: usize,
        top: usize,
    },

    /// Return-address stack cheio
    #[error("return stack full ({0} entries), no more jsr")]
    ReturnStackFull(usize),

    /// Return-address stack vazio
    #[error("rts with empty return stack")]
    ReturnStackEmpty,

    /// Divisão por zero
    #[error("division by zero")]
    DivisionByZero,

    /// Serviço de interrupção desconhecido
    #[error("unknown intr{bank} service {service}")]
    UnknownInterrupt { bank: u8, service: u8 },

    /// Índice de argumento de shell inválido
    #[error("shell argument index {0} out of range")]
    ShellArgOutOfRange(i64),

    /// Nenhum core livre para spawn
    #[error("can't start new CPU core: all {0} cores in use")]
    NoFreeCore(usize),

    /// Falha ao criar thread do SO
    #[error("can't start new thread: {0}")]
    ThreadSpawn(String),

    /// Módulo: slot inválido
    #[error("module slot {0} out of range")]
    ModuleSlotOutOfRange(i64),

    /// Módulo: slot ocupado
    #[error("module slot {slot} already holds '{name}'")]
    ModuleSlotInUse { slot: usize, name: String },

    /// Módulo: slot vazio
    #[error("module slot {0} is empty")]
    ModuleNotLoaded(usize),

    /// Módulo: falha ao carregar biblioteca
    #[error("error load module {name}: {reason}")]
    ModuleLoad { name: String, reason: String },

    /// Módulo: símbolo não resolvido
    #[error("error set module {module}, function: '{symbol}': {reason}")]
    ModuleBind {
        module: String,
        symbol: String,
        reason: String,
    },

    /// Módulo: função não vinculada
    #[error("module {module}: function slot {slot} is not bound")]
    FunctionNotBound { module: String, slot: i64 },

    /// Imagem de programa inválida
    #[error("invalid program image: {0}")]
    InvalidImage(String),

    /// Configuração inválida
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Erro de I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VmError::UnknownStride { addr: 16, opcode: 0xFF };
        assert!(err.to_string().contains("255"));

        let err = VmError::StackOverflow { sp: 3, bottom: 4 };
        assert!(err.to_string().contains("overflow"));

        let err = VmError::DataOutOfRange { address: 100, offset: 2, width: 8 };
        assert!(err.to_string().contains("out of range"));
    }
}
