//! Jump-offset compiler
//!
//! One pass over the code segment, from the entry point forward, stepping by
//! each opcode's width. Branch-class instructions have their absolute target
//! immediate decoded into a table slot at the instruction's own address, so
//! dispatch never re-decodes it. The pass also proves that every instruction
//! on the scanned path is a known opcode whose operands fit in the segment:
//! a corrupt stream fails here, before any core starts.

use super::error::{VmError, VmResult};
use super::opcode::Opcode;

/// Tabela de destinos de salto, um slot por byte de código
#[derive(Debug, Clone)]
pub struct JumpTable {
    targets: Vec<i64>,
    instructions: usize,
    branches: usize,
}

impl JumpTable {
    /// Compila a tabela para `code`, começando em `start`
    pub fn compile(code: &[u8], start: usize) -> VmResult<Self> {
        let mut targets = vec![0i64; code.len()];
        let mut instructions = 0usize;
        let mut branches = 0usize;

        let mut i = start;
        while i < code.len() {
            let byte = code[i];
            let opcode = Opcode::from_byte(byte).ok_or(VmError::UnknownStride {
                addr: i,
                opcode: byte,
            })?;
            let width = opcode.width();
            if i + width > code.len() {
                return Err(VmError::InstructionTruncated {
                    addr: i,
                    needed: width,
                    code_len: code.len(),
                });
            }

            if let Some(at) = opcode.target_operand() {
                targets[i] = decode_i64(&code[i + at..i + at + 8]);
                branches += 1;
                tracing::trace!(addr = i, target = targets[i], "{}", opcode);
            }

            instructions += 1;
            i += width;
        }

        tracing::debug!(
            "jump table compiled: {} instructions, {} branches, {} bytes",
            instructions,
            branches,
            code.len()
        );

        Ok(Self {
            targets,
            instructions,
            branches,
        })
    }

    /// Destino do salto na instrução em `ep`
    #[inline(always)]
    pub fn target(&self, ep: usize) -> i64 {
        self.targets[ep]
    }

    /// Instruções percorridas pelo compilador
    pub fn instructions(&self) -> usize {
        self.instructions
    }

    /// Instruções de salto registradas
    pub fn branches(&self) -> usize {
        self.branches
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Decodifica imediato de 8 bytes (ordem nativa)
#[inline(always)]
pub fn decode_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    i64::from_ne_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_header(body: &[u8]) -> Vec<u8> {
        let mut code = vec![0u8; 16];
        code.extend_from_slice(body);
        code
    }

    #[test]
    fn test_branch_immediates() {
        let mut body = vec![Opcode::Jmp as u8];
        body.extend_from_slice(&1234i64.to_ne_bytes());
        body.push(Opcode::Jmpi as u8);
        body.push(3);
        body.extend_from_slice(&(-8i64).to_ne_bytes());
        body.extend_from_slice(&[Opcode::Inclsijmpi as u8, 1, 2]);
        body.extend_from_slice(&16i64.to_ne_bytes());
        body.push(Opcode::Rts as u8);
        let code = with_header(&body);

        let table = JumpTable::compile(&code, 16).unwrap();
        assert_eq!(table.target(16), 1234);
        assert_eq!(table.target(25), -8);
        assert_eq!(table.target(35), 16);
        assert_eq!(table.instructions(), 4);
        assert_eq!(table.branches(), 3);
        assert_eq!(table.len(), code.len());
    }

    #[test]
    fn test_unknown_opcode_fails_fast() {
        let code = with_header(&[Opcode::Addi as u8, 0, 1, 2, 0xEE]);
        let err = JumpTable::compile(&code, 16).unwrap_err();
        assert!(matches!(err, VmError::UnknownStride { addr: 20, opcode: 0xEE }));
    }

    #[test]
    fn test_truncated_instruction() {
        let code = with_header(&[Opcode::Loadl as u8, 1, 2, 3]);
        let err = JumpTable::compile(&code, 16).unwrap_err();
        assert!(matches!(err, VmError::InstructionTruncated { addr: 16, needed: 10, .. }));
    }

    #[test]
    fn test_header_bytes_not_scanned() {
        let mut code = vec![0xFFu8; 16];
        code.push(Opcode::Rts as u8);
        assert!(JumpTable::compile(&code, 16).is_ok());
    }
}
