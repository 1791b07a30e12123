//! Builder de programas
//!
//! Emite o stream de instruções opcode a opcode, com labels e referências
//! adiante resolvidas em [`CodeBuilder::build`]. O código começa com os 16
//! bytes reservados do header, então o primeiro opcode emitido fica no entry
//! point padrão.

use std::collections::HashMap;

use super::config::DEFAULT_CODE_START;
use super::error::{VmError, VmResult};
use super::image::ProgramImage;
use super::opcode::Opcode;

/// Builder para imagens de programa
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    code: Vec<u8>,
    globals: Vec<u8>,
    labels: HashMap<String, usize>,
    /// (posição do imediato, label)
    fixups: Vec<(usize, String)>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self {
            code: vec![0u8; DEFAULT_CODE_START],
            globals: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    /// Endereço da próxima instrução
    pub fn pos(&self) -> usize {
        self.code.len()
    }

    /// Define label no endereço atual
    pub fn label(&mut self, name: &str) -> &mut Self {
        self.labels.insert(name.to_string(), self.code.len());
        self
    }

    fn imm(&mut self, value: i64) {
        self.code.extend_from_slice(&value.to_ne_bytes());
    }

    fn imm_label(&mut self, label: &str) {
        self.fixups.push((self.code.len(), label.to_string()));
        self.imm(0);
    }

    // ═══════════════════════════════════════════════════════════════
    // GLOBAIS
    // ═══════════════════════════════════════════════════════════════

    /// Reserva bytes inicializados e retorna o endereço
    pub fn global(&mut self, bytes: &[u8]) -> i64 {
        let addr = self.globals.len();
        self.globals.extend_from_slice(bytes);
        addr as i64
    }

    /// String terminada em NUL
    pub fn global_cstr(&mut self, text: &str) -> i64 {
        let addr = self.global(text.as_bytes());
        self.globals.push(0);
        addr
    }

    /// Bytes zerados
    pub fn global_zeroed(&mut self, len: usize) -> i64 {
        let addr = self.globals.len();
        self.globals.resize(addr + len, 0);
        addr as i64
    }

    // ═══════════════════════════════════════════════════════════════
    // INSTRUÇÕES
    // ═══════════════════════════════════════════════════════════════

    /// Instrução de 4 bytes (`a, b, c`): sized load/store, aritmética, comparações
    pub fn op(&mut self, op: Opcode, a: u8, b: u8, c: u8) -> &mut Self {
        debug_assert_eq!(op.width(), 4, "{op} is not a three-register opcode");
        self.code.extend_from_slice(&[op as u8, a, b, c]);
        self
    }

    pub fn jmp(&mut self, label: &str) -> &mut Self {
        self.code.push(Opcode::Jmp as u8);
        self.imm_label(label);
        self
    }

    /// Salta para `label` se `R[cond] != 0`
    pub fn jmpi(&mut self, cond: u8, label: &str) -> &mut Self {
        self.code.extend_from_slice(&[Opcode::Jmpi as u8, cond]);
        self.imm_label(label);
        self
    }

    /// `++R[counter]`, salta para `label` se `R[counter] < R[limit]`
    pub fn inclsijmpi(&mut self, counter: u8, limit: u8, label: &str) -> &mut Self {
        self.code.extend_from_slice(&[Opcode::Inclsijmpi as u8, counter, limit]);
        self.imm_label(label);
        self
    }

    /// `--R[counter]`, salta para `label` se `R[counter] > R[limit]`
    pub fn decgrijmpi(&mut self, counter: u8, limit: u8, label: &str) -> &mut Self {
        self.code.extend_from_slice(&[Opcode::Decgrijmpi as u8, counter, limit]);
        self.imm_label(label);
        self
    }

    pub fn jsr(&mut self, label: &str) -> &mut Self {
        self.code.push(Opcode::Jsr as u8);
        self.imm_label(label);
        self
    }

    pub fn jsra(&mut self, reg: u8) -> &mut Self {
        self.code.extend_from_slice(&[Opcode::Jsra as u8, reg]);
        self
    }

    pub fn jmpa(&mut self, reg: u8) -> &mut Self {
        self.code.extend_from_slice(&[Opcode::Jmpa as u8, reg]);
        self
    }

    pub fn rts(&mut self) -> &mut Self {
        self.code.push(Opcode::Rts as u8);
        self
    }

    /// `R[reg] = value`
    pub fn loadl(&mut self, value: i64, reg: u8) -> &mut Self {
        self.code.push(Opcode::Loadl as u8);
        self.imm(value);
        self.code.push(reg);
        self
    }

    /// `R[reg] = endereço de label` (para jmpa/jsra/spawn)
    pub fn loadl_label(&mut self, label: &str, reg: u8) -> &mut Self {
        self.code.push(Opcode::Loadl as u8);
        self.imm_label(label);
        self.code.push(reg);
        self
    }

    /// `loada`, `loadd` ou `load`: base e offset imediatos
    pub fn load_abs(&mut self, op: Opcode, base: i64, offset: i64, reg: u8) -> &mut Self {
        debug_assert!(matches!(op, Opcode::Loada | Opcode::Loadd | Opcode::Load));
        self.code.push(op as u8);
        self.imm(base);
        self.imm(offset);
        self.code.push(reg);
        self
    }

    /// `movi`, `movd` ou `noti`
    pub fn mov(&mut self, op: Opcode, src: u8, dst: u8) -> &mut Self {
        debug_assert_eq!(op.width(), 3);
        self.code.extend_from_slice(&[op as u8, src, dst]);
        self
    }

    /// Push/pop na pilha de operandos
    pub fn stack(&mut self, op: Opcode, reg: u8) -> &mut Self {
        debug_assert!(matches!(
            op,
            Opcode::Stpushb | Opcode::Stpopb | Opcode::Stpushi
                | Opcode::Stpopi | Opcode::Stpushd | Opcode::Stpopd
        ));
        self.code.extend_from_slice(&[op as u8, reg]);
        self
    }

    pub fn intr0(&mut self, service: u8, b: u8, c: u8, d: u8) -> &mut Self {
        self.code.extend_from_slice(&[Opcode::Intr0 as u8, service, b, c, d]);
        self
    }

    pub fn intr1(&mut self, service: u8, b: u8, c: u8, d: u8) -> &mut Self {
        self.code.extend_from_slice(&[Opcode::Intr1 as u8, service, b, c, d]);
        self
    }

    /// Bytes crus (testes de streams corrompidos)
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    /// Resolve labels e constrói a imagem
    pub fn build(&self) -> VmResult<ProgramImage> {
        let mut code = self.code.clone();
        for (at, label) in &self.fixups {
            let target = self
                .labels
                .get(label)
                .ok_or_else(|| VmError::InvalidImage(format!("undefined label '{label}'")))?;
            code[*at..*at + 8].copy_from_slice(&(*target as i64).to_ne_bytes());
        }
        Ok(ProgramImage::new(code, self.globals.clone()))
    }
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::jumptable::JumpTable;

    #[test]
    fn test_forward_label() {
        let mut b = CodeBuilder::new();
        b.jmp("end").loadl(1, 0).label("end").rts();
        let image = b.build().unwrap();

        assert_eq!(image.entry(), 16);
        let table = JumpTable::compile(&image.code, 16).unwrap();
        assert_eq!(table.target(16), 16 + 9 + 10);
    }

    #[test]
    fn test_undefined_label() {
        let mut b = CodeBuilder::new();
        b.jsr("nowhere");
        assert!(matches!(b.build(), Err(VmError::InvalidImage(_))));
    }

    #[test]
    fn test_globals() {
        let mut b = CodeBuilder::new();
        let counter = b.global_zeroed(8);
        let msg = b.global_cstr("hi");
        b.rts();
        let image = b.build().unwrap();
        assert_eq!(counter, 0);
        assert_eq!(msg, 8);
        assert_eq!(image.globals, vec![0, 0, 0, 0, 0, 0, 0, 0, b'h', b'i', 0]);
    }
}
