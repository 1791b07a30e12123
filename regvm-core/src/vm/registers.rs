//! Banco de registradores
//!
//! 256 registradores inteiros e 256 double por core. O operando de registrador
//! é um byte, então todo índice é válido.

/// Número de registradores por banco
pub const REGISTER_COUNT: usize = 256;

/// Registradores privados de um core
#[derive(Clone)]
pub struct RegisterFile {
    int: [i64; REGISTER_COUNT],
    dbl: [f64; REGISTER_COUNT],
}

impl RegisterFile {
    /// Todos os registradores em zero
    pub fn new() -> Self {
        Self {
            int: [0; REGISTER_COUNT],
            dbl: [0.0; REGISTER_COUNT],
        }
    }

    #[inline(always)]
    pub fn int(&self, reg: u8) -> i64 {
        self.int[reg as usize]
    }

    #[inline(always)]
    pub fn set_int(&mut self, reg: u8, value: i64) {
        self.int[reg as usize] = value;
    }

    #[inline(always)]
    pub fn dbl(&self, reg: u8) -> f64 {
        self.dbl[reg as usize]
    }

    #[inline(always)]
    pub fn set_dbl(&mut self, reg: u8, value: f64) {
        self.dbl[reg as usize] = value;
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only non-zero registers, the full banks are noise
        let ints: Vec<_> = self.int.iter().enumerate().filter(|(_, v)| **v != 0).collect();
        let dbls: Vec<_> = self.dbl.iter().enumerate().filter(|(_, v)| **v != 0.0).collect();
        f.debug_struct("RegisterFile")
            .field("int", &ints)
            .field("dbl", &dbls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_index_space() {
        let mut regs = RegisterFile::new();
        regs.set_int(255, -7);
        regs.set_dbl(255, 1.5);
        assert_eq!(regs.int(255), -7);
        assert_eq!(regs.dbl(255), 1.5);
        assert_eq!(regs.int(0), 0);
    }
}
