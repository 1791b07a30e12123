//! Opcodes da VM
//!
//! Definição de todos os opcodes da ISA. Os valores são densos (0..=60) e a
//! ordem é parte do formato binário.

/// Categorias de opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeCategory {
    /// Load/store sized contra o segmento de dados
    Memory,
    /// Aritmética inteira, shifts, lógica e bitwise
    IntArith,
    /// Aritmética double
    FloatArith,
    /// Comparações int/double
    Compare,
    /// Saltos, chamadas e superopcodes de loop
    Branch,
    /// Pilha de operandos
    Stack,
    /// Loads com imediatos e moves
    Data,
    /// Interrupções de software
    Interrupt,
}

/// Opcodes da VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ═══════════════════════════════════════════════════════════════
    // LOAD / STORE SIZED (0-9)
    // ═══════════════════════════════════════════════════════════════

    /// R[c] = M[R[a] + R[b]] (1 byte)
    Pushb = 0,
    /// R[c] = M[R[a] + R[b]] (2 bytes)
    Pushw = 1,
    /// R[c] = M[R[a] + R[b]] (4 bytes)
    Pushdw = 2,
    /// R[c] = M[R[a] + R[b]] (8 bytes)
    Pushqw = 3,
    /// D[c] = M[R[a] + R[b]] (8 bytes)
    Pushd = 4,
    /// M[R[b] + R[c]] = R[a] (1 byte)
    Pullb = 5,
    /// M[R[b] + R[c]] = R[a] (2 bytes)
    Pullw = 6,
    /// M[R[b] + R[c]] = R[a] (4 bytes)
    Pulldw = 7,
    /// M[R[b] + R[c]] = R[a] (8 bytes)
    Pullqw = 8,
    /// M[R[b] + R[c]] = D[a] (8 bytes)
    Pulld = 9,

    // ═══════════════════════════════════════════════════════════════
    // ARITMÉTICA (10-25)
    // ═══════════════════════════════════════════════════════════════

    Addi = 10,
    Subi = 11,
    Muli = 12,
    Divi = 13,
    Addd = 14,
    Subd = 15,
    Muld = 16,
    Divd = 17,
    /// Shift left
    Smuli = 18,
    /// Shift right aritmético
    Sdivi = 19,
    /// AND lógico (0/1)
    Andi = 20,
    /// OR lógico (0/1)
    Ori = 21,
    Bandi = 22,
    Bori = 23,
    Bxori = 24,
    Modi = 25,

    // ═══════════════════════════════════════════════════════════════
    // COMPARAÇÕES (26-37)
    // ═══════════════════════════════════════════════════════════════

    Eqi = 26,
    Neqi = 27,
    Gri = 28,
    Lsi = 29,
    Greqi = 30,
    Lseqi = 31,
    Eqd = 32,
    Neqd = 33,
    Grd = 34,
    Lsd = 35,
    Greqd = 36,
    Lseqd = 37,

    // ═══════════════════════════════════════════════════════════════
    // CONTROLE DE FLUXO, PILHA E INTERRUPÇÕES (38-60)
    // ═══════════════════════════════════════════════════════════════

    /// Jump incondicional via tabela
    Jmp = 38,
    /// Jump se R[a] != 0
    Jmpi = 39,
    Stpushb = 40,
    Stpopb = 41,
    Stpushi = 42,
    Stpopi = 43,
    Stpushd = 44,
    Stpopd = 45,
    /// R[r] = M[base + offset] (8 bytes)
    Loada = 46,
    /// D[r] = M[base + offset] (8 bytes)
    Loadd = 47,
    /// Serviços gerais
    Intr0 = 48,
    /// Serviços de threads
    Intr1 = 49,
    /// ++R[a]; salta se R[a] < R[b]
    Inclsijmpi = 50,
    /// --R[a]; salta se R[a] > R[b]
    Decgrijmpi = 51,
    Movi = 52,
    Movd = 53,
    /// R[r] = imediato
    Loadl = 54,
    /// ep = R[a]
    Jmpa = 55,
    /// Chamada direta via tabela
    Jsr = 56,
    /// Chamada indireta: ep = R[a]
    Jsra = 57,
    /// Retorno de subrotina
    Rts = 58,
    /// R[r] = base + offset (endereço, sem dereferência)
    Load = 59,
    /// R[b] = !R[a]
    Noti = 60,
}

impl Opcode {
    /// Número de opcodes definidos
    pub const COUNT: usize = 61;

    /// Todos os opcodes, na ordem do byte
    pub const ALL: [Opcode; Self::COUNT] = {
        use Opcode::*;
        [
            Pushb, Pushw, Pushdw, Pushqw, Pushd,
            Pullb, Pullw, Pulldw, Pullqw, Pulld,
            Addi, Subi, Muli, Divi,
            Addd, Subd, Muld, Divd,
            Smuli, Sdivi,
            Andi, Ori, Bandi, Bori, Bxori, Modi,
            Eqi, Neqi, Gri, Lsi, Greqi, Lseqi,
            Eqd, Neqd, Grd, Lsd, Greqd, Lseqd,
            Jmp, Jmpi,
            Stpushb, Stpopb, Stpushi, Stpopi, Stpushd, Stpopd,
            Loada, Loadd,
            Intr0, Intr1, Inclsijmpi, Decgrijmpi,
            Movi, Movd, Loadl, Jmpa,
            Jsr, Jsra, Rts, Load,
            Noti,
        ]
    };

    /// Decodifica opcode de byte
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Largura da instrução em bytes (stride de fall-through)
    #[inline]
    pub const fn width(self) -> usize {
        use Opcode::*;
        match self {
            Pushb | Pushw | Pushdw | Pushqw | Pushd
            | Pullb | Pullw | Pulldw | Pullqw | Pulld
            | Addi | Subi | Muli | Divi
            | Addd | Subd | Muld | Divd
            | Smuli | Sdivi
            | Andi | Ori | Bandi | Bori | Bxori | Modi
            | Eqi | Neqi | Gri | Lsi | Greqi | Lseqi
            | Eqd | Neqd | Grd | Lsd | Greqd | Lseqd => 4,
            Jmp | Jsr => 9,
            Jmpi => 10,
            Inclsijmpi | Decgrijmpi => 11,
            Stpushb | Stpopb | Stpushi | Stpopi | Stpushd | Stpopd => 2,
            Loada | Loadd | Load => 18,
            Intr0 | Intr1 => 5,
            Movi | Movd | Noti => 3,
            Loadl => 10,
            Jmpa | Jsra => 2,
            Rts => 1,
        }
    }

    /// Offset do imediato de destino (8 bytes) para opcodes de salto via tabela
    #[inline]
    pub const fn target_operand(self) -> Option<usize> {
        match self {
            Self::Jmp | Self::Jsr => Some(1),
            Self::Jmpi => Some(2),
            Self::Inclsijmpi | Self::Decgrijmpi => Some(3),
            _ => None,
        }
    }

    /// Retorna categoria do opcode
    pub fn category(self) -> OpcodeCategory {
        use Opcode::*;
        match self {
            Pushb | Pushw | Pushdw | Pushqw | Pushd
            | Pullb | Pullw | Pulldw | Pullqw | Pulld => OpcodeCategory::Memory,
            Addi | Subi | Muli | Divi | Smuli | Sdivi
            | Andi | Ori | Bandi | Bori | Bxori | Modi | Noti => OpcodeCategory::IntArith,
            Addd | Subd | Muld | Divd => OpcodeCategory::FloatArith,
            Eqi | Neqi | Gri | Lsi | Greqi | Lseqi
            | Eqd | Neqd | Grd | Lsd | Greqd | Lseqd => OpcodeCategory::Compare,
            Jmp | Jmpi | Inclsijmpi | Decgrijmpi | Jmpa | Jsr | Jsra | Rts => OpcodeCategory::Branch,
            Stpushb | Stpopb | Stpushi | Stpopi | Stpushd | Stpopd => OpcodeCategory::Stack,
            Loada | Loadd | Loadl | Load | Movi | Movd => OpcodeCategory::Data,
            Intr0 | Intr1 => OpcodeCategory::Interrupt,
        }
    }

    /// Retorna mnemônico
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Pushb => "pushb",
            Pushw => "pushw",
            Pushdw => "pushdw",
            Pushqw => "pushqw",
            Pushd => "pushd",
            Pullb => "pullb",
            Pullw => "pullw",
            Pulldw => "pulldw",
            Pullqw => "pullqw",
            Pulld => "pulld",
            Addi => "addi",
            Subi => "subi",
            Muli => "muli",
            Divi => "divi",
            Addd => "addd",
            Subd => "subd",
            Muld => "muld",
            Divd => "divd",
            Smuli => "smuli",
            Sdivi => "sdivi",
            Andi => "andi",
            Ori => "ori",
            Bandi => "bandi",
            Bori => "bori",
            Bxori => "bxori",
            Modi => "modi",
            Eqi => "eqi",
            Neqi => "neqi",
            Gri => "gri",
            Lsi => "lsi",
            Greqi => "greqi",
            Lseqi => "lseqi",
            Eqd => "eqd",
            Neqd => "neqd",
            Grd => "grd",
            Lsd => "lsd",
            Greqd => "greqd",
            Lseqd => "lseqd",
            Jmp => "jmp",
            Jmpi => "jmpi",
            Stpushb => "stpushb",
            Stpopb => "stpopb",
            Stpushi => "stpushi",
            Stpopi => "stpopi",
            Stpushd => "stpushd",
            Stpopd => "stpopd",
            Loada => "loada",
            Loadd => "loadd",
            Intr0 => "intr0",
            Intr1 => "intr1",
            Inclsijmpi => "inclsijmpi",
            Decgrijmpi => "decgrijmpi",
            Movi => "movi",
            Movd => "movd",
            Loadl => "loadl",
            Jmpa => "jmpa",
            Jsr => "jsr",
            Jsra => "jsra",
            Rts => "rts",
            Load => "load",
            Noti => "noti",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for byte in 0..=255u8 {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert!(Opcode::from_byte(Opcode::COUNT as u8).is_none());
    }

    #[test]
    fn test_widths() {
        assert_eq!(Opcode::Addi.width(), 4);
        assert_eq!(Opcode::Lseqd.width(), 4);
        assert_eq!(Opcode::Jmp.width(), 9);
        assert_eq!(Opcode::Jmpi.width(), 10);
        assert_eq!(Opcode::Inclsijmpi.width(), 11);
        assert_eq!(Opcode::Loada.width(), 18);
        assert_eq!(Opcode::Loadl.width(), 10);
        assert_eq!(Opcode::Intr1.width(), 5);
        assert_eq!(Opcode::Rts.width(), 1);
        assert_eq!(Opcode::Noti.width(), 3);
    }

    #[test]
    fn test_target_operand_fits_width() {
        for op in Opcode::ALL {
            if let Some(at) = op.target_operand() {
                assert!(at + 8 <= op.width(), "{op}");
                assert_eq!(op.category(), OpcodeCategory::Branch);
            }
        }
    }
}
