//! Threaded interpreter for the register VM
//!
//! One [`Core`] per OS thread. Dispatch goes through a table of function
//! pointers indexed by the opcode byte; each handler receives the raw
//! instruction bytes (opcode included) and reports how the execution pointer
//! moves next.
//!
//! # Performance Strategy
//! - Handler table built once, O(1) lookup per instruction
//! - Branch targets come from the precomputed jump table, never re-decoded
//! - Register operands are bytes, so register access needs no bounds check

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;

use super::error::{VmError, VmResult};
use super::jumptable::{JumpTable, decode_i64};
use super::machine::Shared;
use super::opcode::Opcode;
use super::registers::RegisterFile;
use super::stack::{OperandStack, ReturnStack};

/// Handler function type for opcode execution
type OpcodeHandler = fn(&mut Core, &[u8]) -> VmResult<Flow>;

/// Pre-computed dispatch table
static DISPATCH: Lazy<[OpcodeHandler; Opcode::COUNT]> =
    Lazy::new(|| Opcode::ALL.map(Core::get_handler));

/// Where the execution pointer goes after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Advance by the instruction stride
    Next(usize),
    /// Absolute jump
    Jump(i64),
    /// End this core with a return code
    Exit(i64),
}

/// Virtual core: private registers and stacks over the shared image
pub struct Core {
    pub(crate) id: usize,
    pub(crate) ep: usize,
    pub(crate) regs: RegisterFile,
    pub(crate) stack: OperandStack,
    pub(crate) returns: ReturnStack,
    pub(crate) jumps: Arc<JumpTable>,
    pub(crate) shared: Arc<Shared>,
    executed: u64,
}

impl Core {
    pub(crate) fn new(
        id: usize,
        ep: usize,
        stack: OperandStack,
        jumps: Arc<JumpTable>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            ep,
            regs: RegisterFile::new(),
            stack,
            returns: ReturnStack::new(shared.config.return_stack_depth),
            jumps,
            shared,
            executed: 0,
        }
    }

    /// Core index
    pub fn id(&self) -> usize {
        self.id
    }

    /// Instructions executed so far
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Runs until an exit service or a fatal error
    pub fn run(&mut self) -> VmResult<i64> {
        let shared = Arc::clone(&self.shared);
        let code = &shared.code[..];

        loop {
            let ep = self.ep;
            let byte = *code.get(ep).ok_or(VmError::EpOutOfRange(ep as i64))?;
            let opcode = Opcode::from_byte(byte).ok_or(VmError::InvalidOpcode { ep, opcode: byte })?;
            let inst = code
                .get(ep..ep + opcode.width())
                .ok_or(VmError::InstructionTruncated {
                    addr: ep,
                    needed: opcode.width(),
                    code_len: code.len(),
                })?;

            tracing::trace!(core = self.id, ep, "{}", opcode);
            self.executed += 1;

            match DISPATCH[byte as usize](self, inst)? {
                Flow::Next(stride) => self.ep = ep + stride,
                Flow::Jump(target) => {
                    self.ep = usize::try_from(target).map_err(|_| VmError::EpOutOfRange(target))?;
                }
                Flow::Exit(rc) => return Ok(rc),
            }
        }
    }

    /// Map opcode to handler function
    fn get_handler(opcode: Opcode) -> OpcodeHandler {
        match opcode {
            // Sized load/store
            Opcode::Pushb => Self::op_pushb,
            Opcode::Pushw => Self::op_pushw,
            Opcode::Pushdw => Self::op_pushdw,
            Opcode::Pushqw => Self::op_pushqw,
            Opcode::Pushd => Self::op_pushd,
            Opcode::Pullb => Self::op_pullb,
            Opcode::Pullw => Self::op_pullw,
            Opcode::Pulldw => Self::op_pulldw,
            Opcode::Pullqw => Self::op_pullqw,
            Opcode::Pulld => Self::op_pulld,

            // Integer arithmetic
            Opcode::Addi => Self::op_addi,
            Opcode::Subi => Self::op_subi,
            Opcode::Muli => Self::op_muli,
            Opcode::Divi => Self::op_divi,
            Opcode::Smuli => Self::op_smuli,
            Opcode::Sdivi => Self::op_sdivi,
            Opcode::Andi => Self::op_andi,
            Opcode::Ori => Self::op_ori,
            Opcode::Bandi => Self::op_bandi,
            Opcode::Bori => Self::op_bori,
            Opcode::Bxori => Self::op_bxori,
            Opcode::Modi => Self::op_modi,
            Opcode::Noti => Self::op_noti,

            // Float arithmetic
            Opcode::Addd => Self::op_addd,
            Opcode::Subd => Self::op_subd,
            Opcode::Muld => Self::op_muld,
            Opcode::Divd => Self::op_divd,

            // Compare
            Opcode::Eqi => Self::op_eqi,
            Opcode::Neqi => Self::op_neqi,
            Opcode::Gri => Self::op_gri,
            Opcode::Lsi => Self::op_lsi,
            Opcode::Greqi => Self::op_greqi,
            Opcode::Lseqi => Self::op_lseqi,
            Opcode::Eqd => Self::op_eqd,
            Opcode::Neqd => Self::op_neqd,
            Opcode::Grd => Self::op_grd,
            Opcode::Lsd => Self::op_lsd,
            Opcode::Greqd => Self::op_greqd,
            Opcode::Lseqd => Self::op_lseqd,

            // Control flow
            Opcode::Jmp => Self::op_jmp,
            Opcode::Jmpi => Self::op_jmpi,
            Opcode::Inclsijmpi => Self::op_inclsijmpi,
            Opcode::Decgrijmpi => Self::op_decgrijmpi,
            Opcode::Jmpa => Self::op_jmpa,
            Opcode::Jsr => Self::op_jsr,
            Opcode::Jsra => Self::op_jsra,
            Opcode::Rts => Self::op_rts,

            // Operand stack
            Opcode::Stpushb => Self::op_stpushb,
            Opcode::Stpopb => Self::op_stpopb,
            Opcode::Stpushi => Self::op_stpushi,
            Opcode::Stpopi => Self::op_stpopi,
            Opcode::Stpushd => Self::op_stpushd,
            Opcode::Stpopd => Self::op_stpopd,

            // Immediate loads and moves
            Opcode::Loada => Self::op_loada,
            Opcode::Loadd => Self::op_loadd,
            Opcode::Load => Self::op_load,
            Opcode::Loadl => Self::op_loadl,
            Opcode::Movi => Self::op_movi,
            Opcode::Movd => Self::op_movd,

            // Interrupts
            Opcode::Intr0 => Self::op_intr0,
            Opcode::Intr1 => Self::op_intr1,
        }
    }

    // ═════════════════════════════════════════════════════════════════
    // LOAD / STORE SIZED
    // ═════════════════════════════════════════════════════════════════

    #[inline(always)]
    fn sized_load(&mut self, inst: &[u8], width: usize) -> VmResult<Flow> {
        let data = &self.shared.data;
        let addr = data.resolve(self.regs.int(inst[1]), self.regs.int(inst[2]), width)?;
        self.regs.set_int(inst[3], data.read_uint(addr, width)?);
        Ok(Flow::Next(4))
    }

    #[inline(always)]
    fn sized_store(&mut self, inst: &[u8], width: usize) -> VmResult<Flow> {
        let data = &self.shared.data;
        let addr = data.resolve(self.regs.int(inst[2]), self.regs.int(inst[3]), width)?;
        data.write_uint(addr, width, self.regs.int(inst[1]))?;
        Ok(Flow::Next(4))
    }

    fn op_pushb(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_load(inst, 1)
    }

    fn op_pushw(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_load(inst, 2)
    }

    fn op_pushdw(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_load(inst, 4)
    }

    fn op_pushqw(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_load(inst, 8)
    }

    fn op_pushd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let data = &core.shared.data;
        let addr = data.resolve(core.regs.int(inst[1]), core.regs.int(inst[2]), 8)?;
        core.regs.set_dbl(inst[3], data.read_f64(addr)?);
        Ok(Flow::Next(4))
    }

    fn op_pullb(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_store(inst, 1)
    }

    fn op_pullw(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_store(inst, 2)
    }

    fn op_pulldw(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_store(inst, 4)
    }

    fn op_pullqw(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.sized_store(inst, 8)
    }

    fn op_pulld(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let data = &core.shared.data;
        let addr = data.resolve(core.regs.int(inst[2]), core.regs.int(inst[3]), 8)?;
        data.write_f64(addr, core.regs.dbl(inst[1]))?;
        Ok(Flow::Next(4))
    }

    // ═════════════════════════════════════════════════════════════════
    // INTEGER ARITHMETIC
    // ═════════════════════════════════════════════════════════════════

    #[inline(always)]
    fn int_op(&mut self, inst: &[u8], f: fn(i64, i64) -> i64) -> VmResult<Flow> {
        let value = f(self.regs.int(inst[1]), self.regs.int(inst[2]));
        self.regs.set_int(inst[3], value);
        Ok(Flow::Next(4))
    }

    /// Divisor zero: fatal with checking on, result 0 with it off
    #[inline(always)]
    fn int_div_op(&mut self, inst: &[u8], f: fn(i64, i64) -> i64) -> VmResult<Flow> {
        let (a, b) = (self.regs.int(inst[1]), self.regs.int(inst[2]));
        let value = if b == 0 {
            if self.shared.config.division_check {
                return Err(VmError::DivisionByZero);
            }
            0
        } else {
            f(a, b)
        };
        self.regs.set_int(inst[3], value);
        Ok(Flow::Next(4))
    }

    fn op_addi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, i64::wrapping_add)
    }

    fn op_subi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, i64::wrapping_sub)
    }

    fn op_muli(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, i64::wrapping_mul)
    }

    fn op_divi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_div_op(inst, i64::wrapping_div)
    }

    fn op_modi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_div_op(inst, i64::wrapping_rem)
    }

    fn op_smuli(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, |a, b| a.wrapping_shl(b as u32))
    }

    fn op_sdivi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, |a, b| a.wrapping_shr(b as u32))
    }

    fn op_andi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, |a, b| (a != 0 && b != 0) as i64)
    }

    fn op_ori(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, |a, b| (a != 0 || b != 0) as i64)
    }

    fn op_bandi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, |a, b| a & b)
    }

    fn op_bori(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, |a, b| a | b)
    }

    fn op_bxori(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_op(inst, |a, b| a ^ b)
    }

    fn op_noti(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let value = (core.regs.int(inst[1]) == 0) as i64;
        core.regs.set_int(inst[2], value);
        Ok(Flow::Next(3))
    }

    // ═════════════════════════════════════════════════════════════════
    // FLOAT ARITHMETIC
    // ═════════════════════════════════════════════════════════════════

    #[inline(always)]
    fn dbl_op(&mut self, inst: &[u8], f: fn(f64, f64) -> f64) -> VmResult<Flow> {
        let value = f(self.regs.dbl(inst[1]), self.regs.dbl(inst[2]));
        self.regs.set_dbl(inst[3], value);
        Ok(Flow::Next(4))
    }

    fn op_addd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_op(inst, |a, b| a + b)
    }

    fn op_subd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_op(inst, |a, b| a - b)
    }

    fn op_muld(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_op(inst, |a, b| a * b)
    }

    fn op_divd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        if core.shared.config.division_check && core.regs.dbl(inst[2]) == 0.0 {
            return Err(VmError::DivisionByZero);
        }
        core.dbl_op(inst, |a, b| a / b)
    }

    // ═════════════════════════════════════════════════════════════════
    // COMPARE
    // ═════════════════════════════════════════════════════════════════

    #[inline(always)]
    fn int_cmp(&mut self, inst: &[u8], f: fn(&i64, &i64) -> bool) -> VmResult<Flow> {
        let value = f(&self.regs.int(inst[1]), &self.regs.int(inst[2])) as i64;
        self.regs.set_int(inst[3], value);
        Ok(Flow::Next(4))
    }

    #[inline(always)]
    fn dbl_cmp(&mut self, inst: &[u8], f: fn(&f64, &f64) -> bool) -> VmResult<Flow> {
        let value = f(&self.regs.dbl(inst[1]), &self.regs.dbl(inst[2])) as i64;
        self.regs.set_int(inst[3], value);
        Ok(Flow::Next(4))
    }

    fn op_eqi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_cmp(inst, i64::eq)
    }

    fn op_neqi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_cmp(inst, i64::ne)
    }

    fn op_gri(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_cmp(inst, i64::gt)
    }

    fn op_lsi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_cmp(inst, i64::lt)
    }

    fn op_greqi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_cmp(inst, i64::ge)
    }

    fn op_lseqi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.int_cmp(inst, i64::le)
    }

    fn op_eqd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_cmp(inst, f64::eq)
    }

    fn op_neqd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_cmp(inst, f64::ne)
    }

    fn op_grd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_cmp(inst, f64::gt)
    }

    fn op_lsd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_cmp(inst, f64::lt)
    }

    fn op_greqd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_cmp(inst, f64::ge)
    }

    fn op_lseqd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.dbl_cmp(inst, f64::le)
    }

    // ═════════════════════════════════════════════════════════════════
    // CONTROL FLOW
    // ═════════════════════════════════════════════════════════════════

    fn op_jmp(core: &mut Core, _inst: &[u8]) -> VmResult<Flow> {
        Ok(Flow::Jump(core.jumps.target(core.ep)))
    }

    fn op_jmpi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        if core.regs.int(inst[1]) != 0 {
            Ok(Flow::Jump(core.jumps.target(core.ep)))
        } else {
            Ok(Flow::Next(10))
        }
    }

    fn op_inclsijmpi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let counter = core.regs.int(inst[1]).wrapping_add(1);
        core.regs.set_int(inst[1], counter);
        if counter < core.regs.int(inst[2]) {
            Ok(Flow::Jump(core.jumps.target(core.ep)))
        } else {
            Ok(Flow::Next(11))
        }
    }

    fn op_decgrijmpi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let counter = core.regs.int(inst[1]).wrapping_sub(1);
        core.regs.set_int(inst[1], counter);
        if counter > core.regs.int(inst[2]) {
            Ok(Flow::Jump(core.jumps.target(core.ep)))
        } else {
            Ok(Flow::Next(11))
        }
    }

    fn op_jmpa(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        Ok(Flow::Jump(core.regs.int(inst[1])))
    }

    fn op_jsr(core: &mut Core, _inst: &[u8]) -> VmResult<Flow> {
        core.returns.push(core.ep + Opcode::Jsr.width())?;
        Ok(Flow::Jump(core.jumps.target(core.ep)))
    }

    fn op_jsra(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.returns.push(core.ep + Opcode::Jsra.width())?;
        Ok(Flow::Jump(core.regs.int(inst[1])))
    }

    fn op_rts(core: &mut Core, _inst: &[u8]) -> VmResult<Flow> {
        Ok(Flow::Jump(core.returns.pop()? as i64))
    }

    // ═════════════════════════════════════════════════════════════════
    // OPERAND STACK
    // ═════════════════════════════════════════════════════════════════

    fn op_stpushb(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let value = core.regs.int(inst[1]) as u8;
        core.stack.push_u8(&core.shared.data, value)?;
        Ok(Flow::Next(2))
    }

    fn op_stpopb(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let value = core.stack.pop_u8(&core.shared.data)?;
        core.regs.set_int(inst[1], value as i64);
        Ok(Flow::Next(2))
    }

    fn op_stpushi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let value = core.regs.int(inst[1]);
        core.stack.push_i64(&core.shared.data, value)?;
        Ok(Flow::Next(2))
    }

    fn op_stpopi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let value = core.stack.pop_i64(&core.shared.data)?;
        core.regs.set_int(inst[1], value);
        Ok(Flow::Next(2))
    }

    fn op_stpushd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let value = core.regs.dbl(inst[1]);
        core.stack.push_f64(&core.shared.data, value)?;
        Ok(Flow::Next(2))
    }

    fn op_stpopd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let value = core.stack.pop_f64(&core.shared.data)?;
        core.regs.set_dbl(inst[1], value);
        Ok(Flow::Next(2))
    }

    // ═════════════════════════════════════════════════════════════════
    // IMMEDIATE LOADS AND MOVES
    // ═════════════════════════════════════════════════════════════════

    /// (base, offset, register) of an 18-byte absolute load
    #[inline(always)]
    fn absolute_operands(inst: &[u8]) -> (i64, i64, u8) {
        (decode_i64(&inst[1..9]), decode_i64(&inst[9..17]), inst[17])
    }

    fn op_loada(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let (base, offset, reg) = Self::absolute_operands(inst);
        let data = &core.shared.data;
        let addr = data.resolve(base, offset, 8)?;
        core.regs.set_int(reg, data.read_i64(addr)?);
        Ok(Flow::Next(18))
    }

    fn op_loadd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let (base, offset, reg) = Self::absolute_operands(inst);
        let data = &core.shared.data;
        let addr = data.resolve(base, offset, 8)?;
        core.regs.set_dbl(reg, data.read_f64(addr)?);
        Ok(Flow::Next(18))
    }

    fn op_load(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        let (base, offset, reg) = Self::absolute_operands(inst);
        core.regs.set_int(reg, base.wrapping_add(offset));
        Ok(Flow::Next(18))
    }

    fn op_loadl(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.regs.set_int(inst[9], decode_i64(&inst[1..9]));
        Ok(Flow::Next(10))
    }

    fn op_movi(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.regs.set_int(inst[2], core.regs.int(inst[1]));
        Ok(Flow::Next(3))
    }

    fn op_movd(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.regs.set_dbl(inst[2], core.regs.dbl(inst[1]));
        Ok(Flow::Next(3))
    }

    // ═════════════════════════════════════════════════════════════════
    // INTERRUPTS (see intr.rs)
    // ═════════════════════════════════════════════════════════════════

    fn op_intr0(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.intr0(inst)
    }

    fn op_intr1(core: &mut Core, inst: &[u8]) -> VmResult<Flow> {
        core.intr1(inst)
    }
}

/// Thread body of every core
///
/// Runs the core, then records its end in the core table. The core (and its
/// reference to the jump table) is dropped before the descriptor goes back to
/// `Stop`.
pub(crate) fn run_core(mut core: Core) {
    let id = core.id;
    let shared = Arc::clone(&core.shared);
    let started = Instant::now();

    tracing::info!("CPU {} ready, ep {}", id, core.ep);
    let result = core.run();
    let executed = core.executed;
    drop(core);

    let (exit_code, fault) = match result {
        Ok(code) => {
            tracing::info!(
                "CPU {} exit {} ({} instructions, {:?})",
                id,
                code,
                executed,
                started.elapsed()
            );
            (code, None)
        }
        Err(e) => {
            tracing::error!("CPU {}: {}", id, e);
            (1, Some(e))
        }
    };

    if let Err(e) = shared.console.flush() {
        tracing::warn!("CPU {}: console flush failed: {}", id, e);
    }
    shared.segment_lock.release_if_held(id);
    shared.tables().cores.finish(id, exit_code, fault);
}
