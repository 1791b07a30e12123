//! Software interrupts
//!
//! `intr0` carries the general system services, `intr1` thread control.
//! Instruction layout: `opcode, service, b, c, d` where `b, c, d` are
//! register indices.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::cores::Reservation;
use super::error::{VmError, VmResult};
use super::interpreter::{Core, Flow, run_core};
use super::opcode::Opcode;

const STRIDE: usize = Opcode::Intr0.width();

/// Serviços de `intr0`
pub mod service {
    pub const LOAD_MODULE: u8 = 0;
    pub const FREE_MODULE: u8 = 1;
    pub const BIND_FUNCTION: u8 = 2;
    pub const CALL_FUNCTION: u8 = 3;
    pub const PRINT_INT: u8 = 4;
    pub const PRINT_DOUBLE: u8 = 5;
    pub const PRINT_STRING: u8 = 6;
    pub const PRINT_NEWLINE: u8 = 7;
    pub const DELAY: u8 = 8;
    pub const INPUT_INT: u8 = 9;
    pub const INPUT_DOUBLE: u8 = 10;
    pub const INPUT_STRING: u8 = 11;
    pub const SHELL_ARGS: u8 = 12;
    pub const SHELL_ARG: u8 = 13;
    pub const SHOW_STACK_POINTER: u8 = 14;
    pub const CORE_COUNT: u8 = 15;
    pub const ENDIANNESS: u8 = 16;
    pub const EXIT: u8 = 255;
}

/// Serviços de `intr1`
pub mod thread_service {
    pub const SPAWN: u8 = 0;
    pub const JOIN: u8 = 1;
    pub const LOCK: u8 = 2;
    pub const UNLOCK: u8 = 3;
    pub const CORE_ID: u8 = 4;
    pub const EXIT: u8 = 255;
}

impl Core {
    /// General system services
    pub(super) fn intr0(&mut self, inst: &[u8]) -> VmResult<Flow> {
        let (b, c, d) = (inst[2], inst[3], inst[4]);

        match inst[1] {
            service::LOAD_MODULE => {
                let name = self.cstr_at(b)?;
                let slot = self.regs.int(c);
                self.shared.tables().modules.load(slot, &name)?;
            }
            service::FREE_MODULE => {
                self.shared.tables().modules.free(self.regs.int(b))?;
            }
            service::BIND_FUNCTION => {
                let symbol = self.cstr_at(d)?;
                let (slot, fn_slot) = (self.regs.int(b), self.regs.int(c));
                self.shared.tables().modules.bind(slot, fn_slot, &symbol)?;
            }
            service::CALL_FUNCTION => self.call_native(self.regs.int(b), self.regs.int(c))?,
            service::PRINT_INT => {
                self.shared.console.write_str(&self.regs.int(b).to_string())?;
            }
            service::PRINT_DOUBLE => {
                self.shared
                    .console
                    .write_str(&format!("{:.10}", self.regs.dbl(b)))?;
            }
            service::PRINT_STRING => {
                let text = self.cstr_at(b)?;
                self.shared.console.write_str(&text)?;
            }
            service::PRINT_NEWLINE => self.shared.console.write_str("\n")?,
            service::DELAY => {
                let ms = self.regs.int(b).max(0) as u64;
                thread::sleep(Duration::from_millis(ms));
            }
            service::INPUT_INT => {
                if let Some(line) = self.input_line("input int")? {
                    match scan_int(&line) {
                        Some(value) => self.regs.set_int(b, value),
                        None => tracing::warn!("input int: no number in '{}'", line),
                    }
                }
            }
            service::INPUT_DOUBLE => {
                if let Some(line) = self.input_line("input double")? {
                    match scan_double(&line) {
                        Some(value) => self.regs.set_dbl(b, value),
                        None => tracing::warn!("input double: no number in '{}'", line),
                    }
                }
            }
            service::INPUT_STRING => self.input_string(self.regs.int(b), c)?,
            service::SHELL_ARGS => {
                self.regs.set_int(b, self.shared.args.len() as i64);
            }
            service::SHELL_ARG => {
                let index = self.regs.int(b);
                let arg = usize::try_from(index)
                    .ok()
                    .and_then(|i| self.shared.args.get(i))
                    .ok_or(VmError::ShellArgOutOfRange(index))?;
                let data = &self.shared.data;
                let addr = data.resolve(self.regs.int(c), 0, arg.len() + 1)?;
                data.write_cstr(addr, arg.as_bytes())?;
            }
            service::SHOW_STACK_POINTER => {
                self.shared
                    .console
                    .write_str(&format!("stack pointer sp: {}\n", self.stack.sp()))?;
            }
            service::CORE_COUNT => {
                self.regs.set_int(b, self.shared.config.max_cores as i64);
            }
            service::ENDIANNESS => {
                self.regs.set_int(b, cfg!(target_endian = "big") as i64);
            }
            service::EXIT => return Ok(Flow::Exit(self.regs.int(b))),
            other => {
                return Err(VmError::UnknownInterrupt {
                    bank: 0,
                    service: other,
                });
            }
        }

        tracing::debug!(core = self.id, "intr0 {}", inst[1]);
        Ok(Flow::Next(STRIDE))
    }

    /// Thread control services
    pub(super) fn intr1(&mut self, inst: &[u8]) -> VmResult<Flow> {
        let b = inst[2];

        match inst[1] {
            thread_service::SPAWN => self.spawn(self.regs.int(b))?,
            thread_service::JOIN => self.join(),
            thread_service::LOCK => self.shared.segment_lock.lock(self.id),
            thread_service::UNLOCK => self.shared.segment_lock.unlock(self.id),
            thread_service::CORE_ID => self.regs.set_int(b, self.id as i64),
            thread_service::EXIT => return Ok(Flow::Exit(self.regs.int(b))),
            other => {
                return Err(VmError::UnknownInterrupt {
                    bank: 1,
                    service: other,
                });
            }
        }

        Ok(Flow::Next(STRIDE))
    }

    // ─────────────────────────────────────────────────────────────────
    // helpers
    // ─────────────────────────────────────────────────────────────────

    /// NUL-terminated string at `M[R[reg]]`
    fn cstr_at(&self, reg: u8) -> VmResult<String> {
        let data = &self.shared.data;
        let addr = data.resolve(self.regs.int(reg), 0, 1)?;
        let bytes = data.read_cstr(addr)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads one console line; end of input is recoverable
    fn input_line(&self, what: &str) -> VmResult<Option<String>> {
        let console = &self.shared.console;
        console.flush()?;
        let line = console.read_line()?;
        if line.is_none() {
            tracing::warn!("{}: can't read, end of input", what);
        }
        Ok(line)
    }

    /// Reads at most `max - 1` bytes into `M[R[reg]]`, NUL-terminated
    fn input_string(&mut self, max: i64, reg: u8) -> VmResult<()> {
        if max < 1 {
            tracing::warn!("input string: buffer size {} too small", max);
            return Ok(());
        }
        let Some(line) = self.input_line("input string")? else {
            return Ok(());
        };
        let mut bytes = line.into_bytes();
        bytes.truncate(usize::try_from(max - 1).unwrap_or(usize::MAX));

        let data = &self.shared.data;
        let addr = data.resolve(self.regs.int(reg), 0, bytes.len() + 1)?;
        data.write_cstr(addr, &bytes)
    }

    /// Calls native function `fn_slot` of module `slot` on this core's stack
    fn call_native(&mut self, slot: i64, fn_slot: i64) -> VmResult<()> {
        let func = self.shared.tables().modules.resolve(slot, fn_slot)?;

        let base = self.shared.data.base_ptr();
        let (sp, top, bottom) = (self.stack.sp(), self.stack.top(), self.stack.bottom());
        let ret = unsafe { func.invoke(base.add(sp), base.add(top), base.add(bottom), base) };

        let new_sp = if ret.is_null() {
            None
        } else {
            (ret as usize).checked_sub(base as usize)
        };
        match new_sp {
            Some(offset) if (bottom..=top).contains(&offset) => self.stack.set_sp(offset),
            _ => Err(VmError::StackCorrupted {
                sp: new_sp,
                bottom,
                top,
            }),
        }
    }

    /// Starts a new core at `ep` with a copy of this core's live stack
    fn spawn(&mut self, ep: i64) -> VmResult<()> {
        let shared = Arc::clone(&self.shared);
        let start = usize::try_from(ep)
            .ok()
            .filter(|&e| e < shared.code.len())
            .ok_or(VmError::EpOutOfRange(ep))?;

        let Reservation {
            index,
            generation,
            stack,
            stale,
        } = shared.tables().cores.reserve(&self.stack, &shared.data, start)?;

        if let Some(previous) = stale {
            if previous.join().is_err() {
                tracing::warn!("CPU {}: previous thread panicked", index);
            }
        }

        let child = Core::new(index, start, stack, Arc::clone(&self.jumps), Arc::clone(&shared));
        let spawned = thread::Builder::new()
            .name(format!("regvm-cpu-{index}"))
            .spawn(move || run_core(child));

        match spawned {
            Ok(handle) => {
                // Reused before we got here: the thread is already done
                let _ = shared.tables().cores.attach(index, generation, handle);
                tracing::info!("CPU {} spawned CPU {} at ep {}", self.id, index, start);
                Ok(())
            }
            Err(e) => {
                shared.tables().cores.revert(index, generation);
                Err(VmError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Polls until no core other than the primary and this one is running
    fn join(&self) {
        let except = [0, self.id];
        while self.shared.tables().cores.any_running_except(&except) {
            thread::sleep(self.shared.config.join_poll);
        }
        tracing::debug!("CPU {} join done", self.id);
    }
}

// ─────────────────────────────────────────────────────────────────
// leitura numérica (prefixo, como scanf)
// ─────────────────────────────────────────────────────────────────

/// Leading integer of `text`: optional sign, then `0x` hex, `0` octal or
/// decimal. Trailing text is ignored; out-of-range values saturate.
fn scan_int(text: &str) -> Option<i64> {
    let s = text.trim_start().as_bytes();
    let (negative, s) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (radix, digits) = match s {
        [b'0', b'x' | b'X', rest @ ..] if rest.first().is_some_and(u8::is_ascii_hexdigit) => {
            (16, rest)
        }
        [b'0', ..] => (8, s),
        _ => (10, s),
    };

    let mut magnitude: i128 = 0;
    let mut seen = false;
    for &byte in digits {
        let Some(digit) = (byte as char).to_digit(radix) else {
            break;
        };
        seen = true;
        magnitude = (magnitude * radix as i128 + digit as i128).min(i64::MAX as i128 + 1);
    }
    if !seen {
        return None;
    }

    let value = if negative { -magnitude } else { magnitude };
    Some(value.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
}

/// Leading decimal floating-point number of `text` (also `inf`, `nan`)
fn scan_double(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let bytes = s.as_bytes();
    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));

    let lower = s[end..].to_ascii_lowercase();
    for word in ["infinity", "inf", "nan"] {
        if lower.starts_with(word) {
            return format!("{}{}", &s[..end], word).parse().ok();
        }
    }

    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let int_digits = digits(end);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits(end + 1);
        end += 1 + frac_digits;
    }
    if int_digits + frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp_digits = digits(end + 1 + sign);
        if exp_digits > 0 {
            end += 1 + sign + exp_digits;
        }
    }

    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_int_prefix() {
        assert_eq!(scan_int("12 apples"), Some(12));
        assert_eq!(scan_int("  -7;"), Some(-7));
        assert_eq!(scan_int("+5"), Some(5));
        assert_eq!(scan_int("0x1F"), Some(31));
        assert_eq!(scan_int("017"), Some(15));
        assert_eq!(scan_int("09"), Some(0));
        assert_eq!(scan_int("0xg"), Some(0));
        assert_eq!(scan_int("99999999999999999999"), Some(i64::MAX));
        assert_eq!(scan_int("-9223372036854775808"), Some(i64::MIN));
        assert_eq!(scan_int("none"), None);
        assert_eq!(scan_int("-"), None);
        assert_eq!(scan_int(""), None);
    }

    #[test]
    fn test_scan_double_prefix() {
        assert_eq!(scan_double("3.5kg"), Some(3.5));
        assert_eq!(scan_double(" -0.25"), Some(-0.25));
        assert_eq!(scan_double("1e3x"), Some(1000.0));
        assert_eq!(scan_double("2e"), Some(2.0));
        assert_eq!(scan_double(".5"), Some(0.5));
        assert_eq!(scan_double("7."), Some(7.0));
        assert_eq!(scan_double("-inf"), Some(f64::NEG_INFINITY));
        assert!(scan_double("NaN").is_some_and(f64::is_nan));
        assert_eq!(scan_double("."), None);
        assert_eq!(scan_double("abc"), None);
    }
}
