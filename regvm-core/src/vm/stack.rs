//! Stacks por core
//!
//! - [`OperandStack`]: janela de bytes no segmento de dados, cresce para
//!   endereços menores. `sp == top` significa pilha vazia.
//! - [`ReturnStack`]: LIFO de endereços de retorno, separada da pilha de
//!   operandos e com capacidade fixa.

use super::error::{VmError, VmResult};
use super::memory::DataSegment;

/// Pilha de operandos (tripla top/bottom/sp sobre o segmento de dados)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandStack {
    top: usize,
    bottom: usize,
    sp: usize,
}

impl OperandStack {
    /// Pilha vazia sobre a janela `[bottom, top)`
    pub fn new(bottom: usize, top: usize) -> Self {
        Self { top, bottom, sp: top }
    }

    /// Pilha com `sp` já posicionado (herdado no spawn)
    pub fn with_sp(bottom: usize, top: usize, sp: usize) -> VmResult<Self> {
        if sp < bottom || sp > top {
            return Err(VmError::StackCorrupted {
                sp: Some(sp),
                bottom,
                top,
            });
        }
        Ok(Self { top, bottom, sp })
    }

    #[inline]
    pub fn sp(&self) -> usize {
        self.sp
    }

    #[inline]
    pub fn top(&self) -> usize {
        self.top
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.bottom
    }

    /// Bytes vivos em `[sp, top)`
    #[inline]
    pub fn depth(&self) -> usize {
        self.top - self.sp
    }

    /// Reposiciona `sp` após uma chamada nativa
    pub fn set_sp(&mut self, sp: usize) -> VmResult<()> {
        *self = Self::with_sp(self.bottom, self.top, sp)?;
        Ok(())
    }

    #[inline]
    fn reserve(&mut self, width: usize) -> VmResult<usize> {
        match self.sp.checked_sub(width) {
            Some(next) if next >= self.bottom => {
                self.sp = next;
                Ok(next)
            }
            _ => Err(VmError::StackOverflow {
                sp: self.sp,
                bottom: self.bottom,
            }),
        }
    }

    #[inline]
    fn release(&mut self, width: usize) -> VmResult<usize> {
        if self.sp + width > self.top {
            return Err(VmError::StackUnderflow {
                sp: self.sp,
                top: self.top,
            });
        }
        let at = self.sp;
        self.sp += width;
        Ok(at)
    }

    // ─────────────────────────────────────────────────────────────────
    // push/pop tipados (1 e 8 bytes)
    // ─────────────────────────────────────────────────────────────────

    pub fn push_u8(&mut self, data: &DataSegment, value: u8) -> VmResult<()> {
        let at = self.reserve(1)?;
        data.write_u8(at, value)
    }

    pub fn pop_u8(&mut self, data: &DataSegment) -> VmResult<u8> {
        let at = self.release(1)?;
        data.read_u8(at)
    }

    pub fn push_i64(&mut self, data: &DataSegment, value: i64) -> VmResult<()> {
        let at = self.reserve(8)?;
        data.write_i64(at, value)
    }

    pub fn pop_i64(&mut self, data: &DataSegment) -> VmResult<i64> {
        let at = self.release(8)?;
        data.read_i64(at)
    }

    pub fn push_f64(&mut self, data: &DataSegment, value: f64) -> VmResult<()> {
        let at = self.reserve(8)?;
        data.write_f64(at, value)
    }

    pub fn pop_f64(&mut self, data: &DataSegment) -> VmResult<f64> {
        let at = self.release(8)?;
        data.read_f64(at)
    }
}

/// Pilha de endereços de retorno
#[derive(Debug, Clone)]
pub struct ReturnStack {
    slots: Vec<usize>,
    capacity: usize,
}

impl ReturnStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Empilha endereço de retorno (erro fatal se cheia)
    #[inline]
    pub fn push(&mut self, ep: usize) -> VmResult<()> {
        if self.slots.len() >= self.capacity {
            return Err(VmError::ReturnStackFull(self.capacity));
        }
        self.slots.push(ep);
        Ok(())
    }

    #[inline]
    pub fn pop(&mut self) -> VmResult<usize> {
        self.slots.pop().ok_or(VmError::ReturnStackEmpty)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> DataSegment {
        DataSegment::new(&[], 64)
    }

    #[test]
    fn test_lifo_law() {
        let data = segment();
        let mut stack = OperandStack::new(32, 64);
        let start = stack.sp();

        let values = [3i64, -1, i64::MAX, 0];
        for v in values {
            stack.push_i64(&data, v).unwrap();
        }
        let popped: Vec<i64> = (0..values.len()).map(|_| stack.pop_i64(&data).unwrap()).collect();
        assert_eq!(popped, values.iter().rev().copied().collect::<Vec<_>>());
        assert_eq!(stack.sp(), start);
    }

    #[test]
    fn test_mixed_widths() {
        let data = segment();
        let mut stack = OperandStack::new(0, 64);
        stack.push_u8(&data, 0xAB).unwrap();
        stack.push_f64(&data, 1.25).unwrap();
        assert_eq!(stack.depth(), 9);
        assert_eq!(stack.pop_f64(&data).unwrap(), 1.25);
        assert_eq!(stack.pop_u8(&data).unwrap(), 0xAB);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn test_overflow_and_underflow() {
        let data = segment();
        let mut stack = OperandStack::new(48, 64);
        stack.push_i64(&data, 1).unwrap();
        stack.push_i64(&data, 2).unwrap();
        assert!(matches!(
            stack.push_u8(&data, 3),
            Err(VmError::StackOverflow { sp: 48, bottom: 48 })
        ));

        let mut empty = OperandStack::new(48, 64);
        assert!(matches!(empty.pop_u8(&data), Err(VmError::StackUnderflow { .. })));

        empty.push_u8(&data, 9).unwrap();
        assert!(empty.pop_i64(&data).is_err());
    }

    #[test]
    fn test_return_stack_capacity() {
        let mut rs = ReturnStack::new(2);
        rs.push(10).unwrap();
        rs.push(20).unwrap();
        assert!(matches!(rs.push(30), Err(VmError::ReturnStackFull(2))));
        assert_eq!(rs.pop().unwrap(), 20);
        assert_eq!(rs.pop().unwrap(), 10);
        assert!(matches!(rs.pop(), Err(VmError::ReturnStackEmpty)));
    }
}
