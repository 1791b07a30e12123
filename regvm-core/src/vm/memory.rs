//! Segmento de dados
//!
//! Buffer de bytes compartilhado por todos os cores: a região de globais no
//! início e, no fim, uma janela de stack por core possível.
//!
//! Cada byte é um `AtomicU8` acessado com ordenação `Relaxed`. Isso dá a
//! semântica de memória compartilhada sem sincronização implícita que os
//! programas esperam: acessos multi-byte concorrentes podem se intercalar, e a
//! disciplina de lock (`intr1` 2/3) é responsabilidade do bytecode.

use std::sync::atomic::{AtomicU8, Ordering};

use super::error::{VmError, VmResult};

/// Segmento de dados compartilhado
pub struct DataSegment {
    bytes: Box<[AtomicU8]>,
    globals: usize,
}

impl DataSegment {
    /// Cria o segmento com os globais iniciais seguidos de `stack_bytes` zerados
    pub fn new(globals: &[u8], stack_bytes: usize) -> Self {
        let bytes = globals
            .iter()
            .copied()
            .chain(std::iter::repeat_n(0u8, stack_bytes))
            .map(AtomicU8::new)
            .collect();
        Self {
            bytes,
            globals: globals.len(),
        }
    }

    /// Tamanho total em bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Tamanho da região de globais
    #[inline]
    pub fn globals_len(&self) -> usize {
        self.globals
    }

    /// Resolve `base + offset` para um endereço válido com `width` bytes
    pub fn resolve(&self, base: i64, offset: i64, width: usize) -> VmResult<usize> {
        let out_of_range = || VmError::DataOutOfRange {
            address: base,
            offset,
            width,
        };
        let addr = base.checked_add(offset).ok_or_else(out_of_range)?;
        let addr = usize::try_from(addr).map_err(|_| out_of_range())?;
        match addr.checked_add(width) {
            Some(end) if end <= self.bytes.len() => Ok(addr),
            _ => Err(out_of_range()),
        }
    }

    #[inline]
    fn span(&self, addr: usize, width: usize) -> VmResult<&[AtomicU8]> {
        addr.checked_add(width)
            .and_then(|end| self.bytes.get(addr..end))
            .ok_or(VmError::DataOutOfRange {
                address: addr as i64,
                offset: 0,
                width,
            })
    }

    // ═══════════════════════════════════════════════════════════════
    // ACESSO TIPADO (ordem de bytes nativa)
    // ═══════════════════════════════════════════════════════════════

    /// Lê `N` bytes a partir de `addr`
    #[inline]
    pub fn read_array<const N: usize>(&self, addr: usize) -> VmResult<[u8; N]> {
        let span = self.span(addr, N)?;
        let mut out = [0u8; N];
        for (dst, src) in out.iter_mut().zip(span) {
            *dst = src.load(Ordering::Relaxed);
        }
        Ok(out)
    }

    /// Escreve `N` bytes a partir de `addr`
    #[inline]
    pub fn write_array<const N: usize>(&self, addr: usize, value: [u8; N]) -> VmResult<()> {
        let span = self.span(addr, N)?;
        for (dst, src) in span.iter().zip(value) {
            dst.store(src, Ordering::Relaxed);
        }
        Ok(())
    }

    #[inline]
    pub fn read_u8(&self, addr: usize) -> VmResult<u8> {
        Ok(self.read_array::<1>(addr)?[0])
    }

    #[inline]
    pub fn write_u8(&self, addr: usize, value: u8) -> VmResult<()> {
        self.write_array(addr, [value])
    }

    #[inline]
    pub fn read_i64(&self, addr: usize) -> VmResult<i64> {
        self.read_array(addr).map(i64::from_ne_bytes)
    }

    #[inline]
    pub fn write_i64(&self, addr: usize, value: i64) -> VmResult<()> {
        self.write_array(addr, value.to_ne_bytes())
    }

    #[inline]
    pub fn read_f64(&self, addr: usize) -> VmResult<f64> {
        self.read_array(addr).map(f64::from_ne_bytes)
    }

    #[inline]
    pub fn write_f64(&self, addr: usize, value: f64) -> VmResult<()> {
        self.write_array(addr, value.to_ne_bytes())
    }

    /// Lê um inteiro de 1/2/4/8 bytes, estendido com zeros para 64 bits
    pub fn read_uint(&self, addr: usize, width: usize) -> VmResult<i64> {
        Ok(match width {
            1 => self.read_u8(addr)? as i64,
            2 => u16::from_ne_bytes(self.read_array(addr)?) as i64,
            4 => u32::from_ne_bytes(self.read_array(addr)?) as i64,
            _ => self.read_i64(addr)?,
        })
    }

    /// Escreve os `width` bytes de ordem baixa de `value`
    pub fn write_uint(&self, addr: usize, width: usize, value: i64) -> VmResult<()> {
        match width {
            1 => self.write_u8(addr, value as u8),
            2 => self.write_array(addr, (value as u16).to_ne_bytes()),
            4 => self.write_array(addr, (value as u32).to_ne_bytes()),
            _ => self.write_i64(addr, value),
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // STRINGS E BLOCOS
    // ═══════════════════════════════════════════════════════════════

    /// Lê uma string terminada em NUL (para no fim do segmento)
    pub fn read_cstr(&self, addr: usize) -> VmResult<Vec<u8>> {
        let tail = self.bytes.get(addr..).ok_or(VmError::DataOutOfRange {
            address: addr as i64,
            offset: 0,
            width: 1,
        })?;
        Ok(tail
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .take_while(|&b| b != 0)
            .collect())
    }

    /// Escreve `text` seguido de NUL
    pub fn write_cstr(&self, addr: usize, text: &[u8]) -> VmResult<()> {
        let span = self.span(addr, text.len() + 1)?;
        for (dst, &src) in span.iter().zip(text.iter().chain(std::iter::once(&0))) {
            dst.store(src, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copia `len` bytes de `src` para `dst` (regiões podem se sobrepor)
    pub fn copy_within(&self, src: usize, dst: usize, len: usize) -> VmResult<()> {
        let from = self.span(src, len)?;
        let to = self.span(dst, len)?;
        let tmp: Vec<u8> = from.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        for (d, s) in to.iter().zip(tmp) {
            d.store(s, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Cópia do conteúdo atual
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    /// Ponteiro base para a ABI nativa
    ///
    /// `AtomicU8` tem a mesma representação de `u8`; escrita através deste
    /// ponteiro é permitida pela célula interior.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.bytes.as_ptr() as *mut u8
    }
}

impl std::fmt::Debug for DataSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSegment")
            .field("len", &self.bytes.len())
            .field("globals", &self.globals)
            .finish()
    }
}
