//! Formato de imagem .rvmc
//!
//! Container consumido pelo loader: header de 32 bytes, código e globais.

use std::path::Path;

use super::config::DEFAULT_CODE_START;
use super::error::{VmError, VmResult};

/// Magic number: "RVMC"
pub const RVMC_MAGIC: u32 = 0x434D5652; // "RVMC" em little-endian

/// Versão do formato
pub const RVMC_VERSION: u16 = 0x0100; // v1.0

/// Header do arquivo .rvmc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Magic number (deve ser RVMC_MAGIC)
    pub magic: u32,
    /// Versão do formato
    pub version: u16,
    /// Flags (reservado)
    pub flags: u16,
    /// Tamanho do segmento de código
    pub code_size: u64,
    /// Tamanho da região de globais
    pub globals_size: u64,
    /// Entry point do core primário
    pub entry_point: u32,
    /// Checksum (FNV-1a truncado)
    pub checksum: u32,
}

impl ImageHeader {
    /// Tamanho do header em bytes
    pub const SIZE: usize = 32;

    /// Cria header padrão
    pub fn new() -> Self {
        Self {
            magic: RVMC_MAGIC,
            version: RVMC_VERSION,
            flags: 0,
            code_size: 0,
            globals_size: 0,
            entry_point: DEFAULT_CODE_START as u32,
            checksum: 0,
        }
    }

    /// Serializa header
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];

        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.flags.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.code_size.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.globals_size.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.entry_point.to_le_bytes());
        bytes[28..32].copy_from_slice(&self.checksum.to_le_bytes());

        bytes
    }

    /// Deserializa header
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(VmError::InvalidImage("header too short".into()));
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };

        let magic = u32_at(0);
        if magic != RVMC_MAGIC {
            return Err(VmError::InvalidImage(format!(
                "invalid magic: expected 0x{:08X}, got 0x{:08X}",
                RVMC_MAGIC, magic
            )));
        }

        let version = u16_at(4);
        if version >> 8 != RVMC_VERSION >> 8 {
            return Err(VmError::InvalidImage(format!(
                "unsupported format version 0x{:04X}",
                version
            )));
        }

        Ok(Self {
            magic,
            version,
            flags: u16_at(6),
            code_size: u64_at(8),
            globals_size: u64_at(16),
            entry_point: u32_at(24),
            checksum: u32_at(28),
        })
    }
}

impl Default for ImageHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Imagem de programa completa
#[derive(Debug, Clone)]
pub struct ProgramImage {
    /// Header
    pub header: ImageHeader,
    /// Segmento de código
    pub code: Vec<u8>,
    /// Globais iniciais
    pub globals: Vec<u8>,
}

impl ProgramImage {
    /// Cria imagem a partir de código e globais, entry point padrão
    pub fn new(code: Vec<u8>, globals: Vec<u8>) -> Self {
        let mut image = Self {
            header: ImageHeader::new(),
            code,
            globals,
        };
        image.seal();
        image
    }

    /// Define entry point
    pub fn with_entry(mut self, entry: u32) -> Self {
        self.header.entry_point = entry;
        self
    }

    /// Entry point do core primário
    pub fn entry(&self) -> usize {
        self.header.entry_point as usize
    }

    /// Carrega de arquivo
    pub fn load(path: &Path) -> VmResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Salva em arquivo
    pub fn save(&self, path: &Path) -> VmResult<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Serializa para bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut image = self.clone();
        image.seal();

        let mut bytes = Vec::with_capacity(ImageHeader::SIZE + self.code.len() + self.globals.len());
        bytes.extend_from_slice(&image.header.to_bytes());
        bytes.extend_from_slice(&self.code);
        bytes.extend_from_slice(&self.globals);
        bytes
    }

    /// Deserializa de bytes
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        let header = ImageHeader::from_bytes(bytes)?;

        let code_size = usize::try_from(header.code_size)
            .map_err(|_| VmError::InvalidImage("code size too large".into()))?;
        let globals_size = usize::try_from(header.globals_size)
            .map_err(|_| VmError::InvalidImage("globals size too large".into()))?;

        let code_end = ImageHeader::SIZE
            .checked_add(code_size)
            .ok_or_else(|| VmError::InvalidImage("code size overflows".into()))?;
        let globals_end = code_end
            .checked_add(globals_size)
            .ok_or_else(|| VmError::InvalidImage("globals size overflows".into()))?;
        if bytes.len() < globals_end {
            return Err(VmError::InvalidImage(format!(
                "truncated: expected {} bytes, got {}",
                globals_end,
                bytes.len()
            )));
        }

        let image = Self {
            code: bytes[ImageHeader::SIZE..code_end].to_vec(),
            globals: bytes[code_end..globals_end].to_vec(),
            header,
        };

        let checksum = image.calculate_checksum();
        if checksum != image.header.checksum {
            return Err(VmError::InvalidImage(format!(
                "checksum mismatch: header 0x{:08X}, content 0x{:08X}",
                image.header.checksum, checksum
            )));
        }
        if image.entry() >= image.code.len() {
            return Err(VmError::InvalidImage(format!(
                "entry point {} outside code segment ({} bytes)",
                image.entry(),
                image.code.len()
            )));
        }

        Ok(image)
    }

    /// Atualiza tamanhos e checksum do header
    fn seal(&mut self) {
        self.header.code_size = self.code.len() as u64;
        self.header.globals_size = self.globals.len() as u64;
        self.header.checksum = self.calculate_checksum();
    }

    /// Calcula checksum (FNV-1a, 32 bits baixos)
    fn calculate_checksum(&self) -> u32 {
        let mut hash: u64 = 0xcbf29ce484222325;

        for &byte in self.code.iter().chain(&self.globals) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }

        hash as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = ImageHeader::new();
        let bytes = header.to_bytes();
        let header2 = ImageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, header2);
        assert_eq!(&bytes[0..4], b"RVMC");
    }

    #[test]
    fn test_image_roundtrip() {
        let mut code = vec![0u8; 16];
        code.push(58); // rts
        let image = ProgramImage::new(code, vec![7; 24]);

        let image2 = ProgramImage::from_bytes(&image.to_bytes()).unwrap();
        assert_eq!(image.code, image2.code);
        assert_eq!(image.globals, image2.globals);
        assert_eq!(image2.entry(), 16);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut code = vec![0u8; 16];
        code.push(58);
        let mut bytes = ProgramImage::new(code, vec![1, 2, 3]).to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            ProgramImage::from_bytes(&bytes),
            Err(VmError::InvalidImage(msg)) if msg.contains("checksum")
        ));
    }

    #[test]
    fn test_truncated_image() {
        let bytes = ProgramImage::new(vec![0; 17], vec![0; 8]).to_bytes();
        assert!(ProgramImage::from_bytes(&bytes[..bytes.len() - 4]).is_err());
        assert!(ProgramImage::from_bytes(&bytes[..10]).is_err());
    }
}
