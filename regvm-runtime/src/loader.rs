//! Program loader for .rvmc images

use crate::error::{RuntimeError, RuntimeResult};
use regvm_core::vm::{ProgramImage, VmError};
use std::fs;
use std::path::Path;

/// Carregador de imagens de programa
pub struct ProgramLoader;

impl ProgramLoader {
    /// Lê e valida uma imagem .rvmc
    pub fn load_image(path: impl AsRef<Path>) -> RuntimeResult<ProgramImage> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).map_err(|_| RuntimeError::FileNotFound(path.display().to_string()))?;

        tracing::debug!("loaded {} ({} bytes)", path.display(), bytes.len());
        Self::parse(&bytes)
    }

    /// Decodifica uma imagem já em memória
    pub fn parse(bytes: &[u8]) -> RuntimeResult<ProgramImage> {
        ProgramImage::from_bytes(bytes).map_err(|e| match e {
            VmError::InvalidImage(reason) => RuntimeError::InvalidFormat(reason),
            other => RuntimeError::Vm(other),
        })
    }
}
