//! Machine configuration
//!
//! Defaults are overlaid by environment variables (or a `.env` file) through
//! [`VmConfig::from_env`]; the runtime binary applies CLI flags on top.

use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;

use super::error::{VmError, VmResult};

// Automatically load .env when config module is accessed
static DOTENV_INIT: Lazy<()> = Lazy::new(|| {
    let _ = dotenv::dotenv();
});

/// Ensure environment is loaded
#[inline]
fn ensure_loaded() {
    let _ = &*DOTENV_INIT;
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    ensure_loaded();
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    ensure_loaded();
    env::var(key).ok().map(|v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

/// Default operand stack window per core, in bytes
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Default return-address stack depth
pub const DEFAULT_RETURN_STACK_DEPTH: usize = 256;

/// Default entry point of the primary core (after the 16 reserved header bytes)
pub const DEFAULT_CODE_START: usize = 16;

/// Configuração da VM
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Number of virtual cores (0 = host CPUs)
    pub max_cores: usize,
    /// Operand stack window per core, in bytes
    pub stack_size: usize,
    /// Capacity of each core's return-address stack
    pub return_stack_depth: usize,
    /// Number of module slots
    pub max_modules: usize,
    /// Function slots per module
    pub max_module_functions: usize,
    /// Division by zero is fatal
    pub division_check: bool,
    /// Sleep between join polls
    pub join_poll: Duration,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_cores: 4,
            stack_size: DEFAULT_STACK_SIZE,
            return_stack_depth: DEFAULT_RETURN_STACK_DEPTH,
            max_modules: 32,
            max_module_functions: 256,
            division_check: cfg!(feature = "division-check"),
            join_poll: Duration::from_micros(200),
        }
    }
}

impl VmConfig {
    /// Default configuration overlaid with `REGVM_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse("REGVM_MAX_CORES") {
            config.max_cores = n;
        }
        if let Some(n) = env_parse("REGVM_STACK_SIZE") {
            config.stack_size = n;
        }
        if let Some(n) = env_parse("REGVM_RETURN_STACK_DEPTH") {
            config.return_stack_depth = n;
        }
        if let Some(n) = env_parse("REGVM_MAX_MODULES") {
            config.max_modules = n;
        }
        if let Some(flag) = env_flag("REGVM_DIVISION_CHECK") {
            config.division_check = flag;
        }
        config
    }

    /// Define o número de cores
    pub fn with_max_cores(mut self, cores: usize) -> Self {
        self.max_cores = cores;
        self
    }

    /// Define o tamanho da janela de stack
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn with_return_stack_depth(mut self, depth: usize) -> Self {
        self.return_stack_depth = depth;
        self
    }

    pub fn with_division_check(mut self, enabled: bool) -> Self {
        self.division_check = enabled;
        self
    }

    /// Resolves `max_cores = 0` against the host and rejects unusable sizes
    pub fn validated(mut self) -> VmResult<Self> {
        if self.max_cores == 0 {
            self.max_cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            tracing::info!("CPU cores: {} (autoconfig)", self.max_cores);
        }
        if self.stack_size == 0 {
            return Err(VmError::InvalidConfig("stack_size must be > 0".into()));
        }
        if self.return_stack_depth == 0 {
            return Err(VmError::InvalidConfig("return_stack_depth must be > 0".into()));
        }
        if self.max_modules == 0 || self.max_module_functions == 0 {
            return Err(VmError::InvalidConfig("module table capacities must be > 0".into()));
        }
        self.max_cores
            .checked_mul(self.stack_size)
            .ok_or_else(|| VmError::InvalidConfig("max_cores * stack_size overflows".into()))?;
        Ok(self)
    }
}
