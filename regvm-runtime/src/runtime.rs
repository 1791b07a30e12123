//! Main runtime implementation

use crate::error::{RuntimeError, RuntimeResult};
use crate::loader::ProgramLoader;
use regvm_core::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// Configuração do runtime
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Configuração da VM (cores, pilha, divisão)
    pub vm: VmConfig,

    /// Módulos pré-carregados em slots consecutivos a partir de 0
    pub modules: Vec<String>,

    /// Argumentos visíveis ao programa (`intr0` 12/13)
    pub args: Vec<String>,
}

impl RuntimeConfig {
    /// Configuração a partir das variáveis REGVM_*
    pub fn from_env() -> Self {
        Self {
            vm: VmConfig::from_env(),
            ..Default::default()
        }
    }
}

/// Runtime principal para imagens RegVM
pub struct Runtime {
    config: RuntimeConfig,
    image: Option<ProgramImage>,
    builtins: Vec<BuiltinModule>,
    console: Option<Arc<dyn Console>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            image: None,
            builtins: Vec::new(),
            console: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Carrega imagem .rvmc de arquivo
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        tracing::info!("📂 Loading image: {}", path.as_ref().display());
        let image = ProgramLoader::load_image(path)?;
        self.load_image(image);
        Ok(())
    }

    /// Usa uma imagem já construída
    pub fn load_image(&mut self, image: ProgramImage) {
        tracing::debug!(
            "image: code {} bytes, globals {} bytes, entry {}",
            image.code.len(),
            image.globals.len(),
            image.entry()
        );
        self.image = Some(image);
    }

    /// Módulo embutido, resolvido por nome antes da biblioteca dinâmica
    pub fn register_builtin(&mut self, module: BuiltinModule) {
        self.builtins.push(module);
    }

    /// Console dos serviços de I/O (padrão: stdin/stdout)
    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = Some(console);
        self
    }

    /// Executa o programa carregado
    ///
    /// Erros de preparação (configuração, tabela de saltos, módulos `-M`)
    /// retornam `Err`; falhas durante a execução ficam no [`RunReport`].
    pub fn run(&mut self) -> RuntimeResult<RunReport> {
        let image = self.image.clone().ok_or(RuntimeError::NoProgram)?;

        let mut machine =
            Machine::new(image, self.config.vm.clone())?.with_args(self.config.args.iter().cloned());
        if let Some(console) = &self.console {
            machine = machine.with_console(Arc::clone(console));
        }
        for module in &self.builtins {
            machine.register_builtin(module.clone());
        }
        for name in &self.config.modules {
            let slot = machine.preload_module(name)?;
            tracing::info!("module {} preloaded into slot {}", name, slot);
        }

        tracing::info!("🚀 Executing program...");
        let report = machine.run();
        match &report.error {
            Some(e) => tracing::error!("program ended with error: {}", e),
            None => tracing::info!("✅ return code {}", report.return_code),
        }
        Ok(report)
    }

    /// Load + run
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> RuntimeResult<RunReport> {
        self.load_file(path)?;
        self.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn echo_args_program() -> ProgramImage {
        // prints argc, then the first argument
        let mut b = CodeBuilder::new();
        let buffer = b.global_zeroed(32);
        b.intr0(12, 1, 0, 0)
            .intr0(4, 1, 0, 0)
            .intr0(7, 0, 0, 0)
            .loadl(0, 2)
            .loadl(buffer, 3)
            .intr0(13, 2, 3, 0)
            .intr0(6, 3, 0, 0)
            .intr0(255, 1, 0, 0);
        b.build().unwrap()
    }

    #[test]
    fn test_run_file_with_args() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("echo.rvmc");
        echo_args_program().save(&path).unwrap();

        let console = Arc::new(BufferConsole::new());
        let config = RuntimeConfig {
            vm: VmConfig::default().with_max_cores(1),
            args: vec!["hello".into(), "world".into()],
            ..Default::default()
        };
        let mut runtime = Runtime::new(config).with_console(console.clone());
        let report = runtime.run_file(&path).unwrap();

        assert!(report.is_ok(), "{:?}", report.error);
        assert_eq!(report.return_code, 2);
        assert_eq!(console.output(), "2\nhello");
    }

    #[test]
    fn test_run_without_program() {
        let mut runtime = Runtime::new(RuntimeConfig::default());
        assert!(matches!(runtime.run(), Err(RuntimeError::NoProgram)));
    }

    #[test]
    fn test_missing_preload_module_fails_before_run() {
        let config = RuntimeConfig {
            vm: VmConfig::default().with_max_cores(1),
            modules: vec!["/nonexistent/libregvm-missing.so".into()],
            ..Default::default()
        };
        let mut runtime = Runtime::new(config);
        runtime.load_image(echo_args_program());
        assert!(matches!(
            runtime.run(),
            Err(RuntimeError::Vm(VmError::ModuleLoad { .. }))
        ));
    }

    unsafe extern "C" fn negate(
        sp: *mut u8,
        top: *mut u8,
        bottom: *mut u8,
        _data: *mut u8,
    ) -> *mut u8 {
        let mut stack = unsafe { StackView::new(sp, top, bottom) };
        match stack.pop_i64().and_then(|v| stack.push_i64(-v)) {
            Some(()) => stack.sp(),
            None => std::ptr::null_mut(),
        }
    }

    #[test]
    fn test_preloaded_builtin_is_callable() {
        // slot 0 comes from the preload list, the program only binds
        let mut b = CodeBuilder::new();
        let symbol = b.global_cstr("negate");
        b.loadl(0, 1)
            .loadl(0, 2)
            .loadl(symbol, 3)
            .intr0(2, 1, 2, 3)
            .loadl(-9, 4)
            .stack(Opcode::Stpushi, 4)
            .intr0(3, 1, 2, 0)
            .stack(Opcode::Stpopi, 5)
            .intr0(255, 5, 0, 0);

        let config = RuntimeConfig {
            vm: VmConfig::default().with_max_cores(1),
            modules: vec!["neg".into()],
            ..Default::default()
        };
        let mut runtime = Runtime::new(config);
        runtime.register_builtin(BuiltinModule::new("neg").with_function("negate", negate));
        runtime.load_image(b.build().unwrap());

        let report = runtime.run().unwrap();
        assert!(report.is_ok(), "{:?}", report.error);
        assert_eq!(report.return_code, 9);
    }
}
