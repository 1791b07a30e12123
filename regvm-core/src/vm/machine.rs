//! Machine: one program image, its data segment and its cores

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use super::config::VmConfig;
use super::console::{Console, StdConsole};
use super::cores::{CoreStatus, CoreTable, SegmentLock};
use super::error::{VmError, VmResult};
use super::image::ProgramImage;
use super::interpreter::{Core, run_core};
use super::jumptable::JumpTable;
use super::memory::DataSegment;
use super::modules::{BuiltinModule, ModuleTable};

/// Tables guarded by the machine mutex
pub struct Tables {
    pub cores: CoreTable,
    pub modules: ModuleTable,
}

/// State shared by every core of a run
pub(crate) struct Shared {
    pub config: VmConfig,
    pub code: Arc<[u8]>,
    pub data: Arc<DataSegment>,
    pub tables: Arc<Mutex<Tables>>,
    pub segment_lock: SegmentLock,
    pub console: Arc<dyn Console>,
    pub args: Arc<[String]>,
}

impl Shared {
    #[inline]
    pub fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of [`Machine::run`]
#[derive(Debug)]
pub struct RunReport {
    /// Process return code: the primary core's exit value, 1 on a fatal error
    pub return_code: i64,
    /// Fatal error that ended the primary core
    pub error: Option<VmError>,
}

impl RunReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Register VM instance
pub struct Machine {
    config: VmConfig,
    entry: usize,
    code: Arc<[u8]>,
    jumps: Arc<JumpTable>,
    data: Arc<DataSegment>,
    tables: Arc<Mutex<Tables>>,
    console: Arc<dyn Console>,
    args: Arc<[String]>,
}

impl Machine {
    /// Builds the data segment and compiles the jump table
    ///
    /// A corrupt instruction stream fails here, before any core runs.
    pub fn new(image: ProgramImage, config: VmConfig) -> VmResult<Self> {
        let config = config.validated()?;
        let entry = image.entry();
        if entry >= image.code.len() {
            return Err(VmError::EpOutOfRange(entry as i64));
        }

        let stack_bytes = config.max_cores * config.stack_size;
        let data = DataSegment::new(&image.globals, stack_bytes);
        let jumps = JumpTable::compile(&image.code, entry)?;

        let tables = Tables {
            cores: CoreTable::new(config.max_cores, image.globals.len(), config.stack_size),
            modules: ModuleTable::new(config.max_modules, config.max_module_functions),
        };

        tracing::info!(
            "codesize: {}, datasize: {}, cores: {}, ep: {}",
            image.code.len(),
            data.len(),
            config.max_cores,
            entry
        );

        Ok(Self {
            entry,
            code: image.code.into(),
            jumps: Arc::new(jumps),
            data: Arc::new(data),
            tables: Arc::new(Mutex::new(tables)),
            console: Arc::new(StdConsole),
            args: Arc::from(Vec::new()),
            config,
        })
    }

    /// Replaces the console used by print/input services
    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Shell arguments visible to `intr0` 12/13
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes an in-process module loadable by name
    pub fn register_builtin(&mut self, module: BuiltinModule) {
        self.tables().modules.register_builtin(module);
    }

    /// Loads a module into the lowest free slot before the run
    pub fn preload_module(&mut self, name: &str) -> VmResult<usize> {
        let mut tables = self.tables();
        let slot = tables
            .modules
            .first_free()
            .ok_or(VmError::ModuleSlotOutOfRange(tables.modules.capacity() as i64))?;
        tables.modules.load(slot as i64, name)?;
        Ok(slot)
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Data segment, for inspection after a run
    pub fn data(&self) -> &DataSegment {
        &self.data
    }

    pub fn jump_table(&self) -> &JumpTable {
        &self.jumps
    }

    /// Status of core `index`
    pub fn core_status(&self, index: usize) -> Option<CoreStatus> {
        self.tables().cores.status(index)
    }

    /// Runs the primary core to completion
    ///
    /// Secondary cores that already stopped are joined. Cores still running
    /// when the primary ends are left detached.
    pub fn run(&mut self) -> RunReport {
        let shared = Arc::new(Shared {
            config: self.config.clone(),
            code: Arc::clone(&self.code),
            data: Arc::clone(&self.data),
            tables: Arc::clone(&self.tables),
            segment_lock: SegmentLock::new(),
            console: Arc::clone(&self.console),
            args: Arc::clone(&self.args),
        });

        let stack = match self.tables().cores.start_primary(self.entry) {
            Ok(stack) => stack,
            Err(e) => {
                return RunReport {
                    return_code: 1,
                    error: Some(e),
                };
            }
        };

        let primary = Core::new(0, self.entry, stack, Arc::clone(&self.jumps), shared);
        let spawned = thread::Builder::new()
            .name("regvm-cpu-0".into())
            .spawn(move || run_core(primary));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.tables().cores.finish(0, 1, None);
                return RunReport {
                    return_code: 1,
                    error: Some(VmError::ThreadSpawn(e.to_string())),
                };
            }
        };
        if handle.join().is_err() {
            tracing::error!("CPU 0 panicked");
            self.tables().cores.finish(0, 1, None);
        }

        let (return_code, error, finished, still_running) = {
            let mut tables = self.tables();
            let return_code = tables.cores.get(0).map_or(1, |c| c.exit_code);
            let error = tables.cores.take_fault(0);
            let finished = tables.cores.take_finished_handles();
            (return_code, error, finished, tables.cores.running())
        };
        for handle in finished {
            let _ = handle.join();
        }
        if still_running > 0 {
            tracing::warn!("{} CPU cores still running after CPU 0 exit", still_running);
        }

        RunReport { return_code, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::builder::CodeBuilder;

    #[test]
    fn test_bad_stream_fails_before_run() {
        let mut b = CodeBuilder::new();
        b.loadl(1, 0).raw(&[0xFE]);
        let err = Machine::new(b.build().unwrap(), VmConfig::default()).err();
        assert!(matches!(err, Some(VmError::UnknownStride { addr: 26, opcode: 0xFE })));
    }

    #[test]
    fn test_segment_layout() {
        let mut b = CodeBuilder::new();
        b.global_zeroed(100);
        b.rts();
        let config = VmConfig::default().with_max_cores(3).with_stack_size(256);
        let machine = Machine::new(b.build().unwrap(), config).unwrap();
        assert_eq!(machine.data().len(), 100 + 3 * 256);
        assert_eq!(machine.core_status(0), Some(CoreStatus::Stop));
        assert_eq!(machine.core_status(3), None);
    }

    #[test]
    fn test_fatal_error_return_code() {
        let mut b = CodeBuilder::new();
        b.rts();
        let mut machine = Machine::new(b.build().unwrap(), VmConfig::default()).unwrap();
        let report = machine.run();
        assert_eq!(report.return_code, 1);
        assert!(matches!(report.error, Some(VmError::ReturnStackEmpty)));
        assert_eq!(machine.core_status(0), Some(CoreStatus::Stop));
    }
}
