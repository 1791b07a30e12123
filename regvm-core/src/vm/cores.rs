//! Virtual core manager
//!
//! Fixed table of core descriptors plus the segment lock used by the
//! `intr1` lock/unlock services. The table itself lives behind the machine's
//! shared mutex; every status transition and every status read used for a
//! control decision (spawn scan, join check) happens while holding it.

use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;

use super::error::{VmError, VmResult};
use super::memory::DataSegment;
use super::stack::OperandStack;

/// Estado de um core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreStatus {
    /// Livre (estado inicial)
    Stop,
    /// Executando em uma thread do SO
    Running,
}

/// Descritor de core
#[derive(Debug)]
pub struct CoreDescriptor {
    pub status: CoreStatus,
    /// Execution pointer inicial
    pub start_ep: usize,
    /// Stack do pai no momento do spawn
    pub inherited: Option<OperandStack>,
    /// Stack realocada na janela privada
    pub stack: OperandStack,
    /// Código de retorno do último término
    pub exit_code: i64,
    /// Erro fatal do último término
    pub fault: Option<VmError>,
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

/// Reserved descriptor, handed to the spawning core
#[derive(Debug)]
pub struct Reservation {
    pub index: usize,
    pub generation: u64,
    pub stack: OperandStack,
    /// Handle of the previous occupant, to be joined outside the lock
    pub stale: Option<JoinHandle<()>>,
}

/// Tabela de cores
#[derive(Debug)]
pub struct CoreTable {
    cores: Vec<CoreDescriptor>,
}

impl CoreTable {
    /// Windows for `max_cores` cores above `globals` bytes of globals
    pub fn new(max_cores: usize, globals: usize, stack_size: usize) -> Self {
        let cores = (0..max_cores)
            .map(|i| {
                let bottom = globals + i * stack_size;
                CoreDescriptor {
                    status: CoreStatus::Stop,
                    start_ep: 0,
                    inherited: None,
                    stack: OperandStack::new(bottom, bottom + stack_size),
                    exit_code: 0,
                    fault: None,
                    handle: None,
                    generation: 0,
                }
            })
            .collect();
        Self { cores }
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CoreDescriptor> {
        self.cores.get(index)
    }

    pub fn status(&self, index: usize) -> Option<CoreStatus> {
        self.cores.get(index).map(|c| c.status)
    }

    /// Marks the primary core running with an empty stack at `ep`
    pub fn start_primary(&mut self, ep: usize) -> VmResult<OperandStack> {
        let primary = self
            .cores
            .first_mut()
            .ok_or_else(|| VmError::InvalidConfig("no cores configured".into()))?;
        primary.stack = OperandStack::new(primary.stack.bottom(), primary.stack.top());
        primary.status = CoreStatus::Running;
        primary.start_ep = ep;
        primary.inherited = None;
        primary.fault = None;
        primary.exit_code = 0;
        primary.generation += 1;
        Ok(primary.stack)
    }

    /// Reserves the lowest stopped secondary core for a spawn at `ep`
    ///
    /// The parent's live stack bytes `[sp, top)` are copied to the end of
    /// the child's window, so the child pops exactly what the parent pushed.
    pub fn reserve(
        &mut self,
        parent: &OperandStack,
        data: &DataSegment,
        ep: usize,
    ) -> VmResult<Reservation> {
        let index = self
            .cores
            .iter()
            .skip(1)
            .position(|c| c.status == CoreStatus::Stop)
            .map(|i| i + 1)
            .ok_or(VmError::NoFreeCore(self.cores.len()))?;

        let core = &mut self.cores[index];
        let depth = parent.depth();
        let (bottom, top) = (core.stack.bottom(), core.stack.top());
        if depth > top - bottom {
            return Err(VmError::StackOverflow {
                sp: top.saturating_sub(depth),
                bottom,
            });
        }
        data.copy_within(parent.sp(), top - depth, depth)?;
        let stack = OperandStack::with_sp(bottom, top, top - depth)?;

        core.status = CoreStatus::Running;
        core.start_ep = ep;
        core.inherited = Some(*parent);
        core.stack = stack;
        core.fault = None;
        core.exit_code = 0;
        core.generation += 1;

        Ok(Reservation {
            index,
            generation: core.generation,
            stack,
            stale: core.handle.take(),
        })
    }

    /// Stores the OS thread handle for a reservation
    ///
    /// Returns the handle back if the descriptor was reused in between.
    pub fn attach(
        &mut self,
        index: usize,
        generation: u64,
        handle: JoinHandle<()>,
    ) -> Option<JoinHandle<()>> {
        match self.cores.get_mut(index) {
            Some(core) if core.generation == generation => {
                core.handle = Some(handle);
                None
            }
            _ => Some(handle),
        }
    }

    /// Undoes a reservation whose thread could not be created
    pub fn revert(&mut self, index: usize, generation: u64) {
        if let Some(core) = self.cores.get_mut(index) {
            if core.generation == generation {
                core.status = CoreStatus::Stop;
            }
        }
    }

    /// Records the end of a core
    pub fn finish(&mut self, index: usize, exit_code: i64, fault: Option<VmError>) {
        if let Some(core) = self.cores.get_mut(index) {
            core.status = CoreStatus::Stop;
            core.exit_code = exit_code;
            core.fault = fault;
        }
    }

    /// Takes the fault recorded for `index`
    pub fn take_fault(&mut self, index: usize) -> Option<VmError> {
        self.cores.get_mut(index).and_then(|c| c.fault.take())
    }

    /// Some core outside `except` is running
    pub fn any_running_except(&self, except: &[usize]) -> bool {
        self.cores
            .iter()
            .enumerate()
            .any(|(i, c)| c.status == CoreStatus::Running && !except.contains(&i))
    }

    /// Number of running cores
    pub fn running(&self) -> usize {
        self.cores
            .iter()
            .filter(|c| c.status == CoreStatus::Running)
            .count()
    }

    /// Handles of stopped cores, for joining outside the lock
    pub fn take_finished_handles(&mut self) -> Vec<JoinHandle<()>> {
        self.cores
            .iter_mut()
            .filter(|c| c.status == CoreStatus::Stop)
            .filter_map(|c| c.handle.take())
            .collect()
    }
}

/// Lock do segmento compartilhado (`intr1` 2/3)
///
/// Held across instructions, so it is a flag plus condvar rather than a
/// guard. The owner is a core index; a core that ends while holding it
/// releases it.
#[derive(Debug, Default)]
pub struct SegmentLock {
    owner: Mutex<Option<usize>>,
    released: Condvar,
}

impl SegmentLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `core` owns the lock
    pub fn lock(&self, core: usize) {
        let mut owner = self.owner.lock().unwrap_or_else(|e| e.into_inner());
        if *owner == Some(core) {
            tracing::warn!("core {} locked the segment lock it already holds", core);
            return;
        }
        while owner.is_some() {
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(|e| e.into_inner());
        }
        *owner = Some(core);
    }

    /// Releases the lock if `core` owns it
    pub fn unlock(&self, core: usize) {
        let mut owner = self.owner.lock().unwrap_or_else(|e| e.into_inner());
        if *owner == Some(core) {
            *owner = None;
            self.released.notify_one();
        } else {
            tracing::warn!("core {} unlocked a segment lock held by {:?}", core, *owner);
        }
    }

    /// Releases the lock on behalf of a terminating core
    pub fn release_if_held(&self, core: usize) {
        let mut owner = self.owner.lock().unwrap_or_else(|e| e.into_inner());
        if *owner == Some(core) {
            tracing::warn!("core {} ended while holding the segment lock", core);
            *owner = None;
            self.released.notify_one();
        }
    }

    /// Current owner
    pub fn owner(&self) -> Option<usize> {
        *self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
