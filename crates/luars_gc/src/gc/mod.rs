// Incremental garbage collector, modelled on Lua 5.3's lgc.c
//
// Tri-color mark & sweep interleaved with the mutator:
// - White objects are not (yet) known to be reachable. Two shades exist so
//   that the meaning of "white" can flip at the end of a cycle.
// - Gray objects are reachable but their references have not been traversed.
// - Black objects are reachable and fully traversed.
//
// Invariant: while the collector is marking (state <= Atomic) no black
// object points to a white one. Write barriers restore it on every store.
//
// States:
// - Pause: between cycles
// - Propagate: incremental marking, one gray object per unit of work
// - Atomic: one-shot remark, weak tables, finalizer separation, white flip
// - SwpAllGc / SwpFinObj / SwpToBeFnz: incremental sweep of each list
// - SwpEnd: sweep finished
// - CallFin: calling pending finalizers
//
// Debt: allocation adds to `gc_debt`; positive debt means a step is due.
// `total_bytes + gc_debt` is always the number of bytes in use.

mod atomic;
mod barrier;
mod check;
mod finalizer;
mod gc_header;
mod gc_id;
mod gc_kind;
mod gc_object;
mod gc_option;
mod gc_pool;
mod mark;
mod object_allocator;
mod string_interner;
mod sweep;

pub use check::HeapCheckError;
pub use gc_header::*;
pub use gc_id::GcId;
pub use gc_kind::GcObjectKind;
pub use gc_object::*;
pub use gc_option::GcOption;
pub use gc_pool::{GcList, GcPool, ListIter};
pub use object_allocator::{AllocError, Allocator, BudgetAllocator};
pub use string_interner::StringInterner;
pub use sweep::SweepCursor;

use crate::lua_value::{LUA_NUMTAGS, STRING_HEADER_SIZE};

/// Work units are converted to bytes through this factor (STEPMULADJ)
pub const STEPMULADJ: isize = 200;
/// Divisor applied to the live estimate when computing the pause threshold
pub const PAUSEADJ: isize = 100;
/// About a hundred small strings worth of bytes
pub const GCSTEPSIZE: isize = 100 * STRING_HEADER_SIZE as isize;
/// Cost of sweeping one object, in work units
pub const GCSWEEPCOST: isize = ((STRING_HEADER_SIZE + 4) / 4) as isize;
/// Cost of calling one finalizer, in work units
pub const GCFINALIZECOST: isize = GCSWEEPCOST;

// LUAI_GCPAUSE / LUAI_GCMUL
pub const DEFAULT_PAUSE: i32 = 200;
pub const DEFAULT_STEPMUL: i32 = 200;

const MAX_LMEM: isize = isize::MAX;

/// GC state machine (lgc.h)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GcState {
    Propagate = 0,
    Atomic = 1,
    SwpAllGc = 2,
    SwpFinObj = 3,
    SwpToBeFnz = 4,
    SwpEnd = 5,
    CallFin = 6,
    Pause = 7,
}

impl GcState {
    pub fn is_sweep_phase(self) -> bool {
        matches!(
            self,
            GcState::SwpAllGc | GcState::SwpFinObj | GcState::SwpToBeFnz | GcState::SwpEnd
        )
    }

    /// Must the tri-color invariant hold in this state?
    pub fn keep_invariant(self) -> bool {
        self <= GcState::Atomic
    }
}

/// Kind of the cycle in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    Normal,
    /// Triggered by an allocation failure: no finalizers, no stack shrinking
    Emergency,
}

/// Outcome of one `single_step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Work performed, in work units
    Work(isize),
    /// The collector is in CallFin with pending finalizers. Running them
    /// needs the runtime, so the caller does it and charges the work.
    CallFinalizers,
}

/// Objects the runtime keeps alive unconditionally
#[derive(Debug, Clone, Default)]
pub struct GcRoots {
    pub registry: Option<GcId>,
    pub main_thread: Option<GcId>,
    /// Metatables for basic types, indexed by `LuaValueKind`
    pub type_metatables: [Option<GcId>; LUA_NUMTAGS],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GcStats {
    pub collection_count: usize,
    pub emergency_collections: usize,
    pub bytes_allocated: usize,
    pub bytes_freed: usize,
    pub objects_allocated: usize,
    pub objects_freed: usize,
    /// Objects examined by the sweep, freed or not
    pub objects_swept: usize,
    pub finalizers_called: usize,
}

/// Global collector state
pub struct GC {
    pub(crate) pool: GcPool,
    pub(crate) strings: StringInterner,
    pub(crate) roots: GcRoots,
    pub(crate) allocator: Box<dyn Allocator>,
    pub(crate) option: GcOption,

    // === Debt and memory tracking ===
    /// Bytes allocated but not yet compensated by collector work
    pub(crate) gc_debt: isize,
    /// Bytes in use minus `gc_debt`
    pub(crate) total_bytes: isize,
    /// Live bytes estimate, taken after the atomic phase
    pub(crate) gc_estimate: isize,
    /// Memory traversed in the current step
    pub(crate) gc_memtrav: isize,

    // === GC state ===
    pub(crate) gc_state: GcState,
    pub(crate) gc_kind: GcKind,
    pub(crate) current_white: WhiteShade,
    /// Cleared by the user or while a finalizer runs
    pub(crate) gc_running: bool,
    /// Finalizers to call in the next batch
    pub(crate) gc_finnum: usize,
    /// Set by shutdown: no new finalizers, no more cycles
    pub(crate) closing: bool,

    // === Gray lists ===
    pub(crate) gray: Vec<GcId>,
    /// Objects to be traversed again in the atomic phase
    pub(crate) grayagain: Vec<GcId>,
    /// Tables with weak values
    pub(crate) weak: Vec<GcId>,
    /// Ephemeron tables with white->white entries
    pub(crate) ephemeron: Vec<GcId>,
    /// Tables with weak keys that may need clearing
    pub(crate) allweak: Vec<GcId>,
    /// Threads with open upvalues
    pub(crate) twups: Vec<GcId>,

    /// Position of the incremental sweep, `None` once the list is exhausted
    pub(crate) sweep_cursor: Option<SweepCursor>,

    // tag method names, fixed at startup
    pub(crate) tm_gc: Option<GcId>,
    pub(crate) tm_mode: Option<GcId>,

    pub(crate) stats: GcStats,
}

impl GC {
    pub fn new(option: GcOption, allocator: Box<dyn Allocator>) -> Self {
        GC {
            pool: GcPool::new(),
            strings: StringInterner::new(),
            roots: GcRoots::default(),
            allocator,
            option,
            gc_debt: 0,
            total_bytes: 0,
            gc_estimate: 0,
            gc_memtrav: 0,
            gc_state: GcState::Pause,
            gc_kind: GcKind::Normal,
            current_white: WhiteShade::A,
            gc_running: true,
            gc_finnum: 0,
            closing: false,
            gray: Vec::with_capacity(128),
            grayagain: Vec::with_capacity(64),
            weak: Vec::new(),
            ephemeron: Vec::new(),
            allweak: Vec::new(),
            twups: Vec::new(),
            sweep_cursor: None,
            tm_gc: None,
            tm_mode: None,
            stats: GcStats::default(),
        }
    }

    // ============ Accessors ============

    #[inline]
    pub fn gc_state(&self) -> GcState {
        self.gc_state
    }

    #[inline]
    pub fn gc_kind(&self) -> GcKind {
        self.gc_kind
    }

    #[inline]
    pub fn current_white(&self) -> WhiteShade {
        self.current_white
    }

    #[inline]
    pub fn keep_invariant(&self) -> bool {
        self.gc_state.keep_invariant()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.gc_running
    }

    #[inline]
    pub fn debt(&self) -> isize {
        self.gc_debt
    }

    /// gettotalbytes: bytes currently in use
    #[inline]
    pub fn total_bytes(&self) -> isize {
        self.total_bytes + self.gc_debt
    }

    #[inline]
    pub fn estimate(&self) -> isize {
        self.gc_estimate
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn option(&self) -> &GcOption {
        &self.option
    }

    pub fn pool(&self) -> &GcPool {
        &self.pool
    }

    pub fn strings(&self) -> &StringInterner {
        &self.strings
    }

    pub fn roots(&self) -> &GcRoots {
        &self.roots
    }

    #[inline]
    pub fn get(&self, id: GcId) -> Option<&GcObject> {
        self.pool.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: GcId) -> Option<&mut GcObject> {
        self.pool.get_mut(id)
    }

    #[inline]
    pub(crate) fn header(&self, id: GcId) -> Option<&GcHeader> {
        self.pool.get(id).map(|o| &o.header)
    }

    #[inline]
    pub(crate) fn is_white(&self, id: GcId) -> bool {
        self.header(id).is_some_and(|h| h.is_white())
    }

    #[inline]
    pub(crate) fn is_black(&self, id: GcId) -> bool {
        self.header(id).is_some_and(|h| h.is_black())
    }

    /// An object is alive when it is still allocated and not waiting to be
    /// swept as garbage.
    pub fn is_alive(&self, id: GcId) -> bool {
        self.header(id)
            .is_some_and(|h| !h.is_dead(self.current_white))
    }

    // ============ Debt Accounting ============

    /// luaE_setdebt: change the debt keeping the bytes in use constant
    pub fn set_debt(&mut self, mut debt: isize) {
        let tb = self.total_bytes();
        if debt < tb - MAX_LMEM {
            debt = tb - MAX_LMEM;
        }
        self.total_bytes = tb - debt;
        self.gc_debt = debt;
    }

    /// getdebt: convert the byte debt into work units
    pub(crate) fn get_debt(&self) -> isize {
        let debt = self.gc_debt;
        let stepmul = self.option.step_mul.max(1) as isize;
        if debt <= 0 {
            0
        } else {
            let debt = debt / STEPMULADJ + 1;
            if debt < MAX_LMEM / stepmul {
                debt * stepmul
            } else {
                MAX_LMEM
            }
        }
    }

    /// setpause: let the heap grow to `pause`% of the live estimate before
    /// the next cycle starts.
    pub fn set_pause(&mut self) {
        let estimate = (self.gc_estimate / PAUSEADJ).max(1);
        let pause = self.option.pause.max(0) as isize;
        let threshold = if pause < MAX_LMEM / estimate {
            estimate * pause
        } else {
            MAX_LMEM
        };
        let debt = self.total_bytes() - threshold;
        tracing::debug!(estimate = self.gc_estimate, threshold, debt, "gc pause");
        self.set_debt(debt);
    }

    // ============ State Machine ============

    /// singlestep: perform one bounded unit of collector work
    pub fn single_step(&mut self) -> StepResult {
        match self.gc_state {
            GcState::Pause => {
                self.gc_memtrav = self.strings.bucket_bytes() as isize;
                self.restart_collection();
                self.gc_state = GcState::Propagate;
                StepResult::Work(self.gc_memtrav)
            }
            GcState::Propagate => {
                self.gc_memtrav = 0;
                self.propagate_mark();
                if self.gray.is_empty() {
                    self.gc_state = GcState::Atomic;
                }
                StepResult::Work(self.gc_memtrav)
            }
            GcState::Atomic => {
                self.propagate_all();
                let work = self.atomic();
                self.enter_sweep();
                self.gc_estimate = self.total_bytes();
                StepResult::Work(work)
            }
            GcState::SwpAllGc => {
                StepResult::Work(self.sweep_step(GcState::SwpFinObj, Some(GcList::FinObj)))
            }
            GcState::SwpFinObj => {
                StepResult::Work(self.sweep_step(GcState::SwpToBeFnz, Some(GcList::ToBeFnz)))
            }
            GcState::SwpToBeFnz => StepResult::Work(self.sweep_step(GcState::SwpEnd, None)),
            GcState::SwpEnd => {
                self.pool.shrink_to_fit();
                self.gc_state = GcState::CallFin;
                StepResult::Work(0)
            }
            GcState::CallFin => {
                if self.pool.head(GcList::ToBeFnz).is_some() && self.gc_kind != GcKind::Emergency
                {
                    StepResult::CallFinalizers
                } else {
                    self.gc_state = GcState::Pause;
                    self.stats.collection_count += 1;
                    tracing::debug!(
                        cycle = self.stats.collection_count,
                        total_bytes = self.total_bytes(),
                        "gc cycle finished"
                    );
                    StepResult::Work(0)
                }
            }
        }
    }

    /// restartcollection: clear the work-lists and mark the root set
    fn restart_collection(&mut self) {
        self.gray.clear();
        self.grayagain.clear();
        self.weak.clear();
        self.ephemeron.clear();
        self.allweak.clear();
        tracing::debug!(
            cycle = self.stats.collection_count + 1,
            total_bytes = self.total_bytes(),
            "gc cycle start"
        );
        self.mark_roots();
        self.mark_being_finalized();
    }
}
