// Heap consistency checker (lgc.c's checkgc / ltests.c's lua_checkmemory).
// Walks every object and reports the first broken invariant.

use std::collections::HashSet;
use std::fmt;

use crate::gc::{GC, GcId, GcList, GcObjectKind, GcState};
use crate::lua_value::Upvalue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapCheckError {
    /// An object's list tag does not match the list it is linked into
    WrongList { id: GcId, expected: GcList },
    /// A list's length counter disagrees with its links
    ListLength { list: GcList, counted: usize, recorded: usize },
    /// Some live object is not linked into any list
    Unlinked { linked: usize, live: usize },
    /// The finalize bit is set outside `finobj`/`tobefnz` or missing inside
    FinalizeBit { id: GcId },
    /// A black object points to a white one while marking
    BlackToWhite { from: GcId, to: GcId },
    /// A dead object exists outside the sweep phases
    DeadObject { id: GcId },
    /// A gray object is not on any gray list during propagation
    LostGray { id: GcId },
    /// A reachable object refers to a freed one
    Dangling { from: GcId, to: GcId },
}

impl fmt::Display for HeapCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapCheckError::WrongList { id, expected } => {
                write!(f, "object {id} is linked in {expected:?} with another list tag")
            }
            HeapCheckError::ListLength {
                list,
                counted,
                recorded,
            } => write!(f, "{list:?} has {counted} objects but records {recorded}"),
            HeapCheckError::Unlinked { linked, live } => {
                write!(f, "{linked} objects linked but {live} allocated")
            }
            HeapCheckError::FinalizeBit { id } => {
                write!(f, "finalize bit of {id} does not match its list")
            }
            HeapCheckError::BlackToWhite { from, to } => {
                write!(f, "black object {from} points to white object {to}")
            }
            HeapCheckError::DeadObject { id } => write!(f, "dead object {id} outside sweep"),
            HeapCheckError::LostGray { id } => write!(f, "gray object {id} is on no gray list"),
            HeapCheckError::Dangling { from, to } => {
                write!(f, "object {from} refers to freed object {to}")
            }
        }
    }
}

impl std::error::Error for HeapCheckError {}

const LISTS: [GcList; 4] = [GcList::AllGc, GcList::FinObj, GcList::ToBeFnz, GcList::Fixed];

impl GC {
    /// Verify the collector's structural invariants.
    pub fn check_heap(&self) -> Result<(), HeapCheckError> {
        let mut linked = 0;
        for list in LISTS {
            let mut counted = 0;
            for id in self.pool.iter(list) {
                counted += 1;
                let Some(obj) = self.pool.get(id) else {
                    return Err(HeapCheckError::WrongList { id, expected: list });
                };
                if obj.list() != list {
                    return Err(HeapCheckError::WrongList { id, expected: list });
                }
                let in_fin_list = matches!(list, GcList::FinObj | GcList::ToBeFnz);
                if obj.header.to_finalize() != in_fin_list {
                    return Err(HeapCheckError::FinalizeBit { id });
                }
            }
            if counted != self.pool.len(list) {
                return Err(HeapCheckError::ListLength {
                    list,
                    counted,
                    recorded: self.pool.len(list),
                });
            }
            linked += counted;
        }
        let live = self.pool.ids().count();
        if linked != live {
            return Err(HeapCheckError::Unlinked { linked, live });
        }

        let gray_listed: HashSet<GcId> = if self.gc_state == GcState::Propagate {
            self.gray
                .iter()
                .chain(&self.grayagain)
                .chain(&self.weak)
                .chain(&self.ephemeron)
                .chain(&self.allweak)
                .copied()
                .collect()
        } else {
            HashSet::new()
        };
        let marking = self.keep_invariant();
        let no_dead = matches!(self.gc_state, GcState::Pause | GcState::Propagate);
        let current = self.current_white;
        for id in self.pool.ids() {
            let Some(obj) = self.pool.get(id) else {
                continue;
            };
            let dead = obj.header.is_dead(current);
            if dead {
                if no_dead {
                    return Err(HeapCheckError::DeadObject { id });
                }
                // garbage may point anywhere
                continue;
            }
            if self.gc_state == GcState::Propagate && obj.header.is_gray() {
                let exempt = obj.list() == GcList::Fixed
                    || matches!(obj.as_upvalue(), Some(Upvalue::Open { .. }));
                if !exempt && !gray_listed.contains(&id) {
                    return Err(HeapCheckError::LostGray { id });
                }
            }
            let black = obj.header.is_black();
            let mut result = Ok(());
            obj.body.for_each_ref(|to| {
                if result.is_err() {
                    return;
                }
                match self.pool.get(to) {
                    None => result = Err(HeapCheckError::Dangling { from: id, to }),
                    Some(target) => {
                        // weak references may point to white objects
                        if marking
                            && black
                            && target.header.is_white()
                            && !self.is_weak_ref(id, to)
                        {
                            result = Err(HeapCheckError::BlackToWhite { from: id, to });
                        }
                    }
                }
            });
            result?;
        }
        Ok(())
    }

    /// Is the reference `from -> to` allowed to be weak? True for entries of
    /// weak tables. Weak tables are gray during marking, so this only
    /// matters after they turned black in the atomic phase.
    fn is_weak_ref(&self, from: GcId, to: GcId) -> bool {
        let Some(obj) = self.pool.get(from) else {
            return false;
        };
        if obj.kind() != GcObjectKind::Table {
            return false;
        }
        let (weak_keys, weak_values) = self.weak_mode(obj.metatable());
        (weak_keys || weak_values) && obj.metatable() != Some(to)
    }
}
