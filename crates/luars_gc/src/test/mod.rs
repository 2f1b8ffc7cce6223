pub mod test_basic;
pub mod test_emergency;
pub mod test_mark_sweep;
pub mod test_upvalues;

use crate::gc::GcOption;
use crate::lua_vm::LuaVM;

/// Fresh runtime with default options, logging to the test writer when
/// RUST_LOG is set.
pub(crate) fn new_vm() -> LuaVM {
    new_vm_with(GcOption::default())
}

pub(crate) fn new_vm_with(option: GcOption) -> LuaVM {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    LuaVM::new(option).unwrap()
}

/// Drive the collector with basic steps until a cycle ends, verifying the
/// heap between steps.
pub(crate) fn run_cycle_checked(vm: &mut LuaVM) {
    loop {
        let done = vm.collect_step(0).unwrap();
        vm.check_heap().unwrap();
        if done {
            break;
        }
    }
}
