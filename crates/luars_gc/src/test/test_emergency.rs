// Allocation failures and emergency collections

#[cfg(test)]
mod tests {
    use crate::gc::{GcList, GcOption, GcState};
    use crate::lua_value::LuaValue;
    use crate::lua_vm::{LuaError, LuaResult, LuaVM};
    use crate::test::new_vm_with;

    const LIMIT: usize = 64 * 1024;

    fn limited(emergency_gc: bool) -> LuaVM {
        new_vm_with(GcOption {
            max_memory: LIMIT,
            emergency_gc,
            ..GcOption::default()
        })
    }

    #[test]
    fn test_garbage_is_reclaimed_on_failure() {
        let mut vm = limited(true);
        vm.stop_gc();
        for _ in 0..5000 {
            vm.create_table(0).unwrap();
        }
        assert!(vm.gc_stats().emergency_collections > 0);
        assert!(vm.memory_in_use() <= LIMIT);
        assert_eq!(vm.gc_state(), GcState::Pause);
        vm.check_heap().unwrap();
    }

    #[test]
    fn test_live_data_exhausts_memory() {
        let mut vm = limited(true);
        let mut result = Ok(());
        for _ in 0..10_000 {
            result = vm.create_table(0).and_then(|t| vm.push(t));
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(LuaError::OutOfMemory));
        assert_eq!(vm.error_message(), "not enough memory");
        assert!(vm.gc_stats().emergency_collections > 0);
        vm.check_heap().unwrap();

        // dropping the roots makes room again
        vm.set_top(0).unwrap();
        let t = vm.create_table(0).unwrap();
        assert!(vm.is_alive(t));
    }

    #[test]
    fn test_failure_without_emergency_collection() {
        let mut vm = limited(false);
        let mut failed = false;
        for _ in 0..10_000 {
            if vm.create_table(0) == Err(LuaError::OutOfMemory) {
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert_eq!(vm.gc_stats().emergency_collections, 0);

        vm.full_gc(false).unwrap();
        assert!(vm.create_table(0).is_ok());
    }

    #[test]
    fn test_growth_failure_leaves_table_unchanged() {
        let mut vm = limited(false);
        let t = vm.create_table(0).unwrap();
        vm.push(t).unwrap();
        let mut i = 0;
        let err = loop {
            match vm.table_set(t, LuaValue::integer(i), LuaValue::integer(i)) {
                Ok(()) => i += 1,
                Err(e) => break e,
            }
        };
        assert_eq!(err, LuaError::OutOfMemory);
        assert_eq!(vm.table_len(t).unwrap(), i as usize);
        assert_eq!(vm.table_get(t, LuaValue::integer(i)).unwrap(), LuaValue::Nil);
        assert_eq!(vm.memory_in_use(), vm.gc.allocator.in_use());
    }

    #[test]
    fn test_emergency_cycle_defers_finalizers() {
        fn counting_gc(vm: &mut LuaVM, _args: &[LuaValue]) -> LuaResult<()> {
            let registry = vm.registry();
            let key = vm.create_string("count")?;
            let n = vm.table_get(registry, key)?.as_integer().unwrap_or(0);
            vm.table_set(registry, key, LuaValue::integer(n + 1))
        }

        let mut vm = limited(true);
        let mt = vm.create_table(0).unwrap();
        vm.push(mt).unwrap();
        let gc_name = vm.create_string("__gc").unwrap();
        vm.table_set(mt, gc_name, LuaValue::cfunction(counting_gc))
            .unwrap();
        let ud = vm.create_userdata(vec![0; 8]).unwrap();
        vm.set_metatable(ud, Some(mt)).unwrap();

        vm.full_gc(true).unwrap();
        assert_eq!(vm.gc().pool().len(GcList::ToBeFnz), 1);
        assert_eq!(vm.gc_stats().finalizers_called, 0);
        assert!(vm.is_alive(ud));

        vm.full_gc(false).unwrap();
        assert_eq!(vm.gc_stats().finalizers_called, 1);
        assert_eq!(vm.gc().pool().len(GcList::ToBeFnz), 0);
    }

    #[test]
    fn test_stack_growth_respects_budget() {
        let mut vm = limited(false);
        let mut pushed = 0;
        let err = loop {
            match vm.push(LuaValue::integer(pushed)) {
                Ok(()) => pushed += 1,
                Err(e) => break e,
            }
        };
        assert_eq!(err, LuaError::OutOfMemory);
        assert_eq!(vm.stack_top(), pushed as usize);
        assert!(vm.memory_in_use() <= LIMIT);
        assert_eq!(vm.memory_in_use(), vm.gc.allocator.in_use());
        vm.check_heap().unwrap();
    }

    #[test]
    fn test_store_into_table_freed_by_emergency_cycle() {
        let mut vm = limited(true);
        // never rooted, so the emergency cycle run by its growth frees it
        let t = vm.create_table(0).unwrap();
        let mut i = 0;
        let err = loop {
            match vm.table_set(t, LuaValue::integer(i), LuaValue::integer(i)) {
                Ok(()) => i += 1,
                Err(e) => break e,
            }
            assert!(i < 100_000);
        };
        assert_eq!(err, LuaError::DeadObject);
        assert!(!vm.is_alive(t));
        assert_eq!(vm.gc_stats().emergency_collections, 1);
        let stats = vm.gc_stats();
        assert_eq!(stats.bytes_allocated - stats.bytes_freed, vm.memory_in_use());
        assert_eq!(vm.memory_in_use(), vm.gc.allocator.in_use());
        vm.check_heap().unwrap();
    }
}
