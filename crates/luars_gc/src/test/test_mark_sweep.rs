// Mark & sweep over whole cycles: survivors, garbage and sweep coverage

#[cfg(test)]
mod tests {
    use crate::gc::{GcColor, GcId, GcList, GcState};
    use crate::lua_value::{LuaProto, LuaValue};
    use crate::lua_vm::{LuaError, LuaVM};
    use crate::test::{new_vm, run_cycle_checked};

    #[test]
    fn test_chain_survives_then_collected() {
        let mut vm = new_vm();
        let a = vm.create_table(0).unwrap();
        vm.push(a).unwrap();
        let b = vm.create_table(0).unwrap();
        vm.table_set(a, LuaValue::integer(1), b).unwrap();
        let c = vm.create_table(0).unwrap();
        vm.table_set(b, LuaValue::integer(1), c).unwrap();

        run_cycle_checked(&mut vm);
        assert!(vm.is_alive(a));
        assert!(vm.is_alive(b));
        assert!(vm.is_alive(c));

        vm.table_set(a, LuaValue::integer(1), LuaValue::Nil).unwrap();
        run_cycle_checked(&mut vm);
        assert!(vm.is_alive(a));
        assert!(!vm.is_alive(b));
        assert!(!vm.is_alive(c));
    }

    #[test]
    fn test_unlink_during_propagation() {
        let mut vm = new_vm();
        let a = vm.create_table(0).unwrap();
        vm.push(a).unwrap();
        let b = vm.create_table(0).unwrap();
        vm.table_set(a, LuaValue::integer(1), b).unwrap();
        let c = vm.create_table(0).unwrap();
        vm.table_set(b, LuaValue::integer(1), c).unwrap();

        // start the cycle, then cut the chain while marking is under way
        vm.gc.single_step();
        assert_eq!(vm.gc_state(), GcState::Propagate);
        vm.table_set(a, LuaValue::integer(1), LuaValue::Nil).unwrap();
        vm.check_heap().unwrap();
        vm.run_until_state(GcState::Pause).unwrap();
        vm.check_heap().unwrap();

        // b may have been marked before the store; it cannot survive the
        // next cycle
        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(a));
        assert!(!vm.is_alive(b));
        assert!(!vm.is_alive(c));
    }

    #[test]
    fn test_sweep_visits_every_object_once() {
        let mut vm = new_vm();
        let holder = vm.create_table(0).unwrap();
        vm.push(holder).unwrap();
        for i in 0..300 {
            let t = vm.create_table(0).unwrap();
            if i % 2 == 0 {
                vm.table_set(holder, LuaValue::integer(i), t).unwrap();
            }
        }

        vm.run_until_state(GcState::Atomic).unwrap();
        let pool = vm.gc().pool();
        let listed = pool.len(GcList::AllGc) + pool.len(GcList::FinObj) + pool.len(GcList::ToBeFnz);
        let swept_before = vm.gc_stats().objects_swept;
        let freed_before = vm.gc_stats().objects_freed;

        vm.run_until_state(GcState::SwpEnd).unwrap();
        assert_eq!(vm.gc_stats().objects_swept - swept_before, listed);
        assert_eq!(vm.gc_stats().objects_freed - freed_before, 150);

        let current = vm.gc().current_white();
        for list in [GcList::AllGc, GcList::FinObj, GcList::ToBeFnz] {
            for id in vm.gc().pool().iter(list) {
                let color = vm.gc().get(id).map(|o| o.header.color());
                assert_eq!(color, Some(GcColor::White(current)));
            }
        }
        vm.run_until_state(GcState::Pause).unwrap();
        vm.check_heap().unwrap();
    }

    #[test]
    fn test_objects_created_during_sweep_survive() {
        let mut vm = new_vm();
        let holder = vm.create_table(0).unwrap();
        vm.push(holder).unwrap();
        for i in 0..200 {
            let t = vm.create_table(0).unwrap();
            vm.table_set(holder, LuaValue::integer(i), t).unwrap();
        }
        vm.run_until_state(GcState::SwpAllGc).unwrap();

        let fresh = vm.create_table(0).unwrap();
        vm.table_set(holder, LuaValue::integer(1000), fresh).unwrap();
        let unrooted = vm.create_table(0).unwrap();
        vm.check_heap().unwrap();

        vm.run_until_state(GcState::Pause).unwrap();
        assert!(vm.is_alive(fresh));
        // born with the new white, it only goes away in the next cycle
        assert!(vm.is_alive(unrooted));
        vm.check_heap().unwrap();

        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(fresh));
        assert!(!vm.is_alive(unrooted));
    }

    #[test]
    fn test_incremental_allocation_loop() {
        let mut vm = new_vm();
        let keep = vm.create_table(0).unwrap();
        let registry = vm.registry();
        vm.table_set(registry, LuaValue::integer(1), keep).unwrap();

        let mut kept = Vec::new();
        for i in 0..2000 {
            let t = vm.create_table(0).unwrap();
            if i % 3 == 0 {
                vm.table_set(keep, LuaValue::integer(i), t).unwrap();
                kept.push(t);
            }
            vm.check_gc().unwrap();
            vm.check_heap().unwrap();
        }
        assert!(vm.gc_stats().collection_count >= 1);

        vm.full_gc(false).unwrap();
        assert_eq!(vm.table_len(keep).unwrap(), kept.len());
        assert!(kept.iter().all(|&t| vm.is_alive(t)));
        // keep, its entries, registry, main thread and the two fixed names
        assert_eq!(vm.gc().pool().total_len(), kept.len() + 5);
    }

    #[test]
    fn test_stale_handle_stays_dead_after_slot_reuse() {
        let mut vm = new_vm();
        let old = vm.create_table(0).unwrap();
        vm.full_gc(false).unwrap();
        assert!(!vm.is_alive(old));

        let fresh = vm.create_table(0).unwrap();
        vm.push(fresh).unwrap();
        let (old_id, fresh_id) = (old.as_gc_id().unwrap(), fresh.as_gc_id().unwrap());
        assert_eq!(old_id.index(), fresh_id.index());
        assert_ne!(old_id, fresh_id);

        assert!(!vm.is_alive(old));
        assert_eq!(
            vm.table_set(old, LuaValue::integer(1), LuaValue::integer(42)),
            Err(LuaError::DeadObject)
        );
        assert_eq!(vm.table_get(fresh, LuaValue::integer(1)).unwrap(), LuaValue::Nil);
    }

    #[test]
    fn test_sweep_end_keeps_freed_slots() {
        let mut vm = new_vm();
        let garbage: Vec<LuaValue> = (0..2000).map(|_| vm.create_table(0).unwrap()).collect();
        vm.run_until_state(GcState::SwpEnd).unwrap();
        vm.gc.single_step();
        assert_eq!(vm.gc_state(), GcState::CallFin);
        assert!(garbage.iter().all(|&t| !vm.is_alive(t)));

        let holder = vm.create_table(0).unwrap();
        vm.push(holder).unwrap();
        for i in 0..2000 {
            let t = vm.create_table(0).unwrap();
            vm.table_set(holder, LuaValue::integer(i), t).unwrap();
        }
        assert!(garbage.iter().all(|&t| !vm.is_alive(t)));
        vm.check_heap().unwrap();
    }

    fn proto_cache(vm: &LuaVM, proto: GcId) -> Option<GcId> {
        vm.gc().get(proto).and_then(|o| o.as_proto()).and_then(|p| p.cache())
    }

    #[test]
    fn test_proto_cache_cleared_when_closure_dies() {
        let mut vm = new_vm();
        let proto = vm.create_proto(LuaProto::new()).unwrap();
        let rooted = vm.create_lua_closure(proto, Vec::new()).unwrap();
        vm.push(rooted).unwrap();
        let cached = vm.create_lua_closure(proto, Vec::new()).unwrap();
        assert_eq!(proto_cache(&vm, proto), cached.as_gc_id());

        run_cycle_checked(&mut vm);
        assert!(vm.gc().is_alive(proto));
        assert_eq!(proto_cache(&vm, proto), None);
        assert!(!vm.is_alive(cached));
        assert!(vm.is_alive(rooted));
    }

    #[test]
    fn test_black_proto_cache_not_written() {
        let mut vm = new_vm();
        let proto = vm.create_proto(LuaProto::new()).unwrap();
        let rooted = vm.create_lua_closure(proto, Vec::new()).unwrap();
        vm.push(rooted).unwrap();

        let mut steps = 0;
        while !vm.gc().is_black(proto) {
            vm.gc.single_step();
            steps += 1;
            assert!(steps < 100);
        }
        assert!(vm.gc().keep_invariant());

        let late = vm.create_lua_closure(proto, Vec::new()).unwrap();
        assert_eq!(proto_cache(&vm, proto), rooted.as_gc_id());
        vm.check_heap().unwrap();

        vm.run_until_state(GcState::Pause).unwrap();
        assert!(!vm.is_alive(late));
        assert_eq!(proto_cache(&vm, proto), rooted.as_gc_id());
    }
}
