// Open and closed upvalues, threads with open upvalues

#[cfg(test)]
mod tests {
    use crate::gc::GcId;
    use crate::lua_value::{LuaProto, LuaValue};
    use crate::lua_vm::LuaVM;
    use crate::test::{new_vm, run_cycle_checked};

    fn is_open(vm: &LuaVM, uv: GcId) -> bool {
        vm.gc()
            .get(uv)
            .and_then(|o| o.as_upvalue())
            .is_some_and(|u| u.is_open())
    }

    fn closure_over(vm: &mut LuaVM, upvalues: Vec<GcId>) -> LuaValue {
        let proto = vm.create_proto(LuaProto::new()).unwrap();
        vm.create_lua_closure(proto, upvalues).unwrap()
    }

    fn registry_set(vm: &mut LuaVM, name: &str, value: LuaValue) {
        let registry = vm.registry();
        let key = vm.create_string(name).unwrap();
        vm.table_set(registry, key, value).unwrap();
    }

    #[test]
    fn test_open_upvalue_aliases_stack_slot() {
        let mut vm = new_vm();
        let main = vm.main_thread();
        let t = vm.create_table(0).unwrap();
        vm.push(t).unwrap();
        let uv = vm.find_upvalue(main, 0).unwrap();
        assert_eq!(vm.find_upvalue(main, 0).unwrap(), uv);
        assert!(is_open(&vm, uv));
        assert!(vm.gc.twups.contains(&main.as_gc_id().unwrap()));
        assert_eq!(vm.upvalue_get(uv).unwrap(), t);

        let f = closure_over(&mut vm, vec![uv]);
        registry_set(&mut vm, "f", f);
        run_cycle_checked(&mut vm);
        assert!(vm.is_alive(t));
        assert!(is_open(&vm, uv));

        // writes go to the stack slot
        let other = vm.create_table(0).unwrap();
        vm.upvalue_set(uv, other).unwrap();
        assert_eq!(vm.stack_get(0), Some(other));
        assert_eq!(vm.upvalue_get(uv).unwrap(), other);
        run_cycle_checked(&mut vm);
        assert!(vm.is_alive(other));
        assert!(!vm.is_alive(t));
    }

    #[test]
    fn test_upvalue_level_must_be_live() {
        let mut vm = new_vm();
        let main = vm.main_thread();
        vm.push(LuaValue::integer(1)).unwrap();
        assert!(vm.find_upvalue(main, 1).is_err());
        assert!(vm.find_upvalue(main, 0).is_ok());
    }

    #[test]
    fn test_pop_closes_upvalue() {
        let mut vm = new_vm();
        let main = vm.main_thread();
        let t = vm.create_table(0).unwrap();
        vm.push(t).unwrap();
        let uv = vm.find_upvalue(main, 0).unwrap();
        let f = closure_over(&mut vm, vec![uv]);
        registry_set(&mut vm, "f", f);

        assert_eq!(vm.pop().unwrap(), t);
        assert!(!is_open(&vm, uv));
        assert_eq!(vm.upvalue_get(uv).unwrap(), t);

        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(t));
        // no open upvalues left, the thread leaves the set
        assert!(!vm.gc.twups.contains(&main.as_gc_id().unwrap()));

        registry_set(&mut vm, "f", LuaValue::Nil);
        vm.full_gc(false).unwrap();
        assert!(!vm.is_alive(f));
        assert!(!vm.is_alive(t));
        assert!(!vm.gc().pool().contains(uv));
    }

    #[test]
    fn test_set_top_closes_upper_levels() {
        let mut vm = new_vm();
        let main = vm.main_thread();
        let values: Vec<LuaValue> = (0..3)
            .map(|i| {
                let t = vm.create_table(0).unwrap();
                vm.push(t).unwrap();
                vm.table_set(t, LuaValue::integer(1), LuaValue::integer(i))
                    .unwrap();
                t
            })
            .collect();
        let uvs: Vec<GcId> = [2, 0, 1]
            .iter()
            .map(|&level| vm.find_upvalue(main, level).unwrap())
            .collect();
        let f = closure_over(&mut vm, uvs.clone());
        registry_set(&mut vm, "f", f);

        vm.set_top(1).unwrap();
        assert!(!is_open(&vm, uvs[0]));
        assert!(is_open(&vm, uvs[1]));
        assert!(!is_open(&vm, uvs[2]));
        assert_eq!(vm.upvalue_get(uvs[0]).unwrap(), values[2]);
        assert_eq!(vm.upvalue_get(uvs[2]).unwrap(), values[1]);

        run_cycle_checked(&mut vm);
        assert!(values.iter().all(|&v| vm.is_alive(v)));

        vm.close_upvalues(main, 0).unwrap();
        assert!(!is_open(&vm, uvs[1]));
        assert_eq!(vm.upvalue_get(uvs[1]).unwrap(), values[0]);
    }

    #[test]
    fn test_dead_thread_closes_its_upvalues() {
        let mut vm = new_vm();
        let co = vm.create_thread().unwrap();
        let t = vm.create_table(0).unwrap();
        vm.thread_push(co, t).unwrap();
        let uv = vm.find_upvalue(co, 0).unwrap();
        let co_id = co.as_gc_id().unwrap();
        assert!(vm.gc.twups.contains(&co_id));
        let f = closure_over(&mut vm, vec![uv]);
        registry_set(&mut vm, "f", f);

        // the upvalue does not keep the thread alive, but the thread's
        // slot value survives through it
        run_cycle_checked(&mut vm);
        assert!(!vm.is_alive(co));
        assert!(!vm.gc.twups.contains(&co_id));
        assert!(!is_open(&vm, uv));
        assert_eq!(vm.upvalue_get(uv).unwrap(), t);
        assert!(vm.is_alive(t));

        run_cycle_checked(&mut vm);
        assert!(vm.is_alive(t));
    }

    #[test]
    fn test_closed_upvalue_written_during_mark() {
        let mut vm = new_vm();
        let uv = vm.create_upvalue(LuaValue::Nil).unwrap();
        let f = closure_over(&mut vm, vec![uv]);
        registry_set(&mut vm, "f", f);

        for _ in 0..5 {
            vm.gc.single_step();
            let t = vm.create_table(0).unwrap();
            vm.upvalue_set(uv, t).unwrap();
            vm.check_heap().unwrap();
        }
        let last = vm.upvalue_get(uv).unwrap();
        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(last));
    }
}
