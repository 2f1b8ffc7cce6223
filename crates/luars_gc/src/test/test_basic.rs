// Object creation, interning, fixed objects and the root set

#[cfg(test)]
mod tests {
    use crate::gc::{GcList, GcState};
    use crate::lua_value::{LuaValue, LuaValueKind};
    use crate::lua_vm::LuaError;
    use crate::test::new_vm;

    #[test]
    fn test_strings_are_interned() {
        let mut vm = new_vm();
        let a = vm.create_string("hello").unwrap();
        let b = vm.create_string("hello").unwrap();
        let c = vm.create_string("world").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(vm.string_content(a), Some("hello"));
        // "__gc", "__mode", "hello", "world"
        assert_eq!(vm.gc().strings().len(), 4);
    }

    #[test]
    fn test_tag_method_names_are_fixed() {
        let mut vm = new_vm();
        let gc_name = vm.create_string("__gc").unwrap();
        let id = gc_name.as_gc_id().unwrap();
        assert_eq!(vm.gc().get(id).map(|o| o.list()), Some(GcList::Fixed));

        vm.full_gc(false).unwrap();
        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(gc_name));
        assert_eq!(vm.create_string("__gc").unwrap(), gc_name);
        vm.check_heap().unwrap();
    }

    #[test]
    fn test_fix_only_strings() {
        let mut vm = new_vm();
        let t = vm.create_table(0).unwrap();
        assert_eq!(vm.fix_object(t), Err(LuaError::RuntimeError));

        let keyword = vm.create_string("while").unwrap();
        vm.fix_object(keyword).unwrap();
        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(keyword));
        assert!(!vm.is_alive(t));
    }

    #[test]
    fn test_unreachable_objects_are_collected() {
        let mut vm = new_vm();
        let garbage = vm.create_table(4).unwrap();
        let s = vm.create_string("temporary").unwrap();
        let kept = vm.create_table(0).unwrap();
        vm.push(kept).unwrap();

        vm.full_gc(false).unwrap();
        assert!(!vm.is_alive(garbage));
        assert!(!vm.is_alive(s));
        assert!(vm.is_alive(kept));
        assert_eq!(vm.gc().strings().len(), 2);
        assert_eq!(vm.gc_state(), GcState::Pause);
        vm.check_heap().unwrap();
    }

    #[test]
    fn test_registry_and_type_metatables_are_roots() {
        let mut vm = new_vm();
        let registry = vm.registry();
        let stored = vm.create_table(0).unwrap();
        let key = vm.create_string("stored").unwrap();
        vm.table_set(registry, key, stored).unwrap();

        let string_mt = vm.create_table(0).unwrap();
        vm.set_type_metatable(LuaValueKind::String, Some(string_mt))
            .unwrap();

        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(stored));
        assert!(vm.is_alive(key));
        assert!(vm.is_alive(string_mt));
        assert_eq!(vm.get_metatable(key), Some(string_mt));

        vm.set_type_metatable(LuaValueKind::String, None).unwrap();
        vm.full_gc(false).unwrap();
        assert!(!vm.is_alive(string_mt));
        assert_eq!(vm.get_metatable(key), None);
    }

    #[test]
    fn test_float_keys_are_normalized() {
        let mut vm = new_vm();
        let t = vm.create_table(0).unwrap();
        vm.table_set(t, LuaValue::float(2.0), LuaValue::boolean(true))
            .unwrap();
        assert_eq!(
            vm.table_get(t, LuaValue::integer(2)).unwrap(),
            LuaValue::boolean(true)
        );
        assert_eq!(
            vm.table_set(t, LuaValue::nil(), LuaValue::integer(1)),
            Err(LuaError::InvalidKey)
        );
        assert_eq!(
            vm.table_get(t, LuaValue::float(f64::NAN)).unwrap(),
            LuaValue::Nil
        );
    }

    #[test]
    fn test_dead_string_is_resurrected_by_lookup() {
        let mut vm = new_vm();
        let name = vm.create_string("phoenix").unwrap();
        // objects created later sit before it in allgc, so the sweep
        // reaches it late
        let holder = vm.create_table(0).unwrap();
        vm.push(holder).unwrap();
        for i in 0..16 {
            let t = vm.create_table(0).unwrap();
            vm.table_set(holder, LuaValue::integer(i), t).unwrap();
        }

        while vm.gc_state() != GcState::SwpAllGc {
            vm.gc.single_step();
        }
        assert!(!vm.is_alive(name));

        let again = vm.create_string("phoenix").unwrap();
        assert_eq!(again, name);
        assert!(vm.is_alive(name));
        vm.push(again).unwrap();

        vm.run_until_state(GcState::Pause).unwrap();
        assert!(vm.is_alive(name));
        vm.check_heap().unwrap();
        vm.full_gc(false).unwrap();
        assert!(vm.is_alive(name));
    }
}
