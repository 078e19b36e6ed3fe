// Tests for __gc finalizers

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::{GcId, GcKind, GcOption, LuaCaller, LuaError, LuaHeap, LuaResult, LuaValue};

    /// Metatable whose `__gc` counts calls and records the last argument
    fn counting_metatable(heap: &mut LuaHeap, count: Rc<Cell<usize>>, seen: Rc<Cell<LuaValue>>) -> GcId {
        let gc = heap
            .create_native_closure(
                move |_, args| {
                    count.set(count.get() + 1);
                    seen.set(args.first().copied().unwrap_or_default());
                    Ok(())
                },
                vec![],
            )
            .unwrap();
        let mt = heap.create_table(0, 0).unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Function(gc)).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();
        mt
    }

    fn finalizable(heap: &mut LuaHeap, mt: GcId) -> GcId {
        let obj = heap.create_table(0, 0).unwrap();
        heap.set_metatable(LuaValue::Table(obj), Some(mt)).unwrap();
        obj
    }

    #[test]
    fn test_finalizer_runs_once() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let count = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(LuaValue::Nil));
        let mt = counting_metatable(&mut heap, count.clone(), seen.clone());
        let obj = finalizable(&mut heap, mt);

        heap.collect();
        assert_eq!(count.get(), 1);
        assert_eq!(seen.get(), LuaValue::Table(obj));
        // Still allocated until the next cycle
        assert!(heap.contains(obj));
        assert_eq!(heap.stats().finalizers_run, 1);

        heap.collect();
        assert_eq!(count.get(), 1);
        assert!(!heap.contains(obj));
    }

    #[test]
    fn test_reachable_object_is_not_finalized() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let count = Rc::new(Cell::new(0));
        let mt = counting_metatable(&mut heap, count.clone(), Rc::new(Cell::new(LuaValue::Nil)));
        let obj = finalizable(&mut heap, mt);
        heap.set_global("obj", LuaValue::Table(obj)).unwrap();

        heap.collect();
        heap.collect();
        assert_eq!(count.get(), 0);
        assert!(heap.contains(obj));

        heap.set_global("obj", LuaValue::Nil).unwrap();
        heap.collect();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_gc_field_added_after_set_metatable_is_ignored() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let mt = heap.create_table(0, 0).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();
        let obj = heap.create_table(0, 0).unwrap();
        heap.set_metatable(LuaValue::Table(obj), Some(mt)).unwrap();
        let gc = heap
            .create_native_closure(
                move |_, _| {
                    c.set(c.get() + 1);
                    Ok(())
                },
                vec![],
            )
            .unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Function(gc)).unwrap();

        heap.collect();
        assert_eq!(count.get(), 0);
        assert!(!heap.contains(obj));
    }

    #[test]
    fn test_resurrection() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let gc = heap
            .create_native_closure(
                move |heap, args| {
                    c.set(c.get() + 1);
                    heap.set_global("saved", args[0])
                },
                vec![],
            )
            .unwrap();
        let mt = heap.create_table(0, 0).unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Function(gc)).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();
        let obj = finalizable(&mut heap, mt);
        let inner = heap.create_table(0, 0).unwrap();
        heap.table_set(obj, LuaValue::Integer(1), LuaValue::Table(inner)).unwrap();

        heap.collect();
        assert_eq!(count.get(), 1);
        assert_eq!(heap.get_global("saved"), LuaValue::Table(obj));

        // Resurrected objects keep what they reference
        heap.collect();
        assert!(heap.contains(obj));
        assert!(heap.contains(inner));
        assert_eq!(heap.table_get(obj, LuaValue::Integer(1)), LuaValue::Table(inner));

        heap.set_global("saved", LuaValue::Nil).unwrap();
        heap.collect();
        assert!(!heap.contains(obj));
        assert!(!heap.contains(inner));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_finalizer_error_becomes_warning() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let w = warnings.clone();
        heap.set_warn_handler(move |msg| w.borrow_mut().push(msg.to_string()));

        let gc = heap
            .create_native_closure(
                |heap, _| {
                    let main = heap.main_thread();
                    heap.push(main, LuaValue::Integer(1))?;
                    Err(LuaError::RuntimeError("boom".to_string()))
                },
                vec![],
            )
            .unwrap();
        let mt = heap.create_table(0, 0).unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Function(gc)).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();
        finalizable(&mut heap, mt);
        finalizable(&mut heap, mt);
        let main = heap.main_thread();
        let top = heap.thread(main).unwrap().top();

        heap.collect();
        assert_eq!(heap.thread(main).unwrap().top(), top);
        assert_eq!(
            *warnings.borrow(),
            vec!["error in __gc (boom)".to_string(), "error in __gc (boom)".to_string()]
        );
        assert_eq!(heap.stats().finalizer_errors, 2);
        assert_eq!(heap.pending_finalizers(), 0);
    }

    #[test]
    fn test_non_callable_finalizer_warns() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let w = warnings.clone();
        heap.set_warn_handler(move |msg| w.borrow_mut().push(msg.to_string()));
        let mt = heap.create_table(0, 0).unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Boolean(true)).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();
        finalizable(&mut heap, mt);

        heap.collect();
        assert_eq!(
            *warnings.borrow(),
            vec!["error in __gc (attempt to call a boolean value)".to_string()]
        );
    }

    struct CountingCaller {
        calls: Rc<Cell<usize>>,
    }

    impl LuaCaller for CountingCaller {
        fn call(&mut self, heap: &mut LuaHeap, func: LuaValue, args: &[LuaValue]) -> LuaResult<()> {
            let LuaValue::Function(f) = func else {
                return Err(LuaError::NotCallable(func.type_name()));
            };
            assert!(heap.lua_closure(f).is_some());
            assert_eq!(args.len(), 1);
            self.calls.set(self.calls.get() + 1);
            Ok(())
        }
    }

    fn lua_gc_metatable(heap: &mut LuaHeap) -> GcId {
        let proto = heap.create_proto().unwrap();
        let f = heap.create_lua_closure(proto, 0).unwrap();
        let mt = heap.create_table(0, 0).unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Function(f)).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();
        mt
    }

    #[test]
    fn test_lua_finalizer_goes_through_caller() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let calls = Rc::new(Cell::new(0));
        heap.set_caller(Box::new(CountingCaller { calls: calls.clone() }));
        let mt = lua_gc_metatable(&mut heap);
        finalizable(&mut heap, mt);

        heap.collect();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_lua_finalizer_without_caller_warns() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let w = warnings.clone();
        heap.set_warn_handler(move |msg| w.borrow_mut().push(msg.to_string()));
        let mt = lua_gc_metatable(&mut heap);
        finalizable(&mut heap, mt);

        heap.collect();
        assert_eq!(warnings.borrow().len(), 1);
        assert!(warnings.borrow()[0].contains("no interpreter"));
    }

    #[test]
    fn test_collect_inside_finalizer_is_ignored() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let cycles = Rc::new(Cell::new(0));
        let c = cycles.clone();
        let gc = heap
            .create_native_closure(
                move |heap, _| {
                    let before = heap.stats().cycles;
                    heap.collect();
                    c.set(heap.stats().cycles - before);
                    Ok(())
                },
                vec![],
            )
            .unwrap();
        let mt = heap.create_table(0, 0).unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Function(gc)).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();
        finalizable(&mut heap, mt);

        heap.collect();
        assert_eq!(heap.stats().finalizers_run, 1);
        assert_eq!(cycles.get(), 0);
    }

    #[test]
    fn test_mode_switch_inside_finalizer_is_ignored() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let reported = Rc::new(Cell::new(None));
        let r = reported.clone();
        let gc = heap
            .create_native_closure(
                move |heap, _| {
                    r.set(Some(heap.set_mode(GcKind::Generational)));
                    heap.set_generational(50, 50);
                    Ok(())
                },
                vec![],
            )
            .unwrap();
        let mt = heap.create_table(0, 0).unwrap();
        heap.table_set_str(mt, "__gc", LuaValue::Function(gc)).unwrap();
        heap.set_global("mt", LuaValue::Table(mt)).unwrap();

        let minor_before = heap.params().gen_minor_mul;
        for _ in 0..3000 {
            finalizable(&mut heap, mt);
            heap.check_gc();
        }
        assert!(heap.stats().finalizers_run > 0);
        assert_eq!(reported.get(), Some(GcKind::Incremental));
        assert_eq!(heap.mode(), GcKind::Incremental);
        assert_eq!(heap.params().gen_minor_mul, minor_before);
        heap.collect();
        heap.check_invariant();
    }

    #[test]
    fn test_userdata_finalizer() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let count = Rc::new(Cell::new(0));
        let mt = counting_metatable(&mut heap, count.clone(), Rc::new(Cell::new(LuaValue::Nil)));
        let ud = heap.create_userdata(String::from("payload"), 0).unwrap();
        heap.set_metatable(LuaValue::Userdata(ud), Some(mt)).unwrap();

        heap.collect();
        assert_eq!(count.get(), 1);
        heap.collect();
        assert!(!heap.contains(ud));
    }

    #[test]
    fn test_finalizer_in_generational_mode() {
        let mut heap = LuaHeap::new(GcOption {
            mode: GcKind::Generational,
            ..GcOption::default()
        })
        .unwrap();
        let count = Rc::new(Cell::new(0));
        let mt = counting_metatable(&mut heap, count.clone(), Rc::new(Cell::new(LuaValue::Nil)));
        let obj = finalizable(&mut heap, mt);

        heap.step(0);
        assert_eq!(count.get(), 1);
        heap.step(0);
        heap.step(0);
        assert_eq!(count.get(), 1);
        assert!(!heap.contains(obj));
    }

    #[test]
    fn test_close_runs_pending_finalizers() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let count = Rc::new(Cell::new(0));
        let mt = counting_metatable(&mut heap, count.clone(), Rc::new(Cell::new(LuaValue::Nil)));
        let live = finalizable(&mut heap, mt);
        heap.set_global("live", LuaValue::Table(live)).unwrap();
        finalizable(&mut heap, mt);

        heap.close();
        assert_eq!(count.get(), 2);
    }
}
