// Tests for threads, stacks and upvalues

#[cfg(test)]
mod tests {
    use crate::gc::GcBody;
    use crate::gc::gc_limits::BASIC_STACK_SIZE;
    use crate::lua_value::LuaThread;
    use crate::{GcOption, LuaHeap, LuaValue};

    #[test]
    fn test_thread_without_stack_survives_collection() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let main = heap.main_thread();
        let th = heap.new_object(GcBody::Thread(LuaThread::default())).unwrap();
        heap.push(main, LuaValue::Thread(th)).unwrap();
        assert!(!heap.thread(th).unwrap().is_built());
        assert!(heap.push(th, LuaValue::Integer(1)).is_err());

        heap.collect();
        assert!(heap.contains(th));
        heap.init_stack(th).unwrap();
        assert_eq!(heap.thread(th).unwrap().stack_size(), BASIC_STACK_SIZE);
        heap.push(th, LuaValue::Integer(1)).unwrap();
        heap.collect();
        assert_eq!(heap.stack_get(th, 0), LuaValue::Integer(1));
    }

    #[test]
    fn test_stack_values_are_roots() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let th = heap.create_thread().unwrap();
        let t = heap.create_table(0, 0).unwrap();
        heap.push(th, LuaValue::Table(t)).unwrap();
        let above = heap.create_table(0, 0).unwrap();
        heap.push(th, LuaValue::Table(above)).unwrap();
        assert_eq!(heap.pop(th), Some(LuaValue::Table(above)));

        heap.collect();
        assert!(heap.contains(t));
        assert!(!heap.contains(above));
        // Dead part of the stack is cleared
        assert_eq!(heap.thread(th).unwrap().get_slot(1), LuaValue::Nil);
    }

    #[test]
    fn test_stack_grows_and_shrinks() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let th = heap.create_thread().unwrap();
        let small = heap.object_header(th).unwrap().size;
        heap.set_top(th, 200).unwrap();
        assert_eq!(heap.thread(th).unwrap().stack_size(), 200);
        assert!(heap.object_header(th).unwrap().size > small);

        heap.set_top(th, 1).unwrap();
        heap.collect();
        assert_eq!(heap.thread(th).unwrap().stack_size(), 2 * crate::gc::gc_limits::LUA_MINSTACK);
        assert_eq!(heap.object_header(th).unwrap().size, small);
    }

    #[test]
    fn test_upvalues_are_shared_and_closed() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let th = heap.create_thread().unwrap();
        let t = heap.create_table(0, 0).unwrap();
        heap.push(th, LuaValue::Table(t)).unwrap();
        heap.push(th, LuaValue::Integer(7)).unwrap();

        let uv0 = heap.find_upvalue(th, 0).unwrap();
        let uv1 = heap.find_upvalue(th, 1).unwrap();
        assert_eq!(heap.find_upvalue(th, 0).unwrap(), uv0);
        assert!(heap.find_upvalue(th, 5).is_err());
        assert_eq!(heap.thread(th).unwrap().open_upvalues(), &[uv1, uv0]);

        let proto = heap.create_proto().unwrap();
        let f = heap.create_lua_closure(proto, 2).unwrap();
        assert!(heap.closure_set_upvalue(f, 0, uv0));
        assert!(heap.closure_set_upvalue(f, 1, uv1));
        assert!(!heap.closure_set_upvalue(f, 2, uv1));
        heap.set_global("f", LuaValue::Function(f)).unwrap();

        // Writes through an open upvalue land on the stack
        heap.upvalue_set(uv1, LuaValue::Integer(8));
        assert_eq!(heap.stack_get(th, 1), LuaValue::Integer(8));

        heap.collect();
        assert!(heap.upvalue(uv0).unwrap().is_open());
        assert_eq!(heap.upvalue_get(uv0), LuaValue::Table(t));

        heap.close_upvalues(th, 1);
        assert!(!heap.upvalue(uv1).unwrap().is_open());
        assert!(heap.upvalue(uv0).unwrap().is_open());
        heap.close_upvalues(th, 0);
        assert!(heap.thread(th).unwrap().open_upvalues().is_empty());
        assert_eq!(heap.upvalue_get(uv0), LuaValue::Table(t));
        assert_eq!(heap.upvalue_get(uv1), LuaValue::Integer(8));

        // The closed upvalue keeps the table alive after the stack drops it
        heap.set_top(th, 0).unwrap();
        heap.collect();
        assert!(heap.contains(t));
    }

    #[test]
    fn test_dead_thread_closes_its_upvalues() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let main = heap.main_thread();
        let th = heap.create_thread().unwrap();
        let t = heap.create_table(0, 0).unwrap();
        heap.push(th, LuaValue::Table(t)).unwrap();
        let uv = heap.find_upvalue(th, 0).unwrap();
        let proto = heap.create_proto().unwrap();
        let f = heap.create_lua_closure(proto, 1).unwrap();
        assert!(heap.closure_set_upvalue(f, 0, uv));
        heap.set_global("f", LuaValue::Function(f)).unwrap();
        assert_eq!(heap.pop(main), Some(LuaValue::Thread(th)));

        heap.collect();
        assert!(!heap.contains(th));
        assert!(heap.contains(t));
        assert!(!heap.upvalue(uv).unwrap().is_open());
        assert_eq!(heap.upvalue_get(uv), LuaValue::Table(t));

        heap.collect();
        assert!(heap.contains(t));
    }

    #[test]
    fn test_open_upvalues_live_with_their_thread() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let main = heap.main_thread();
        let th = heap.create_thread().unwrap();
        heap.push(th, LuaValue::Integer(1)).unwrap();
        let uv = heap.find_upvalue(th, 0).unwrap();

        heap.collect();
        assert!(heap.contains(uv));
        assert_eq!(heap.thread(th).unwrap().open_upvalues(), &[uv]);

        assert_eq!(heap.pop(main), Some(LuaValue::Thread(th)));
        let collected = heap.stats().objects_collected;
        heap.collect();
        assert!(!heap.contains(th));
        assert!(!heap.contains(uv));
        assert_eq!(heap.stats().objects_collected, collected + 2);
    }

    #[test]
    fn test_lowering_top_closes_upvalues() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let main = heap.main_thread();
        let base = heap.thread(main).unwrap().top();
        let t = heap.create_table(0, 0).unwrap();
        heap.push(main, LuaValue::Table(t)).unwrap();
        let uv = heap.find_upvalue(main, base).unwrap();
        let proto = heap.create_proto().unwrap();
        let f = heap.create_lua_closure(proto, 1).unwrap();
        assert!(heap.closure_set_upvalue(f, 0, uv));
        heap.set_global("f", LuaValue::Function(f)).unwrap();

        assert_eq!(heap.pop(main), Some(LuaValue::Table(t)));
        assert!(!heap.upvalue(uv).unwrap().is_open());
        heap.collect();
        heap.collect();
        assert!(heap.contains(t));
        assert_eq!(heap.upvalue_get(uv), LuaValue::Table(t));

        // Same through set_top, with a write after the slot is gone
        let th = heap.create_thread().unwrap();
        heap.push(th, LuaValue::Integer(1)).unwrap();
        heap.push(th, LuaValue::Integer(2)).unwrap();
        let low = heap.find_upvalue(th, 0).unwrap();
        let high = heap.find_upvalue(th, 1).unwrap();
        heap.set_top(th, 1).unwrap();
        assert!(heap.upvalue(low).unwrap().is_open());
        assert!(!heap.upvalue(high).unwrap().is_open());
        assert_eq!(heap.thread(th).unwrap().open_upvalues(), &[low]);
        heap.upvalue_set(high, LuaValue::Table(t));
        let g = heap.create_lua_closure(proto, 1).unwrap();
        assert!(heap.closure_set_upvalue(g, 0, high));
        heap.set_global("g", LuaValue::Function(g)).unwrap();
        heap.set_global("f", LuaValue::Nil).unwrap();
        heap.collect();
        assert!(heap.contains(t));
        assert_eq!(heap.upvalue_get(high), LuaValue::Table(t));
    }

    #[test]
    fn test_proto_references() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let proto = heap.create_proto().unwrap();
        let f = heap.create_lua_closure(proto, 0).unwrap();
        heap.set_global("f", LuaValue::Function(f)).unwrap();

        let source = heap.create_string("chunk").unwrap();
        heap.proto_set_source(proto, source).unwrap();
        let k = heap.create_string_value("a constant string").unwrap();
        heap.proto_add_constant(proto, k).unwrap();
        let child = heap.create_proto().unwrap();
        heap.proto_add_child(proto, child).unwrap();
        let name = heap.create_string("x").unwrap();
        heap.proto_add_local_name(proto, Some(name)).unwrap();
        heap.proto_add_upvalue_name(proto, None).unwrap();
        let garbage = heap.create_proto().unwrap();

        heap.collect();
        for id in [proto, source, child, name] {
            assert!(heap.contains(id));
        }
        assert!(heap.contains(k.as_gc_id().unwrap()));
        assert!(!heap.contains(garbage));
        assert_eq!(heap.proto(proto).unwrap().protos(), &[child]);
    }

    #[test]
    fn test_running_thread_switch() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let th = heap.create_thread().unwrap();
        heap.set_running_thread(th);
        assert_eq!(heap.running_thread(), th);
        heap.set_running_thread(heap.main_thread());
        assert_eq!(heap.running_thread(), heap.main_thread());
    }
}
