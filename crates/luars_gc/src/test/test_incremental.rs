// Tests for incremental collection and the host control API

#[cfg(test)]
mod tests {
    use crate::{GcOption, GcParams, GcState, LuaHeap, LuaValue};

    /// Deterministic pseudo-random sequence
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    #[test]
    fn test_invariant_holds_while_mutating() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let main = heap.main_thread();
        let root = heap.create_table(0, 0).unwrap();
        heap.set_global("root", LuaValue::Table(root)).unwrap();
        let f = heap.create_native_closure(|_, _| Ok(()), vec![LuaValue::Nil]).unwrap();
        heap.table_set_str(root, "f", LuaValue::Function(f)).unwrap();
        let ud = heap.create_userdata((), 1).unwrap();
        heap.table_set_str(root, "ud", LuaValue::Userdata(ud)).unwrap();
        let proto = heap.create_proto().unwrap();
        let closure = heap.create_lua_closure(proto, 1).unwrap();
        heap.table_set_str(root, "closure", LuaValue::Function(closure)).unwrap();
        heap.push(main, LuaValue::Nil).unwrap();
        let uv = heap.find_upvalue(main, 0).unwrap();
        assert!(heap.closure_set_upvalue(closure, 0, uv));

        let mut rng = Lcg(7);
        let mut live = vec![root];
        let mut cycles = heap.stats().cycles;
        for i in 0..600 {
            let t = heap.create_table(0, 0).unwrap();
            let target = live[rng.next(live.len() as u64) as usize];
            match rng.next(6) {
                0 => heap.table_set(target, LuaValue::Integer(rng.next(8) as i64 + 1), LuaValue::Table(t)).unwrap(),
                1 => {
                    let key = heap.create_string_value(&format!("k{}", rng.next(50))).unwrap();
                    heap.table_set(target, key, LuaValue::Table(t)).unwrap();
                }
                2 => {
                    heap.native_set_upvalue(f, 0, LuaValue::Table(t));
                }
                3 => {
                    heap.set_user_value(ud, 0, LuaValue::Table(t));
                }
                4 => heap.set_metatable(LuaValue::Table(target), Some(t)).unwrap(),
                _ => {
                    heap.upvalue_set(uv, LuaValue::Table(t));
                    if i % 10 == 0 {
                        heap.close_upvalues(main, 0);
                        heap.upvalue_set(uv, LuaValue::Table(t));
                    }
                }
            }
            if live.len() < 64 {
                heap.table_set(root, LuaValue::Integer(1000 + live.len() as i64), LuaValue::Table(t)).unwrap();
                live.push(t);
            }
            heap.table_set(root, LuaValue::Integer(100 + (i % 32)), LuaValue::Table(t)).unwrap();
            heap.check_invariant();
            for _ in 0..rng.next(4) {
                heap.single_step();
                heap.check_invariant();
            }
            if heap.stats().cycles > cycles {
                cycles = heap.stats().cycles;
                for &id in &live {
                    assert!(heap.contains(id));
                }
            }
        }
        assert!(heap.stats().cycles > 1);
        heap.collect();
        for &id in &live {
            assert!(heap.contains(id));
        }
    }

    #[test]
    fn test_stop_and_restart() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        heap.stop();
        assert!(!heap.is_running());
        let cycles = heap.stats().cycles;
        for _ in 0..500 {
            heap.create_table(8, 0).unwrap();
            heap.check_gc();
        }
        assert_eq!(heap.stats().cycles, cycles);
        assert_eq!(heap.gc_state(), GcState::Pause);

        // Explicit collections still run while stopped
        heap.collect();
        assert_eq!(heap.stats().cycles, cycles + 1);
        assert!(!heap.is_running());

        heap.restart();
        assert!(heap.is_running());
        for _ in 0..500 {
            heap.create_table(8, 0).unwrap();
            heap.check_gc();
        }
        assert!(heap.stats().cycles > cycles + 1);
    }

    #[test]
    fn test_step_finishes_cycle() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let t = heap.create_table(0, 0).unwrap();
        heap.set_global("t", LuaValue::Table(t)).unwrap();
        let garbage = heap.create_table(0, 0).unwrap();
        let mut finished = false;
        for _ in 0..100 {
            if heap.step(0) {
                finished = true;
                break;
            }
        }
        assert!(finished);
        assert!(!heap.contains(garbage));
        assert!(heap.contains(t));
        assert!(heap.step(1024));
    }

    #[test]
    fn test_huge_step_saturates() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let bytes = heap.count_bytes();
        assert!(heap.step(usize::MAX));
        assert!(heap.count_bytes() <= bytes);
        assert_eq!(heap.gc_state(), GcState::Pause);
    }

    #[test]
    fn test_step_while_stopped_keeps_collector_stopped() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        heap.stop();
        heap.step(0);
        assert!(!heap.is_running());
    }

    #[test]
    fn test_parameters() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        assert_eq!(heap.set_pause(100), 200);
        assert_eq!(heap.pause(), 100);
        assert_eq!(heap.set_step_mul(400), 100);
        assert_eq!(heap.step_mul(), 400);
        let params = GcParams {
            step_size: 10,
            ..GcParams::default()
        };
        heap.set_params(params);
        assert_eq!(heap.params(), params);
        assert_eq!(heap.count_kb(), heap.count_bytes() >> 10);
    }

    #[test]
    fn test_allocation_paced_by_checkpoints() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        heap.collect();
        let baseline = heap.count_bytes();
        let mut peak = 0;
        for _ in 0..2000 {
            heap.create_table(4, 0).unwrap();
            heap.check_gc();
            peak = peak.max(heap.count_bytes());
        }
        assert!(heap.stats().cycles > 5);
        assert!(peak < baseline * 4, "peak {peak} baseline {baseline}");
    }

    #[test]
    fn test_collect_finishes_cycle_in_progress() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let t = heap.create_table(0, 0).unwrap();
        heap.set_global("t", LuaValue::Table(t)).unwrap();
        let garbage = heap.create_table(0, 0).unwrap();
        while heap.gc_state() != GcState::Propagate {
            heap.single_step();
        }
        heap.single_step();
        heap.collect();
        assert_eq!(heap.gc_state(), GcState::Pause);
        assert!(heap.contains(t));
        assert!(!heap.contains(garbage));
    }

    #[test]
    fn test_object_created_during_sweep_survives() {
        let mut heap = LuaHeap::new(GcOption::default()).unwrap();
        let main = heap.main_thread();
        for _ in 0..10 {
            heap.create_table(0, 0).unwrap();
        }
        while heap.gc_state() != GcState::SwpAllGc {
            heap.single_step();
        }
        let t = heap.create_table(0, 0).unwrap();
        heap.push(main, LuaValue::Table(t)).unwrap();
        while heap.gc_state() != GcState::Pause {
            heap.single_step();
        }
        assert!(heap.contains(t));
    }
}
