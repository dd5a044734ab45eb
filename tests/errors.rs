#[cfg(test)]
mod error_tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rope_eval::error::{EngineError, ErrorKind};
    use rope_eval::gc::{reachable, GcEdge};
    use rope_eval::interpreter::{CallFrame, FrameKind, FrameState, Interpreter, UnwindHook};
    use rope_eval::value::Value;

    fn run(source: &str) -> Value {
        Interpreter::new()
            .run(source)
            .unwrap_or_else(|e| panic!("{:?} failed: {}", source, e))
    }

    fn run_err(source: &str) -> EngineError {
        match Interpreter::new().run(source) {
            Ok(value) => panic!("{:?} unexpectedly produced {}", source, value),
            Err(err) => err,
        }
    }

    fn caught_name(body: &str) -> String {
        let src = format!("var name = 'none'; try {{ {} }} catch (e) {{ name = e.name; }} name;", body);
        run(&src).to_string()
    }

    #[test]
    fn test_errors_01_const_reassignment_is_type_error() {
        assert_eq!(caught_name("const c = 1; c = 2;"), "TypeError");
        assert_eq!(caught_name("const c = 1; c += 1;"), "TypeError");
        assert_eq!(
            caught_name("const c = 1; (function () { c = 2; })();"),
            "TypeError"
        );
        assert_eq!(
            caught_name("const c = 1; (function () { 'use strict'; c = 2; })();"),
            "TypeError"
        );

        let err = run_err("const k = 1; eval('k = 2');");
        assert_eq!(err.kind(), Some(ErrorKind::TypeError));
        assert!(!err.is_static());
    }

    #[test]
    fn test_errors_02_reference_and_type_errors() {
        assert_eq!(caught_name("missing;"), "ReferenceError");
        assert_eq!(caught_name("'use strict'; undeclared = 1;"), "none");
        assert_eq!(caught_name("var x = 1; x();"), "TypeError");
        assert_eq!(caught_name("null.p;"), "TypeError");
        assert_eq!(caught_name("with (1) {}"), "TypeError");

        let err = run_err("'use strict'; undeclared = 1;");
        assert_eq!(err.kind(), Some(ErrorKind::ReferenceError));
        assert_eq!(err.to_string(), "Uncaught ReferenceError: undeclared is not defined");
    }

    #[test]
    fn test_errors_03_eval_syntax_error_is_catchable_at_call_site() {
        let src = "
            var result;
            try { eval('var = ;'); } catch (e) { result = e.name; }
            result;
        ";
        assert_eq!(run(src).to_string(), "SyntaxError");

        assert_eq!(caught_name("eval('\"use strict\"; with ({}) {}');"), "SyntaxError");
        assert_eq!(caught_name("eval('let a; let a;');"), "SyntaxError");
        assert_eq!(caught_name("var e = eval; e('break;');"), "SyntaxError");

        let err = run_err("eval('1 +');");
        assert_eq!(err.kind(), Some(ErrorKind::SyntaxError));
        assert!(!err.is_static());
    }

    #[test]
    fn test_errors_04_static_errors_stop_before_running() {
        let mut interp = Interpreter::new();
        let err = interp.run("var ran = true; let a; var a;").unwrap_err();

        assert!(err.is_static());
        assert!(interp.global_value("ran").is_none());

        assert!(run_err("return 1;").is_static());
        assert!(run_err("x = ;").is_static());
        assert!(run_err("'unterminated").is_static());
    }

    #[test]
    fn test_errors_05_stack_overflow_bypasses_catch_and_finally() {
        let mut interp = Interpreter::new();
        let src = "
            var log = '';
            function f() { return f(); }
            try { f(); } catch (e) { log += 'caught'; } finally { log += 'finally'; }
        ";

        let err = interp.run(src).unwrap_err();

        assert!(matches!(err, EngineError::StackOverflow));
        assert!(err.is_fatal());
        assert_eq!(interp.global_value("log").map(|v| v.to_string()), Some(String::new()));
        assert!(interp.frames().is_empty());
    }

    #[test]
    fn test_errors_06_call_depth_is_configurable() {
        let mut interp = Interpreter::new();
        interp.set_max_call_depth(50);

        let src = "function r(n) { return n == 0 ? 0 : 1 + r(n - 1); }";
        interp.run(src).unwrap();

        assert_eq!(interp.run("r(40);").unwrap(), Value::Number(40.0));
        assert!(interp.run("r(60);").unwrap_err().is_fatal());

        // Nested eval frames count too.
        let err = interp
            .run("function e(n) { return n == 0 ? 0 : eval('e(n - 1)'); } e(100);")
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_errors_07_deep_eval_nesting_is_fatal() {
        let depth = 5000;
        let text = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        let src = format!("var r = 'none'; try {{ eval('{}'); }} catch (e) {{ r = 'caught'; }}", text);

        let mut interp = Interpreter::new();
        let err = interp.run(&src).unwrap_err();

        assert!(matches!(err, EngineError::StackOverflow));
        assert_eq!(interp.global_value("r").map(|v| v.to_string()), Some("none".into()));
    }

    #[test]
    fn test_errors_08_thrown_values_reach_host() {
        let err = run_err("throw 'boom';");
        assert_eq!(err.kind(), None);
        assert_eq!(err.to_string(), "Uncaught exception: boom");

        let err = run_err("throw { name: 'TypeError', message: 'custom' };");
        assert_eq!(err.kind(), Some(ErrorKind::TypeError));
        assert_eq!(err.message(), "custom");
    }

    #[test]
    fn test_errors_09_finally_runs_for_ordinary_throws() {
        let src = "
            var log = '';
            function f() {
                try { throw 'x'; } finally { log += 'f'; }
            }
            try { f(); } catch (e) { log += e; }
            log;
        ";
        assert_eq!(run(src).to_string(), "fx");
    }

    #[derive(Default)]
    struct Recorder(Rc<RefCell<Vec<(String, FrameKind, FrameState)>>>);

    impl UnwindHook for Recorder {
        fn frame_unwound(&mut self, frame: &CallFrame, thrown: &Value) {
            assert_eq!(thrown.to_string(), "boom");
            self.0
                .borrow_mut()
                .push((frame.callee.to_string(), frame.kind, frame.state));
        }
    }

    #[test]
    fn test_errors_10_unwind_hook_sees_each_frame() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut interp = Interpreter::new();
        interp.set_unwind_hook(Box::new(Recorder(seen.clone())));

        let src = "
            function inner() { throw 'boom'; }
            function outer() { eval('inner()'); }
            try { outer(); } catch (e) {}
        ";
        interp.run(src).unwrap();

        let seen = seen.borrow();
        let names: Vec<&str> = seen.iter().map(|(name, _, _)| name.as_str()).collect();
        assert_eq!(names, vec!["inner", "eval", "outer"]);
        assert_eq!(seen[1].1, FrameKind::Eval);
        assert!(seen.iter().all(|(_, _, state)| *state == FrameState::Thrown));
    }

    #[test]
    fn test_errors_11_gc_roots_and_reachability() {
        let mut interp = Interpreter::new();
        let before = reachable(&interp);

        interp
            .run("var o = { a: { b: 1 } }; var s = 'x' + 'y'; var f = function () { return o; };")
            .unwrap();
        let after = reachable(&interp);

        // o and o.a, plus the property bag of f.
        assert!(after.objects >= before.objects + 3);
        assert_eq!(after.functions, before.functions + 1);
        // The concat node and its two leaves.
        assert!(after.ropes >= before.ropes + 3);

        let mut roots = Vec::new();
        interp.roots(&mut |edge| roots.push(edge));
        assert!(roots
            .iter()
            .any(|edge| matches!(edge, GcEdge::Environment(env) if Rc::ptr_eq(env, interp.global_env()))));
        assert!(roots
            .iter()
            .any(|edge| matches!(edge, GcEdge::Function(func) if Rc::ptr_eq(func, interp.intrinsic_eval()))));
    }

    #[test]
    fn test_errors_12_suspended_frames_keep_their_scopes_reachable() {
        let mut interp = Interpreter::new();
        interp.define_native("census", 0, |interp, _, _| {
            Ok(Value::Number(reachable(interp).objects as f64))
        });

        let src = "
            function h() { return census(); }
            function f() {
                var a = {}, b = {};
                { let d = {}; var direct = census(); var nested = h(); }
                return direct + ' ' + nested;
            }
            f();
        ";
        let counts = interp.run(src).unwrap().to_string();
        let (direct, nested) = counts.split_once(' ').unwrap();

        // Locals of f stay live while h runs.
        assert_eq!(direct, nested);
    }
}
