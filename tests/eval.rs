#[cfg(test)]
mod eval_tests {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    use rope_eval::ast::EvalCallSite;
    use rope_eval::eval_dispatch::{classify, CallKind};
    use rope_eval::interpreter::Interpreter;
    use rope_eval::value::{JsFunction, Value};

    fn run(source: &str) -> Value {
        Interpreter::new()
            .run(source)
            .unwrap_or_else(|e| panic!("{:?} failed: {}", source, e))
    }

    fn run_str(source: &str) -> String {
        run(source).to_string()
    }

    /// Output sink shared with the test.
    #[derive(Clone, Default)]
    struct Captured(Rc<RefCell<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_eval_01_direct_sees_local_scope() {
        let src = "
            var x = 'global';
            function f() { var x = 'local'; return eval('x'); }
            f();
        ";
        assert_eq!(run_str(src), "local");
    }

    #[test]
    fn test_eval_02_indirect_sees_global_scope() {
        let src = "
            var x = 'global';
            function f() { var x = 'local'; var e = eval; return e('x'); }
            f();
        ";
        assert_eq!(run_str(src), "global");

        let src = "
            var x = 'global';
            function f() { var x = 'local'; var o = { eval: eval }; return o.eval('x'); }
            f();
        ";
        assert_eq!(run_str(src), "global");
    }

    #[test]
    fn test_eval_03_shadowed_eval_is_ordinary_call() {
        assert_eq!(
            run("var eval = function (x) { return 2 * x; }; eval(2);"),
            Value::Number(4.0)
        );

        let src = "
            function f() { var eval = function () { return 'shadow'; }; return eval('1 + 1'); }
            f();
        ";
        assert_eq!(run_str(src), "shadow");
    }

    #[test]
    fn test_eval_04_identity_checked_on_every_call() {
        let src = "
            var out = '';
            var saved = eval;
            function f() { return eval('1 + 1'); }
            out += f();
            eval = function () { return 'swapped'; };
            out += f();
            eval = saved;
            out += f();
            out;
        ";
        assert_eq!(run_str(src), "2swapped2");
    }

    #[test]
    fn test_eval_05_function_declaration_skips_with_object() {
        let src = "
            var o = { xxx: 'orig' };
            function outer() {
                with (o) { eval('function xxx() { return 1; }'); }
                return typeof xxx;
            }
            var kind = outer();
            o.xxx + ' ' + kind + ' ' + typeof xxx;
        ";
        assert_eq!(run_str(src), "orig function undefined");

        let src = "
            with ({ xxx: 'orig' }) { eval('function xxx() {}'); }
            typeof xxx;
        ";
        assert_eq!(run_str(src), "function");
    }

    #[test]
    fn test_eval_06_missing_arguments_are_undefined() {
        let src = "
            function f(a, b, c) { return eval('c'); }
            typeof f(1);
        ";
        assert_eq!(run_str(src), "undefined");

        assert_eq!(
            run("function g(a, b) { return eval('a + b'); } g(1);").to_string(),
            "NaN"
        );
    }

    #[test]
    fn test_eval_07_this_flows_through_direct_eval() {
        let src = "
            var o = { m: function () { return eval('this'); } };
            o.m() === o;
        ";
        assert_eq!(run(src), Value::Bool(true));
    }

    #[test]
    fn test_eval_08_indirect_eval_uses_global_this() {
        let src = "
            var e = eval;
            var o = { m: function () { return e('this'); } };
            o.m() === this;
        ";
        assert_eq!(run(src), Value::Bool(true));
    }

    #[test]
    fn test_eval_09_arrow_from_eval_keeps_this() {
        let src = "
            var o = { m: function () { return eval('() => this'); } };
            var arrow = o.m();
            arrow() === o;
        ";
        assert_eq!(run(src), Value::Bool(true));
    }

    #[test]
    fn test_eval_10_nested_eval_gets_fresh_scopes() {
        let src = "
            function f() {
                let a = 1;
                return eval(\"let a = 2; eval('let a = 3; a') + a\") + a;
            }
            f();
        ";
        assert_eq!(run(src), Value::Number(6.0));
    }

    #[test]
    fn test_eval_11_completion_value() {
        assert_eq!(run("eval('1; 2; var x = 5;');"), Value::Number(2.0));
        assert_eq!(run("eval('');"), Value::Undefined);
        assert_eq!(run("eval('if (true) { 7; }');"), Value::Number(7.0));
    }

    #[test]
    fn test_eval_12_non_string_argument_returned_unchanged() {
        assert_eq!(run("eval(42);"), Value::Number(42.0));
        assert_eq!(run("var o = {}; eval(o) === o;"), Value::Bool(true));
        assert_eq!(run("eval();"), Value::Undefined);
    }

    #[test]
    fn test_eval_13_sloppy_var_lands_in_caller_variable_scope() {
        let src = "
            function f() {
                { eval('var inner = 1'); }
                return inner;
            }
            f() + ' ' + typeof inner;
        ";
        assert_eq!(run_str(src), "1 undefined");
    }

    #[test]
    fn test_eval_14_classify_checks_identity() {
        let interp = Interpreter::new();
        let site = EvalCallSite::new(true);
        let intrinsic = Value::Function(interp.intrinsic_eval().clone());
        let imposter = Value::Function(JsFunction::native("eval", 1, |_, _, _| {
            Ok(Value::Undefined)
        }));

        assert_eq!(
            classify(&site, &intrinsic, interp.intrinsic_eval()),
            CallKind::DirectEval
        );
        assert_eq!(
            classify(&site, &imposter, interp.intrinsic_eval()),
            CallKind::Ordinary
        );
        assert_eq!(
            classify(&EvalCallSite::new(false), &intrinsic, interp.intrinsic_eval()),
            CallKind::Ordinary
        );
    }

    #[test]
    fn test_eval_15_print_goes_to_output_sink() {
        let sink = Captured::default();
        let mut interp = Interpreter::with_output(Box::new(sink.clone()));

        interp
            .run("print('a' + 'b', 1, eval('null'));")
            .unwrap();

        let printed = String::from_utf8(sink.0.borrow().clone()).unwrap();
        assert_eq!(printed, "ab 1 null\n");
    }

    #[test]
    fn test_eval_16_host_bindings() {
        let mut interp = Interpreter::new();
        interp.define_global("answer", Value::Number(41.0));
        interp.define_native("double", 1, |_, _, args| {
            Ok(Value::Number(args.first().map_or(0.0, Value::to_number) * 2.0))
        });

        let value = interp.run("answer = answer + 1; double(answer);").unwrap();
        assert_eq!(value, Value::Number(84.0));
        assert_eq!(interp.global_value("answer"), Some(Value::Number(42.0)));

        let f = interp.run("(function (a, b) { return a + b; });").unwrap();
        let sum = interp
            .call(&f, Value::Undefined, &[Value::from("x"), Value::from("y")])
            .unwrap();
        assert_eq!(sum.to_string(), "xy");
    }

    #[test]
    fn test_eval_17_lone_surrogate_survives_eval_text() {
        let src = r#"
            var s = '\ud800';
            var r = eval('"' + s + '"');
            var q = eval('"a' + s + 'b"');
            var e = eval('"\\' + s + '"');
            r.length + ',' + r.charCodeAt(0) + ',' + q.length + ',' + q.charCodeAt(1) + ',' + e.charCodeAt(0);
        "#;
        assert_eq!(run_str(src), "1,55296,3,55296,55296");
    }
}
