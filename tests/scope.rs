#[cfg(test)]
mod scope_tests {
    use rope_eval::environment::ScopeKind;
    use rope_eval::interpreter::Interpreter;
    use rope_eval::value::Value;

    fn run(source: &str) -> Value {
        Interpreter::new()
            .run(source)
            .unwrap_or_else(|e| panic!("{:?} failed: {}", source, e))
    }

    fn run_str(source: &str) -> String {
        run(source).to_string()
    }

    #[test]
    fn test_scope_01_eval_var_shadows_outer_binding() {
        let src = "
            function outer() {
                var x = 'outer';
                function inner() { eval('var x = \"inner\"'); return x; }
                return inner() + ' ' + x;
            }
            outer();
        ";
        assert_eq!(run_str(src), "inner outer");
    }

    #[test]
    fn test_scope_02_poisoning_reaches_existing_closures() {
        let src = "
            function outer() {
                var x = 'outer';
                function inner(code) {
                    eval(code);
                    return function () { return x; };
                }
                var before = inner('1');
                var after = inner('var x = \"shadow\"');
                return before() + ' ' + after();
            }
            outer();
        ";
        assert_eq!(run_str(src), "outer shadow");
    }

    #[test]
    fn test_scope_03_sloppy_eval_poisons_variable_scope() {
        let mut interp = Interpreter::new();
        interp.run("eval('var introduced = 1');").unwrap();

        let global = interp.global_env().borrow();
        assert_eq!(global.kind(), ScopeKind::Global);
        assert!(global.is_dynamic());
        assert!(global.binding("introduced").is_some_and(|b| b.deletable));
    }

    #[test]
    fn test_scope_04_auto_global_is_deletable() {
        let src = "
            function f() { g = 1; }
            f();
            typeof g + ' ' + delete g + ' ' + typeof g;
        ";
        assert_eq!(run_str(src), "number true undefined");

        assert_eq!(run("var v = 1; delete v;"), Value::Bool(false));
        assert_eq!(run("eval('var w = 1'); delete w;"), Value::Bool(true));
    }

    #[test]
    fn test_scope_05_strict_eval_is_confined() {
        let src = "
            'use strict';
            eval('var x = 1; function h() {}');
            typeof x + ' ' + typeof h;
        ";
        assert_eq!(run_str(src), "undefined undefined");

        let src = "
            function f() { 'use strict'; eval('var y = 2'); return typeof y; }
            f();
        ";
        assert_eq!(run_str(src), "undefined");

        let src = "
            eval('\"use strict\"; var z = 3');
            typeof z;
        ";
        assert_eq!(run_str(src), "undefined");

        // The eval scope still sees the caller's bindings.
        let src = "
            'use strict';
            function f(a) { return eval('var b = 2; a + b'); }
            f(1);
        ";
        assert_eq!(run(src), Value::Number(3.0));
    }

    #[test]
    fn test_scope_06_temporal_dead_zone() {
        let src = "
            var name;
            try { t; let t = 1; } catch (e) { name = e.name; }
            name;
        ";
        assert_eq!(run_str(src), "ReferenceError");

        let src = "
            function f() { return late; }
            var seen;
            try { f(); } catch (e) { seen = e.message; }
            let late = 1;
            seen;
        ";
        assert_eq!(run_str(src), "Cannot access 'late' before initialization");
    }

    #[test]
    fn test_scope_07_block_scoping() {
        let src = "
            let x = 1;
            { let x = 2; var y = x; }
            x + y;
        ";
        assert_eq!(run(src), Value::Number(3.0));

        let src = "
            function f() { { function g() { return 'g'; } } return g(); }
            f();
        ";
        assert_eq!(run_str(src), "g");
    }

    #[test]
    fn test_scope_08_with_is_dynamic() {
        let src = "
            var o = { p: 1 };
            var p = 'global';
            with (o) { p = 2; }
            o.p + ' ' + p;
        ";
        assert_eq!(run_str(src), "2 global");

        let src = "
            var o = {};
            var q = 'outer';
            function f() { with (o) { return q; } }
            var first = f();
            o.q = 'inner';
            first + ' ' + f();
        ";
        assert_eq!(run_str(src), "outer inner");
    }

    #[test]
    fn test_scope_09_closures_share_environments() {
        let src = "
            function counter() {
                var n = 0;
                return { inc: function () { n += 1; return n; }, get: () => n };
            }
            var c = counter();
            c.inc(); c.inc();
            c.get();
        ";
        assert_eq!(run(src), Value::Number(2.0));

        let src = "
            var fact = function me(n) { return n <= 1 ? 1 : n * me(n - 1); };
            fact(5) + ' ' + typeof me;
        ";
        assert_eq!(run_str(src), "120 undefined");
    }

    #[test]
    fn test_scope_10_string_append_loop() {
        let src = "
            var s = '';
            for (var i = 0; i < 100000; i++) s += 'x';
            s.length + ' ' + s.charAt(99999) + s[0];
        ";
        assert_eq!(run_str(src), "100000 xx");

        let src = "
            function build() {
                let s = 'a';
                for (let i = 0; i < 20000; i++) { s += 'b'; }
                return s;
            }
            build().length;
        ";
        assert_eq!(run(src), Value::Number(20001.0));
    }

    #[test]
    fn test_scope_11_string_aliases_are_unaffected_by_append() {
        let src = "
            var a = 'ab';
            a += 'c';
            var b = a;
            a += 'd';
            b + ' ' + a;
        ";
        assert_eq!(run_str(src), "abc abcd");
    }

    #[test]
    fn test_scope_12_index_every_unit_of_appended_string() {
        let src = "
            var s = '';
            for (var i = 0; i < 40000; i++) s += 'ab';
            var sum = 0;
            for (var j = 0; j < s.length; j++) sum += s.charCodeAt(j);
            sum;
        ";
        assert_eq!(run(src), Value::Number(40000.0 * (97.0 + 98.0)));
    }

    #[test]
    fn test_scope_13_call_through_with_binds_the_object() {
        let src = "
            var o = { m: function () { return this === o; } };
            var r;
            with (o) { r = m(); }
            r;
        ";
        assert_eq!(run(src), Value::Bool(true));

        let src = "
            var g = function () { return this; };
            var o = { p: 1 };
            var r;
            with (o) { r = g() === this; }
            r;
        ";
        assert_eq!(run(src), Value::Bool(true));

        let src = "
            function f() { return this.tag; }
            f.tag = 'fn';
            f.read = f;
            var r;
            with (f) { r = read(); }
            r;
        ";
        assert_eq!(run_str(src), "fn");
    }
}
