//! End-to-end tests: whole source texts through the interpreter with
//! captured output.

use indoc::indoc;

use shale::interpreter::Interpreter;
use shale::runtime::error::{ErrorCode, RuntimeError};

fn run(source: &str) -> Result<String, RuntimeError> {
    let (mut interpreter, sink) = Interpreter::capturing();
    interpreter.eval_source(source)?;
    Ok(sink.captured().expect("buffer sink"))
}

fn run_ok(source: &str) -> String {
    run(source).expect("script failed")
}

fn run_err(source: &str) -> RuntimeError {
    let (mut interpreter, _sink) = Interpreter::capturing();
    interpreter
        .eval_source(source)
        .expect_err("expected script to fail")
}

#[test]
fn operator_precedence() {
    assert_eq!(run_ok("print(1 + 2 * 3)"), "7\n");
    assert_eq!(run_ok("print((1 + 2) * 3)"), "9\n");
    assert_eq!(run_ok("print(1 << 2 + 1)"), "8\n");
    assert_eq!(run_ok("print(1 | 2 ^ 3 & 2)"), "1\n");
}

#[test]
fn for_loop_over_array() {
    assert_eq!(
        run_ok("let xs = [1,2,3]; for x in xs { print(x) }"),
        "1\n2\n3\n"
    );
}

#[test]
fn variadic_collects_surplus_arguments_into_a_tuple() {
    assert_eq!(
        run_ok("func f(a, b...) { return b }; print(f(1,2,3,4))"),
        "(2, 3, 4)\n"
    );
    assert_eq!(run_ok("func f(a, b...) { return b }; print(f(1))"), "()\n");
}

#[test]
fn inherited_method_dispatch() {
    let source = "class A { func m(self) { return 1 } } class B : A {} print(B().m())";
    assert_eq!(run_ok(source), "1\n");
}

#[test]
fn unterminated_string_reports_position() {
    let error = run_err("let s = \"he");
    assert_eq!(error.code, ErrorCode::Syntax);
    assert_eq!(error.to_string(), "1: 9: string literal not terminated");
}

#[test]
fn closures_capture_their_defining_frame() {
    let source = indoc! {"
        func make_counter() {
            let n = 0
            func bump() {
                n = n + 1
                return n
            }
            return bump
        }
        let counter = make_counter()
        print(counter())
        print(counter())
        print(counter())
    "};
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn closure_observes_updates_to_the_captured_frame() {
    let source = indoc! {"
        let base = 1
        func get() { return base }
        base = 10
        print(get())
    "};
    assert_eq!(run_ok(source), "10\n");
}

#[test]
fn block_locals_do_not_leak() {
    let source = indoc! {"
        if true {
            let hidden = 5
        }
        print(hidden)
    "};
    let error = run_err(source);
    assert_eq!(error.code, ErrorCode::UndefinedSymbol);
}

#[test]
fn assignment_reaches_enclosing_frame() {
    let source = indoc! {"
        let n = 1
        if true {
            n = 2
        }
        print(n)
    "};
    assert_eq!(run_ok(source), "2\n");
}

#[test]
fn destructuring_assignment() {
    assert_eq!(
        run_ok("let a, b = (1, 2); print(a); print(b)"),
        "1\n2\n"
    );
    assert_eq!(
        run_ok("let a, ...rest = [1, 2, 3]; print(rest)"),
        "[2, 3]\n"
    );
}

#[test]
fn destructuring_arity_mismatch_fails() {
    let error = run_err("let a, b = (1, 2, 3)");
    assert_eq!(error.code, ErrorCode::InvalidArgs);
    let error = run_err("let a, b, c, ...rest = (1, 2)");
    assert_eq!(error.code, ErrorCode::InvalidArgs);
}

#[test]
fn compound_assignment_desugars() {
    assert_eq!(run_ok("let x = 3; x *= 4; print(x)"), "12\n");
    assert_eq!(run_ok("let xs = [1]; xs[0] += 9; print(xs)"), "[10]\n");
}

#[test]
fn while_loop_with_break_and_continue() {
    let source = indoc! {"
        let i = 0
        while true {
            i += 1
            if i == 2 { continue }
            if i > 4 { break }
            print(i)
        }
    "};
    assert_eq!(run_ok(source), "1\n3\n4\n");
}

#[test]
fn map_literals_keep_insertion_order() {
    let source = indoc! {r#"
        let m = {"one": 1, "two": 2}
        print(m)
        print(m["one"])
        m["three"] = 3
        for k, v in m { print(k + "=" + str(v)) }
    "#};
    assert_eq!(
        run_ok(source),
        "{\"one\": 1, \"two\": 2}\n1\none=1\ntwo=2\nthree=3\n"
    );
}

#[test]
fn missing_map_key_is_out_of_range() {
    let error = run_err(r#"let m = {"a": 1}; print(m["b"])"#);
    assert_eq!(error.code, ErrorCode::OutOfRange);
}

#[test]
fn slices_on_arrays_and_strings() {
    assert_eq!(run_ok("print([0,1,2,3,4][1:4])"), "[1, 2, 3]\n");
    assert_eq!(run_ok("print([0,1,2,3,4][::2])"), "[0, 2, 4]\n");
    assert_eq!(run_ok("print([0,1,2,3,4][::-1])"), "[4, 3, 2, 1, 0]\n");
    assert_eq!(run_ok(r#"print("shale"[1:3])"#), "ha\n");
    assert_eq!(run_ok("print([0,1,2][-2:])"), "[1, 2]\n");
}

#[test]
fn negative_index_counts_from_the_end() {
    assert_eq!(run_ok("print([1,2,3][-1])"), "3\n");
    let error = run_err("print([1,2,3][3])");
    assert_eq!(error.code, ErrorCode::OutOfRange);
}

#[test]
fn shared_reference_mutation_is_visible_through_aliases() {
    let source = indoc! {"
        let xs = [1, 2]
        let ys = xs
        ys[0] = 9
        print(xs)
    "};
    assert_eq!(run_ok(source), "[9, 2]\n");
}

#[test]
fn command_declaration_binds_args_array() {
    let source = indoc! {"
        cmd greet {
            for name in args { print(name) }
        }
        greet alice bob
    "};
    assert_eq!(run_ok(source), "alice\nbob\n");
}

#[test]
fn command_arguments_interpolate_variables_and_expressions() {
    let source = indoc! {"
        let dest = \"backup\"
        cmd copy {
            print(len(args))
            print(args)
        }
        copy ../a.txt $dest $(1 + 1) ${dest + \"2\"}
    "};
    assert_eq!(
        run_ok(source),
        "4\n[\"../a.txt\", \"backup\", \"2\", \"backup2\"]\n"
    );
}

#[test]
fn undefined_command_fails() {
    let error = run_err("vanish now");
    assert_eq!(error.code, ErrorCode::UndefinedSymbol);
}

#[test]
fn instance_attributes_and_constructor() {
    let source = indoc! {"
        class Box {
            func init(self, value) {
                self.value = value
            }
            func get(self) { return self.value }
        }
        let b = Box(7)
        print(b.get())
        b.value = 9
        print(b.value)
    "};
    assert_eq!(run_ok(source), "7\n9\n");
}

#[test]
fn interface_default_methods_resolve_last() {
    let source = indoc! {"
        interface Show {
            func describe(self) { return \"something\" }
        }
        class Plain <: Show { }
        class Named <: Show {
            func describe(self) { return \"named\" }
        }
        print(Plain().describe())
        print(Named().describe())
    "};
    assert_eq!(run_ok(source), "something\nnamed\n");
}

#[test]
fn final_class_cannot_be_inherited() {
    let error = run_err("final class A { } class B : A { }");
    assert_eq!(error.code, ErrorCode::InvalidArgs);
}

#[test]
fn builtins_are_const_symbols() {
    let error = run_err("print = 1");
    assert_eq!(error.code, ErrorCode::Assign);
}

#[test]
fn shadowing_a_builtin_in_an_inner_frame_is_fine() {
    let source = indoc! {"
        func f() {
            let len = 3
            return len
        }
        print(f())
        print(len([1]))
    "};
    assert_eq!(run_ok(source), "3\n1\n");
}

#[test]
fn arithmetic_coercion_and_formatting() {
    assert_eq!(run_ok("print(1 + 2.5)"), "3.5\n");
    assert_eq!(run_ok("print(2.5 + 1)"), "3.5\n");
    assert_eq!(run_ok("print(true + 1)"), "2\n");
    assert_eq!(run_ok("print(4.0 / 2)"), "2\n");
    assert_eq!(run_ok("print(7 / 2)"), "3\n");
    assert_eq!(run_ok("print(7 % 3)"), "1\n");
}

#[test]
fn division_by_zero() {
    let error = run_err("print(1 / 0)");
    assert_eq!(error.code, ErrorCode::OutOfRange);
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(
        run_ok("func boom() { return [1][5] }; print(false && boom())"),
        "false\n"
    );
    assert_eq!(
        run_ok("func boom() { return [1][5] }; print(true || boom())"),
        "true\n"
    );
    assert_eq!(run_ok("print(1 < 2 and 3 > 2)"), "true\n");
    assert_eq!(run_ok("print(not nil)"), "true\n");
}

#[test]
fn else_if_chains() {
    let source = indoc! {"
        func grade(n) {
            if n >= 90 { return \"a\" }
            else if n >= 80 { return \"b\" }
            else { return \"c\" }
        }
        print(grade(95))
        print(grade(85))
        print(grade(10))
    "};
    assert_eq!(run_ok(source), "a\nb\nc\n");
}

#[test]
fn recursion() {
    let source = indoc! {"
        func fib(n) {
            if n < 2 { return n }
            return fib(n - 1) + fib(n - 2)
        }
        print(fib(10))
    "};
    assert_eq!(run_ok(source), "55\n");
}

#[test]
fn default_parameters_evaluate_at_call_time() {
    let source = indoc! {"
        func join(a, sep = \", \") {
            return a + sep
        }
        print(join(\"x\"))
        print(join(\"x\", \"-\"))
    "};
    assert_eq!(run_ok(source), "x, \nx-\n");
}

#[test]
fn function_arity_errors() {
    let error = run_err("func f(a, b) { }; f(1)");
    assert_eq!(error.code, ErrorCode::FuncParams);
    let error = run_err("func f(a) { }; f(1, 2)");
    assert_eq!(error.code, ErrorCode::FuncParams);
}

#[test]
fn string_iteration_and_length() {
    assert_eq!(run_ok(r#"for c in "ab" { print(c) }"#), "a\nb\n");
    assert_eq!(run_ok(r#"print(len("héllo"))"#), "5\n");
    assert_eq!(run_ok(r#"print("a\tb")"#), "a\tb\n");
}

#[test]
fn tuple_display_matches_literals() {
    assert_eq!(run_ok("print((1, 2))"), "(1, 2)\n");
    assert_eq!(run_ok("print(())"), "()\n");
    assert_eq!(run_ok(r#"print((1, "x"))"#), "(1, \"x\")\n");
}

#[test]
fn anonymous_functions_are_first_class() {
    let source = indoc! {"
        let twice = func (f, x) { return f(f(x)) }
        let inc = func (n) { return n + 1 }
        print(twice(inc, 5))
    "};
    assert_eq!(run_ok(source), "7\n");
}

#[test]
fn assert_builtin_raises() {
    let error = run_err("assert(1 == 2, \"math is broken\")");
    assert_eq!(error.code, ErrorCode::Assert);
    assert_eq!(error.message, "math is broken");
    assert_eq!(run_ok("assert(1 == 1); print(\"ok\")"), "ok\n");
}

#[test]
fn undefined_symbol_carries_position() {
    let error = run_err("print(\n  missing)");
    assert_eq!(error.code, ErrorCode::UndefinedSymbol);
    let pos = error.pos.expect("position");
    assert_eq!(pos.line, 2);
    assert_eq!(pos.col, 3);
}

#[test]
fn path_methods() {
    assert_eq!(
        run_ok(r#"print(path("/tmp/logs") / "today.txt")"#),
        "/tmp/logs/today.txt\n"
    );
    assert_eq!(
        run_ok(r#"print(path("/tmp/archive.tar").filename())"#),
        "archive.tar\n"
    );
    assert_eq!(
        run_ok(r#"print(path("/tmp/archive.tar").stem())"#),
        "archive\n"
    );
    assert_eq!(
        run_ok(r#"print(path("/tmp/archive.tar").extension())"#),
        ".tar\n"
    );
    assert_eq!(
        run_ok(r#"print(path("/no/such/file-xyz").exists())"#),
        "false\n"
    );
    let error = run_err(r#"print(path("/no/such/file-xyz").size())"#);
    assert_eq!(error.code, ErrorCode::File);
}

#[test]
fn import_binds_public_module_symbols() {
    let dir = std::env::temp_dir().join(format!("shale-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    let module_path = dir.join("mathlib.sl");
    std::fs::write(
        &module_path,
        indoc! {"
            let answer = 42
            let _secret = 7
            func double(n) { return n * 2 }
        "},
    )
    .expect("write module");

    let source = format!(
        indoc! {r#"
            import "{}" as mathlib
            print(mathlib.answer)
            print(mathlib.double(21))
        "#},
        module_path.display()
    );
    assert_eq!(run_ok(&source), "42\n42\n");

    let hidden = format!(
        "import \"{}\" as mathlib\nprint(mathlib._secret)",
        module_path.display()
    );
    let error = run_err(&hidden);
    assert_eq!(error.code, ErrorCode::UndefinedSymbol);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn import_of_missing_file_is_a_file_error() {
    let error = run_err("import \"/no/such/module.sl\" as missing");
    assert_eq!(error.code, ErrorCode::File);
}

#[test]
fn type_and_conversion_builtins() {
    assert_eq!(run_ok("print(type(1))"), "int\n");
    assert_eq!(run_ok("print(type(1.5))"), "real\n");
    assert_eq!(run_ok("class A { } print(type(A()))"), "A\n");
    assert_eq!(run_ok("print(int(\"42\") + 1)"), "43\n");
    assert_eq!(run_ok("print(str(12) + \"!\")"), "12!\n");
    assert_eq!(run_ok("print(bool(\"\"))"), "false\n");
}

#[test]
fn semicolons_terminate_statements() {
    assert_eq!(run_ok("let a = 1; let b = 2; print(a + b)"), "3\n");
}

#[test]
fn comments_are_ignored() {
    let source = indoc! {"
        # setup
        let n = 1 # trailing
        print(n)
    "};
    assert_eq!(run_ok(source), "1\n");
}

#[test]
fn return_outside_function_fails() {
    let error = run_err("return 1");
    assert_eq!(error.code, ErrorCode::InvalidArgs);
}

#[test]
fn methods_are_first_class_bound_values() {
    let source = indoc! {"
        class Greeter {
            func init(self, name) { self.name = name }
            func hello(self) { return \"hi \" + self.name }
        }
        let g = Greeter(\"ada\")
        let m = g.hello
        print(m())
    "};
    assert_eq!(run_ok(source), "hi ada\n");
}

#[test]
fn parent_methods_see_child_attributes() {
    let source = indoc! {"
        class Animal {
            func speak(self) { return self.sound }
        }
        class Dog : Animal {
            func init(self) { self.sound = \"woof\" }
        }
        print(Dog().speak())
    "};
    assert_eq!(run_ok(source), "woof\n");
}
