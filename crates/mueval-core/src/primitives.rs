//! Built-in procedures
//!
//! Built-ins route on the reserved symbol stored in the procedure cell.
//! Argument checks are gated by the syntax-check flag, the way every other
//! form check is; with the flag off, ill-typed arguments read as nil or
//! zero instead of faulting. Division by zero and arithmetic overflow are
//! always errors.

use crate::error::{ErrorKind, EvalResult, SchemeError};
use crate::evaluator::Interp;
use crate::value::{bool_value, Value, FALSE, TRUE};

fn arity_error(interp: &Interp, name: &str, args: Value) -> SchemeError {
    SchemeError::new(
        ErrorKind::Arity,
        format!("illegal arguments for \"{name}\": {}", interp.render(args)),
    )
}

fn overflow_error(name: &str) -> SchemeError {
    SchemeError::new(ErrorKind::Overflow, format!("integer overflow in \"{name}\""))
}

fn check_none(interp: &Interp, name: &str, args: Value) -> EvalResult {
    if interp.syntax_check && !args.is_nil() {
        return Err(arity_error(interp, name, args));
    }
    Ok(())
}

fn check_one(interp: &Interp, name: &str, args: Value) -> EvalResult {
    if interp.syntax_check && (args.is_nil() || !interp.arena.cdr(args).is_nil()) {
        return Err(arity_error(interp, name, args));
    }
    Ok(())
}

fn check_two(interp: &Interp, name: &str, args: Value) -> EvalResult {
    if interp.syntax_check && interp.arena.list_len(args) != 2 {
        return Err(arity_error(interp, name, args));
    }
    Ok(())
}

fn check_integer(interp: &Interp, name: &str, args: Value, v: Value) -> EvalResult {
    if interp.syntax_check && !interp.arena.is_integer(v) {
        return Err(arity_error(interp, name, args));
    }
    Ok(())
}

/// Composed accessor path: `cadr` walks d then a. Depths two to four are
/// reserved; `car`/`cdr` themselves have their own arms.
fn cxr_path(name: &str) -> Option<&str> {
    let b = name.as_bytes();
    if (4..=6).contains(&b.len())
        && b[0] == b'c'
        && b[b.len() - 1] == b'r'
        && b[1..b.len() - 1].iter().all(|&c| c == b'a' || c == b'd')
    {
        Some(&name[1..name.len() - 1])
    } else {
        None
    }
}

fn apply_cxr(interp: &Interp, name: &str, path: &str, args: Value) -> EvalResult<Value> {
    if interp.syntax_check && (args.is_nil() || !interp.arena.cdr(args).is_nil()) {
        return Err(arity_error(interp, name, args));
    }
    let mut sv = interp.arena.car(args);
    for step in path.bytes().rev() {
        if interp.syntax_check && !interp.arena.cell_p(sv) {
            return Err(arity_error(interp, name, args));
        }
        sv = if step == b'a' {
            interp.arena.car(sv)
        } else {
            interp.arena.cdr(sv)
        };
    }
    Ok(sv)
}

fn chained_compare(
    interp: &Interp,
    name: &str,
    args: Value,
    rel: fn(i64, i64) -> bool,
) -> EvalResult<Value> {
    if !args.is_nil() {
        let first = interp.arena.car(args);
        check_integer(interp, name, args, first)?;
    }
    if args.is_nil() || interp.arena.cdr(args).is_nil() {
        return Ok(TRUE);
    }
    let mut x = interp.arena.integer_of(interp.arena.car(args));
    let mut rest = interp.arena.cdr(args);
    loop {
        let y = x;
        let v = interp.arena.car(rest);
        check_integer(interp, name, args, v)?;
        x = interp.arena.integer_of(v);
        rest = interp.arena.cdr(rest);
        if rest.is_nil() || !rel(y, x) {
            return Ok(bool_value(rel(y, x)));
        }
    }
}

/// Apply the built-in named by the reserved symbol `key` to `args`. The
/// argument list is reachable through the argl register, so allocating
/// built-ins only need to protect their own intermediates.
pub fn apply_builtin(interp: &mut Interp, key: Value, args: Value) -> EvalResult<Value> {
    let name = interp.arena.symbol_name(key);
    match name.as_str() {
        "car" => {
            if interp.syntax_check
                && !(interp.arena.cell_p(interp.arena.car(args))
                    && interp.arena.cdr(args).is_nil())
            {
                return Err(arity_error(interp, "car", args));
            }
            Ok(interp.arena.car(interp.arena.car(args)))
        }
        "cdr" => {
            if interp.syntax_check
                && !(interp.arena.cell_p(interp.arena.car(args))
                    && interp.arena.cdr(args).is_nil())
            {
                return Err(arity_error(interp, "cdr", args));
            }
            Ok(interp.arena.cdr(interp.arena.car(args)))
        }
        "cons" => {
            check_two(interp, "cons", args)?;
            let a = interp.arena.car(args);
            let d = interp.arena.first_arg(args);
            interp.arena.cons(a, d)
        }
        "set-car!" => {
            if interp.syntax_check
                && !(interp.arena.list_len(args) == 2
                    && interp.arena.cell_p(interp.arena.car(args)))
            {
                return Err(arity_error(interp, "set-car!", args));
            }
            let pair = interp.arena.car(args);
            let v = interp.arena.first_arg(args);
            interp.arena.set_car(pair, v);
            Ok(pair)
        }
        "set-cdr!" => {
            if interp.syntax_check
                && !(interp.arena.list_len(args) == 2
                    && interp.arena.cell_p(interp.arena.car(args)))
            {
                return Err(arity_error(interp, "set-cdr!", args));
            }
            let pair = interp.arena.car(args);
            let v = interp.arena.first_arg(args);
            interp.arena.set_cdr(pair, v);
            Ok(pair)
        }
        "+" => {
            let mut x: i64 = 0;
            let mut rest = args;
            while !rest.is_nil() {
                let v = interp.arena.car(rest);
                check_integer(interp, "+", args, v)?;
                x = x
                    .checked_add(interp.arena.integer_of(v))
                    .ok_or_else(|| overflow_error("+"))?;
                rest = interp.arena.cdr(rest);
            }
            interp.arena.int_value(x)
        }
        "-" => {
            if interp.syntax_check && args.is_nil() {
                return Err(arity_error(interp, "-", args));
            }
            let first = interp.arena.car(args);
            check_integer(interp, "-", args, first)?;
            let mut x = interp.arena.integer_of(first);
            let mut rest = interp.arena.cdr(args);
            if rest.is_nil() {
                let neg = x.checked_neg().ok_or_else(|| overflow_error("-"))?;
                return interp.arena.int_value(neg);
            }
            while !rest.is_nil() {
                let v = interp.arena.car(rest);
                check_integer(interp, "-", args, v)?;
                x = x
                    .checked_sub(interp.arena.integer_of(v))
                    .ok_or_else(|| overflow_error("-"))?;
                rest = interp.arena.cdr(rest);
            }
            interp.arena.int_value(x)
        }
        "*" => {
            let mut x: i64 = 1;
            let mut rest = args;
            while !rest.is_nil() {
                let v = interp.arena.car(rest);
                check_integer(interp, "*", args, v)?;
                x = x
                    .checked_mul(interp.arena.integer_of(v))
                    .ok_or_else(|| overflow_error("*"))?;
                rest = interp.arena.cdr(rest);
            }
            interp.arena.int_value(x)
        }
        "/" => {
            // real-division accumulation, floored once at the end
            if interp.syntax_check && args.is_nil() {
                return Err(arity_error(interp, "/", args));
            }
            let first = interp.arena.car(args);
            check_integer(interp, "/", args, first)?;
            let x = interp.arena.integer_of(first);
            let mut xf = x as f64;
            let rest = interp.arena.cdr(args);
            if rest.is_nil() {
                if x == 0 {
                    return Err(SchemeError::new(ErrorKind::Arity, "division by zero"));
                }
                return interp.arena.int_value((1.0 / xf).floor() as i64);
            }
            let mut rest = rest;
            while !rest.is_nil() {
                let v = interp.arena.car(rest);
                check_integer(interp, "/", args, v)?;
                let d = interp.arena.integer_of(v);
                if d == 0 {
                    return Err(SchemeError::new(ErrorKind::Arity, "division by zero"));
                }
                xf /= d as f64;
                rest = interp.arena.cdr(rest);
            }
            interp.arena.int_value(xf.floor() as i64)
        }
        "<" => chained_compare(interp, "<", args, |a, b| a < b),
        "<=" => chained_compare(interp, "<=", args, |a, b| a <= b),
        "=" => chained_compare(interp, "=", args, |a, b| a == b),
        ">" => chained_compare(interp, ">", args, |a, b| a > b),
        ">=" => chained_compare(interp, ">=", args, |a, b| a >= b),
        "not" => {
            check_one(interp, "not", args)?;
            Ok(bool_value(interp.arena.car(args) == FALSE))
        }
        "eq?" => {
            check_two(interp, "eq?", args)?;
            let a = interp.arena.car(args);
            let b = interp.arena.first_arg(args);
            Ok(bool_value(interp.arena.equal_p(a, b)))
        }
        "null?" => {
            check_one(interp, "null?", args)?;
            Ok(bool_value(interp.arena.car(args).is_nil()))
        }
        "pair?" => {
            check_one(interp, "pair?", args)?;
            Ok(bool_value(interp.arena.cell_p(interp.arena.car(args))))
        }
        "list?" => {
            check_one(interp, "list?", args)?;
            Ok(bool_value(interp.arena.list_p(interp.arena.car(args))))
        }
        "integer?" => {
            check_one(interp, "integer?", args)?;
            Ok(bool_value(interp.arena.is_integer(interp.arena.car(args))))
        }
        "number?" => {
            check_one(interp, "number?", args)?;
            Ok(bool_value(interp.arena.is_number(interp.arena.car(args))))
        }
        "symbol?" => {
            check_one(interp, "symbol?", args)?;
            Ok(bool_value(interp.arena.is_symbol(interp.arena.car(args))))
        }
        "string?" => {
            check_one(interp, "string?", args)?;
            Ok(bool_value(interp.arena.is_string(interp.arena.car(args))))
        }
        "odd?" => {
            check_one(interp, "odd?", args)?;
            let v = interp.arena.car(args);
            check_integer(interp, "odd?", args, v)?;
            Ok(bool_value(interp.arena.integer_of(v) & 1 != 0))
        }
        "even?" => {
            check_one(interp, "even?", args)?;
            let v = interp.arena.car(args);
            check_integer(interp, "even?", args, v)?;
            Ok(bool_value(interp.arena.integer_of(v) & 1 == 0))
        }
        "list" => Ok(args),
        "length" => {
            check_one(interp, "length", args)?;
            if interp.syntax_check && !interp.arena.list_p(interp.arena.car(args)) {
                return Err(arity_error(interp, "length", args));
            }
            let n = interp.arena.list_len(interp.arena.car(args));
            interp.arena.int_value(n as i64)
        }
        "write" => {
            check_one(interp, "write", args)?;
            println!("{}", interp.render(interp.arena.car(args)));
            Ok(Value::NIL)
        }
        "newline" => {
            check_none(interp, "newline", args)?;
            println!();
            Ok(Value::NIL)
        }
        "read" => {
            check_none(interp, "read", args)?;
            Err(SchemeError::new(
                ErrorKind::User,
                "\"read\" is reserved and not wired to an input stream",
            ))
        }
        "error" => {
            if interp.syntax_check && interp.arena.list_len(args) > 1 {
                return Err(arity_error(interp, "error", args));
            }
            let msg = if args.is_nil() {
                String::new()
            } else {
                interp.render(interp.arena.car(args))
            };
            Err(SchemeError::new(ErrorKind::User, msg))
        }
        "gcstat" => {
            check_none(interp, "gcstat", args)?;
            // (cell-free storage-free stack-free label-stack-free), built
            // nose first with each partial list protected
            let labels_free = interp.labels_free() as i64;
            let a = &mut interp.arena;
            let mut sv = a.new_cell()?;
            a.push_pointer(sv)?;
            let n = a.int_value(labels_free)?;
            a.set_car(sv, n);
            sv = a.new_cell()?;
            let x = a.pop_pointer()?;
            a.set_cdr(sv, x);
            a.push_pointer(sv)?;
            let n = a.int_value(a.stat_stack_free() as i64)?;
            a.set_car(sv, n);
            sv = a.new_cell()?;
            let x = a.pop_pointer()?;
            a.set_cdr(sv, x);
            a.push_pointer(sv)?;
            let n = a.int_value(a.stat_storage_free() as i64)?;
            a.set_car(sv, n);
            sv = a.new_cell()?;
            let x = a.pop_pointer()?;
            a.set_cdr(sv, x);
            a.push_pointer(sv)?;
            let n = a.int_value(a.stat_cells_free() as i64)?;
            a.set_car(sv, n);
            a.pop_pointer()
        }
        "gcstatwrite" => {
            check_none(interp, "gcstatwrite", args)?;
            print!(
                "\n{}\n",
                interp.arena.statistics_string(interp.labels_free())
            );
            Ok(Value::NIL)
        }
        "garbagecollect" => {
            check_none(interp, "garbagecollect", args)?;
            interp.arena.garbage_collect();
            Ok(Value::NIL)
        }
        "synchecktoggle" => {
            check_none(interp, "synchecktoggle", args)?;
            let previous = interp.syntax_check;
            interp.syntax_check = !previous;
            Ok(bool_value(previous))
        }
        "memdump" => {
            check_none(interp, "memdump", args)?;
            print!("{}", interp.arena.dump_string());
            Ok(Value::NIL)
        }
        _ => {
            if let Some(path) = cxr_path(&name) {
                return apply_cxr(interp, &name, path, args);
            }
            Err(SchemeError::new(
                ErrorKind::Unapplicable,
                format!("application of unapplicable reserved word {name}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Vec<String> {
        let mut interp = Interp::new().unwrap();
        interp.eval_script(src).unwrap()
    }

    fn run_one(src: &str) -> String {
        run(src).pop().unwrap()
    }

    fn run_err(src: &str) -> SchemeError {
        let mut interp = Interp::new().unwrap();
        interp.eval_script(src).unwrap_err()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run_one("(+ 1 2 3 4) "), "10");
        assert_eq!(run_one("(+) "), "0");
        assert_eq!(run_one("(- 10 3 2) "), "5");
        assert_eq!(run_one("(- 4) "), "-4");
        assert_eq!(run_one("(*) "), "1");
        assert_eq!(run_one("(* 2 3 4) "), "24");
        assert_eq!(run_one("(* 70000 70000) "), "4900000000");
    }

    #[test]
    fn division_floors_toward_negative_infinity() {
        assert_eq!(run_one("(/ 7 2) "), "3");
        assert_eq!(run_one("(/ -7 2) "), "-4");
        assert_eq!(run_one("(/ 7 -2) "), "-4");
        assert_eq!(run_one("(/ 12 2 3) "), "2");
        assert_eq!(run_one("(/ 5) "), "0");
        assert_eq!(run_one("(/ 1) "), "1");
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(run_err("(/ 1 0) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(/ 0) ").kind, ErrorKind::Arity);
    }

    #[test]
    fn arithmetic_overflow_is_an_error() {
        assert_eq!(
            run_err("(+ 9223372036854775807 1) ").kind,
            ErrorKind::Overflow
        );
        assert_eq!(
            run_err("(* 9223372036854775807 2) ").kind,
            ErrorKind::Overflow
        );
    }

    #[test]
    fn chained_comparisons() {
        assert_eq!(run_one("(< 1 2 3) "), "#T");
        assert_eq!(run_one("(< 1 3 2) "), "#F");
        assert_eq!(run_one("(<= 1 1 2) "), "#T");
        assert_eq!(run_one("(= 5 5 5) "), "#T");
        assert_eq!(run_one("(= 5 5 6) "), "#F");
        assert_eq!(run_one("(> 3 2 1) "), "#T");
        assert_eq!(run_one("(>= 3 3 1) "), "#T");
        assert_eq!(run_one("(< 1) "), "#T");
        assert_eq!(run_one("(<) "), "#T");
    }

    #[test]
    fn list_primitives() {
        assert_eq!(run_one("(cons 1 2) "), "(1 . 2)");
        assert_eq!(run_one("(car (cons 1 2)) "), "1");
        assert_eq!(run_one("(cdr (cons 1 2)) "), "2");
        assert_eq!(run_one("(list 1 2 3) "), "(1 2 3)");
        assert_eq!(run_one("(list) "), "()");
        assert_eq!(run_one("(length '(a b c d)) "), "4");
        assert_eq!(run_one("(length '()) "), "0");
    }

    #[test]
    fn composed_accessors() {
        assert_eq!(run_one("(cadr '(1 2 3)) "), "2");
        assert_eq!(run_one("(caddr '(1 2 3)) "), "3");
        assert_eq!(run_one("(caar '((1 2) 3)) "), "1");
        assert_eq!(run_one("(cddr '(1 2 3 4)) "), "(3 4)");
        assert_eq!(run_one("(cadddr '(1 2 3 4)) "), "4");
        assert_eq!(run_one("(cddddr '(1 2 3 4 5 6)) "), "(5 6)");
        assert_eq!(run_err("(cadr '(1)) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(cadr 5) ").kind, ErrorKind::Arity);
    }

    #[test]
    fn mutators_return_the_pair() {
        assert_eq!(
            run("(define p (cons 1 2)) (set-car! p 9) p "),
            ["()", "(9 . 2)", "(9 . 2)"]
        );
        assert_eq!(run_one("(define p (cons 1 2)) (set-cdr! p 9) p "), "(1 . 9)");
    }

    #[test]
    fn predicates() {
        assert_eq!(run_one("(null? '()) "), "#T");
        assert_eq!(run_one("(null? 1) "), "#F");
        assert_eq!(run_one("(pair? (cons 1 2)) "), "#T");
        assert_eq!(run_one("(pair? '()) "), "#F");
        assert_eq!(run_one("(list? '(1 2)) "), "#T");
        assert_eq!(run_one("(list? (cons 1 2)) "), "#F");
        assert_eq!(run_one("(list? '()) "), "#T");
        assert_eq!(run_one("(integer? 3) "), "#T");
        assert_eq!(run_one("(number? 70000) "), "#T");
        assert_eq!(run_one("(integer? 'a) "), "#F");
    }

    #[test]
    fn more_predicates() {
        assert_eq!(run_one("(symbol? 'abc) "), "#T");
        assert_eq!(run_one("(symbol? \"abc\") "), "#F");
        assert_eq!(run_one("(string? \"abc\") "), "#T");
        assert_eq!(run_one("(string? 'abc) "), "#F");
        assert_eq!(run_one("(odd? 3) "), "#T");
        assert_eq!(run_one("(odd? -3) "), "#T");
        assert_eq!(run_one("(even? 4) "), "#T");
        assert_eq!(run_one("(even? -4) "), "#T");
        assert_eq!(run_one("(not #f) "), "#T");
        assert_eq!(run_one("(not '()) "), "#F");
        assert_eq!(run_one("(not 0) "), "#F");
    }

    #[test]
    fn eq_follows_value_identity() {
        assert_eq!(run_one("(eq? 'a 'a) "), "#T");
        assert_eq!(run_one("(eq? 'frobnicate 'frobnicate) "), "#T");
        assert_eq!(run_one("(eq? 1 1) "), "#T");
        assert_eq!(run_one("(eq? 100000 100000) "), "#T");
        assert_eq!(run_one("(eq? \"ab\" 'ab) "), "#F");
        assert_eq!(run_one("(eq? (cons 1 2) (cons 1 2)) "), "#F");
        assert_eq!(run_one("(define p (cons 1 2)) (eq? p p) "), "#T");
    }

    #[test]
    fn gcstat_returns_four_counters() {
        assert_eq!(run_one("(length (gcstat)) "), "4");
    }

    #[test]
    fn synchecktoggle_reports_the_previous_setting() {
        assert_eq!(run("(synchecktoggle) (synchecktoggle) "), ["#T", "#F"]);
    }

    #[test]
    fn user_error_surfaces() {
        let e = run_err("(error \"boom\") ");
        assert_eq!(e.kind, ErrorKind::User);
        assert!(e.message.contains("boom"));
        assert_eq!(run_err("(error) ").kind, ErrorKind::User);
    }

    #[test]
    fn read_is_a_stub() {
        assert_eq!(run_err("(read) ").kind, ErrorKind::User);
    }

    #[test]
    fn arity_violations() {
        assert_eq!(run_err("(car) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(car '(1) '(2)) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(car 5) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(cons 1) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(not) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(+ 1 'a) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(length 5) ").kind, ErrorKind::Arity);
        assert_eq!(run_err("(newline 1) ").kind, ErrorKind::Arity);
    }

    #[test]
    fn garbagecollect_is_callable_mid_program() {
        assert_eq!(
            run_one("(define l '(1 2 3)) (garbagecollect) (length l) "),
            "3"
        );
    }
}
