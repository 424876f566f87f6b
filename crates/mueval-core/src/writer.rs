//! External textual form of values
//!
//! Rendering is bounded by a node quota so cyclic structures built with
//! `set-car!`/`set-cdr!` terminate. Output is re-readable for the data
//! subset (nil, booleans, characters, integers, strings, symbols, pairs):
//! strings come back escaped and the named characters print as `#\space`
//! and `#\newline`. Environments and procedures print as banners.

use crate::arena::Arena;
use crate::value::{Value, FALSE, TRUE};
use std::fmt::Write;

/// Default node quota of the writer.
pub const WRITE_NODES: usize = 200;

/// Render a value within the given node quota.
pub fn render(arena: &Arena, v: Value, quota: usize) -> String {
    let mut out = String::new();
    let mut budget = quota;
    write_value(arena, v, &mut budget, &mut out);
    out
}

fn write_value(arena: &Arena, v: Value, budget: &mut usize, out: &mut String) {
    if *budget == 0 {
        return;
    }
    *budget -= 1;
    if v.is_nil() {
        out.push_str("()");
    } else if v == TRUE {
        out.push_str("#T");
    } else if v == FALSE {
        out.push_str("#F");
    } else if v.is_char() {
        write_char(v.char_of(), out);
    } else if arena.is_string(v) {
        write_string(&arena.string_text(v), out);
    } else if arena.is_integer(v) {
        let _ = write!(out, "{}", arena.integer_of(v));
    } else if arena.is_symbol(v) {
        out.push_str(&arena.symbol_name(v));
    } else if arena.hint_environment_p(v) {
        let _ = writeln!(
            out,
            "[ -- Environment -- Parent: 0x{:X} -- ]",
            arena.parent_env(v).0
        );
        let mut frame = arena.first_frame(v);
        while !frame.is_nil() && *budget > 0 {
            out.push('[');
            write_value(arena, arena.first_binding(frame), budget, out);
            out.push_str("]\n");
            frame = arena.rest_bindings(frame);
        }
    } else if arena.hint_procedure_p(v) {
        if arena.proc_env(v).is_nil() {
            let _ = write!(
                out,
                "[Reserved word :: {}]",
                arena.symbol_name(arena.proc_text(v))
            );
        } else {
            let _ = write!(out, "[Compound-procedure :: 0x{:X}]", v.0);
        }
    } else if arena.cell_p(v) {
        out.push('(');
        write_list(arena, v, budget, out);
        out.push(')');
    } else {
        out.push_str("#<unprintable>");
    }
}

fn write_list(arena: &Arena, list: Value, budget: &mut usize, out: &mut String) {
    let mut list = list;
    loop {
        if *budget == 0 {
            return;
        }
        *budget -= 1;
        write_value(arena, arena.car(list), budget, out);
        let rest = arena.cdr(list);
        if rest.is_nil() {
            return;
        }
        if arena.cell_p(rest) && !arena.hint_environment_p(rest) && !arena.hint_procedure_p(rest) {
            out.push(' ');
            list = rest;
        } else {
            out.push_str(" . ");
            write_value(arena, rest, budget, out);
            return;
        }
    }
}

fn write_char(code: i32, out: &mut String) {
    match code {
        32 => out.push_str("#\\space"),
        10 => out.push_str("#\\newline"),
        33..=126 | 128..=255 => {
            out.push_str("#\\");
            out.push(code as u8 as char);
        }
        _ => out.push_str("#\\-"),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{bool_value, char_value, install_keywords};

    fn boot() -> Arena {
        let mut a = Arena::new();
        install_keywords(&mut a).unwrap();
        a
    }

    #[test]
    fn atoms_render_in_external_form() {
        let mut a = boot();
        assert_eq!(render(&a, Value::NIL, WRITE_NODES), "()");
        assert_eq!(render(&a, bool_value(true), WRITE_NODES), "#T");
        assert_eq!(render(&a, bool_value(false), WRITE_NODES), "#F");
        assert_eq!(render(&a, char_value(b'a' as i32), WRITE_NODES), "#\\a");
        assert_eq!(render(&a, char_value(32), WRITE_NODES), "#\\space");
        assert_eq!(render(&a, char_value(10), WRITE_NODES), "#\\newline");
        let n = a.int_value(-12345).unwrap();
        assert_eq!(render(&a, n, WRITE_NODES), "-12345");
        let s = a.symbol_value("lambda-list").unwrap();
        assert_eq!(render(&a, s, WRITE_NODES), "lambda-list");
    }

    #[test]
    fn strings_render_escaped() {
        let mut a = boot();
        let s = a.string_value("say \"hi\"\\now\n").unwrap();
        assert_eq!(
            render(&a, s, WRITE_NODES),
            "\"say \\\"hi\\\"\\\\now\\n\""
        );
    }

    #[test]
    fn lists_and_dotted_tails() {
        let mut a = boot();
        let one = a.int_value(1).unwrap();
        let two = a.int_value(2).unwrap();
        let three = a.int_value(3).unwrap();
        let mut l = a.cons(three, Value::NIL).unwrap();
        a.regs.val = l;
        l = a.cons(two, l).unwrap();
        a.regs.val = l;
        l = a.cons(one, l).unwrap();
        a.regs.val = l;
        assert_eq!(render(&a, l, WRITE_NODES), "(1 2 3)");

        let d = a.cons(one, two).unwrap();
        a.regs.val = d;
        assert_eq!(render(&a, d, WRITE_NODES), "(1 . 2)");

        let nested = a.cons(d, Value::NIL).unwrap();
        a.regs.val = nested;
        assert_eq!(render(&a, nested, WRITE_NODES), "((1 . 2))");
    }

    #[test]
    fn quota_bounds_cyclic_structures() {
        let mut a = boot();
        let one = a.int_value(1).unwrap();
        let c = a.cons(one, Value::NIL).unwrap();
        a.set_cdr(c, c);
        a.regs.val = c;
        let out = render(&a, c, 20);
        assert!(out.starts_with("(1 1 1"));
        assert!(out.len() < 200);
    }

    #[test]
    fn procedure_banners() {
        let mut a = boot();
        let key = a.symbol_value("car").unwrap();
        let p = a.cons(key, Value::NIL).unwrap();
        a.set_hint_procedure(p);
        a.regs.val = p;
        assert_eq!(render(&a, p, WRITE_NODES), "[Reserved word :: car]");
    }
}
