//! Environments, frames, bindings and procedure cells
//!
//! An environment is a cell with the env-header hint: car is the parent
//! environment (or nil), cdr the topmost frame. A frame is a list of
//! bindings; a binding is a cell (symbol . value). A procedure is a cell
//! with the procedure-header hint: built-ins are (key . nil), compound
//! procedures are (lambda-text . captured-env).
//!
//! The allocating helpers here follow the protection contract: any value
//! that must survive a possible collection is either reachable from a
//! register at the call site or pushed onto the pointer stack around the
//! allocation.

use crate::arena::Arena;
use crate::error::{ErrorKind, EvalResult, SchemeError};
use crate::value::Value;

impl Arena {
    // -----------------------------------------------------------------
    // environments and frames

    pub fn first_frame(&self, env: Value) -> Value {
        debug_assert!(self.hint_environment_p(env));
        self.cdr(env)
    }

    pub fn parent_env(&self, env: Value) -> Value {
        debug_assert!(self.hint_environment_p(env));
        self.car(env)
    }

    /// Replace the topmost frame; restores the header hint that the raw
    /// cdr store wipes.
    fn set_first_frame(&mut self, env: Value, frame: Value) {
        debug_assert!(self.hint_environment_p(env));
        self.set_cdr(env, frame);
        self.set_hint_environment(env);
    }

    pub fn first_binding(&self, frame: Value) -> Value {
        self.car(frame)
    }

    pub fn rest_bindings(&self, frame: Value) -> Value {
        self.cdr(frame)
    }

    pub fn binding_variable(&self, binding: Value) -> Value {
        self.car(binding)
    }

    pub fn binding_value(&self, binding: Value) -> Value {
        self.cdr(binding)
    }

    /// Find a binding in one frame; nil when absent.
    pub fn binding_in_frame(&self, var: Value, frame: Value) -> Value {
        let mut frame = frame;
        while !frame.is_nil() {
            let b = self.first_binding(frame);
            if self.equal_p(var, self.binding_variable(b)) {
                return b;
            }
            frame = self.rest_bindings(frame);
        }
        Value::NIL
    }

    /// Find a binding anywhere along the environment chain; nil when absent.
    pub fn binding_in_env(&self, var: Value, env: Value) -> Value {
        let mut env = env;
        while !env.is_nil() {
            let b = self.binding_in_frame(var, self.first_frame(env));
            if !b.is_nil() {
                return b;
            }
            env = self.parent_env(env);
        }
        Value::NIL
    }

    /// The starting environment: binds `!!` to a greeting string and
    /// `begin_env` to the environment itself.
    pub fn create_begin_env(&mut self) -> EvalResult<Value> {
        let be = self.new_cell()?;
        self.push_pointer(be)?;
        let p1 = self.new_cell()?;
        self.set_cdr(be, p1);
        let b1 = self.new_cell()?;
        self.set_car(p1, b1);
        let bang = self.symbol_value("!!")?;
        self.set_car(b1, bang);
        let greeting = self.string_value(concat!("mueval ", env!("CARGO_PKG_VERSION")))?;
        self.set_cdr(b1, greeting);
        let p2 = self.new_cell()?;
        self.set_cdr(p1, p2);
        let b2 = self.new_cell()?;
        self.set_car(p2, b2);
        let name = self.symbol_value("begin_env")?;
        self.set_car(b2, name);
        self.set_cdr(b2, be);
        self.set_hint_environment(be);
        self.pop_pointer()?;
        Ok(be)
    }

    /// Prepend a new binding to the topmost frame.
    pub fn define_variable(&mut self, var: Value, val: Value, env: Value) -> EvalResult {
        debug_assert!(self.hint_environment_p(env));
        let b = self.cons(var, val)?;
        self.push_pointer(b)?;
        let frame = self.first_frame(env);
        let f = self.adjoin_binding(b, frame)?;
        self.pop_pointer()?;
        self.set_first_frame(env, f);
        Ok(())
    }

    /// Destructively update an existing binding anywhere in the chain.
    pub fn set_variable(&mut self, var: Value, val: Value, env: Value) -> EvalResult {
        debug_assert!(self.hint_environment_p(env) && self.is_symbol(var));
        let b = self.binding_in_env(var, env);
        if b.is_nil() {
            return Err(SchemeError::new(
                ErrorKind::Unbound,
                format!(
                    "unable to modify undefined variable {}",
                    self.symbol_name(var)
                ),
            ));
        }
        self.set_cdr(b, val);
        Ok(())
    }

    /// Build a frame binding `vars` to `vals`. A bare symbol takes the whole
    /// value list; a dotted tail symbol takes the remainder. Both inputs
    /// must be reachable by the collector at the call site.
    fn make_frame(&mut self, vars: Value, vals: Value) -> EvalResult<Value> {
        if self.is_symbol(vars) {
            let b = self.cons(vars, vals)?;
            self.push_pointer(b)?;
            let f = self.adjoin_binding(b, Value::NIL)?;
            self.pop_pointer()?;
            return Ok(f);
        }
        if self.cell_p(vars) && self.cell_p(vals) {
            let mut vars = vars;
            let mut vals = vals;
            let a = self.car(vars);
            let d = self.car(vals);
            let mut b = self.cons(a, d)?;
            vars = self.cdr(vars);
            vals = self.cdr(vals);
            self.push_pointer(b)?;
            let frame = self.cons(b, Value::NIL)?;
            self.pop_pointer()?;
            self.push_pointer(frame)?;
            let mut end = frame;
            while self.cell_p(vars) && self.cell_p(vals) {
                let link = self.cons(Value::NIL, Value::NIL)?;
                self.set_cdr(end, link);
                end = link;
                let a = self.car(vars);
                let d = self.car(vals);
                b = self.cons(a, d)?;
                self.set_car(end, b);
                vars = self.cdr(vars);
                vals = self.cdr(vals);
            }
            if self.is_symbol(vars) {
                let link = self.cons(Value::NIL, Value::NIL)?;
                self.set_cdr(end, link);
                end = link;
                b = self.cons(vars, vals)?;
                self.set_car(end, b);
            } else if !vars.is_nil() || !vals.is_nil() {
                self.pop_pointer()?;
                return Err(SchemeError::new(
                    ErrorKind::Arity,
                    "parameter and argument lists do not match",
                ));
            }
            self.pop_pointer()?;
            return Ok(frame);
        }
        Err(SchemeError::new(
            ErrorKind::Arity,
            "parameter and argument lists do not match",
        ))
    }

    /// Extend `base` with a frame binding `vars` to `vals`; with neither
    /// variables nor values, the base environment is reused as is.
    pub fn extend_environment(
        &mut self,
        vars: Value,
        vals: Value,
        base: Value,
    ) -> EvalResult<Value> {
        debug_assert!(self.hint_environment_p(base));
        if vars.is_nil() && vals.is_nil() {
            return Ok(base);
        }
        let frame = self.make_frame(vars, vals)?;
        self.push_pointer(frame)?;
        let env = self.cons(base, frame)?;
        self.set_hint_environment(env);
        self.pop_pointer()?;
        Ok(env)
    }

    // -----------------------------------------------------------------
    // procedure cells

    pub fn proc_env(&self, p: Value) -> Value {
        debug_assert!(self.hint_procedure_p(p));
        self.cdr(p)
    }

    pub fn proc_text(&self, p: Value) -> Value {
        debug_assert!(self.hint_procedure_p(p));
        self.car(p)
    }

    /// Body sequence of a compound procedure's lambda text.
    pub fn proc_body(&self, p: Value) -> Value {
        let text = self.proc_text(p);
        self.cdr(self.cdr(text))
    }

    /// Parameter list of a compound procedure; may be a bare symbol.
    pub fn proc_params(&self, p: Value) -> Value {
        let text = self.proc_text(p);
        self.car(self.cdr(text))
    }

    // -----------------------------------------------------------------
    // expression accessors

    pub fn operator(&self, exp: Value) -> Value {
        self.car(exp)
    }

    pub fn operands(&self, exp: Value) -> Value {
        self.cdr(exp)
    }

    pub fn first_arg(&self, exp: Value) -> Value {
        self.car(self.cdr(exp))
    }

    pub fn second_arg(&self, exp: Value) -> Value {
        self.car(self.cdr(self.cdr(exp)))
    }

    pub fn third_arg(&self, exp: Value) -> Value {
        self.car(self.cdr(self.cdr(self.cdr(exp))))
    }

    /// Length of a proper list.
    pub fn list_len(&self, v: Value) -> usize {
        let mut n = 0;
        let mut cur = v;
        while !cur.is_nil() && self.cell_p(cur) {
            n += 1;
            cur = self.cdr(cur);
        }
        n
    }

    /// Allocate a fresh pair. Both arguments must be reachable by the
    /// collector at the call site.
    pub fn cons(&mut self, a: Value, d: Value) -> EvalResult<Value> {
        let p = self.new_cell()?;
        self.set_car(p, a);
        self.set_cdr(p, d);
        Ok(p)
    }

    /// Prepend a binding to a frame, returning the new frame head.
    pub fn adjoin_binding(&mut self, binding: Value, frame: Value) -> EvalResult<Value> {
        self.cons(binding, frame)
    }

    // -----------------------------------------------------------------
    // syntax predicates

    /// Proper list test; nil is a list. Not cycle-safe.
    pub fn list_p(&self, v: Value) -> bool {
        let mut cur = v;
        while !cur.is_nil() {
            if !self.cell_p(cur) {
                return false;
            }
            cur = self.cdr(cur);
        }
        true
    }

    /// Proper list of symbols only.
    pub fn symbol_list_p(&self, v: Value) -> bool {
        let mut cur = v;
        while !cur.is_nil() {
            if !(self.cell_p(cur) && self.is_symbol(self.car(cur))) {
                return false;
            }
            cur = self.cdr(cur);
        }
        true
    }

    /// Chain of symbols, possibly dotted with a final symbol, or a bare
    /// symbol. The legal shapes of a lambda parameter list.
    pub fn symbol_compound_p(&self, v: Value) -> bool {
        let mut cur = v;
        while !cur.is_nil() {
            if !(self.cell_p(cur) && self.is_symbol(self.car(cur))) {
                return self.is_symbol(cur);
            }
            cur = self.cdr(cur);
        }
        true
    }

    /// No symbol appears twice in a parameter list (dotted tail included).
    pub fn unique_vars_p(&self, vars: Value) -> bool {
        debug_assert!(self.symbol_compound_p(vars));
        if !self.cell_p(vars) {
            return true;
        }
        let mut vars = vars;
        while self.cell_p(vars) {
            let x = self.car(vars);
            let mut cur = self.cdr(vars);
            vars = cur;
            while self.cell_p(cur) && !self.equal_p(x, self.car(cur)) {
                cur = self.cdr(cur);
            }
            if self.is_symbol(cur) {
                if self.equal_p(x, cur) {
                    return false;
                }
            } else if self.cell_p(cur) {
                return false;
            }
        }
        true
    }

    /// Well-formed cond clause list: every clause a list of at least two
    /// elements, `else` only as the head of the final clause.
    pub fn list_of_clauses_p(&self, clauses: Value, else_sym: Value) -> bool {
        let mut cur = clauses;
        while !cur.is_nil() {
            if !self.cell_p(cur) {
                return false;
            }
            let clause = self.car(cur);
            if clause.is_nil() || !self.list_p(clause) || self.list_len(clause) < 2 {
                return false;
            }
            if self.car(clause) == else_sym && !self.cdr(cur).is_nil() {
                return false;
            }
            cur = self.cdr(cur);
        }
        true
    }

    /// Well-formed let binding list: ((sym expr) ...).
    pub fn assoc_list_p(&self, v: Value) -> bool {
        let mut cur = v;
        while !cur.is_nil() {
            if !self.cell_p(cur) {
                return false;
            }
            let a = self.car(cur);
            if !(self.cell_p(a) && self.is_symbol(self.car(a))) {
                return false;
            }
            let rest = self.cdr(a);
            if !(self.cell_p(rest) && self.cdr(rest).is_nil()) {
                return false;
            }
            cur = self.cdr(cur);
        }
        true
    }

    // -----------------------------------------------------------------
    // syntax transformations

    /// Split a let binding list into (var-list . val-list).
    pub fn separate_assoc(&mut self, list: Value) -> EvalResult<Value> {
        if list.is_nil() {
            self.push_pointer(Value::NIL)?;
            self.push_pointer(Value::NIL)?;
        } else {
            let mut list = list;
            let asc = self.car(list);
            let var_head = self.new_cell()?;
            let v = self.car(asc);
            self.set_car(var_head, v);
            self.push_pointer(var_head)?;
            let mut var_last = var_head;
            let val_head = self.new_cell()?;
            let v = self.first_arg(asc);
            self.set_car(val_head, v);
            self.push_pointer(val_head)?;
            let mut val_last = val_head;
            list = self.cdr(list);
            while !list.is_nil() {
                let asc = self.car(list);
                let link = self.new_cell()?;
                self.set_cdr(var_last, link);
                var_last = link;
                let v = self.car(asc);
                self.set_car(var_last, v);
                let link = self.new_cell()?;
                self.set_cdr(val_last, link);
                val_last = link;
                let v = self.first_arg(asc);
                self.set_car(val_last, v);
                list = self.cdr(list);
            }
        }
        let pair = self.new_cell()?;
        let vals = self.pop_pointer()?;
        self.set_cdr(pair, vals);
        let vars = self.pop_pointer()?;
        self.set_car(pair, vars);
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{install_keywords, TRUE};

    fn boot() -> Arena {
        let mut a = Arena::new();
        install_keywords(&mut a).unwrap();
        a
    }

    fn list(a: &mut Arena, items: &[Value]) -> Value {
        let mut head = Value::NIL;
        for &v in items.iter().rev() {
            a.regs.unev = head;
            head = a.cons(v, head).unwrap();
        }
        a.regs.unev = Value::NIL;
        head
    }

    #[test]
    fn begin_env_binds_bang_and_itself() {
        let mut a = boot();
        let be = a.create_begin_env().unwrap();
        a.pin(be).unwrap();
        assert!(a.hint_environment_p(be));
        let bang = a.symbol_value("!!").unwrap();
        let b = a.binding_in_env(bang, be);
        assert!(!b.is_nil());
        assert!(a.is_string(a.binding_value(b)));
        let name = a.symbol_value("begin_env").unwrap();
        let b = a.binding_in_env(name, be);
        assert_eq!(a.binding_value(b), be);
    }

    #[test]
    fn define_then_lookup_then_shadow() {
        let mut a = boot();
        let be = a.create_begin_env().unwrap();
        a.pin(be).unwrap();
        let x = a.symbol_value("x").unwrap();
        let forty_two = a.int_value(42).unwrap();
        a.define_variable(x, forty_two, be).unwrap();
        let b = a.binding_in_env(x, be);
        assert_eq!(a.integer_of(a.binding_value(b)), 42);

        // a child frame shadows without touching the parent
        let vars = list(&mut a, &[x]);
        a.regs.exp = vars;
        let one = a.int_value(1).unwrap();
        let vals = list(&mut a, &[one]);
        a.regs.argl = vals;
        let child = a.extend_environment(vars, vals, be).unwrap();
        a.regs.env = child;
        let b = a.binding_in_env(x, child);
        assert_eq!(a.integer_of(a.binding_value(b)), 1);
        let b = a.binding_in_env(x, be);
        assert_eq!(a.integer_of(a.binding_value(b)), 42);
    }

    #[test]
    fn set_variable_updates_along_the_chain() {
        let mut a = boot();
        let be = a.create_begin_env().unwrap();
        a.pin(be).unwrap();
        let x = a.symbol_value("x").unwrap();
        a.define_variable(x, TRUE, be).unwrap();
        let empty = a.extend_environment(Value::NIL, Value::NIL, be).unwrap();
        assert_eq!(empty, be);
        let seven = a.int_value(7).unwrap();
        a.set_variable(x, seven, be).unwrap();
        let b = a.binding_in_env(x, be);
        assert_eq!(a.integer_of(a.binding_value(b)), 7);
        let missing = a.symbol_value("missing").unwrap();
        assert!(a.set_variable(missing, TRUE, be).is_err());
    }

    #[test]
    fn dotted_params_take_the_rest() {
        let mut a = boot();
        let be = a.create_begin_env().unwrap();
        a.pin(be).unwrap();
        let rest = a.symbol_value("r").unwrap();
        let one = a.int_value(1).unwrap();
        let two = a.int_value(2).unwrap();
        let vals = list(&mut a, &[one, two]);
        a.regs.argl = vals;
        let env = a.extend_environment(rest, vals, be).unwrap();
        a.regs.env = env;
        let b = a.binding_in_env(rest, env);
        let bound = a.binding_value(b);
        assert_eq!(a.list_len(bound), 2);
        assert_eq!(a.integer_of(a.car(bound)), 1);
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let mut a = boot();
        let be = a.create_begin_env().unwrap();
        a.pin(be).unwrap();
        let x = a.symbol_value("x").unwrap();
        let y = a.symbol_value("y").unwrap();
        let vars = list(&mut a, &[x, y]);
        a.regs.exp = vars;
        let one = a.int_value(1).unwrap();
        let vals = list(&mut a, &[one]);
        a.regs.argl = vals;
        let e = a.extend_environment(vars, vals, be).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Arity);
    }

    #[test]
    fn syntax_predicates() {
        let mut a = boot();
        let x = a.symbol_value("x").unwrap();
        let y = a.symbol_value("y").unwrap();
        let proper = list(&mut a, &[x, y]);
        a.regs.exp = proper;
        assert!(a.list_p(proper));
        assert!(a.symbol_list_p(proper));
        assert!(a.symbol_compound_p(proper));
        assert!(a.unique_vars_p(proper));

        let dup = list(&mut a, &[x, x]);
        a.regs.exp = dup;
        assert!(!a.unique_vars_p(dup));

        // dotted (x . y)
        let dotted = a.cons(x, y).unwrap();
        a.regs.exp = dotted;
        assert!(!a.list_p(dotted));
        assert!(a.symbol_compound_p(dotted));
        assert!(a.unique_vars_p(dotted));

        // dotted duplicate (x . x)
        let dotted_dup = a.cons(x, x).unwrap();
        a.regs.exp = dotted_dup;
        assert!(!a.unique_vars_p(dotted_dup));

        assert!(a.list_p(Value::NIL));
        assert!(a.symbol_compound_p(x));
    }

    #[test]
    fn separate_assoc_splits_vars_and_vals() {
        let mut a = boot();
        let x = a.symbol_value("x").unwrap();
        let y = a.symbol_value("y").unwrap();
        let ten = a.int_value(10).unwrap();
        let twenty = a.int_value(20).unwrap();
        let b1 = list(&mut a, &[x, ten]);
        a.regs.exp = b1;
        let b2 = list(&mut a, &[y, twenty]);
        a.regs.unev = b2;
        let bindings = list(&mut a, &[b1, b2]);
        a.regs.exp = bindings;
        a.regs.unev = Value::NIL;
        assert!(a.assoc_list_p(bindings));

        let split = a.separate_assoc(bindings).unwrap();
        a.regs.val = split;
        let vars = a.car(split);
        let vals = a.cdr(split);
        assert_eq!(a.list_len(vars), 2);
        assert_eq!(a.car(vars), x);
        assert_eq!(a.integer_of(a.first_arg(vals)), 20);
    }
}
