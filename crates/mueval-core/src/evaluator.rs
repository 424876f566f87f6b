//! Explicit-control evaluator
//!
//! Evaluation is a state machine over a label register. Each state may push
//! and pop labels and pointers, mutate the machine registers and re-enter
//! the dispatch; recursion in the interpreted language therefore consumes
//! the interpreter's own stacks, never the host stack, and every live
//! temporary sits where the collector can see it.
//!
//! Calling conventions between states:
//!
//! ```text
//! jump to L          call L                    return
//! ----------         ------------------       -----------------
//! cont = L           push_label(RET)          cont = pop_label()
//!                    cont = L
//! ```
//!
//! Pending arguments are pushed on the pointer stack as they are evaluated;
//! one `Collect` label per argument drives the reverse cons into *argl*, so
//! no counter register is needed.
//!
//! Errors return through `EvalResult` to the session loop, which empties
//! both stacks, reinitializes the registers, runs a collection and resumes
//! reading.

use crate::arena::Arena;
use crate::error::{ErrorKind, EvalResult, SchemeError};
use crate::parser::{RingBuffer, Status};
use crate::primitives;
use crate::value::{
    install_keywords, short_symbol, Keywords, Value, FALSE, KW_AND, KW_IF, KW_LET, KW_OR, TRUE,
};
use crate::writer;
use std::io::Write as _;
use tracing::debug;

/// Label stack capacity.
pub const LABEL_SLOTS: usize = 10240;

/// The evaluator states. `Start` classifies the expression register and the
/// special forms run inside its dispatch; the remaining labels are the
/// continuations pushed on the label stack.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Label {
    Start,
    Application,
    ListOfValues,
    ListOfValuesCont,
    CollectStart,
    Collect,
    CollectStop,
    MicroApply,
    DefinitionCont,
    AndCont,
    OrCont,
    AssignmentCont,
    ConditionalCont,
    EvalSequence,
    EvalSequenceCont,
    End,
}

/// The result variable, rebound after every top-level evaluation.
const BANG: Value = short_symbol("!!");

/// The interpreter: arena, keyword identities, label stack and the session
/// configuration. One value, no process globals.
pub struct Interp {
    pub arena: Arena,
    pub(crate) kw: Keywords,
    labels: Vec<Label>,
    cont: Label,
    pub(crate) syntax_check: bool,
    write_quota: usize,
    begin_env: Value,
}

impl Interp {
    pub fn new() -> EvalResult<Self> {
        let mut arena = Arena::new();
        let kw = install_keywords(&mut arena)?;
        let begin_env = arena.create_begin_env()?;
        arena.pin(begin_env)?;
        Ok(Interp {
            arena,
            kw,
            labels: Vec::with_capacity(64),
            cont: Label::End,
            syntax_check: true,
            write_quota: writer::WRITE_NODES,
            begin_env,
        })
    }

    /// The start environment, which also holds `!!` and `begin_env`.
    pub fn begin_env(&self) -> Value {
        self.begin_env
    }

    /// Node quota used when printing values.
    pub fn set_write_quota(&mut self, quota: usize) {
        self.write_quota = quota;
    }

    pub fn render(&self, v: Value) -> String {
        writer::render(&self.arena, v, self.write_quota)
    }

    pub(crate) fn labels_free(&self) -> usize {
        LABEL_SLOTS - self.labels.len()
    }

    fn push_label(&mut self, l: Label) -> EvalResult {
        if self.labels.len() >= LABEL_SLOTS {
            return Err(SchemeError::new(
                ErrorKind::Resource,
                "label stack overflow",
            ));
        }
        self.labels.push(l);
        Ok(())
    }

    fn pop_label(&mut self) -> EvalResult<Label> {
        self.labels
            .pop()
            .ok_or_else(|| SchemeError::new(ErrorKind::Fatal, "pop of an empty label stack"))
    }

    /// Empty both stacks, reinitialize the registers and collect. The
    /// recovery step of the read-eval-print loop.
    pub fn reset(&mut self) {
        self.arena.reset_stack();
        self.labels.clear();
        self.arena.init_registers();
        self.cont = Label::End;
        self.arena.garbage_collect();
    }

    fn recover(&mut self, e: &SchemeError) {
        println!("{e}");
        println!("Resetting interpreter.");
        self.reset();
    }

    // -----------------------------------------------------------------
    // driving loops

    /// Evaluate one expression in the start environment. Expects empty
    /// stacks; on error the caller is responsible for calling [`reset`].
    ///
    /// [`reset`]: Interp::reset
    pub fn evaluate(&mut self, exp: Value) -> EvalResult<Value> {
        self.arena.regs.exp = exp;
        self.arena.regs.env = self.begin_env;
        self.evaluation_loop()?;
        Ok(self.arena.regs.val)
    }

    /// Read-eval-print everything in `src`, returning the printed form of
    /// each top-level result.
    pub fn eval_script(&mut self, src: &str) -> EvalResult<Vec<String>> {
        let mut rb = RingBuffer::new(Box::new(std::io::Cursor::new(src.as_bytes().to_vec())));
        let mut results = Vec::new();
        loop {
            self.arena.init_registers();
            let (v, st) = rb.read_datum(&mut self.arena)?;
            match st {
                Status::Term => return Ok(results),
                Status::Error => {
                    return Err(SchemeError::new(
                        ErrorKind::Syntax,
                        "unreadable expression in source",
                    ))
                }
                Status::Ok | Status::Stop => {
                    let val = self.evaluate(v)?;
                    results.push(self.render(val));
                    self.arena.set_variable(BANG, val, self.begin_env)?;
                    if st == Status::Stop {
                        return Ok(results);
                    }
                }
                Status::Back => unreachable!("the reader never surfaces a backtrack"),
            }
        }
    }

    /// The interactive read-eval-print session: prompt, read, evaluate,
    /// print, bind `!!`, recover from errors; until the stream ends.
    pub fn session(&mut self, rb: &mut RingBuffer) {
        debug!("session started");
        self.syntax_check = true;
        loop {
            print!("mueval => ");
            let _ = std::io::stdout().flush();
            self.arena.init_registers();
            match rb.read_datum(&mut self.arena) {
                Err(e) => self.recover(&e),
                Ok((_, Status::Error)) => {}
                Ok((_, Status::Term)) => break,
                Ok((v, st @ (Status::Ok | Status::Stop))) => {
                    self.arena.regs.exp = v;
                    self.arena.regs.env = self.begin_env;
                    match self.evaluation_loop() {
                        Ok(()) => {
                            let val = self.arena.regs.val;
                            println!("{}", self.render(val));
                            if let Err(e) = self.arena.set_variable(BANG, val, self.begin_env) {
                                self.recover(&e);
                            }
                        }
                        Err(e) => self.recover(&e),
                    }
                    debug_assert!(self.arena.stack_len() == 0 && self.labels.is_empty());
                    if st == Status::Stop {
                        break;
                    }
                }
                Ok((_, Status::Back)) => unreachable!("the reader never surfaces a backtrack"),
            }
        }
        debug!("session finished");
    }

    fn evaluation_loop(&mut self) -> EvalResult {
        debug_assert!(self.arena.stack_len() == 0 && self.labels.is_empty());
        debug_assert!(self.arena.hint_environment_p(self.arena.regs.env));
        self.push_label(Label::End)?;
        self.cont = Label::Start;
        while self.cont != Label::End {
            self.step()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // the dispatch

    fn step(&mut self) -> EvalResult {
        match self.cont {
            Label::Start => self.step_start(),
            Label::Application => self.step_application(),
            Label::ListOfValues => self.step_list_of_values(),
            Label::ListOfValuesCont => self.step_list_of_values_cont(),
            Label::CollectStart => {
                // registers: val holds the last evaluated argument
                self.arena.regs.argl = Value::NIL;
                let v = self.arena.regs.val;
                self.arena.push_pointer(v)?;
                self.cont = Label::Collect;
                Ok(())
            }
            Label::Collect => self.step_collect(),
            Label::CollectStop => {
                // registers: argl holds the argument list; stack: function
                let f = self.arena.pop_pointer()?;
                self.arena.regs.fun = f;
                self.cont = Label::MicroApply;
                Ok(())
            }
            Label::MicroApply => self.step_micro_apply(),
            Label::DefinitionCont => self.step_definition_cont(),
            Label::AndCont => self.step_and_or_cont(true),
            Label::OrCont => self.step_and_or_cont(false),
            Label::AssignmentCont => self.step_assignment_cont(),
            Label::ConditionalCont => self.step_conditional_cont(),
            Label::EvalSequence => self.step_eval_sequence(),
            Label::EvalSequenceCont => self.step_eval_sequence_cont(),
            Label::End => Ok(()),
        }
    }

    fn self_eval_p(&self, v: Value) -> bool {
        v.is_nil()
            || v.is_bool()
            || v.is_char()
            || self.arena.is_number(v)
            || self.arena.is_string(v)
    }

    fn form_error(&self, what: &str) -> SchemeError {
        SchemeError::new(
            ErrorKind::Syntax,
            format!(
                "incorrect usage of \"{what}\" in {}",
                self.render(self.arena.regs.exp)
            ),
        )
    }

    /// Classify the expression register.
    fn step_start(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.arena.cell_p(exp) {
            let oper = self.arena.operator(exp);
            self.dispatch_form(oper)
        } else if self.self_eval_p(exp) {
            self.arena.regs.val = exp;
            self.cont = self.pop_label()?;
            Ok(())
        } else if self.arena.is_symbol(exp) {
            self.step_variable(exp)
        } else {
            Err(SchemeError::new(
                ErrorKind::Syntax,
                format!("unknown expression {}", self.render(exp)),
            ))
        }
    }

    fn dispatch_form(&mut self, oper: Value) -> EvalResult {
        if oper == self.kw.quote {
            self.eval_quote()
        } else if oper == self.kw.define {
            self.eval_define()
        } else if oper == KW_LET {
            self.eval_let()
        } else if oper == KW_AND {
            self.eval_and_or(true)
        } else if oper == KW_OR {
            self.eval_and_or(false)
        } else if oper == self.kw.set_bang {
            self.eval_assignment()
        } else if oper == KW_IF || oper == self.kw.cond {
            self.eval_conditional(oper)
        } else if oper == self.kw.lambda {
            self.eval_lambda()
        } else {
            self.cont = Label::Application;
            Ok(())
        }
    }

    /// Variables: a reserved symbol becomes a built-in procedure cell on the
    /// spot, anything else is looked up along the environment chain.
    fn step_variable(&mut self, exp: Value) -> EvalResult {
        if self.arena.reserved_p(exp) {
            let p = self.arena.new_cell()?;
            self.arena.set_car(p, exp);
            self.arena.set_hint_procedure(p);
            self.arena.regs.val = p;
        } else {
            let b = self.arena.binding_in_env(exp, self.arena.regs.env);
            if b.is_nil() {
                return Err(SchemeError::new(
                    ErrorKind::Unbound,
                    self.arena.symbol_name(exp),
                ));
            }
            self.arena.regs.val = self.arena.binding_value(b);
        }
        self.cont = self.pop_label()?;
        Ok(())
    }

    fn eval_quote(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check && !(self.arena.list_p(exp) && self.arena.list_len(exp) == 2) {
            return Err(self.form_error("quote"));
        }
        self.arena.regs.val = self.arena.first_arg(exp);
        self.cont = self.pop_label()?;
        Ok(())
    }

    /// `(define name v)` and the sugar `(define (f params...) body...)`,
    /// which is rewritten into the plain form before evaluation of v.
    fn eval_define(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check && !(self.arena.list_p(exp) && self.arena.list_len(exp) >= 3) {
            return Err(self.form_error("define"));
        }
        if self.arena.symbol_list_p(self.arena.first_arg(exp)) {
            let first = self.arena.first_arg(exp);
            let operands = self.arena.operands(exp);
            // (params . body)
            let v = self.arena.new_cell()?;
            self.arena.regs.val = v;
            let body = self.arena.cdr(operands);
            self.arena.set_cdr(v, body);
            let params = self.arena.cdr(first);
            self.arena.set_car(v, params);
            self.arena.push_pointer(v)?;
            // (lambda params body...)
            let v = self.arena.new_cell()?;
            self.arena.regs.val = v;
            self.arena.set_car(v, self.kw.lambda);
            let x = self.arena.pop_pointer()?;
            self.arena.set_cdr(v, x);
            self.arena.push_pointer(v)?;
            // ((lambda ...))
            let v = self.arena.new_cell()?;
            self.arena.regs.val = v;
            let x = self.arena.pop_pointer()?;
            self.arena.set_car(v, x);
            self.arena.push_pointer(v)?;
            // (f (lambda ...))
            let v = self.arena.new_cell()?;
            self.arena.regs.val = v;
            let name = self.arena.car(first);
            self.arena.set_car(v, name);
            let x = self.arena.pop_pointer()?;
            self.arena.set_cdr(v, x);
            self.arena.push_pointer(v)?;
            // (define f (lambda ...))
            let e = self.arena.new_cell()?;
            self.arena.set_car(e, self.kw.define);
            let x = self.arena.pop_pointer()?;
            self.arena.set_cdr(e, x);
            self.arena.regs.exp = e;
        }
        let exp = self.arena.regs.exp;
        if self.syntax_check
            && !(self.arena.list_len(exp) == 3 && self.arena.is_symbol(self.arena.first_arg(exp)))
        {
            return Err(self.form_error("define"));
        }
        let name = self.arena.first_arg(exp);
        if self.arena.is_symbol(name) && self.arena.reserved_p(name) {
            return Err(SchemeError::new(
                ErrorKind::Reserved,
                format!("attempt to \"define\" a keyword in {}", self.render(exp)),
            ));
        }
        let env = self.arena.regs.env;
        let binding = self.arena.binding_in_frame(name, self.arena.first_frame(env));
        if !binding.is_nil() {
            println!(
                "warning: overwriting previous definition in {}",
                self.render(exp)
            );
        }
        self.arena.push_pointer(env)?;
        self.arena.push_pointer(binding)?;
        self.arena.push_pointer(name)?;
        self.push_label(Label::DefinitionCont)?;
        self.arena.regs.exp = self.arena.second_arg(exp);
        self.cont = Label::Start;
        Ok(())
    }

    /// Finish a define once the value is in val. The binding looked up
    /// before evaluation must still be the one in the topmost frame.
    fn step_definition_cont(&mut self) -> EvalResult {
        // registers: val holds the defined value
        // stack: name, binding found before evaluation, environment
        let name = self.arena.pop_pointer()?;
        let prev = self.arena.pop_pointer()?;
        let env = self.arena.pop_pointer()?;
        self.arena.regs.exp = name;
        self.arena.regs.unev = prev;
        self.arena.regs.env = env;
        let now = self.arena.binding_in_frame(name, self.arena.first_frame(env));
        if prev != now {
            return Err(SchemeError::new(
                ErrorKind::Syntax,
                format!(
                    "binding for \"define\" changed during evaluation of {}",
                    self.render(name)
                ),
            ));
        }
        let val = self.arena.regs.val;
        if prev.is_nil() {
            self.arena.define_variable(name, val, env)?;
        } else {
            self.arena.set_variable(name, val, env)?;
        }
        self.arena.regs.val = Value::NIL;
        self.cont = self.pop_label()?;
        Ok(())
    }

    fn eval_assignment(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check
            && !(self.arena.list_p(exp)
                && self.arena.list_len(exp) == 3
                && self.arena.is_symbol(self.arena.first_arg(exp)))
        {
            return Err(self.form_error("set!"));
        }
        let name = self.arena.first_arg(exp);
        if self.arena.is_symbol(name) && self.arena.reserved_p(name) {
            return Err(SchemeError::new(
                ErrorKind::Reserved,
                format!("attempt to \"set!\" a keyword in {}", self.render(exp)),
            ));
        }
        let env = self.arena.regs.env;
        let binding = self.arena.binding_in_env(name, env);
        if binding.is_nil() {
            return Err(SchemeError::new(
                ErrorKind::Unbound,
                format!("unable to \"set!\" undefined variable in {}", self.render(exp)),
            ));
        }
        self.arena.push_pointer(env)?;
        self.arena.push_pointer(binding)?;
        self.arena.push_pointer(name)?;
        self.push_label(Label::AssignmentCont)?;
        self.arena.regs.exp = self.arena.second_arg(exp);
        self.cont = Label::Start;
        Ok(())
    }

    fn step_assignment_cont(&mut self) -> EvalResult {
        // registers: val holds the assigned value
        // stack: name, binding found before evaluation, environment
        let name = self.arena.pop_pointer()?;
        let prev = self.arena.pop_pointer()?;
        let env = self.arena.pop_pointer()?;
        self.arena.regs.exp = name;
        self.arena.regs.unev = prev;
        self.arena.regs.env = env;
        let now = self.arena.binding_in_env(name, env);
        if prev != now {
            return Err(SchemeError::new(
                ErrorKind::Syntax,
                format!(
                    "binding for \"set!\" changed during evaluation of {}",
                    self.render(name)
                ),
            ));
        }
        let val = self.arena.regs.val;
        self.arena.set_variable(name, val, env)?;
        self.arena.regs.val = Value::NIL;
        self.cont = self.pop_label()?;
        Ok(())
    }

    /// `let` is rewritten to `((lambda (vars...) body...) vals...)` and
    /// dispatched straight to application.
    fn eval_let(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check
            && !(self.arena.list_p(exp)
                && self.arena.list_len(exp) >= 3
                && self.arena.assoc_list_p(self.arena.first_arg(exp)))
        {
            return Err(self.form_error("let"));
        }
        let bindings = self.arena.first_arg(exp);
        let split = self.arena.separate_assoc(bindings)?;
        self.arena.regs.argl = split;
        // (vars body...)
        let v = self.arena.new_cell()?;
        self.arena.regs.val = v;
        let operands = self.arena.operands(self.arena.regs.exp);
        let body = self.arena.cdr(operands);
        self.arena.set_cdr(v, body);
        let vars = self.arena.car(split);
        self.arena.set_car(v, vars);
        self.arena.push_pointer(v)?;
        // (lambda vars body...)
        let v = self.arena.new_cell()?;
        self.arena.regs.val = v;
        self.arena.set_car(v, self.kw.lambda);
        let x = self.arena.pop_pointer()?;
        self.arena.set_cdr(v, x);
        self.arena.push_pointer(v)?;
        // ((lambda ...) vals...)
        let e = self.arena.new_cell()?;
        let x = self.arena.pop_pointer()?;
        self.arena.set_car(e, x);
        let vals = self.arena.cdr(self.arena.regs.argl);
        self.arena.set_cdr(e, vals);
        self.arena.regs.exp = e;
        self.cont = Label::Application;
        Ok(())
    }

    fn eval_and_or(&mut self, is_and: bool) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check && !self.arena.list_p(exp) {
            return Err(self.form_error(if is_and { "and" } else { "or" }));
        }
        let ops = self.arena.operands(exp);
        if ops.is_nil() {
            self.arena.regs.val = if is_and { TRUE } else { FALSE };
            self.cont = self.pop_label()?;
            return Ok(());
        }
        if !self.arena.cdr(ops).is_nil() {
            self.push_label(if is_and { Label::AndCont } else { Label::OrCont })?;
            let env = self.arena.regs.env;
            self.arena.push_pointer(env)?;
            let rest = self.arena.cdr(ops);
            self.arena.push_pointer(rest)?;
        }
        self.arena.regs.exp = self.arena.car(ops);
        self.cont = Label::Start;
        Ok(())
    }

    fn step_and_or_cont(&mut self, is_and: bool) -> EvalResult {
        // registers: val holds the last operand's value
        // stack: rest of the operands, environment
        let rest = self.arena.pop_pointer()?;
        let env = self.arena.pop_pointer()?;
        self.arena.regs.exp = rest;
        self.arena.regs.env = env;
        let decided = if is_and {
            self.arena.regs.val == FALSE
        } else {
            self.arena.regs.val != FALSE
        };
        if decided {
            self.cont = self.pop_label()?;
            return Ok(());
        }
        if !self.arena.cdr(rest).is_nil() {
            self.push_label(if is_and { Label::AndCont } else { Label::OrCont })?;
            self.arena.push_pointer(env)?;
            let tail = self.arena.cdr(rest);
            self.arena.push_pointer(tail)?;
        }
        self.arena.regs.exp = self.arena.car(rest);
        self.cont = Label::Start;
        Ok(())
    }

    /// `if` and `cond` both normalize to a clause list driven by the
    /// conditional loop.
    fn eval_conditional(&mut self, oper: Value) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check {
            let len = self.arena.list_len(exp);
            let well_formed = self.arena.list_p(exp)
                && ((oper == KW_IF && (len == 3 || len == 4))
                    || (oper == self.kw.cond
                        && len >= 2
                        && self
                            .arena
                            .list_of_clauses_p(self.arena.operands(exp), self.kw.else_sym)));
            if !well_formed {
                return Err(self.form_error(if oper == KW_IF { "if" } else { "cond" }));
            }
        }
        self.arena.push_pointer(exp)?;
        let cl = self.cond_clauses(oper)?;
        self.arena.regs.exp = cl;
        let env = self.arena.regs.env;
        self.arena.push_pointer(env)?;
        let rest = self.arena.cdr(cl);
        self.arena.push_pointer(rest)?;
        self.push_label(Label::ConditionalCont)?;
        let clause = self.arena.car(cl);
        self.arena.regs.exp = clause;
        let conseq = self.arena.cdr(clause);
        self.arena.push_pointer(conseq)?;
        self.arena.regs.exp = self.arena.car(clause);
        self.cont = Label::Start;
        Ok(())
    }

    /// Clause list of a conditional: `cond` supplies its own, `if` builds
    /// `((test conseq))` or `((test conseq) (else alt))`.
    fn cond_clauses(&mut self, oper: Value) -> EvalResult<Value> {
        let exp = self.arena.regs.exp;
        if oper != KW_IF {
            return Ok(self.arena.operands(exp));
        }
        // (conseq)
        let p = self.arena.new_cell()?;
        let sec = self.arena.second_arg(exp);
        self.arena.set_car(p, sec);
        self.arena.push_pointer(p)?;
        // (test conseq)
        let p = self.arena.new_cell()?;
        let x = self.arena.pop_pointer()?;
        self.arena.set_cdr(p, x);
        let fst = self.arena.first_arg(exp);
        self.arena.set_car(p, fst);
        self.arena.push_pointer(p)?;
        let mut tail = Value::NIL;
        if self.arena.list_len(exp) == 4 {
            // (alt)
            let p = self.arena.new_cell()?;
            let third = self.arena.third_arg(exp);
            self.arena.set_car(p, third);
            self.arena.push_pointer(p)?;
            // (else alt)
            let p = self.arena.new_cell()?;
            let x = self.arena.pop_pointer()?;
            self.arena.set_cdr(p, x);
            self.arena.set_car(p, self.kw.else_sym);
            self.arena.push_pointer(p)?;
            // ((else alt))
            let p = self.arena.new_cell()?;
            let x = self.arena.pop_pointer()?;
            self.arena.set_car(p, x);
            tail = p;
        }
        self.arena.push_pointer(tail)?;
        let head = self.arena.new_cell()?;
        let x = self.arena.pop_pointer()?;
        self.arena.set_cdr(head, x);
        let x = self.arena.pop_pointer()?;
        self.arena.set_car(head, x);
        Ok(head)
    }

    fn step_conditional_cont(&mut self) -> EvalResult {
        // registers: val holds the evaluated clause test
        // stack: consequent list, rest of the clauses, environment, and
        // below them the original expression for diagnostics
        let conseq = self.arena.pop_pointer()?;
        let rest = self.arena.pop_pointer()?;
        let env = self.arena.pop_pointer()?;
        self.arena.regs.exp = conseq;
        self.arena.regs.unev = rest;
        self.arena.regs.env = env;
        if self.arena.regs.val != FALSE {
            self.arena.pop_pointer()?;
            if !conseq.is_nil() {
                self.cont = Label::EvalSequence;
            } else {
                self.cont = self.pop_label()?;
            }
            return Ok(());
        }
        if rest.is_nil() {
            let orig = self.arena.pop_pointer()?;
            return Err(SchemeError::new(
                ErrorKind::Syntax,
                format!("conditional without else-clause in {}", self.render(orig)),
            ));
        }
        let clause = self.arena.car(rest);
        if self.arena.cell_p(clause) && self.arena.car(clause) == self.kw.else_sym {
            self.arena.pop_pointer()?;
            self.arena.regs.exp = self.arena.cdr(clause);
            self.cont = Label::EvalSequence;
            return Ok(());
        }
        self.push_label(Label::ConditionalCont)?;
        self.arena.push_pointer(env)?;
        let tail = self.arena.cdr(rest);
        self.arena.push_pointer(tail)?;
        self.arena.regs.exp = clause;
        let conseq = self.arena.cdr(clause);
        self.arena.push_pointer(conseq)?;
        self.arena.regs.exp = self.arena.car(clause);
        self.cont = Label::Start;
        Ok(())
    }

    fn eval_lambda(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check
            && !(self.arena.list_p(exp)
                && self.arena.list_len(exp) >= 3
                && self.arena.symbol_compound_p(self.arena.first_arg(exp))
                && self.arena.unique_vars_p(self.arena.first_arg(exp)))
        {
            return Err(self.form_error("lambda"));
        }
        let p = self.arena.new_cell()?;
        self.arena.set_car(p, exp);
        let env = self.arena.regs.env;
        self.arena.set_cdr(p, env);
        self.arena.set_hint_procedure(p);
        self.arena.regs.val = p;
        self.cont = self.pop_label()?;
        Ok(())
    }

    fn step_application(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if self.syntax_check && !self.arena.list_p(exp) {
            return Err(SchemeError::new(
                ErrorKind::Syntax,
                format!("unknown expression {}", self.render(exp)),
            ));
        }
        let env = self.arena.regs.env;
        self.arena.push_pointer(env)?;
        let ops = self.arena.operands(exp);
        self.arena.push_pointer(ops)?;
        self.push_label(Label::ListOfValues)?;
        self.arena.regs.exp = self.arena.car(exp);
        self.cont = Label::Start;
        Ok(())
    }

    /// The operator has been evaluated into val; start on the arguments.
    fn step_list_of_values(&mut self) -> EvalResult {
        // stack: unevaluated operand list, environment
        let ops = self.arena.pop_pointer()?;
        let env = self.arena.pop_pointer()?;
        self.arena.regs.exp = ops;
        self.arena.regs.env = env;
        self.arena.regs.fun = self.arena.regs.val;
        if self.syntax_check && !self.arena.hint_procedure_p(self.arena.regs.fun) {
            let fun = self.arena.regs.fun;
            return Err(SchemeError::new(
                ErrorKind::Unapplicable,
                format!("application of unapplicable object {}", self.render(fun)),
            ));
        }
        if ops.is_nil() {
            self.arena.regs.argl = Value::NIL;
            self.cont = Label::MicroApply;
            return Ok(());
        }
        let fun = self.arena.regs.fun;
        self.arena.push_pointer(fun)?;
        self.push_label(Label::CollectStop)?;
        if !self.arena.cdr(ops).is_nil() {
            self.push_label(Label::ListOfValuesCont)?;
            self.arena.push_pointer(env)?;
            let rest = self.arena.cdr(ops);
            self.arena.push_pointer(rest)?;
        } else {
            self.push_label(Label::CollectStart)?;
        }
        self.arena.regs.exp = self.arena.car(ops);
        self.cont = Label::Start;
        Ok(())
    }

    /// Evaluate the arguments left to right, leaving each on the stack.
    fn step_list_of_values_cont(&mut self) -> EvalResult {
        // registers: val holds the previous argument's value
        // stack: rest of the operands, environment
        let ops = self.arena.pop_pointer()?;
        let env = self.arena.pop_pointer()?;
        self.arena.regs.exp = ops;
        self.arena.regs.env = env;
        let v = self.arena.regs.val;
        self.arena.push_pointer(v)?;
        self.push_label(Label::Collect)?;
        if self.arena.cdr(ops).is_nil() {
            self.push_label(Label::CollectStart)?;
        } else {
            self.push_label(Label::ListOfValuesCont)?;
            self.arena.push_pointer(env)?;
            let rest = self.arena.cdr(ops);
            self.arena.push_pointer(rest)?;
        }
        self.arena.regs.exp = self.arena.car(ops);
        self.cont = Label::Start;
        Ok(())
    }

    /// Cons the stacked arguments into argl, one Collect label per
    /// argument.
    fn step_collect(&mut self) -> EvalResult {
        let c = self.arena.new_cell()?;
        self.arena.regs.unev = c;
        let argl = self.arena.regs.argl;
        self.arena.set_cdr(c, argl);
        let v = self.arena.pop_pointer()?;
        self.arena.set_car(c, v);
        self.arena.regs.argl = c;
        self.cont = self.pop_label()?;
        Ok(())
    }

    /// Apply fun to argl: built-ins dispatch on the key symbol, compound
    /// procedures extend their captured environment and run the body.
    fn step_micro_apply(&mut self) -> EvalResult {
        let fun = self.arena.regs.fun;
        if !self.arena.hint_procedure_p(fun) {
            return Err(SchemeError::new(
                ErrorKind::Unapplicable,
                format!("application of unapplicable object {}", self.render(fun)),
            ));
        }
        if self.arena.cdr(fun).is_nil() {
            let key = self.arena.car(fun);
            let args = self.arena.regs.argl;
            let v = primitives::apply_builtin(self, key, args)?;
            self.arena.regs.val = v;
            self.cont = self.pop_label()?;
        } else {
            let params = self.arena.proc_params(fun);
            let args = self.arena.regs.argl;
            let base = self.arena.proc_env(fun);
            self.arena.regs.env = self.arena.extend_environment(params, args, base)?;
            self.arena.regs.exp = self.arena.proc_body(fun);
            self.cont = Label::EvalSequence;
        }
        Ok(())
    }

    fn step_eval_sequence(&mut self) -> EvalResult {
        let exp = self.arena.regs.exp;
        if !self.arena.cell_p(exp) {
            return Err(SchemeError::new(
                ErrorKind::Syntax,
                "empty expression sequence",
            ));
        }
        if !self.arena.cdr(exp).is_nil() {
            self.push_label(Label::EvalSequenceCont)?;
            let env = self.arena.regs.env;
            self.arena.push_pointer(env)?;
            let rest = self.arena.cdr(exp);
            self.arena.push_pointer(rest)?;
        }
        self.arena.regs.exp = self.arena.car(exp);
        self.cont = Label::Start;
        Ok(())
    }

    fn step_eval_sequence_cont(&mut self) -> EvalResult {
        // registers: val holds the last expression's value, discarded
        // stack: rest of the sequence, environment
        let rest = self.arena.pop_pointer()?;
        let env = self.arena.pop_pointer()?;
        self.arena.regs.exp = rest;
        self.arena.regs.env = env;
        if !self.arena.cdr(rest).is_nil() {
            self.push_label(Label::EvalSequenceCont)?;
            self.arena.push_pointer(env)?;
            let tail = self.arena.cdr(rest);
            self.arena.push_pointer(tail)?;
        }
        self.arena.regs.exp = self.arena.car(rest);
        self.cont = Label::Start;
        Ok(())
    }
}
