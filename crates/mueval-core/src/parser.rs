//! Reader: ring buffer and backtracking recursive descent
//!
//! Input is consumed one byte at a time through a 64-byte ring that keeps
//! the recent history, so a probing sub-parser can read ahead and fall back.
//! `start_read_ahead` records the backmark; reading far enough to overwrite
//! it is an overflow reported as a syntax error; `confirm_accept` clears it
//! once a category is certain; `back_read_ahead` rewinds for the next
//! alternative. Whitespace and comments are only skipped outside
//! read-ahead.
//!
//! On a syntax error the reader prints a diagnostic, echoes the ring
//! contents and flushes input up to the next blank line before reporting
//! `Status::Error`, so one bad expression does not poison the rest of the
//! session.

use crate::arena::Arena;
use crate::error::EvalResult;
use crate::value::Value;
use std::io::Read;
use tracing::debug;

/// Size of the ring buffer.
pub const RING_SIZE: usize = 64;
/// Longest accepted symbol.
const SYMBOL_MAX: usize = 40;
/// Longest accepted character identifier.
const IDENT_MAX: usize = 10;
/// Longest accepted string literal.
const STRING_MAX: usize = 256;

/// Outcome of a read. `Back` drives backtracking between the category
/// parsers and never escapes `read_datum`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    /// A datum was read; more input may follow.
    Ok,
    /// A datum was read and the stream is exhausted.
    Stop,
    /// The stream is exhausted with nothing left to evaluate.
    Term,
    /// Syntax error; the input has been resynchronized.
    Error,
    /// Category mismatch; try the next alternative.
    Back,
}

pub struct RingBuffer {
    buf: [u8; RING_SIZE],
    eof: bool,
    src: Box<dyn Read>,
    readmark: usize,
    writemark: usize,
    stopmark: usize,
    backmark: Option<usize>,
}

impl RingBuffer {
    pub fn new(src: Box<dyn Read>) -> Self {
        RingBuffer {
            buf: [0; RING_SIZE],
            eof: false,
            src,
            readmark: 0,
            writemark: 0,
            stopmark: 0,
            backmark: None,
        }
    }

    /// Next byte. `Stop` once the stream is exhausted, `Error` when a read
    /// during read-ahead would overwrite the backmark.
    fn firstchar(&mut self) -> (u8, Status) {
        if self.readmark == self.writemark {
            if self.eof {
                return (0, Status::Stop);
            }
            if self.backmark == Some(self.writemark) {
                return (0, Status::Error);
            }
            let mut byte = [0u8; 1];
            let got = matches!(self.src.read(&mut byte), Ok(n) if n > 0);
            self.buf[self.writemark] = if got { byte[0] } else { 0 };
            self.writemark = (self.writemark + 1) % RING_SIZE;
            let ch = self.buf[self.readmark];
            self.readmark = (self.readmark + 1) % RING_SIZE;
            if got {
                (ch, Status::Ok)
            } else {
                self.eof = true;
                (ch, Status::Stop)
            }
        } else {
            let ch = self.buf[self.readmark];
            self.readmark = (self.readmark + 1) % RING_SIZE;
            (ch, Status::Ok)
        }
    }

    /// Unread one byte; never moves back across the backmark.
    fn back_char(&mut self) {
        if self.backmark != Some(self.readmark) {
            self.readmark = (self.readmark + RING_SIZE - 1) % RING_SIZE;
        }
    }

    fn set_stopmark(&mut self) {
        self.stopmark = self.readmark;
    }

    fn reset_readmark(&mut self) {
        self.readmark = self.stopmark;
    }

    fn start_read_ahead(&mut self) {
        debug_assert!(self.backmark.is_none());
        self.backmark = Some(self.readmark);
    }

    fn confirm_accept(&mut self) {
        debug_assert!(self.backmark.is_some());
        self.backmark = None;
    }

    fn back_read_ahead(&mut self) {
        debug_assert!(self.backmark.is_some());
        if let Some(mark) = self.backmark.take() {
            self.readmark = mark;
        }
    }

    /// Printable echo of the ring, most recent input included.
    fn dump(&self) -> String {
        let mut s = String::with_capacity(RING_SIZE);
        let mut i = self.readmark;
        loop {
            s.push(printable(self.buf[i]));
            i = (i + 1) % RING_SIZE;
            if i == self.readmark {
                break;
            }
        }
        s
    }

    /// Skip whitespace and `;` comments. Never runs during read-ahead.
    fn remove_whitespace(&mut self) -> Status {
        debug_assert!(self.backmark.is_none());
        let mut ch;
        let mut res;
        loop {
            loop {
                let t = self.firstchar();
                ch = t.0;
                res = t.1;
                if !(res == Status::Ok && whitespace_p(ch)) {
                    break;
                }
            }
            if res == Status::Ok && ch == b';' {
                loop {
                    let t = self.firstchar();
                    ch = t.0;
                    res = t.1;
                    if !(res == Status::Ok && ch != b'\n') {
                        break;
                    }
                }
            }
            if !(res == Status::Ok && whitespace_p(ch)) {
                break;
            }
        }
        if res == Status::Ok {
            self.back_char();
        }
        res
    }

    /// Flush input up to the first blank line. Never runs during
    /// read-ahead.
    fn synchronize(&mut self) -> Status {
        debug_assert!(self.backmark.is_none());
        loop {
            let mut res;
            loop {
                let t = self.firstchar();
                res = t.1;
                if res == Status::Stop || t.0 == b'\n' {
                    break;
                }
            }
            if res == Status::Stop {
                return Status::Stop;
            }
            let (ch, res) = self.firstchar();
            if res == Status::Stop {
                return Status::Stop;
            }
            if ch == b'\n' {
                return Status::Ok;
            }
        }
    }

    // -----------------------------------------------------------------
    // category parsers

    fn parse_quoted(&mut self, arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let (ch, res) = self.firstchar();
        debug_assert_eq!(res, Status::Ok);
        if ch != b'\'' {
            return Ok((Value::NIL, Status::Back));
        }
        self.confirm_accept();
        if self.remove_whitespace() == Status::Stop {
            println!("parse error: early end of input reading quoted expression");
            return Ok((Value::NIL, Status::Term));
        }
        let (ip, res) = self.parse_datum(arena)?;
        if res == Status::Ok || res == Status::Stop {
            arena.push_pointer(ip)?;
            let inner = arena.new_cell()?;
            let x = arena.pop_pointer()?;
            arena.set_car(inner, x);
            arena.push_pointer(inner)?;
            let outer = arena.new_cell()?;
            let quote = arena.symbol_value("quote")?;
            arena.set_car(outer, quote);
            let x = arena.pop_pointer()?;
            arena.set_cdr(outer, x);
            Ok((outer, res))
        } else {
            Ok((Value::NIL, res))
        }
    }

    fn parse_character(&mut self, _arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let (ch, res) = self.firstchar();
        debug_assert_eq!(res, Status::Ok);
        if ch == b'#' {
            let (ch, res) = self.firstchar();
            if res == Status::Stop {
                println!("parse error: early end of input reading hash-expression");
                return Ok((Value::NIL, Status::Term));
            }
            if ch == b'\\' {
                self.confirm_accept();
                let (first, res) = self.firstchar();
                if res == Status::Stop {
                    println!("parse error: early end of input reading character");
                    return Ok((Value::NIL, Status::Term));
                }
                let (mut ch, mut res) = self.firstchar();
                if res == Status::Stop || terminal_p(ch) {
                    if res == Status::Ok {
                        self.back_char();
                    }
                    return Ok((crate::value::char_value(first as i32), Status::Ok));
                }
                let mut ident = vec![first];
                while res == Status::Ok && alpha_p(ch) && ident.len() < IDENT_MAX {
                    ident.push(ch);
                    let t = self.firstchar();
                    ch = t.0;
                    res = t.1;
                }
                let name: String = ident.iter().map(|&b| b as char).collect();
                if res == Status::Ok && alpha_p(ch) {
                    println!("parse error: character identifier \"{name}...\" too long");
                    return Ok((Value::NIL, Status::Error));
                }
                if res == Status::Ok && !terminal_p(ch) {
                    println!(
                        "parse error: illegal character {} in identifier \"{name}\"",
                        printable(ch)
                    );
                    return Ok((Value::NIL, Status::Error));
                }
                self.back_char();
                return match name.as_str() {
                    "newline" => Ok((crate::value::char_value(b'\n' as i32), Status::Ok)),
                    "space" => Ok((crate::value::char_value(b' ' as i32), Status::Ok)),
                    _ => {
                        println!("parse error: unknown character identifier \"{name}\"");
                        if res == Status::Stop {
                            Ok((Value::NIL, Status::Term))
                        } else {
                            Ok((Value::NIL, Status::Error))
                        }
                    }
                };
            }
        }
        Ok((Value::NIL, Status::Back))
    }

    fn parse_list(&mut self, arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let (ch, res) = self.firstchar();
        debug_assert_eq!(res, Status::Ok);
        if ch != b'(' {
            return Ok((Value::NIL, Status::Back));
        }
        self.confirm_accept();
        let _ = self.remove_whitespace();
        self.set_stopmark();
        let t = self.firstchar();
        let mut ch = t.0;
        let mut res = t.1;
        if res == Status::Stop {
            println!("parse error: early end of input reading parenthesized expression");
            return Ok((Value::NIL, Status::Term));
        }
        let mut ip = Value::NIL;
        let mut ipold = Value::NIL;
        while ch != b')' {
            let mut pointcdr = false;
            if ch == b'.' {
                let t = self.firstchar();
                ch = t.0;
                res = t.1;
                if res == Status::Ok && whitespace_p(ch) {
                    pointcdr = true;
                    res = self.remove_whitespace();
                    if res == Status::Ok {
                        self.set_stopmark();
                    }
                }
            }
            if res == Status::Stop {
                println!("parse error: early end of input reading parenthesized expression");
                return Ok((Value::NIL, Status::Term));
            }
            self.reset_readmark();
            arena.push_pointer(ip)?;
            let (ipdown, dres) = self.parse_datum(arena)?;
            arena.pop_pointer()?;
            if dres == Status::Stop {
                println!("parse error: early end of input reading parenthesized expression");
                return Ok((Value::NIL, Status::Term));
            } else if dres == Status::Error || dres == Status::Term {
                return Ok((Value::NIL, dres));
            }
            if pointcdr && ip.is_nil() {
                println!("parse error: dotted pair without a car");
                return Ok((Value::NIL, Status::Error));
            } else if pointcdr {
                arena.set_cdr(ipold, ipdown);
            } else if ip.is_nil() {
                arena.push_pointer(ipdown)?;
                ip = arena.new_cell()?;
                let x = arena.pop_pointer()?;
                arena.set_car(ip, x);
                ipold = ip;
            } else {
                arena.push_pointer(ip)?;
                arena.push_pointer(ipdown)?;
                let ipnew = arena.new_cell()?;
                arena.pop_pointer()?;
                arena.pop_pointer()?;
                arena.set_car(ipnew, ipdown);
                arena.set_cdr(ipold, ipnew);
                ipold = ipnew;
            }
            let _ = self.remove_whitespace();
            self.set_stopmark();
            let t = self.firstchar();
            ch = t.0;
            res = t.1;
            if res == Status::Stop {
                println!("parse error: early end of input reading parenthesized expression");
                return Ok((Value::NIL, Status::Term));
            }
            if pointcdr && ch != b')' {
                println!(
                    "parse error: illegal \"{}\" instead of the closing \")\"",
                    printable(ch)
                );
                return Ok((Value::NIL, Status::Error));
            }
        }
        Ok((ip, Status::Ok))
    }

    fn parse_string(&mut self, arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let (ch, res) = self.firstchar();
        debug_assert_eq!(res, Status::Ok);
        if ch != b'"' {
            return Ok((Value::NIL, Status::Back));
        }
        self.confirm_accept();
        let t = self.firstchar();
        let mut ch = t.0;
        let mut res = t.1;
        let mut text: Vec<u8> = Vec::new();
        while res == Status::Ok && ch != b'"' && text.len() < STRING_MAX {
            while res == Status::Ok
                && ch != b'"'
                && ch != b'\\'
                && ch != b'\n'
                && text.len() < STRING_MAX
            {
                text.push(ch);
                let t = self.firstchar();
                ch = t.0;
                res = t.1;
            }
            if res == Status::Ok && ch == b'\\' && text.len() < STRING_MAX {
                let t = self.firstchar();
                ch = t.0;
                res = t.1;
                if res == Status::Ok {
                    text.push(if ch == b'n' { b'\n' } else { ch });
                    let t = self.firstchar();
                    ch = t.0;
                    res = t.1;
                }
            } else if res == Status::Ok && ch == b'\n' {
                let t = self.firstchar();
                ch = t.0;
                res = t.1;
            }
        }
        let s = String::from_utf8_lossy(&text).into_owned();
        if res == Status::Ok && ch != b'"' {
            let head: String = s.chars().take(10).collect();
            println!("parse error: string beginning with \"{head}...\" too long");
            Ok((Value::NIL, Status::Error))
        } else if res == Status::Ok {
            let v = arena.string_value(&s)?;
            Ok((v, Status::Ok))
        } else {
            println!("parse error: unexpected end of input in string \"{s}...\"");
            Ok((Value::NIL, Status::Term))
        }
    }

    fn parse_boolean(&mut self, _arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let (ch, res) = self.firstchar();
        debug_assert_eq!(res, Status::Ok);
        if ch == b'#' {
            let (ch, res) = self.firstchar();
            if res == Status::Stop {
                println!("parse error: early end of input reading hash-expression");
                return Ok((Value::NIL, Status::Term));
            }
            if matches!(ch, b't' | b'T' | b'f' | b'F') {
                let (next, res) = self.firstchar();
                if res == Status::Stop || terminal_p(next) {
                    self.confirm_accept();
                    if res == Status::Ok {
                        self.back_char();
                    }
                    return Ok((
                        crate::value::bool_value(ch == b't' || ch == b'T'),
                        Status::Ok,
                    ));
                }
            }
        }
        Ok((Value::NIL, Status::Back))
    }

    fn parse_integer(&mut self, arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let t = self.firstchar();
        let mut ch = t.0;
        let mut res = t.1;
        debug_assert_eq!(res, Status::Ok);
        let mut committed = false;
        let mut base = 10u32;
        if ch == b'#' {
            let t = self.firstchar();
            ch = t.0;
            res = t.1;
            if res == Status::Stop {
                println!("parse error: early end of input reading hash-expression");
                return Ok((Value::NIL, Status::Term));
            }
            match ch {
                b'd' | b'D' => {
                    self.confirm_accept();
                    committed = true;
                }
                b'x' | b'X' => {
                    self.confirm_accept();
                    committed = true;
                    base = 16;
                }
                _ => return Ok((Value::NIL, Status::Back)),
            }
            let t = self.firstchar();
            ch = t.0;
            res = t.1;
            if res == Status::Stop {
                println!("parse error: early end of input reading integer");
                return Ok((Value::NIL, Status::Term));
            }
        }
        let mut sign = 1i64;
        if ch == b'-' || ch == b'+' {
            if ch == b'-' {
                sign = -1;
            }
            let t = self.firstchar();
            ch = t.0;
            res = t.1;
            if res == Status::Stop && committed {
                println!("parse error: early end of input reading integer");
                return Ok((Value::NIL, Status::Term));
            }
        }
        let digit = |c: u8| (c as char).to_digit(base);
        if digit(ch).is_some() {
            let mut val = 0i64;
            while res == Status::Ok && ch == b'0' {
                let t = self.firstchar();
                ch = t.0;
                res = t.1;
            }
            if res == Status::Error {
                println!("parse error: read ahead too far over leading zeroes");
                return Ok((Value::NIL, Status::Error));
            }
            if res == Status::Stop {
                if !committed {
                    self.confirm_accept();
                }
                return Ok((arena.int_value(0)?, Status::Stop));
            }
            while res == Status::Ok {
                let Some(d) = digit(ch) else { break };
                match val
                    .checked_mul(base as i64)
                    .and_then(|v| v.checked_add(sign * d as i64))
                {
                    Some(v) => val = v,
                    None => {
                        println!("parse error: integer too large");
                        return Ok((Value::NIL, Status::Error));
                    }
                }
                let t = self.firstchar();
                ch = t.0;
                res = t.1;
            }
            if res == Status::Error {
                println!("parse error: read ahead too far while reading an integer");
                return Ok((Value::NIL, Status::Error));
            }
            if res == Status::Stop {
                if !committed {
                    self.confirm_accept();
                }
                Ok((arena.int_value(val)?, Status::Stop))
            } else if terminal_p(ch) {
                if !committed {
                    self.confirm_accept();
                }
                self.back_char();
                Ok((arena.int_value(val)?, Status::Ok))
            } else if committed {
                println!("parse error: integer contains illegal \"{}\"", printable(ch));
                Ok((Value::NIL, Status::Error))
            } else {
                Ok((Value::NIL, Status::Back))
            }
        } else if committed {
            println!("parse error: integer contains illegal \"{}\"", printable(ch));
            Ok((Value::NIL, Status::Error))
        } else {
            Ok((Value::NIL, Status::Back))
        }
    }

    fn parse_symbol(&mut self, arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let t = self.firstchar();
        let mut ch = t.0;
        let mut res = t.1;
        debug_assert_eq!(res, Status::Ok);
        let mut sym: Vec<u8> = Vec::new();
        while symbol_char_p(ch) && sym.len() < SYMBOL_MAX && res == Status::Ok {
            sym.push(ch);
            let t = self.firstchar();
            ch = t.0;
            res = t.1;
        }
        let name: String = sym.iter().map(|&b| b as char).collect();
        let lone_dot = sym.len() == 1 && sym[0] == b'.';
        if (res == Status::Ok && !terminal_p(ch) && !symbol_char_p(ch)) || sym.is_empty() {
            Ok((Value::NIL, Status::Back))
        } else if res == Status::Ok && symbol_char_p(ch) {
            let head: String = name.chars().take(10).collect();
            println!("parse error: symbol beginning with \"{head}...\" too long");
            Ok((Value::NIL, Status::Error))
        } else if res == Status::Ok && terminal_p(ch) && !lone_dot {
            self.confirm_accept();
            self.back_char();
            Ok((arena.symbol_value(&name)?, Status::Ok))
        } else if res == Status::Stop && !lone_dot {
            self.confirm_accept();
            Ok((arena.symbol_value(&name)?, Status::Stop))
        } else {
            Ok((Value::NIL, Status::Back))
        }
    }

    /// Try the categories in order: list, boolean, character, quoted,
    /// string, integer, symbol.
    fn parse_datum(&mut self, arena: &mut Arena) -> EvalResult<(Value, Status)> {
        let (_, res) = self.firstchar();
        if res == Status::Stop {
            println!("parse error: early end of input");
            return Ok((Value::NIL, Status::Term));
        }
        self.back_char();

        self.start_read_ahead();
        let (v, res) = self.parse_list(arena)?;
        if res != Status::Back {
            return Ok((v, res));
        }
        self.back_read_ahead();
        self.start_read_ahead();
        let (v, res) = self.parse_boolean(arena)?;
        if res != Status::Back {
            return Ok((v, res));
        }
        self.back_read_ahead();
        self.start_read_ahead();
        let (v, res) = self.parse_character(arena)?;
        if res != Status::Back {
            return Ok((v, res));
        }
        self.back_read_ahead();
        self.start_read_ahead();
        let (v, res) = self.parse_quoted(arena)?;
        if res != Status::Back {
            return Ok((v, res));
        }
        self.back_read_ahead();
        self.start_read_ahead();
        let (v, res) = self.parse_string(arena)?;
        if res != Status::Back {
            return Ok((v, res));
        }
        self.back_read_ahead();
        self.start_read_ahead();
        let (v, res) = self.parse_integer(arena)?;
        if res != Status::Back {
            return Ok((v, res));
        }
        self.back_read_ahead();
        self.start_read_ahead();
        let (v, res) = self.parse_symbol(arena)?;
        if res != Status::Back {
            return Ok((v, res));
        }
        println!("parse error: unknown expression type");
        Ok((Value::NIL, Status::Error))
    }

    /// Read one datum. The public statuses are `Ok`, `Stop`, `Term` and
    /// `Error`; after `Error` the input is already resynchronized past the
    /// next blank line.
    pub fn read_datum(&mut self, arena: &mut Arena) -> EvalResult<(Value, Status)> {
        debug!("reading a datum");
        self.backmark = None;
        if self.remove_whitespace() == Status::Stop {
            return Ok((Value::NIL, Status::Term));
        }
        let (ip, res) = self.parse_datum(arena)?;
        match res {
            Status::Error => {
                println!("recent input: {}", self.dump().trim_end_matches('-'));
                self.backmark = None;
                if self.synchronize() == Status::Stop {
                    println!("end of input reached during resynchronization");
                    Ok((Value::NIL, Status::Term))
                } else {
                    Ok((Value::NIL, Status::Error))
                }
            }
            Status::Term => {
                self.backmark = None;
                Ok((Value::NIL, Status::Term))
            }
            _ => {
                debug_assert!(self.backmark.is_none());
                Ok((ip, res))
            }
        }
    }
}

fn whitespace_p(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}

fn terminal_p(ch: u8) -> bool {
    whitespace_p(ch) || matches!(ch, b'(' | b')' | b';')
}

fn alpha_p(ch: u8) -> bool {
    ch.is_ascii_alphabetic()
}

fn special_char_p(ch: u8) -> bool {
    matches!(
        ch,
        b'*' | b'/'
            | b'<'
            | b'='
            | b'>'
            | b'!'
            | b'?'
            | b':'
            | b'$'
            | b'%'
            | b'_'
            | b'&'
            | b'^'
            | b'~'
            | b'-'
            | b'+'
            | b'.'
    )
}

fn symbol_char_p(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || special_char_p(ch)
}

fn printable(ch: u8) -> char {
    if ch < 32 || ch == 127 {
        '-'
    } else {
        ch as char
    }
}
