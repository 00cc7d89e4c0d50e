//! The operator table and its native operations
//!
//! A symbol resolves to a native operation, an alias block (a macro
//! written in the language itself) or a plain value. Native operations
//! validate their operand kinds before touching the stack, so a failed
//! step never leaves the stack half-mutated.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use rand::Rng;

use super::error::{Result, RuntimeError};
use super::frame::{Block, CondLoop, Do, For, ForEach, ForEachFold, Frame, Item, Sequencer};
use super::value::{coerce, Value};
use super::{Interpreter, STACK_CAPACITY};

/// A native operation over interpreter state
pub type NativeFn = fn(&mut Interpreter) -> Result<()>;

#[derive(Clone, Copy)]
pub struct NativeOp {
    pub name: &'static str,
    pub run: NativeFn,
}

impl fmt::Debug for NativeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

impl PartialEq for NativeOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// What a symbol-table entry resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A native operation, run against the interpreter
    Native(NativeOp),
    /// An alias block, called like any other block
    Block(Block),
    /// A plain value, pushed (a stored block value is called instead)
    Value(Value),
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Native(op) => write!(f, "<native {}>", op.name),
            Binding::Block(block) => write!(f, "{block}"),
            Binding::Value(value) => write!(f, "{value}"),
        }
    }
}

/// Tokens the assignment operator refuses to bind
const NOT_ASSIGNABLE: &[&str] = &[":", "{", "}", "#"];

/// Build the default symbol table
pub(crate) fn default_symbols() -> HashMap<String, Binding> {
    let mut table = HashMap::new();

    native(&mut table, "~", op_tilde);
    native(&mut table, "`", op_render);
    native(&mut table, "!", op_not);
    native(&mut table, "@", op_rot);
    native(&mut table, "$", op_select);
    native(&mut table, "+", op_add);
    native(&mut table, "-", op_sub);
    native(&mut table, "*", op_mul);
    native(&mut table, "/", op_div);
    native(&mut table, "%", op_mod);
    native(&mut table, "|", op_bit_or);
    native(&mut table, "&", op_bit_and);
    native(&mut table, "^", op_bit_xor);
    native(&mut table, "[", op_open_bracket);
    native(&mut table, "]", op_close_bracket);
    native(&mut table, "\\", op_swap);
    native(&mut table, ":", op_assign);
    native(&mut table, ";", op_pop);
    native(&mut table, "<", op_lt);
    native(&mut table, ">", op_gt);
    native(&mut table, "=", op_eq);
    native(&mut table, ",", op_arr);
    native(&mut table, ".", op_dup);
    native(&mut table, "?", op_pow);
    native(&mut table, "(", op_dec);
    native(&mut table, ")", op_inc);
    native(&mut table, "print", op_print);
    native(&mut table, "rand", op_rand);
    native(&mut table, "do", op_do);
    native(&mut table, "while", op_while);
    native(&mut table, "until", op_until);
    native(&mut table, "if", op_if);
    native(&mut table, "abs", op_abs);
    native(&mut table, "zip", op_zip);
    native(&mut table, "base", op_base);

    alias(&mut table, "and", "1$if");
    alias(&mut table, "or", "1$\\if");
    alias(&mut table, "xor", "\\!!{!}*");
    alias(&mut table, "p", "`puts");
    alias(&mut table, "puts", "print n print");

    table.insert("n".to_string(), Binding::Value(Value::Str("\n".to_string())));

    table
}

fn native(table: &mut HashMap<String, Binding>, name: &'static str, run: NativeFn) {
    table.insert(name.to_string(), Binding::Native(NativeOp { name, run }));
}

fn alias(table: &mut HashMap<String, Binding>, name: &'static str, source: &str) {
    table.insert(name.to_string(), Binding::Block(Block::from_source(source)));
}

// ---------------------------------------------------------------------
// Stack access helpers. Operations peek and validate first, then commit;
// nothing is popped until the result is known.

fn peek1<'a>(vm: &'a Interpreter, op: &'static str) -> Result<&'a Value> {
    vm.stack
        .last()
        .ok_or_else(|| RuntimeError::stack_underflow(op, 1))
}

fn peek2<'a>(vm: &'a Interpreter, op: &'static str) -> Result<(&'a Value, &'a Value)> {
    let n = vm.stack.len();
    if n < 2 {
        return Err(RuntimeError::stack_underflow(op, 2));
    }
    Ok((&vm.stack[n - 2], &vm.stack[n - 1]))
}

/// Owned `(second, top)` pair for operators that consume both operands.
fn peek2_cloned(vm: &Interpreter, op: &'static str) -> Result<(Value, Value)> {
    let (second, top) = peek2(vm, op)?;
    Ok((second.clone(), top.clone()))
}

/// Replace the top of the stack with `result`.
fn commit1(vm: &mut Interpreter, result: Value) {
    if let Some(slot) = vm.stack.last_mut() {
        *slot = result;
    }
}

/// Replace the top two slots with `result`.
fn commit2(vm: &mut Interpreter, result: Value) {
    vm.stack.pop();
    commit1(vm, result);
}

fn drop_operands(vm: &mut Interpreter, count: usize) {
    let n = vm.stack.len();
    vm.stack.truncate(n - count);
}

// ---------------------------------------------------------------------
// Value helpers

/// Total order between same-kind values, `None` when incomparable.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            for (l, r) in x.iter().zip(y) {
                match compare(l, r)? {
                    Ordering::Equal => {}
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

/// First-seen-order de-duplication for the list set operators.
fn dedup(items: &[Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Flatten a value to text, concatenating nested lists without
/// separators. Used by the text-join form of `*`.
fn flatten_to_string(value: &Value) -> String {
    match value {
        Value::List(items) => items.iter().map(flatten_to_string).collect(),
        other => other.to_string(),
    }
}

/// Join list elements with a list separator, flattening each element
/// one level.
fn list_join(separator: &[Value], items: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::List(inner) => out.extend(inner.iter().cloned()),
            other => out.push(other.clone()),
        }
        if i + 1 < items.len() {
            out.extend(separator.iter().cloned());
        }
    }
    out
}

/// Split a list into `size`-element chunks, last one short.
fn chunk(items: Vec<Value>, size: usize) -> Vec<Value> {
    items
        .chunks(size)
        .map(|chunk| Value::List(chunk.to_vec()))
        .collect()
}

/// Every `step`-th element; a negative step walks from the end.
fn stride(items: Vec<Value>, step: i64) -> Vec<Value> {
    if step > 0 {
        items.into_iter().step_by(step as usize).collect()
    } else {
        items.into_iter().rev().step_by((-step) as usize).collect()
    }
}

/// Clamp a possibly-negative slice index the way the language slices:
/// negative counts from the end, out-of-range clamps to the ends.
fn slice_index(len: usize, i: i64) -> usize {
    if i < 0 {
        (len as i64 + i).max(0) as usize
    } else {
        (i as usize).min(len)
    }
}

fn prefix_chars(text: &str, i: i64) -> String {
    let chars: Vec<char> = text.chars().collect();
    let idx = slice_index(chars.len(), i);
    chars[..idx].iter().collect()
}

fn suffix_chars(text: &str, i: i64) -> String {
    let chars: Vec<char> = text.chars().collect();
    let idx = slice_index(chars.len(), i);
    chars[idx..].iter().collect()
}

/// The character ordinals of a string, for iterating a block over text.
fn str_ordinals(text: &str) -> Vec<Value> {
    text.chars().map(|c| Value::Int(c as i64)).collect()
}

/// Floor division, rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a % b != 0 && ((a % b < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Modulo with the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

// ---------------------------------------------------------------------
// Native operations

/// `~`: bitwise NOT on an integer, evaluate text or a block, splice a
/// list onto the stack.
fn op_tilde(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, "~")?.clone();
    match top {
        Value::Int(n) => commit1(vm, Value::Int(!n)),
        Value::Str(s) => {
            vm.stack.pop();
            vm.call(Frame::Literal(Block::from_source(&s)));
        }
        Value::Block(block) => {
            vm.stack.pop();
            vm.call(Frame::Literal(block));
        }
        Value::List(items) => {
            if vm.stack.len() - 1 + items.len() > STACK_CAPACITY {
                return Err(RuntimeError::stack_overflow());
            }
            vm.stack.pop();
            vm.stack.extend(items);
        }
    }
    Ok(())
}

/// `` ` ``: render the top value to its display text.
fn op_render(vm: &mut Interpreter) -> Result<()> {
    let rendered = match peek1(vm, "`")? {
        Value::Str(s) => format!("\"{s}\""),
        other => other.to_string(),
    };
    commit1(vm, Value::Str(rendered));
    Ok(())
}

fn op_not(vm: &mut Interpreter) -> Result<()> {
    let result = !peek1(vm, "!")?.is_truthy();
    commit1(vm, Value::Int(result as i64));
    Ok(())
}

/// `@`: rotate the top three slots. New top = old third-from-top, new
/// second = old top, new third = old second.
fn op_rot(vm: &mut Interpreter) -> Result<()> {
    let n = vm.stack.len();
    if n < 3 {
        return Err(RuntimeError::stack_underflow("@", 3));
    }
    let top = vm.stack[n - 1].clone();
    let second = vm.stack[n - 2].clone();
    let third = vm.stack[n - 3].clone();
    vm.stack[n - 1] = third;
    vm.stack[n - 2] = top;
    vm.stack[n - 3] = second;
    Ok(())
}

/// `$`: with an integer, copy the n-th value below it to the top; sort
/// text or a list otherwise.
fn op_select(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, "$")?.clone();
    match top {
        Value::Int(idx) => {
            let n = vm.stack.len() as i64;
            let target = n - 2 - idx;
            if idx < 0 || target < 0 || target >= n - 1 {
                return Err(RuntimeError::index_out_of_bounds("$", idx));
            }
            let picked = vm.stack[target as usize].clone();
            commit1(vm, picked);
        }
        Value::Str(s) => {
            let mut chars: Vec<char> = s.chars().collect();
            chars.sort_unstable();
            commit1(vm, Value::Str(chars.into_iter().collect()));
        }
        Value::List(mut items) => {
            let mut comparable = true;
            items.sort_by(|a, b| {
                compare(a, b).unwrap_or_else(|| {
                    comparable = false;
                    Ordering::Equal
                })
            });
            if !comparable {
                return Err(RuntimeError::invalid_operand(
                    "$",
                    "list elements are not mutually comparable",
                ));
            }
            commit1(vm, Value::List(items));
        }
        Value::Block(_) => return Err(RuntimeError::not_implemented("$", "blocks")),
    }
    Ok(())
}

fn op_add(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "+")?;
    let result = match coerce(second, top) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(b)),
        (Value::Str(a), Value::Str(b)) => Value::Str(a + &b),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Value::List(a)
        }
        (Value::Block(a), Value::Block(b)) => Value::Block(a.concat(b)),
        (a, b) => return Err(RuntimeError::unsupported("+", &[a.kind_name(), b.kind_name()])),
    };
    commit2(vm, result);
    Ok(())
}

fn op_sub(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "-")?;
    let result = match coerce(second, top) {
        (Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_sub(b)),
        // list difference: keep elements absent from the right operand
        (Value::List(a), Value::List(b)) => {
            Value::List(a.into_iter().filter(|x| !b.contains(x)).collect())
        }
        (a, b) => return Err(RuntimeError::unsupported("-", &[a.kind_name(), b.kind_name()])),
    };
    commit2(vm, result);
    Ok(())
}

fn op_mul(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "*")?;
    match (second, top) {
        // repetition as a loop: block paired with a count or a sequence
        (Value::Block(code), Value::Int(count)) | (Value::Int(count), Value::Block(code)) => {
            drop_operands(vm, 2);
            vm.call(Frame::For(For::new(code, count)));
        }
        (Value::List(items), Value::Block(code)) | (Value::Block(code), Value::List(items)) => {
            drop_operands(vm, 2);
            vm.call(Frame::ForEach(ForEach::new(code, items, 1)));
        }
        (Value::Str(s), Value::Block(code)) | (Value::Block(code), Value::Str(s)) => {
            drop_operands(vm, 2);
            vm.call(Frame::ForEach(ForEach::new(code, str_ordinals(&s), 1)));
        }
        // join: the top operand separates the elements of the second
        (Value::List(items), Value::List(separator)) => {
            commit2(vm, Value::List(list_join(&separator, &items)));
        }
        (Value::Str(source), Value::Str(separator)) => {
            let parts: Vec<String> = source.chars().map(String::from).collect();
            commit2(vm, Value::Str(parts.join(&separator)));
        }
        (Value::List(items), Value::Str(separator)) => {
            let parts: Vec<String> = items.iter().map(flatten_to_string).collect();
            commit2(vm, Value::Str(parts.join(&separator)));
        }
        (Value::Int(a), Value::Int(b)) => commit2(vm, Value::Int(a.wrapping_mul(b))),
        (Value::Int(n), Value::Str(s)) | (Value::Str(s), Value::Int(n)) => {
            commit2(vm, Value::Str(s.repeat(n.max(0) as usize)));
        }
        (Value::Int(n), Value::List(items)) | (Value::List(items), Value::Int(n)) => {
            let mut out = Vec::new();
            for _ in 0..n.max(0) {
                out.extend(items.iter().cloned());
            }
            commit2(vm, Value::List(out));
        }
        (a, b) => return Err(RuntimeError::unsupported("*", &[a.kind_name(), b.kind_name()])),
    }
    Ok(())
}

fn op_div(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "/")?;
    match (second, top) {
        // fold: run the block over each element, collecting the results
        // into one list closed by the fold frame's synthetic `]`
        (Value::List(items), Value::Block(code)) => {
            drop_operands(vm, 2);
            vm.call(Frame::ForEachFold(ForEachFold::new(code, items)));
            vm.bracket_stack.push(vm.stack.len());
        }
        (second, Value::Block(_)) => {
            return Err(RuntimeError::unsupported("/", &[second.kind_name(), "block"]));
        }
        (Value::List(items), Value::Int(size)) => {
            if size == 0 {
                return Err(RuntimeError::division_by_zero("/"));
            }
            if size < 0 {
                return Err(RuntimeError::invalid_operand("/", "chunk size must be positive"));
            }
            commit2(vm, Value::List(chunk(items, size as usize)));
        }
        (Value::Str(text), Value::Str(separator)) => {
            if separator.is_empty() {
                return Err(RuntimeError::invalid_operand("/", "empty separator"));
            }
            let parts: Vec<Value> = text
                .split(separator.as_str())
                .map(|part| Value::Str(part.to_string()))
                .collect();
            commit2(vm, Value::List(parts));
        }
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                return Err(RuntimeError::division_by_zero("/"));
            }
            commit2(vm, Value::Int(floor_div(a, b)));
        }
        (a, b) => return Err(RuntimeError::unsupported("/", &[a.kind_name(), b.kind_name()])),
    }
    Ok(())
}

fn op_mod(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "%")?;
    match (second, top) {
        (Value::Int(a), Value::Int(b)) => {
            if b == 0 {
                return Err(RuntimeError::division_by_zero("%"));
            }
            commit2(vm, Value::Int(floor_mod(a, b)));
        }
        // split, dropping empty segments
        (Value::Str(text), Value::Str(separator)) => {
            if separator.is_empty() {
                return Err(RuntimeError::invalid_operand("%", "empty separator"));
            }
            let parts: Vec<Value> = text
                .split(separator.as_str())
                .filter(|part| !part.is_empty())
                .map(|part| Value::Str(part.to_string()))
                .collect();
            commit2(vm, Value::List(parts));
        }
        (Value::List(items), Value::Int(step)) => {
            if step == 0 {
                return Err(RuntimeError::invalid_operand("%", "stride step must be non-zero"));
            }
            commit2(vm, Value::List(stride(items, step)));
        }
        (Value::List(items), Value::Block(code)) => {
            drop_operands(vm, 2);
            vm.call(Frame::Sequencer(Sequencer::map(code, items)));
        }
        (a, b) => return Err(RuntimeError::unsupported("%", &[a.kind_name(), b.kind_name()])),
    }
    Ok(())
}

fn op_bit_or(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "|")?;
    let result = match (second, top) {
        (Value::List(a), Value::List(b)) => {
            let mut out = dedup(&a);
            for item in dedup(&b) {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Value::List(out)
        }
        (Value::Int(a), Value::Int(b)) => Value::Int(a | b),
        (a, b) => return Err(RuntimeError::unsupported("|", &[a.kind_name(), b.kind_name()])),
    };
    commit2(vm, result);
    Ok(())
}

fn op_bit_and(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "&")?;
    let result = match (second, top) {
        (Value::List(a), Value::List(b)) => {
            Value::List(dedup(&a).into_iter().filter(|v| b.contains(v)).collect())
        }
        (Value::Int(a), Value::Int(b)) => Value::Int(a & b),
        (a, b) => return Err(RuntimeError::unsupported("&", &[a.kind_name(), b.kind_name()])),
    };
    commit2(vm, result);
    Ok(())
}

fn op_bit_xor(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "^")?;
    let result = match (second, top) {
        (Value::List(a), Value::List(b)) => {
            let mut out: Vec<Value> = dedup(&a).into_iter().filter(|v| !b.contains(v)).collect();
            out.extend(dedup(&b).into_iter().filter(|v| !a.contains(v)));
            Value::List(out)
        }
        (Value::Int(a), Value::Int(b)) => Value::Int(a ^ b),
        (a, b) => return Err(RuntimeError::unsupported("^", &[a.kind_name(), b.kind_name()])),
    };
    commit2(vm, result);
    Ok(())
}

/// `[`: record the current stack depth for the matching `]`.
fn op_open_bracket(vm: &mut Interpreter) -> Result<()> {
    vm.bracket_stack.push(vm.stack.len());
    Ok(())
}

/// `]`: collapse everything above the recorded depth into one list.
/// An empty slice collapses to nothing at all.
fn op_close_bracket(vm: &mut Interpreter) -> Result<()> {
    let depth = vm
        .bracket_stack
        .pop()
        .ok_or_else(RuntimeError::bracket_underflow)?;
    if vm.stack.len() > depth {
        let items = vm.stack.split_off(depth);
        vm.stack.push(Value::List(items));
    }
    Ok(())
}

fn op_swap(vm: &mut Interpreter) -> Result<()> {
    let n = vm.stack.len();
    if n < 2 {
        return Err(RuntimeError::stack_underflow("\\", 2));
    }
    vm.stack.swap(n - 1, n - 2);
    Ok(())
}

/// `:`: bind the next raw token of the current frame to the top value.
/// The value stays on the stack. Reserved tokens and non-token items
/// bind nothing.
fn op_assign(vm: &mut Interpreter) -> Result<()> {
    let value = peek1(vm, ":")?.clone();
    let item = match vm.call_stack.last_mut() {
        Some(frame) => frame.next_item(vm.stack.last())?,
        None => None,
    };
    if let Some(Item::Token(token)) = item {
        if !NOT_ASSIGNABLE.contains(&token.text.as_str()) {
            vm.symbols.insert(token.text, Binding::Value(value));
        }
    }
    Ok(())
}

/// `;`: pop one value; doing nothing on an empty stack is deliberate.
fn op_pop(vm: &mut Interpreter) -> Result<()> {
    vm.stack.pop();
    Ok(())
}

fn op_lt(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "<")?;
    match (second, top) {
        (Value::List(items), Value::Int(i)) => {
            let idx = slice_index(items.len(), i);
            commit2(vm, Value::List(items[..idx].to_vec()));
        }
        (Value::Block(block), Value::Int(i)) => {
            let text = prefix_chars(&block.source_text(), i);
            commit2(vm, Value::Block(Block::from_source(&text)));
        }
        (second, top) => {
            let (a, b) = coerce(second, top);
            let ord = compare(&a, &b).ok_or_else(|| {
                RuntimeError::unsupported("<", &[a.kind_name(), b.kind_name()])
            })?;
            commit2(vm, Value::Int((ord == Ordering::Less) as i64));
        }
    }
    Ok(())
}

fn op_gt(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, ">")?;
    match (second, top) {
        (Value::List(items), Value::Int(i)) => {
            let idx = slice_index(items.len(), i);
            commit2(vm, Value::List(items[idx..].to_vec()));
        }
        (Value::Block(block), Value::Int(i)) => {
            let text = suffix_chars(&block.source_text(), i);
            commit2(vm, Value::Block(Block::from_source(&text)));
        }
        (second, top) => {
            let (a, b) = coerce(second, top);
            let ord = compare(&a, &b).ok_or_else(|| {
                RuntimeError::unsupported(">", &[a.kind_name(), b.kind_name()])
            })?;
            commit2(vm, Value::Int((ord == Ordering::Greater) as i64));
        }
    }
    Ok(())
}

fn op_eq(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "=")?;
    match (second, top) {
        // indexing; out-of-range leaves the stack untouched
        (Value::List(items), Value::Int(i)) => {
            let len = items.len() as i64;
            if i >= len || i < -len {
                return Ok(());
            }
            let idx = if i < 0 { (len + i) as usize } else { i as usize };
            commit2(vm, items[idx].clone());
        }
        (Value::Block(block), Value::Int(i)) => {
            let chars: Vec<char> = block.source_text().chars().collect();
            let len = chars.len() as i64;
            if i >= len || i < -len {
                return Ok(());
            }
            let idx = if i < 0 { (len + i) as usize } else { i as usize };
            commit2(vm, Value::Int(chars[idx] as i64));
        }
        (second, top) => {
            let (a, b) = coerce(second, top);
            commit2(vm, Value::Int((a == b) as i64));
        }
    }
    Ok(())
}

/// `,`: list length, integer range, or filter when a block sits on a list.
fn op_arr(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, ",")?.clone();
    match top {
        Value::Block(_) => {
            let (second, top) = peek2_cloned(vm, ",")?;
            match (second, top) {
                (Value::List(items), Value::Block(code)) => {
                    drop_operands(vm, 2);
                    vm.call(Frame::Sequencer(Sequencer::filter(code, items)));
                }
                (second, _) => {
                    return Err(RuntimeError::unsupported(",", &[second.kind_name(), "block"]));
                }
            }
        }
        Value::List(items) => commit1(vm, Value::Int(items.len() as i64)),
        Value::Int(n) => commit1(vm, Value::List((0..n).map(Value::Int).collect())),
        Value::Str(_) => return Err(RuntimeError::unsupported(",", &["text"])),
    }
    Ok(())
}

fn op_dup(vm: &mut Interpreter) -> Result<()> {
    let value = peek1(vm, ".")?.clone();
    vm.push(value)
}

/// `?` is reserved but defined for no operand kinds at all; it fails
/// before touching the stack.
fn op_pow(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2(vm, "?")?;
    Err(RuntimeError::not_implemented(
        "?",
        &format!("({}, {})", second.kind_name(), top.kind_name()),
    ))
}

/// `(`: decrement an integer, or uncons a list (rest below, head on top).
fn op_dec(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, "(")?.clone();
    match top {
        Value::Int(n) => commit1(vm, Value::Int(n.wrapping_sub(1))),
        Value::List(items) => {
            if items.is_empty() {
                return Err(RuntimeError::index_out_of_bounds("(", 0));
            }
            if vm.stack.len() >= STACK_CAPACITY {
                return Err(RuntimeError::stack_overflow());
            }
            let head = items[0].clone();
            commit1(vm, Value::List(items[1..].to_vec()));
            vm.stack.push(head);
        }
        other => return Err(RuntimeError::unsupported("(", &[other.kind_name()])),
    }
    Ok(())
}

/// `)`: increment an integer, or unsnoc a list (rest below, last on top).
fn op_inc(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, ")")?.clone();
    match top {
        Value::Int(n) => commit1(vm, Value::Int(n.wrapping_add(1))),
        Value::List(items) => {
            if items.is_empty() {
                return Err(RuntimeError::index_out_of_bounds(")", 0));
            }
            if vm.stack.len() >= STACK_CAPACITY {
                return Err(RuntimeError::stack_overflow());
            }
            let last = items[items.len() - 1].clone();
            commit1(vm, Value::List(items[..items.len() - 1].to_vec()));
            vm.stack.push(last);
        }
        other => return Err(RuntimeError::unsupported(")", &[other.kind_name()])),
    }
    Ok(())
}

fn op_print(vm: &mut Interpreter) -> Result<()> {
    let value = peek1(vm, "print")?.clone();
    vm.stack.pop();
    print!("{value}");
    Ok(())
}

fn op_rand(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, "rand")?;
    let Value::Int(upper) = top else {
        return Err(RuntimeError::unsupported("rand", &[top.kind_name()]));
    };
    let upper = *upper;
    if upper <= 0 {
        return Err(RuntimeError::invalid_operand("rand", "upper bound must be positive"));
    }
    let value = rand::thread_rng().gen_range(0..upper);
    commit1(vm, Value::Int(value));
    Ok(())
}

fn op_do(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, "do")?.clone();
    let Value::Block(code) = top else {
        return Err(RuntimeError::unsupported("do", &[top.kind_name()]));
    };
    vm.stack.pop();
    vm.call(Frame::Do(Do::new(code)));
    Ok(())
}

fn op_while(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "while")?;
    match (second, top) {
        (Value::Block(condition), Value::Block(code)) => {
            drop_operands(vm, 2);
            vm.call(Frame::While(CondLoop::new(condition, code)));
            Ok(())
        }
        (a, b) => Err(RuntimeError::unsupported("while", &[a.kind_name(), b.kind_name()])),
    }
}

fn op_until(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "until")?;
    match (second, top) {
        (Value::Block(condition), Value::Block(code)) => {
            drop_operands(vm, 2);
            vm.call(Frame::Until(CondLoop::new(condition, code)));
            Ok(())
        }
        (a, b) => Err(RuntimeError::unsupported("until", &[a.kind_name(), b.kind_name()])),
    }
}

/// `if`: consume condition and both branches, then call the branch the
/// condition selects. Non-block branches execute via their text form.
fn op_if(vm: &mut Interpreter) -> Result<()> {
    let n = vm.stack.len();
    if n < 3 {
        return Err(RuntimeError::stack_underflow("if", 3));
    }
    let condition = vm.stack[n - 3].clone();
    let branch = if condition.is_truthy() {
        vm.stack[n - 2].clone()
    } else {
        vm.stack[n - 1].clone()
    };
    vm.stack.truncate(n - 3);
    vm.call_value(branch);
    Ok(())
}

fn op_abs(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, "abs")?;
    let Value::Int(n) = top else {
        return Err(RuntimeError::unsupported("abs", &[top.kind_name()]));
    };
    let n = *n;
    commit1(vm, Value::Int(n.wrapping_abs()));
    Ok(())
}

/// `zip`: transpose a list of rows (lists, or text as character rows),
/// truncating to the shortest. All-text columns collapse back to text.
fn op_zip(vm: &mut Interpreter) -> Result<()> {
    let top = peek1(vm, "zip")?.clone();
    let Value::List(rows) = top else {
        return Err(RuntimeError::unsupported("zip", &[top.kind_name()]));
    };

    let mut grid: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    for row in &rows {
        match row {
            Value::List(items) => grid.push(items.clone()),
            Value::Str(s) => grid.push(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            other => return Err(RuntimeError::unsupported("zip", &[other.kind_name()])),
        }
    }

    let width = grid.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(width);
    for i in 0..width {
        let column: Vec<Value> = grid.iter().map(|row| row[i].clone()).collect();
        if column.iter().all(|v| matches!(v, Value::Str(_))) {
            let joined: String = column
                .iter()
                .map(|v| match v {
                    Value::Str(s) => s.as_str(),
                    _ => "",
                })
                .collect();
            out.push(Value::Str(joined));
        } else {
            out.push(Value::List(column));
        }
    }

    commit1(vm, Value::List(out));
    Ok(())
}

/// `base`: digits-to-integer in the given radix. The inverse direction
/// is reserved and fails distinctly.
fn op_base(vm: &mut Interpreter) -> Result<()> {
    let (second, top) = peek2_cloned(vm, "base")?;
    match (second, top) {
        (Value::List(digits), Value::Int(radix)) => {
            if !(2..=36).contains(&radix) {
                return Err(RuntimeError::invalid_operand("base", "radix must be in 2..=36"));
            }
            let text: String = digits.iter().map(|d| d.to_string()).collect();
            let value = i64::from_str_radix(&text, radix as u32)
                .map_err(|_| RuntimeError::invalid_number(&text))?;
            commit2(vm, Value::Int(value));
            Ok(())
        }
        (Value::List(_), top) => Err(RuntimeError::unsupported("base", &["list", top.kind_name()])),
        _ => Err(RuntimeError::not_implemented("base", "converting an integer to digits")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(ns: &[i64]) -> Vec<Value> {
        ns.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn test_floor_div_rounds_toward_negative_infinity() {
        assert_eq!(floor_div(7, 3), 2);
        assert_eq!(floor_div(-7, 3), -3);
        assert_eq!(floor_div(7, -3), -3);
    }

    #[test]
    fn test_floor_mod_takes_divisor_sign() {
        assert_eq!(floor_mod(7, 3), 1);
        assert_eq!(floor_mod(-7, 3), 2);
        assert_eq!(floor_mod(7, -3), -2);
    }

    #[test]
    fn test_stride_negative_walks_backwards() {
        assert_eq!(stride(ints(&[1, 2, 3, 4, 5]), 2), ints(&[1, 3, 5]));
        assert_eq!(stride(ints(&[1, 2, 3, 4, 5]), -1), ints(&[5, 4, 3, 2, 1]));
        assert_eq!(stride(ints(&[1, 2, 3, 4, 5]), -2), ints(&[5, 3, 1]));
    }

    #[test]
    fn test_list_join_flattens_one_level() {
        let items = vec![
            Value::Int(1),
            Value::List(ints(&[2])),
            Value::List(vec![Value::Int(3), Value::List(ints(&[4]))]),
        ];
        let joined = list_join(&ints(&[9]), &items);
        assert_eq!(
            joined,
            vec![
                Value::Int(1),
                Value::Int(9),
                Value::Int(2),
                Value::Int(9),
                Value::Int(3),
                Value::List(ints(&[4])),
            ]
        );
    }

    #[test]
    fn test_slice_index_clamps() {
        assert_eq!(slice_index(3, 2), 2);
        assert_eq!(slice_index(3, 7), 3);
        assert_eq!(slice_index(3, -1), 2);
        assert_eq!(slice_index(3, -9), 0);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        assert_eq!(dedup(&ints(&[1, 1, 2, 1, 3])), ints(&[1, 2, 3]));
    }

    #[test]
    fn test_flatten_to_string_concatenates_nested() {
        let value = Value::List(vec![
            Value::Int(3),
            Value::List(vec![Value::Int(4), Value::List(ints(&[5]))]),
        ]);
        assert_eq!(flatten_to_string(&value), "345");
    }
}
