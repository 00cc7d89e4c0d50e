//! Execution frames: control flow as resumable state machines
//!
//! Every suspended computation lives as data in one of these frames on
//! the interpreter's call stack. The machine asks the top frame for its
//! next item once per step, so execution can be paused, inspected and
//! resumed one instruction at a time from any external driver.

use std::collections::VecDeque;
use std::fmt;

use super::error::{Result, RuntimeError};
use super::value::Value;
use crate::lexer::{self, Span, Token};

/// A block of code: a token sequence plus a resume position
#[derive(Debug, Clone)]
pub struct Block {
    pub tokens: Vec<Token>,
    pub ip: usize,
    /// An immediate block is executed as soon as a frame yields it;
    /// a non-immediate one is pushed onto the operand stack as a value.
    pub immediate: bool,
}

impl Block {
    pub fn new(tokens: Vec<Token>, immediate: bool) -> Self {
        Block {
            tokens,
            ip: 0,
            immediate,
        }
    }

    /// Tokenize `source` into a fresh non-immediate block.
    pub fn from_source(source: &str) -> Self {
        Block::new(lexer::tokenize(source), false)
    }

    fn into_immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Concatenate two blocks into a new one.
    pub fn concat(mut self, other: Block) -> Block {
        self.tokens.extend(other.tokens);
        Block::new(self.tokens, false)
    }

    /// Append an implicit `;` so a loop consumes its own condition value.
    fn append_pop(&mut self) {
        self.tokens.push(Token::synthetic(";"));
    }

    /// The source text of this block, reassembled from its tokens.
    pub fn source_text(&self) -> String {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    /// Span of the token about to execute, if it came from real source.
    pub fn current_span(&self) -> Option<Span> {
        let token = self.tokens.get(self.ip)?;
        if token.span.is_synthetic() {
            None
        } else {
            Some(token.span)
        }
    }

    /// Produce the next item: a nested block for `{`, otherwise the
    /// token under `ip`. `None` once the tokens are exhausted.
    pub fn next_item(&mut self) -> Result<Option<Item>> {
        let Some(token) = self.tokens.get(self.ip) else {
            return Ok(None);
        };
        if token.text == "{" {
            let nested = self.find_block()?;
            return Ok(Some(Item::Block(nested)));
        }
        let token = token.clone();
        self.ip += 1;
        Ok(Some(Item::Token(token)))
    }

    /// Scan forward from `ip` (which sits on a `{`) to the matching
    /// `}`, slice the enclosed tokens into a nested block and advance
    /// past the close.
    fn find_block(&mut self) -> Result<Block> {
        let open_span = self.tokens[self.ip].span;
        let mut depth = 0i32;

        for (offset, token) in self.tokens[self.ip..].iter().enumerate() {
            match token.text.as_str() {
                "{" => depth += 1,
                "}" => depth -= 1,
                _ => {}
            }
            if depth == 0 {
                let inner = self.tokens[self.ip + 1..self.ip + offset].to_vec();
                self.ip += offset + 1;
                return Ok(Block::new(inner, false));
            }
        }

        Err(RuntimeError::unmatched_brace(open_span))
    }
}

/// Blocks compare by token text; resume position and the immediate
/// flag are execution state, not identity.
impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.tokens.len() == other.tokens.len()
            && self
                .tokens
                .iter()
                .zip(&other.tokens)
                .all(|(a, b)| a.text == b.text)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.source_text())
    }
}

/// One unit of work produced by a frame
#[derive(Debug, Clone)]
pub enum Item {
    /// A raw token to resolve through the symbol table
    Token(Token),
    /// A value to push onto the operand stack
    Value(Value),
    /// A nested block: called now when immediate, pushed as a value otherwise
    Block(Block),
}

fn truthy(top: Option<&Value>) -> bool {
    top.is_some_and(Value::is_truthy)
}

/// Count-bounded repetition of a body block
#[derive(Debug, Clone, PartialEq)]
pub struct For {
    code: Block,
    count: i64,
    max: i64,
}

impl For {
    pub fn new(code: Block, count: i64) -> Self {
        For {
            code: code.into_immediate(),
            count,
            max: count,
        }
    }

    fn next(&mut self) -> Option<Item> {
        if self.count > 0 {
            self.count -= 1;
            Some(Item::Block(self.code.clone()))
        } else {
            None
        }
    }

    fn consumed(&self) -> usize {
        (self.max - self.count).max(0) as usize
    }
}

/// Iterate a body block over pending items.
///
/// The `pop` cadence controls how many items are pushed before the body
/// first runs; after that the body runs after every single item. With
/// the default cadence of 1 this is a left fold: two items go up, then
/// body, item, body, item, body.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEach {
    code: Block,
    items: VecDeque<Value>,
    max: usize,
    pop: usize,
    popped: usize,
    push_code: bool,
}

impl ForEach {
    pub fn new(code: Block, items: Vec<Value>, pop: usize) -> Self {
        let max = items.len();
        ForEach {
            code: code.into_immediate(),
            items: items.into(),
            max,
            pop,
            popped: 0,
            push_code: false,
        }
    }

    fn next(&mut self) -> Option<Item> {
        if self.push_code {
            self.push_code = false;
            Some(Item::Block(self.code.clone()))
        } else if let Some(item) = self.items.pop_front() {
            if self.popped >= self.pop {
                self.push_code = true;
            }
            self.popped += 1;
            Some(Item::Value(item))
        } else {
            None
        }
    }

    fn consumed(&self) -> usize {
        self.max - self.items.len()
    }
}

/// ForEach variant that folds its per-item results into one list:
/// strict item/body alternation, then exactly one synthetic `]` so the
/// accumulated results collapse into a single value.
#[derive(Debug, Clone, PartialEq)]
pub struct ForEachFold {
    code: Block,
    items: VecDeque<Value>,
    max: usize,
    push_code: bool,
    folded: bool,
}

impl ForEachFold {
    pub fn new(code: Block, items: Vec<Value>) -> Self {
        let max = items.len();
        ForEachFold {
            code: code.into_immediate(),
            items: items.into(),
            max,
            push_code: false,
            folded: false,
        }
    }

    fn next(&mut self) -> Option<Item> {
        if self.push_code {
            self.push_code = false;
            Some(Item::Block(self.code.clone()))
        } else if let Some(item) = self.items.pop_front() {
            self.push_code = true;
            Some(Item::Value(item))
        } else if !self.folded {
            self.folded = true;
            Some(Item::Token(Token::synthetic("]")))
        } else {
            None
        }
    }

    fn consumed(&self) -> usize {
        self.max - self.items.len()
    }
}

/// Run the body while top-of-stack is truthy, checked before every
/// iteration. The body carries an implicit trailing `;` so each round
/// consumes its own condition value.
#[derive(Debug, Clone, PartialEq)]
pub struct Do {
    code: Block,
}

impl Do {
    pub fn new(mut code: Block) -> Self {
        code.append_pop();
        Do {
            code: code.into_immediate(),
        }
    }

    fn next(&mut self, top: Option<&Value>) -> Option<Item> {
        if truthy(top) {
            Some(Item::Block(self.code.clone()))
        } else {
            None
        }
    }
}

/// Two-phase condition/body loop shared by `while` and `until`.
/// The condition block carries an implicit trailing `;`.
#[derive(Debug, Clone, PartialEq)]
pub struct CondLoop {
    condition: Block,
    code: Block,
    is_condition: bool,
}

impl CondLoop {
    pub fn new(mut condition: Block, code: Block) -> Self {
        condition.append_pop();
        CondLoop {
            condition: condition.into_immediate(),
            code: code.into_immediate(),
            is_condition: true,
        }
    }

    fn next(&mut self, top: Option<&Value>, negate: bool) -> Option<Item> {
        if self.is_condition {
            self.is_condition = false;
            Some(Item::Block(self.condition.clone()))
        } else if truthy(top) != negate {
            self.is_condition = true;
            Some(Item::Block(self.code.clone()))
        } else {
            None
        }
    }
}

/// A step inside a [`Sequencer`] phase
#[derive(Debug, Clone, Copy, PartialEq)]
enum Step {
    /// Emit a synthetic `[`
    OpenBracket,
    /// Emit a synthetic `]`
    CloseBracket,
    /// Push the next pending item; exhaustion ends the cycle phase
    NextItem,
    /// Run the body block
    Body,
    /// Keep the source elements whose mapped result (the list on top of
    /// the stack) is truthy, then emit `;` to discard that list
    Filter,
    /// Push the list kept by [`Step::Filter`]
    PushKept,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SeqPhase {
    Start,
    Cycle,
    End,
}

/// Three-phase frame: ordered start steps, a repeating cycle that ends
/// when the pending items run dry, then ordered end steps. `map` and
/// `filter` are its two configurations.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequencer {
    name: &'static str,
    code: Block,
    items: VecDeque<Value>,
    /// Original input, kept for the positional filter step
    source: Vec<Value>,
    max: usize,
    start: Vec<Step>,
    cycle: Vec<Step>,
    end: Vec<Step>,
    phase: SeqPhase,
    pos: usize,
    kept: Vec<Value>,
}

impl Sequencer {
    fn new(
        name: &'static str,
        code: Block,
        items: Vec<Value>,
        source: Vec<Value>,
        start: Vec<Step>,
        cycle: Vec<Step>,
        end: Vec<Step>,
    ) -> Self {
        let max = items.len();
        Sequencer {
            name,
            code: code.into_immediate(),
            items: items.into(),
            source,
            max,
            start,
            cycle,
            end,
            phase: SeqPhase::Start,
            pos: 0,
            kept: Vec::new(),
        }
    }

    /// Map the body over a list, collecting per-item results into one
    /// bracketed list.
    pub fn map(code: Block, items: Vec<Value>) -> Self {
        Sequencer::new(
            "Map",
            code,
            items,
            Vec::new(),
            vec![Step::OpenBracket],
            vec![Step::NextItem, Step::Body],
            vec![Step::CloseBracket],
        )
    }

    /// Map the body over a list, then keep the input elements whose
    /// mapped result is truthy.
    pub fn filter(code: Block, items: Vec<Value>) -> Self {
        let source = items.clone();
        Sequencer::new(
            "Filter",
            code,
            items,
            source,
            vec![Step::OpenBracket],
            vec![Step::NextItem, Step::Body],
            vec![Step::CloseBracket, Step::Filter, Step::PushKept],
        )
    }

    fn next(&mut self, top: Option<&Value>) -> Result<Option<Item>> {
        loop {
            match self.phase {
                SeqPhase::Start => {
                    if self.pos >= self.start.len() {
                        self.phase = SeqPhase::Cycle;
                        self.pos = 0;
                        continue;
                    }
                    let step = self.start[self.pos];
                    self.pos += 1;
                    if let Some(item) = self.run_step(step, top)? {
                        return Ok(Some(item));
                    }
                }
                SeqPhase::Cycle => {
                    if self.cycle.is_empty()
                        || (self.cycle[self.pos] == Step::NextItem && self.items.is_empty())
                    {
                        self.phase = SeqPhase::End;
                        self.pos = 0;
                        continue;
                    }
                    let step = self.cycle[self.pos];
                    self.pos = (self.pos + 1) % self.cycle.len();
                    if let Some(item) = self.run_step(step, top)? {
                        return Ok(Some(item));
                    }
                }
                SeqPhase::End => {
                    if self.pos >= self.end.len() {
                        return Ok(None);
                    }
                    let step = self.end[self.pos];
                    self.pos += 1;
                    if let Some(item) = self.run_step(step, top)? {
                        return Ok(Some(item));
                    }
                }
            }
        }
    }

    fn run_step(&mut self, step: Step, top: Option<&Value>) -> Result<Option<Item>> {
        Ok(match step {
            Step::OpenBracket => Some(Item::Token(Token::synthetic("["))),
            Step::CloseBracket => Some(Item::Token(Token::synthetic("]"))),
            Step::NextItem => self.items.pop_front().map(Item::Value),
            Step::Body => Some(Item::Block(self.code.clone())),
            Step::Filter => {
                let Some(Value::List(mapped)) = top else {
                    let kind = top.map_or("nothing", Value::kind_name);
                    return Err(RuntimeError::invalid_operand(
                        ",",
                        &format!("expected the mapped result list on the stack, found {kind}"),
                    ));
                };
                self.kept = self
                    .source
                    .iter()
                    .zip(mapped)
                    .filter(|(_, result)| result.is_truthy())
                    .map(|(element, _)| element.clone())
                    .collect();
                Some(Item::Token(Token::synthetic(";")))
            }
            Step::PushKept => Some(Item::Value(Value::List(std::mem::take(&mut self.kept)))),
        })
    }

    fn consumed(&self) -> usize {
        self.max - self.items.len()
    }
}

/// A resumable unit of execution occupying one call-stack slot
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Plain token sequence
    Literal(Block),
    For(For),
    ForEach(ForEach),
    ForEachFold(ForEachFold),
    Do(Do),
    While(CondLoop),
    Until(CondLoop),
    Sequencer(Sequencer),
}

impl Frame {
    /// Produce the next item to execute given the current top of the
    /// operand stack, or `None` when this frame is exhausted and should
    /// be popped from the call stack.
    pub fn next_item(&mut self, top: Option<&Value>) -> Result<Option<Item>> {
        match self {
            Frame::Literal(block) => block.next_item(),
            Frame::For(frame) => Ok(frame.next()),
            Frame::ForEach(frame) => Ok(frame.next()),
            Frame::ForEachFold(frame) => Ok(frame.next()),
            Frame::Do(frame) => Ok(frame.next(top)),
            Frame::While(frame) => Ok(frame.next(top, false)),
            Frame::Until(frame) => Ok(frame.next(top, true)),
            Frame::Sequencer(frame) => frame.next(top),
        }
    }

    /// Frame-local instruction pointer: a token index for literal
    /// frames, a monotonically non-decreasing progress counter for the
    /// loop constructs.
    pub fn ip(&self) -> usize {
        match self {
            Frame::Literal(block) => block.ip,
            Frame::For(frame) => frame.consumed(),
            Frame::ForEach(frame) => frame.consumed(),
            Frame::ForEachFold(frame) => frame.consumed(),
            Frame::Do(_) | Frame::While(_) | Frame::Until(_) => 0,
            Frame::Sequencer(frame) => frame.consumed(),
        }
    }

    /// Source span of the instruction about to execute. Loop frames
    /// have no source position and always report `None`.
    pub fn current_span(&self) -> Option<Span> {
        match self {
            Frame::Literal(block) => block.current_span(),
            _ => None,
        }
    }

    /// Whether this frame is associated with a source file.
    pub fn has_source(&self) -> bool {
        matches!(self, Frame::Literal(_))
    }

    /// Rewind to the start; loop frames keep their progress.
    pub fn reset(&mut self) {
        if let Frame::Literal(block) = self {
            block.ip = 0;
        }
    }

    /// Named registers for human inspection of the frame's state.
    pub fn registers(&self) -> Vec<(String, String)> {
        match self {
            Frame::Literal(_) => Vec::new(),
            Frame::For(frame) => vec![
                ("code".into(), frame.code.to_string()),
                ("count".into(), frame.count.to_string()),
            ],
            Frame::ForEach(frame) => vec![
                ("code".into(), frame.code.to_string()),
                ("items".into(), render_items(&frame.items)),
                ("pop".into(), frame.pop.to_string()),
                ("popped".into(), frame.popped.to_string()),
                ("push_code".into(), frame.push_code.to_string()),
            ],
            Frame::ForEachFold(frame) => vec![
                ("code".into(), frame.code.to_string()),
                ("items".into(), render_items(&frame.items)),
                ("push_code".into(), frame.push_code.to_string()),
                ("folded".into(), frame.folded.to_string()),
            ],
            Frame::Do(frame) => vec![("code".into(), frame.code.to_string())],
            Frame::While(frame) | Frame::Until(frame) => vec![
                ("condition".into(), frame.condition.to_string()),
                ("code".into(), frame.code.to_string()),
                ("is_condition".into(), frame.is_condition.to_string()),
            ],
            Frame::Sequencer(frame) => vec![
                ("code".into(), frame.code.to_string()),
                ("items".into(), render_items(&frame.items)),
                ("phase".into(), format!("{:?}", frame.phase)),
            ],
        }
    }
}

fn render_items(items: &VecDeque<Value>) -> String {
    Value::List(items.iter().cloned().collect()).to_string()
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Literal(block) => write!(f, "{block}"),
            Frame::For(frame) => write!(f, "For: {}", frame.count),
            Frame::ForEach(frame) => write!(f, "ForEach: {}", render_items(&frame.items)),
            Frame::ForEachFold(frame) => {
                write!(f, "ForEachFold: {}", render_items(&frame.items))
            }
            Frame::Do(_) => write!(f, "Do"),
            Frame::While(_) => write!(f, "While"),
            Frame::Until(_) => write!(f, "Until"),
            Frame::Sequencer(frame) => {
                write!(f, "{}: {}", frame.name, render_items(&frame.items))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(ns: &[i64]) -> Vec<Value> {
        ns.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn test_literal_yields_tokens_then_exhausts() {
        let mut block = Block::from_source("1 2");
        assert!(matches!(block.next_item(), Ok(Some(Item::Token(t))) if t.text == "1"));
        assert!(matches!(block.next_item(), Ok(Some(Item::Token(t))) if t.text == " "));
        assert!(matches!(block.next_item(), Ok(Some(Item::Token(t))) if t.text == "2"));
        assert!(matches!(block.next_item(), Ok(None)));
    }

    #[test]
    fn test_literal_slices_nested_block() {
        let mut block = Block::from_source("{1 {2}}3");
        match block.next_item() {
            Ok(Some(Item::Block(nested))) => {
                assert!(!nested.immediate);
                assert_eq!(nested, Block::from_source("1 {2}"));
            }
            other => panic!("expected nested block, got {other:?}"),
        }
        assert!(matches!(block.next_item(), Ok(Some(Item::Token(t))) if t.text == "3"));
    }

    #[test]
    fn test_literal_unmatched_brace_is_error() {
        let mut block = Block::from_source("{1");
        assert!(block.next_item().is_err());
    }

    #[test]
    fn test_for_yields_count_copies() {
        let mut frame = For::new(Block::from_source("x"), 2);
        assert!(matches!(frame.next(), Some(Item::Block(b)) if b.immediate));
        assert_eq!(frame.consumed(), 1);
        assert!(matches!(frame.next(), Some(Item::Block(_))));
        assert!(frame.next().is_none());
        assert_eq!(frame.consumed(), 2);
    }

    #[test]
    fn test_for_negative_count_is_exhausted() {
        let mut frame = For::new(Block::from_source("x"), -1);
        assert!(frame.next().is_none());
    }

    #[test]
    fn test_foreach_default_cadence_folds() {
        // Two items go up before the first body run, then the body runs
        // after every further item: i, i, B, i, B.
        let mut frame = ForEach::new(Block::from_source("+"), ints(&[1, 2, 3]), 1);
        assert!(matches!(frame.next(), Some(Item::Value(Value::Int(1)))));
        assert!(matches!(frame.next(), Some(Item::Value(Value::Int(2)))));
        assert!(matches!(frame.next(), Some(Item::Block(_))));
        assert!(matches!(frame.next(), Some(Item::Value(Value::Int(3)))));
        assert!(matches!(frame.next(), Some(Item::Block(_))));
        assert!(frame.next().is_none());
    }

    #[test]
    fn test_foreach_fold_alternates_and_closes() {
        let mut frame = ForEachFold::new(Block::from_source("1+"), ints(&[1, 2]));
        assert!(matches!(frame.next(), Some(Item::Value(Value::Int(1)))));
        assert!(matches!(frame.next(), Some(Item::Block(_))));
        assert!(matches!(frame.next(), Some(Item::Value(Value::Int(2)))));
        assert!(matches!(frame.next(), Some(Item::Block(_))));
        assert!(matches!(frame.next(), Some(Item::Token(t)) if t.text == "]"));
        assert!(frame.next().is_none());
    }

    #[test]
    fn test_do_checks_before_every_round() {
        let mut frame = Do::new(Block::from_source("1-"));
        let truthy = Value::Int(1);
        match frame.next(Some(&truthy)) {
            Some(Item::Block(body)) => {
                assert_eq!(body.tokens.last().unwrap().text, ";");
            }
            other => panic!("expected body, got {other:?}"),
        }
        assert!(frame.next(Some(&Value::Int(0))).is_none());
        assert!(frame.next(None).is_none());
    }

    #[test]
    fn test_while_alternates_condition_and_body() {
        let mut frame = CondLoop::new(Block::from_source("."), Block::from_source("1-"));
        let five = Value::Int(5);
        let zero = Value::Int(0);
        assert!(matches!(frame.next(Some(&five), false), Some(Item::Block(_))));
        assert!(matches!(frame.next(Some(&five), false), Some(Item::Block(_))));
        assert!(matches!(frame.next(Some(&five), false), Some(Item::Block(_))));
        assert!(frame.next(Some(&zero), false).is_none());
    }

    #[test]
    fn test_until_negates_the_check() {
        let mut frame = CondLoop::new(Block::from_source("."), Block::from_source("1-"));
        let five = Value::Int(5);
        assert!(matches!(frame.next(Some(&five), true), Some(Item::Block(_))));
        assert!(frame.next(Some(&five), true).is_none());
    }

    #[test]
    fn test_map_sequencer_step_order() {
        let mut frame = Sequencer::map(Block::from_source("."), ints(&[7]));
        let top = Value::Int(0);
        let steps = [
            ("[", true),
            ("item", true),
            ("body", true),
            ("]", true),
            ("done", false),
        ];
        for (expect, has_item) in steps {
            let item = frame.next(Some(&top)).unwrap();
            assert_eq!(item.is_some(), has_item, "at step {expect}");
            match (expect, item) {
                ("[", Some(Item::Token(t))) => assert_eq!(t.text, "["),
                ("item", Some(Item::Value(v))) => assert_eq!(v, Value::Int(7)),
                ("body", Some(Item::Block(b))) => assert!(b.immediate),
                ("]", Some(Item::Token(t))) => assert_eq!(t.text, "]"),
                ("done", None) => {}
                (step, got) => panic!("unexpected item at {step}: {got:?}"),
            }
        }
    }

    #[test]
    fn test_filter_sequencer_keeps_truthy_positions() {
        let mut frame = Sequencer::filter(Block::from_source("."), ints(&[10, 20]));
        let mapped = Value::List(ints(&[0, 1]));

        // start bracket, two item/body rounds, close bracket
        for _ in 0..6 {
            frame.next(Some(&mapped)).unwrap();
        }
        // filter reads the mapped list from the top and emits the pop
        match frame.next(Some(&mapped)).unwrap() {
            Some(Item::Token(t)) => assert_eq!(t.text, ";"),
            other => panic!("expected ';', got {other:?}"),
        }
        match frame.next(Some(&mapped)).unwrap() {
            Some(Item::Value(Value::List(kept))) => assert_eq!(kept, ints(&[20])),
            other => panic!("expected kept list, got {other:?}"),
        }
        assert!(frame.next(Some(&mapped)).unwrap().is_none());
    }

    #[test]
    fn test_frame_ip_progress_is_monotonic() {
        let mut frame = Frame::ForEach(ForEach::new(Block::from_source("."), ints(&[1, 2]), 1));
        let mut last = 0;
        while let Ok(Some(_)) = frame.next_item(None) {
            let ip = frame.ip();
            assert!(ip >= last);
            last = ip;
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn test_block_display_round_trip() {
        let block = Block::from_source("1 2+");
        assert_eq!(block.to_string(), "{1 2+}");
        let reparsed = Block::from_source(&block.source_text());
        assert_eq!(reparsed, block);
    }
}
