//! Integration tests for the Grit interpreter
//!
//! Each test runs a complete program through the public API and checks
//! the final operand stack.

use grit::interp::{Block, ErrorKind, Interpreter, Value};

/// Run a program to completion and return the final stack.
fn run(source: &str) -> Vec<Value> {
    Interpreter::new(source)
        .execute_all()
        .unwrap_or_else(|e| panic!("program {source:?} failed: {e}"))
}

/// Run a program expected to leave exactly one value.
fn run_one(source: &str) -> Value {
    let mut stack = run(source);
    assert_eq!(stack.len(), 1, "expected one result for {source:?}, got {stack:?}");
    stack.pop().unwrap()
}

/// Run a program expected to fail, returning the error.
fn run_err(source: &str) -> grit::RuntimeError {
    Interpreter::new(source)
        .execute_all()
        .expect_err(&format!("program {source:?} should have failed"))
}

fn int(n: i64) -> Value {
    Value::Int(n)
}

fn text(s: &str) -> Value {
    Value::Str(s.to_string())
}

fn ints(ns: &[i64]) -> Value {
    Value::List(ns.iter().copied().map(Value::Int).collect())
}

fn block(source: &str) -> Value {
    Value::Block(Block::from_source(source))
}

// ============================================
// Arithmetic and coercion
// ============================================

#[test]
fn test_add_integers() {
    assert_eq!(run_one("5 7+"), int(12));
}

#[test]
fn test_add_lists_concatenates() {
    assert_eq!(run("[1 2 3][4 5]+"), vec![ints(&[1, 2, 3, 4, 5])]);
}

#[test]
fn test_add_coerces_text_toward_block() {
    match run_one("'asdf'{1234}+") {
        Value::Block(b) => assert_eq!(b.source_text(), "asdf1234"),
        other => panic!("expected block, got {other:?}"),
    }
}

#[test]
fn test_add_int_coerces_into_list() {
    assert_eq!(run_one("[1 2]3+"), ints(&[1, 2, 3]));
}

#[test]
fn test_sub_integers() {
    assert_eq!(run_one("1 2- 3+"), int(2));
}

#[test]
fn test_sub_greedy_negative_literals() {
    // "2-3" scans as 2 and -3; the minus only binds as an operator
    // when no digit follows it
    assert_eq!(run("1 2-3+"), vec![int(1), int(-1)]);
    assert_eq!(run("1 2 -3+"), vec![int(1), int(-1)]);
}

#[test]
fn test_sub_list_difference() {
    assert_eq!(run_one("[5 2 5 4 1 1][1 2]-"), ints(&[5, 5, 4]));
}

#[test]
fn test_mul_integers() {
    assert_eq!(run_one("5 7*"), int(35));
}

#[test]
fn test_mul_block_count_repeats() {
    assert_eq!(run_one("2 {2*} 5*"), int(64));
}

#[test]
fn test_mul_list_repetition() {
    assert_eq!(run_one("[1 2 3]2*"), ints(&[1, 2, 3, 1, 2, 3]));
}

#[test]
fn test_mul_text_repetition() {
    assert_eq!(run_one("3'asdf'*"), text("asdfasdfasdf"));
}

#[test]
fn test_mul_text_join_of_list() {
    assert_eq!(run_one("[1 2 3]','*"), text("1,2,3"));
}

#[test]
fn test_mul_list_join_with_list_separator() {
    assert_eq!(run_one("[1 2 3][4]*"), ints(&[1, 4, 2, 4, 3]));
}

#[test]
fn test_mul_text_join_of_chars() {
    assert_eq!(run_one("'asdf'' '*"), text("a s d f"));
}

#[test]
fn test_mul_text_join_flattens_nested_lists() {
    assert_eq!(run_one("[1 [2] [3 [4 [5]]]]'-'*"), text("1-2-345"));
}

#[test]
fn test_mul_list_join_flattens_one_level() {
    assert_eq!(
        run_one("[1 [2] [3 [4 [5]]]][6 7]*"),
        Value::List(vec![
            int(1),
            int(6),
            int(7),
            int(2),
            int(6),
            int(7),
            int(3),
            Value::List(vec![int(4), Value::List(vec![int(5)])]),
        ])
    );
}

#[test]
fn test_mul_block_over_list_folds() {
    assert_eq!(run_one("[1 2 3 4]{+}*"), int(10));
}

#[test]
fn test_div_integers_floor() {
    assert_eq!(run_one("7 3 /"), int(2));
}

#[test]
fn test_div_text_split_keeps_empties() {
    assert_eq!(run_one("'a s d f' ' '/"), Value::List(vec![text("a"), text("s"), text("d"), text("f")]));
    assert_eq!(
        run_one("'assdfs' 's'/"),
        Value::List(vec![text("a"), text(""), text("df"), text("")])
    );
}

#[test]
fn test_div_list_chunking() {
    assert_eq!(
        run_one("[1 2 3 4 5] 2/"),
        Value::List(vec![ints(&[1, 2]), ints(&[3, 4]), ints(&[5])])
    );
}

#[test]
fn test_div_block_collects_per_item_results() {
    assert_eq!(run_one("[1 2 3]{1+}/"), ints(&[2, 3, 4]));
}

#[test]
fn test_mod_integers() {
    assert_eq!(run_one("7 3 %"), int(1));
}

#[test]
fn test_mod_text_split_drops_empties() {
    assert_eq!(run_one("'assdfs' 's'%"), Value::List(vec![text("a"), text("df")]));
}

#[test]
fn test_mod_list_stride() {
    assert_eq!(run_one("[1 2 3 4 5] 2%"), ints(&[1, 3, 5]));
}

#[test]
fn test_mod_negative_stride_reverses() {
    assert_eq!(run_one("[1 2 3 4 5] -1%"), ints(&[5, 4, 3, 2, 1]));
}

#[test]
fn test_mod_block_maps_over_list() {
    assert_eq!(run_one("[1 2 3]{.}%"), ints(&[1, 1, 2, 2, 3, 3]));
}

// ============================================
// Bitwise and set operators
// ============================================

#[test]
fn test_bit_or_integers() {
    assert_eq!(run_one("5 3|"), int(7));
}

#[test]
fn test_bit_and_integers() {
    assert_eq!(run_one("2 1&"), int(0));
}

#[test]
fn test_set_intersection_dedups() {
    assert_eq!(run_one("[1 1 2 2][1 3]&"), ints(&[1]));
}

#[test]
fn test_bit_xor_integers() {
    assert_eq!(run_one("2 1^"), int(3));
}

#[test]
fn test_set_symmetric_difference() {
    assert_eq!(run_one("[1 1 2 2][1 3]^"), ints(&[2, 3]));
}

// ============================================
// Stack shaping
// ============================================

#[test]
fn test_rot_permutation() {
    // top takes the old third-from-top; second takes the old top
    assert_eq!(run("1 2 3 4 @"), vec![int(1), int(3), int(4), int(2)]);
}

#[test]
fn test_swap() {
    assert_eq!(run("1 2 3 \\"), vec![int(1), int(3), int(2)]);
}

#[test]
fn test_pop() {
    assert_eq!(run("1 2 3;"), vec![int(1), int(2)]);
}

#[test]
fn test_pop_on_empty_stack_is_noop() {
    assert_eq!(run(";"), vec![]);
}

#[test]
fn test_dup() {
    assert_eq!(run("1 2 3."), vec![int(1), int(2), int(3), int(3)]);
}

#[test]
fn test_select_copies_nth_below() {
    assert_eq!(
        run("1 2 3 4 5 1$"),
        vec![int(1), int(2), int(3), int(4), int(5), int(4)]
    );
}

#[test]
fn test_select_sorts_text() {
    assert_eq!(run_one("'asdf'$"), text("adfs"));
}

#[test]
fn test_select_sorts_list() {
    assert_eq!(run_one("[12 3 5 1]$"), ints(&[1, 3, 5, 12]));
}

// ============================================
// Brackets
// ============================================

#[test]
fn test_bracket_literals() {
    assert_eq!(
        run("[ 1 2 3 4 ] [ 1 2 ]"),
        vec![ints(&[1, 2, 3, 4]), ints(&[1, 2])]
    );
}

#[test]
fn test_empty_bracket_slice_pushes_nothing() {
    // the swap happens inside the brackets but below the recorded
    // depth, so the close finds nothing to collapse
    assert_eq!(run("1 2 [\\]"), vec![int(2), int(1)]);
}

// ============================================
// Evaluation and rendering
// ============================================

#[test]
fn test_tilde_bitwise_not() {
    assert_eq!(run_one("5~"), int(-6));
}

#[test]
fn test_tilde_evaluates_text() {
    assert_eq!(run_one("\"1 2+\"~"), int(3));
}

#[test]
fn test_tilde_evaluates_block() {
    assert_eq!(run_one("{1 2+}~"), int(3));
}

#[test]
fn test_tilde_splices_list() {
    assert_eq!(run("[1 2 3]~"), vec![int(1), int(2), int(3)]);
}

#[test]
fn test_render_int() {
    assert_eq!(run_one("1`"), text("1"));
}

#[test]
fn test_render_list() {
    assert_eq!(run_one("[1 [2] 'asdf']`"), text("[1 [2] 'asdf']"));
}

#[test]
fn test_render_text_gets_quotes() {
    assert_eq!(run_one("\"1\"`"), text("\"1\""));
}

#[test]
fn test_render_block() {
    assert_eq!(run_one("{1}`"), text("{1}"));
}

#[test]
fn test_not() {
    assert_eq!(run_one("1!"), int(0));
    assert_eq!(run_one("{asdf}!"), int(0));
    assert_eq!(run_one("\"\"!"), int(1));
}

// ============================================
// Assignment
// ============================================

#[test]
fn test_assign_keeps_value_on_stack() {
    assert_eq!(run("1:a a"), vec![int(1), int(1)]);
}

#[test]
fn test_assigned_block_is_called() {
    assert_eq!(run_one("{1 1+}:x; x"), int(2));
}

#[test]
fn test_assign_reserved_token_binds_nothing() {
    let mut vm = Interpreter::new("1::");
    assert_eq!(vm.execute_all().unwrap(), vec![int(1)]);
    assert!(vm.symbol_diff().is_empty());
}

#[test]
fn test_assign_whitespace_token_is_bindable() {
    // the token after the colon binds verbatim, whatever it is
    let mut vm = Interpreter::new("1: ");
    vm.execute_all().unwrap();
    assert_eq!(vm.symbol_diff().len(), 1);
    assert_eq!(vm.symbol_diff()[0].0, " ");
}

// ============================================
// Comparisons, slicing, indexing
// ============================================

#[test]
fn test_lt_integers_and_text() {
    assert_eq!(run_one("3 4 <"), int(1));
    assert_eq!(run_one("\"asdf\" \"asdg\" <"), int(1));
}

#[test]
fn test_lt_list_prefix() {
    assert_eq!(run_one("[1 2 3] 2 <"), ints(&[1, 2]));
}

#[test]
fn test_lt_block_prefix_retokenizes() {
    assert_eq!(run_one("{asdf} -1 <"), block("asd"));
}

#[test]
fn test_gt_integers_and_text() {
    assert_eq!(run_one("3 4 >"), int(0));
    assert_eq!(run_one("\"asdf\" \"asdg\" >"), int(0));
}

#[test]
fn test_gt_list_suffix() {
    assert_eq!(run_one("[1 2 3] 2 >"), ints(&[3]));
}

#[test]
fn test_gt_block_suffix_retokenizes() {
    assert_eq!(run_one("{asdf} -1 >"), block("f"));
}

#[test]
fn test_eq_compares() {
    assert_eq!(run_one("3 4 ="), int(0));
    assert_eq!(run_one("3 3 ="), int(1));
    assert_eq!(run_one("\"asdf\" \"asdg\" ="), int(0));
}

#[test]
fn test_eq_list_index() {
    assert_eq!(run_one("[1 2 3] 2 ="), int(3));
    assert_eq!(run_one("[1 2 3] -1 ="), int(3));
}

#[test]
fn test_eq_block_index_gives_ordinal() {
    assert_eq!(run_one("{asdf} -1 ="), int(102));
}

#[test]
fn test_eq_index_out_of_range_leaves_stack() {
    assert_eq!(run("[1 2 3] 5 ="), vec![ints(&[1, 2, 3]), int(5)]);
    assert_eq!(run("[1 2 3] -4 ="), vec![ints(&[1, 2, 3]), int(-4)]);
}

// ============================================
// Range, length, filter
// ============================================

#[test]
fn test_arr_range() {
    assert_eq!(run_one("10,"), ints(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]));
}

#[test]
fn test_arr_length() {
    assert_eq!(run_one("10,,"), int(10));
}

#[test]
fn test_arr_filter() {
    assert_eq!(run_one("10,{3%},"), ints(&[1, 2, 4, 5, 7, 8]));
}

// ============================================
// Control flow
// ============================================

#[test]
fn test_do_loop() {
    assert_eq!(
        run("5{1-..}do"),
        vec![int(4), int(3), int(2), int(1), int(0), int(0)]
    );
}

#[test]
fn test_while_loop() {
    assert_eq!(
        run("5{.}{1-.}while"),
        vec![int(4), int(3), int(2), int(1), int(0), int(0)]
    );
}

#[test]
fn test_until_loop_stops_immediately_on_truthy() {
    assert_eq!(run_one("5{.}{1-.}until"), int(5));
}

#[test]
fn test_if_takes_then_branch() {
    assert_eq!(run_one("1 2 3 if"), int(2));
}

#[test]
fn test_if_takes_else_branch() {
    assert_eq!(run_one("0 2 3 if"), int(3));
}

#[test]
fn test_if_consumes_exactly_three() {
    assert_eq!(run("9 1 2 3 if"), vec![int(9), int(2)]);
}

// ============================================
// Logical aliases
// ============================================

#[test]
fn test_and_alias() {
    assert_eq!(run_one("1 2 and"), int(2));
    assert_eq!(run_one("0 2 and"), int(0));
}

#[test]
fn test_or_alias() {
    assert_eq!(run_one("0 3 or"), int(3));
    assert_eq!(run_one("1 0 or"), int(1));
}

#[test]
fn test_xor_alias() {
    assert_eq!(run_one("1 0 xor"), int(1));
    assert_eq!(run_one("0 1 xor"), int(1));
    assert_eq!(run_one("1 1 xor"), int(0));
    assert_eq!(run_one("0 0 xor"), int(0));
}

// ============================================
// Uncons / unsnoc
// ============================================

#[test]
fn test_dec_int_and_uncons() {
    assert_eq!(run_one("5("), int(4));
    assert_eq!(run("[1 2 3]("), vec![ints(&[2, 3]), int(1)]);
}

#[test]
fn test_inc_int_and_unsnoc() {
    assert_eq!(run_one("5)"), int(6));
    assert_eq!(run("[1 2 3])"), vec![ints(&[1, 2]), int(3)]);
}

#[test]
fn test_abs() {
    assert_eq!(run_one("-5 abs"), int(5));
}

// ============================================
// zip and base
// ============================================

#[test]
fn test_zip_transposes() {
    assert_eq!(
        run_one("[[1 2 3][4 5 6][7 8 9]]zip"),
        Value::List(vec![ints(&[1, 4, 7]), ints(&[2, 5, 8]), ints(&[3, 6, 9])])
    );
}

#[test]
fn test_zip_collapses_text_rows() {
    assert_eq!(
        run_one("['asdf''1234']zip"),
        Value::List(vec![text("a1"), text("s2"), text("d3"), text("f4")])
    );
}

#[test]
fn test_base_digits_to_integer() {
    assert_eq!(run_one("[1 1 0] 2 base"), int(6));
}

// ============================================
// Comments and whitespace
// ============================================

#[test]
fn test_comment_is_ignored() {
    assert_eq!(run_one("1 # comment with 9 9+\n2+"), int(3));
}

#[test]
fn test_deep_copy_between_iterations() {
    // each iteration captures independent copies; a shared list would
    // keep growing
    assert_eq!(run_one("[1]:l; 0 {;l 0=}2*"), int(1));
}

// ============================================
// Error taxonomy
// ============================================

#[test]
fn test_pow_always_fails() {
    assert_eq!(run_err("2 3 ?").kind, ErrorKind::NotImplemented);
    assert_eq!(run_err("[1] 3 ?").kind, ErrorKind::NotImplemented);
}

#[test]
fn test_base_inverse_direction_fails_distinctly() {
    assert_eq!(run_err("6 2 base").kind, ErrorKind::NotImplemented);
}

#[test]
fn test_unsupported_operand_kinds() {
    let err = run_err("2 'x'%");
    assert_eq!(err.kind, ErrorKind::UnsupportedOperands);
    assert!(err.message.contains('%'));
    assert!(err.message.contains("int"));
    assert!(err.message.contains("text"));
}

#[test]
fn test_unsupported_leaves_stack_intact() {
    let mut vm = Interpreter::new("2 'x'%");
    loop {
        match vm.execute_instruction() {
            Ok(true) => {}
            Ok(false) => panic!("program should have failed"),
            Err(_) => break,
        }
    }
    assert_eq!(vm.stack(), &[int(2), text("x")]);
}

#[test]
fn test_stack_underflow_is_reported() {
    assert_eq!(run_err("+").kind, ErrorKind::StackUnderflow);
    assert_eq!(run_err("1 @").kind, ErrorKind::StackUnderflow);
}

#[test]
fn test_bracket_underflow_is_reported() {
    assert_eq!(run_err("]").kind, ErrorKind::BracketUnderflow);
}

#[test]
fn test_unmatched_brace_is_structural_error() {
    let err = run_err("{1 2+");
    assert_eq!(err.kind, ErrorKind::UnmatchedBrace);
    assert!(err.span.is_some());
}

#[test]
fn test_division_by_zero_is_reported() {
    assert_eq!(run_err("1 0/").kind, ErrorKind::DivisionByZero);
    assert_eq!(run_err("1 0%").kind, ErrorKind::DivisionByZero);
}

#[test]
fn test_stack_overflow_is_reported() {
    // each iteration pushes a fresh copy without consuming anything
    assert_eq!(run_err("1{..}600*").kind, ErrorKind::StackOverflow);
}
