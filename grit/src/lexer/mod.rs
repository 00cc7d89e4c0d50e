//! Scanner implementation using logos

mod span;
mod token;

pub use span::Span;
pub use token::Token;

use logos::Logos;
use token::RawToken;

/// Tokenize source text.
///
/// Every surviving token keeps its `[start, end)` byte span into the
/// original text. Comments are matched and then dropped without
/// disturbing the spans of later tokens. Whitespace is not skipped:
/// each whitespace character is its own single-character token that
/// later dispatches to nothing, so a block's source text can be
/// reassembled verbatim from its tokens.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut lexer = RawToken::lexer(source);

    while let Some(result) = lexer.next() {
        let span = Span::new(lexer.span().start, lexer.span().end);
        match result {
            Ok(RawToken::Comment) => {}
            Ok(_) | Err(()) => tokens.push(Token::new(lexer.slice(), span)),
        }
    }

    tokens
}
