pub use logos::Span;
use logos::{Lexer, Logos};

use crate::{ast::Type, compiler::bytecode::Word};

fn read_natural(lexer: &mut Lexer<Token>) -> Result<Word, LexerError> {
    // the regex only admits ASCII digits, so overflow is the only failure left
    lexer
        .slice()
        .parse()
        .map_err(|_| LexerError::NumberTooBig(Box::from(lexer.slice())))
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("number literal too big: {0}")]
    NumberTooBig(Box<str>),
}

/// Tokens of µ-Opal.
///
/// Whitespace, line endings and comments are real tokens rather than being skipped,
/// so that the syntax tree built from them can reproduce the source byte for byte.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
pub enum Token {
    #[regex("[ \t\x0C]+")]
    Whitespace,
    #[token("\n")]
    #[token("\r\n")]
    #[token("\r")]
    LineEnding,
    #[regex(r"--[^\r\n]*")]
    Comment,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("==")]
    DefinedAs,

    #[token("DEF")]
    Def,
    #[token("IF")]
    If,
    #[token("THEN")]
    Then,
    #[token("ELSE")]
    Else,
    #[token("FI")]
    Fi,

    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Boolean(bool),
    #[token("nat", |_| Type::Nat)]
    #[token("bool", |_| Type::Bool)]
    Type(Type),
    #[regex("[0-9]+", read_natural)]
    Natural(Word),
    #[regex("[A-Za-z_][A-Za-z0-9_]*", |l| Box::from(l.slice()))]
    Identifier(Box<str>),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }

    /// Tokens the parser never looks at.
    pub fn is_trivia(&self) -> bool {
        matches!(self, Self::Whitespace | Self::LineEnding | Self::Comment)
    }
}

#[cfg(test)]
mod tests {
    use super::{LexerError, Token};
    use crate::ast::Type;
    use assert2::{check, let_assert};

    fn significant(source: &str) -> Vec<Result<Token, LexerError>> {
        Token::lexer(source)
            .filter(|tok| !tok.as_ref().is_ok_and(Token::is_trivia))
            .collect()
    }

    #[test]
    fn keywords_beat_identifiers() {
        check!(Token::lexer("DEF").next() == Some(Ok(Token::Def)));
        check!(Token::lexer("FI").next() == Some(Ok(Token::Fi)));
        check!(Token::lexer("DEFINE").next() == Some(Ok(Token::Identifier(Box::from("DEFINE")))));
        check!(Token::lexer("nats").next() == Some(Ok(Token::Identifier(Box::from("nats")))));
        check!(Token::lexer("nat").next() == Some(Ok(Token::Type(Type::Nat))));
        check!(Token::lexer("bool").next() == Some(Ok(Token::Type(Type::Bool))));
    }

    #[test]
    fn case_sensitivity() {
        // only the upper case spelling is a keyword
        check!(Token::lexer("def").next() == Some(Ok(Token::Identifier(Box::from("def")))));
        check!(Token::lexer("True").next() == Some(Ok(Token::Identifier(Box::from("True")))));
        check!(Token::lexer("true").next() == Some(Ok(Token::Boolean(true))));
    }

    #[test]
    fn definition_head() {
        let tokens = significant("DEF fac(n:nat):nat == n");
        check!(
            tokens
                == vec![
                    Ok(Token::Def),
                    Ok(Token::Identifier(Box::from("fac"))),
                    Ok(Token::LParen),
                    Ok(Token::Identifier(Box::from("n"))),
                    Ok(Token::Colon),
                    Ok(Token::Type(Type::Nat)),
                    Ok(Token::RParen),
                    Ok(Token::Colon),
                    Ok(Token::Type(Type::Nat)),
                    Ok(Token::DefinedAs),
                    Ok(Token::Identifier(Box::from("n"))),
                ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        let mut lexer = Token::lexer("-- a comment == DEF\nFI");
        check!(lexer.next() == Some(Ok(Token::Comment)));
        check!(lexer.slice() == "-- a comment == DEF");
        check!(lexer.next() == Some(Ok(Token::LineEnding)));
        check!(lexer.next() == Some(Ok(Token::Fi)));
        check!(lexer.next() == None);
    }

    #[test]
    fn line_endings() {
        let tokens: Vec<_> = Token::lexer("\r\n\n\r").collect();
        check!(tokens == vec![Ok(Token::LineEnding); 3]);
    }

    #[test]
    fn naturals() {
        check!(Token::lexer("0").next() == Some(Ok(Token::Natural(0))));
        check!(Token::lexer("3628800").next() == Some(Ok(Token::Natural(3628800))));
        check!(
            Token::lexer("18446744073709551615").next() == Some(Ok(Token::Natural(u64::MAX)))
        );
        let_assert!(Some(Err(LexerError::NumberTooBig(text))) = Token::lexer("18446744073709551616").next());
        check!(text.as_ref() == "18446744073709551616");
    }

    #[test]
    fn invalid_characters() {
        let mut lexer = Token::lexer("a + b");
        check!(lexer.next() == Some(Ok(Token::Identifier(Box::from("a")))));
        check!(lexer.next() == Some(Ok(Token::Whitespace)));
        check!(lexer.next() == Some(Err(LexerError::Invalid)));
        check!(lexer.span() == (2..3));
        // a lone `=` is not the definition marker
        check!(Token::lexer("=").next() == Some(Err(LexerError::Invalid)));
    }
}
