use rowan::{GreenNode, GreenNodeBuilder};

use crate::lexer::{LexerError, Span, Token};

use super::cst::{
    Module, OpalSyntaxNode,
    SyntaxKind::{self, *},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SyntaxError {
    #[error("{error}")]
    Lexer { error: LexerError, span: Span },
    #[error("expected {expected}, found `{found}`")]
    Unexpected {
        expected: &'static str,
        found: Box<str>,
        span: Span,
    },
    #[error("expected {expected}, found end of input")]
    UnexpectedEof { expected: &'static str, span: Span },
}

impl SyntaxError {
    pub fn span(&self) -> Span {
        match self {
            Self::Lexer { span, .. }
            | Self::Unexpected { span, .. }
            | Self::UnexpectedEof { span, .. } => span.clone(),
        }
    }
}

/// A parsed module: the full-fidelity tree and whatever went wrong building it.
#[derive(Debug, Clone)]
pub struct Parse {
    green: GreenNode,
    errors: Vec<SyntaxError>,
}

impl Parse {
    pub fn syntax(&self) -> OpalSyntaxNode {
        OpalSyntaxNode::new_root(self.green.clone())
    }

    pub fn module(&self) -> Module {
        Module(self.syntax())
    }

    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    pub fn ok(self) -> Result<Module, Vec<SyntaxError>> {
        if self.errors.is_empty() {
            Ok(self.module())
        } else {
            Err(self.errors)
        }
    }
}

struct Lexeme<'s> {
    kind: SyntaxKind,
    text: &'s str,
    span: Span,
}

struct Parser<'s> {
    lexemes: Vec<Lexeme<'s>>,
    pos: usize,
    end: usize,
    builder: GreenNodeBuilder<'static>,
    errors: Vec<SyntaxError>,
}

/// Parses a whole µ-Opal module. Never fails: problems are collected in
/// [`Parse::errors`] and the offending input ends up in `ERROR` nodes.
pub fn parse(source: &str) -> Parse {
    let mut errors = vec![];
    let mut lexer = Token::lexer(source);
    let mut lexemes = vec![];
    while let Some(token) = lexer.next() {
        let span = lexer.span();
        let kind = match &token {
            Ok(token) => SyntaxKind::from(token),
            Err(error) => {
                errors.push(SyntaxError::Lexer {
                    error: error.clone(),
                    span: span.clone(),
                });
                ERROR
            }
        };
        lexemes.push(Lexeme {
            kind,
            text: lexer.slice(),
            span,
        });
    }

    let mut parser = Parser {
        lexemes,
        pos: 0,
        end: source.len(),
        builder: GreenNodeBuilder::new(),
        errors,
    };
    parser.module();
    Parse {
        green: parser.builder.finish(),
        errors: parser.errors,
    }
}

// tokens an expression never starts with but a surrounding construct expects
const EXPR_FOLLOW: [SyntaxKind; 6] = [DEF_KW, THEN_KW, ELSE_KW, FI_KW, R_PAREN, COMMA];

impl<'s> Parser<'s> {
    fn eat_trivia(&mut self) {
        while let Some(lexeme) = self.lexemes.get(self.pos) {
            if !lexeme.kind.is_trivia() {
                break;
            }
            self.builder.token(lexeme.kind.into(), lexeme.text);
            self.pos += 1;
        }
    }

    /// The next significant token kind. Trivia before it is attached to
    /// whatever node is open.
    fn current(&mut self) -> Option<SyntaxKind> {
        self.eat_trivia();
        self.lexemes.get(self.pos).map(|lexeme| lexeme.kind)
    }

    fn at(&mut self, kind: SyntaxKind) -> bool {
        self.current() == Some(kind)
    }

    fn bump(&mut self) {
        if let Some(lexeme) = self.lexemes.get(self.pos) {
            self.builder.token(lexeme.kind.into(), lexeme.text);
            self.pos += 1;
        }
    }

    fn eat(&mut self, kind: SyntaxKind) -> bool {
        let found = self.at(kind);
        if found {
            self.bump();
        }
        found
    }

    fn error(&mut self, expected: &'static str) {
        self.eat_trivia();
        let error = match self.lexemes.get(self.pos) {
            Some(lexeme) => SyntaxError::Unexpected {
                expected,
                found: Box::from(lexeme.text),
                span: lexeme.span.clone(),
            },
            None => SyntaxError::UnexpectedEof {
                expected,
                span: self.end..self.end,
            },
        };
        self.errors.push(error);
    }

    fn expect(&mut self, kind: SyntaxKind, expected: &'static str) -> bool {
        let found = self.eat(kind);
        if !found {
            self.error(expected);
        }
        found
    }

    /// Wraps everything up to the next `DEF` into an error node.
    fn recover(&mut self) {
        self.builder.start_node(ERROR.into());
        while !matches!(self.current(), None | Some(DEF_KW)) {
            self.bump();
        }
        self.builder.finish_node();
    }

    fn module(&mut self) {
        self.builder.start_node(ROOT.into());
        loop {
            match self.current() {
                None => break,
                Some(DEF_KW) => self.definition(),
                Some(_) => {
                    self.error("`DEF`");
                    self.recover();
                }
            }
        }
        self.builder.finish_node();
    }

    fn definition(&mut self) {
        self.builder.start_node(DEFINITION.into());
        self.bump();
        let reported = self.errors.len();
        let head = self.expect(IDENT, "a function name")
            && (!self.at(L_PAREN) || self.param_list())
            && self.expect(COLON, "`:`")
            && self.expect(TYPE, "a type")
            && self.expect(DEFINED_AS, "`==`");
        if head {
            self.expr();
            if !matches!(self.current(), None | Some(DEF_KW)) {
                if self.errors.len() == reported {
                    self.error("the next definition");
                }
                self.recover();
            }
        } else {
            self.recover();
        }
        self.builder.finish_node();
    }

    /// Returns whether the list was well-formed.
    fn param_list(&mut self) -> bool {
        self.builder.start_node(PARAM_LIST.into());
        self.bump();
        let mut ok = true;
        if !self.at(R_PAREN) {
            loop {
                ok &= self.param();
                if !ok || !self.eat(COMMA) {
                    break;
                }
            }
        }
        ok = ok && self.expect(R_PAREN, "`)`");
        self.builder.finish_node();
        ok
    }

    fn param(&mut self) -> bool {
        self.builder.start_node(PARAM.into());
        let ok = self.expect(IDENT, "a parameter name")
            && self.expect(COLON, "`:`")
            && self.expect(TYPE, "a type");
        self.builder.finish_node();
        ok
    }

    fn expr(&mut self) {
        match self.current() {
            Some(NATURAL | BOOLEAN) => {
                self.builder.start_node(LITERAL.into());
                self.bump();
                self.builder.finish_node();
            }
            Some(IDENT) => {
                let checkpoint = self.builder.checkpoint();
                self.bump();
                if self.at(L_PAREN) {
                    self.builder.start_node_at(checkpoint, CALL.into());
                    self.arg_list();
                } else {
                    self.builder.start_node_at(checkpoint, VARIABLE.into());
                }
                self.builder.finish_node();
            }
            Some(IF_KW) => {
                self.builder.start_node(CONDITIONAL.into());
                self.bump();
                self.expr();
                if self.expect(THEN_KW, "`THEN`") {
                    self.expr();
                    if self.expect(ELSE_KW, "`ELSE`") {
                        self.expr();
                        self.expect(FI_KW, "`FI`");
                    }
                }
                self.builder.finish_node();
            }
            // already reported by the lexer
            Some(ERROR) => {
                self.builder.start_node(ERROR.into());
                self.bump();
                self.builder.finish_node();
            }
            Some(kind) if !EXPR_FOLLOW.contains(&kind) => {
                self.error("an expression");
                self.builder.start_node(ERROR.into());
                self.bump();
                self.builder.finish_node();
            }
            _ => self.error("an expression"),
        }
    }

    fn arg_list(&mut self) {
        self.builder.start_node(ARG_LIST.into());
        self.bump();
        if !self.at(R_PAREN) {
            loop {
                self.expr();
                if !self.eat(COMMA) {
                    break;
                }
            }
        }
        self.expect(R_PAREN, "`)`");
        self.builder.finish_node();
    }
}
