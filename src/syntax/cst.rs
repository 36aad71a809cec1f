//! A strongly-typed layer over the [`rowan`] tree produced by the parser.
//!
//! The tree is lossless: every byte of the source, whitespace and comments
//! included, is in exactly one token. The wrappers here only give names to
//! the positions that matter.
use crate::{ast::Type, lexer::Span, lexer::Token};

/// Syntax kinds of µ-Opal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
#[repr(u16)]
pub enum SyntaxKind {
    // Tokens
    /// any kind of inline whitespace
    WHITESPACE = 0,
    /// \r | \n | \r\n
    LINE_ENDING,
    /// -- comment
    COMMENT,
    /// (
    L_PAREN,
    /// )
    R_PAREN,
    /// ,
    COMMA,
    /// :
    COLON,
    /// ==
    DEFINED_AS,
    DEF_KW,
    IF_KW,
    THEN_KW,
    ELSE_KW,
    FI_KW,
    /// true | false
    BOOLEAN,
    /// nat | bool
    TYPE,
    /// a natural number literal
    NATURAL,
    /// function, parameter and variable names
    IDENT,
    /// anything the lexer or the parser could not make sense of
    ERROR,

    // Composite nodes
    /// `DEF f(n:nat):nat == body`
    DEFINITION,
    /// `(a:nat, b:bool)`
    PARAM_LIST,
    /// `a:nat`
    PARAM,
    /// `3` or `true`
    LITERAL,
    /// `n`
    VARIABLE,
    /// `f(1, n)`
    CALL,
    /// `(1, n)`
    ARG_LIST,
    /// `IF c THEN t ELSE e FI`
    CONDITIONAL,
    /// top-level node: a list of definitions
    ROOT,
}
use SyntaxKind::*;

impl SyntaxKind {
    pub fn is_trivia(self) -> bool {
        matches!(self, WHITESPACE | LINE_ENDING | COMMENT)
    }
}

impl From<&Token> for SyntaxKind {
    fn from(token: &Token) -> Self {
        match token {
            Token::Whitespace => WHITESPACE,
            Token::LineEnding => LINE_ENDING,
            Token::Comment => COMMENT,
            Token::LParen => L_PAREN,
            Token::RParen => R_PAREN,
            Token::Comma => COMMA,
            Token::Colon => COLON,
            Token::DefinedAs => DEFINED_AS,
            Token::Def => DEF_KW,
            Token::If => IF_KW,
            Token::Then => THEN_KW,
            Token::Else => ELSE_KW,
            Token::Fi => FI_KW,
            Token::Boolean(_) => BOOLEAN,
            Token::Type(_) => TYPE,
            Token::Natural(_) => NATURAL,
            Token::Identifier(_) => IDENT,
        }
    }
}

/// rowan keeps its own `struct SyntaxKind(u16)`, so convert into it with
/// `.into()`.
impl From<SyntaxKind> for rowan::SyntaxKind {
    fn from(kind: SyntaxKind) -> Self {
        Self(kind as u16)
    }
}

/// Teaches rowan to convert back, so the tree API hands out our kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpalLang {}
impl rowan::Language for OpalLang {
    type Kind = SyntaxKind;
    fn kind_from_raw(raw: rowan::SyntaxKind) -> Self::Kind {
        assert!(raw.0 <= ROOT as u16);
        // SAFETY: SyntaxKind is repr(u16) with contiguous discriminants up to ROOT
        unsafe { std::mem::transmute::<u16, SyntaxKind>(raw.0) }
    }
    fn kind_to_raw(kind: Self::Kind) -> rowan::SyntaxKind {
        kind.into()
    }
}

pub type OpalSyntaxNode = rowan::SyntaxNode<OpalLang>;
pub type OpalSyntaxToken = rowan::SyntaxToken<OpalLang>;
pub type OpalSyntaxElement = rowan::NodeOrToken<OpalSyntaxNode, OpalSyntaxToken>;

/// Byte range of a node without its leading and trailing trivia.
pub fn trimmed_span(node: &OpalSyntaxNode) -> Span {
    let mut significant = node
        .descendants_with_tokens()
        .filter_map(|elem| elem.into_token())
        .filter(|tok| !tok.kind().is_trivia());
    let range = node.text_range();
    let whole = usize::from(range.start())..usize::from(range.end());
    let Some(first) = significant.next() else {
        return whole;
    };
    let last = significant.last().unwrap_or_else(|| first.clone());
    usize::from(first.text_range().start())..usize::from(last.text_range().end())
}

pub fn token_span(token: &OpalSyntaxToken) -> Span {
    let range = token.text_range();
    usize::from(range.start())..usize::from(range.end())
}

/// Anything that is a non-terminal
pub trait CstNode {
    fn cast(syntax: OpalSyntaxNode) -> Option<Self>
    where
        Self: Sized;

    fn syntax(&self) -> &OpalSyntaxNode;

    fn span(&self) -> Span {
        trimmed_span(self.syntax())
    }
}

macro_rules! simple_cst {
    (node $name:ident from $kind:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) OpalSyntaxNode);

        impl CstNode for $name {
            fn cast(syntax: OpalSyntaxNode) -> Option<Self>
            where
                Self: Sized,
            {
                (syntax.kind() == $kind).then_some(Self(syntax))
            }

            fn syntax(&self) -> &OpalSyntaxNode {
                &self.0
            }
        }
    };
}

fn child_token(node: &OpalSyntaxNode, kind: SyntaxKind) -> Option<OpalSyntaxToken> {
    node.children_with_tokens()
        .filter_map(OpalSyntaxElement::into_token)
        .find(|tok| tok.kind() == kind)
}

fn type_of(token: &OpalSyntaxToken) -> Option<Type> {
    match token.text() {
        "nat" => Some(Type::Nat),
        "bool" => Some(Type::Bool),
        _ => None,
    }
}

simple_cst!(node Module from ROOT);
impl Module {
    pub fn definitions(&self) -> impl Iterator<Item = Definition> {
        self.0.children().filter_map(Definition::cast)
    }
}

simple_cst!(node Definition from DEFINITION);
impl Definition {
    pub fn name(&self) -> Option<OpalSyntaxToken> {
        child_token(&self.0, IDENT)
    }

    pub fn param_list(&self) -> Option<ParamList> {
        self.0.children().find_map(ParamList::cast)
    }

    /// The type after the parameter list
    pub fn return_type(&self) -> Option<Type> {
        child_token(&self.0, TYPE).as_ref().and_then(type_of)
    }

    pub fn body(&self) -> Option<Expr> {
        self.0.children().find_map(Expr::cast)
    }
}

simple_cst!(node ParamList from PARAM_LIST);
impl ParamList {
    pub fn params(&self) -> impl Iterator<Item = Param> {
        self.0.children().filter_map(Param::cast)
    }
}

simple_cst!(node Param from PARAM);
impl Param {
    pub fn name(&self) -> Option<OpalSyntaxToken> {
        child_token(&self.0, IDENT)
    }

    pub fn ty(&self) -> Option<Type> {
        child_token(&self.0, TYPE).as_ref().and_then(type_of)
    }
}

simple_cst!(node Literal from LITERAL);
impl Literal {
    pub fn token(&self) -> Option<OpalSyntaxToken> {
        self.0
            .children_with_tokens()
            .filter_map(OpalSyntaxElement::into_token)
            .find(|tok| matches!(tok.kind(), NATURAL | BOOLEAN))
    }
}

simple_cst!(node Variable from VARIABLE);
impl Variable {
    pub fn name(&self) -> Option<OpalSyntaxToken> {
        child_token(&self.0, IDENT)
    }
}

simple_cst!(node Call from CALL);
impl Call {
    pub fn name(&self) -> Option<OpalSyntaxToken> {
        child_token(&self.0, IDENT)
    }

    pub fn arg_list(&self) -> Option<ArgList> {
        self.0.children().find_map(ArgList::cast)
    }
}

simple_cst!(node ArgList from ARG_LIST);
impl ArgList {
    pub fn args(&self) -> impl Iterator<Item = Expr> {
        self.0.children().filter_map(Expr::cast)
    }
}

simple_cst!(node Conditional from CONDITIONAL);
impl Conditional {
    fn part(&self, n: usize) -> Option<Expr> {
        self.0.children().filter_map(Expr::cast).nth(n)
    }

    pub fn condition(&self) -> Option<Expr> {
        self.part(0)
    }

    pub fn then_branch(&self) -> Option<Expr> {
        self.part(1)
    }

    pub fn else_branch(&self) -> Option<Expr> {
        self.part(2)
    }
}

/// Any expression node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Literal(Literal),
    Variable(Variable),
    Call(Call),
    Conditional(Conditional),
}

impl CstNode for Expr {
    fn cast(syntax: OpalSyntaxNode) -> Option<Self> {
        match syntax.kind() {
            LITERAL => Some(Self::Literal(Literal(syntax))),
            VARIABLE => Some(Self::Variable(Variable(syntax))),
            CALL => Some(Self::Call(Call(syntax))),
            CONDITIONAL => Some(Self::Conditional(Conditional(syntax))),
            _ => None,
        }
    }

    fn syntax(&self) -> &OpalSyntaxNode {
        match self {
            Self::Literal(node) => node.syntax(),
            Self::Variable(node) => node.syntax(),
            Self::Call(node) => node.syntax(),
            Self::Conditional(node) => node.syntax(),
        }
    }
}
