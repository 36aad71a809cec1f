//! Lowering from the syntax tree to the [`ast`](crate::ast).
//!
//! Only trees without syntax errors are complete; anything missing from a
//! tree with errors is left out instead of being reported a second time.
use crate::{
    ast::{self, Literal, Param, UserDefinition},
    compiler::bytecode::Word,
};

use super::cst::{self, token_span, CstNode, Module, SyntaxKind};

pub fn lower(module: &Module) -> Vec<UserDefinition> {
    module
        .definitions()
        .filter_map(|def| lower_definition(&def))
        .collect()
}

fn lower_definition(def: &cst::Definition) -> Option<UserDefinition> {
    let name = def.name()?;
    let params = match def.param_list() {
        Some(list) => list
            .params()
            .map(|param| lower_param(&param))
            .collect::<Option<Vec<_>>>()?,
        None => vec![],
    };
    Some(UserDefinition {
        name: Box::from(name.text()),
        params,
        return_type: def.return_type()?,
        body: lower_expr(&def.body()?)?,
        span: token_span(&name),
    })
}

fn lower_param(param: &cst::Param) -> Option<Param> {
    Some(Param {
        name: Box::from(param.name()?.text()),
        ty: param.ty()?,
        span: param.span(),
    })
}

fn lower_expr(expr: &cst::Expr) -> Option<ast::Expr> {
    let kind = match expr {
        cst::Expr::Literal(lit) => {
            let token = lit.token()?;
            let literal = match token.kind() {
                SyntaxKind::BOOLEAN => Literal::Bool(token.text() == "true"),
                _ => Literal::Nat(token.text().parse::<Word>().ok()?),
            };
            ast::ExprKind::Literal(literal)
        }
        cst::Expr::Variable(var) => ast::ExprKind::Variable(Box::from(var.name()?.text())),
        cst::Expr::Call(call) => ast::ExprKind::Apply {
            function: Box::from(call.name()?.text()),
            arguments: call
                .arg_list()?
                .args()
                .map(|arg| lower_expr(&arg))
                .collect::<Option<_>>()?,
        },
        cst::Expr::Conditional(cond) => ast::ExprKind::Conditional {
            condition: Box::new(lower_expr(&cond.condition()?)?),
            then_branch: Box::new(lower_expr(&cond.then_branch()?)?),
            else_branch: Box::new(lower_expr(&cond.else_branch()?)?),
        },
    };
    Some(ast::Expr::new(kind, expr.span()))
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::lower;
    use crate::{
        ast::{Expr, ExprKind, Literal, Type},
        syntax::parse,
    };

    #[test]
    fn lowering() {
        let source = "DEF twice(x:nat, b:bool):nat == IF b THEN add(x, x) ELSE x FI\nDEF MAIN:nat == twice(21, true)";
        let_assert!(Ok(module) = parse(source).ok());
        let rendered: Vec<_> = lower(&module).iter().map(ToString::to_string).collect();
        check!(
            rendered
                == [
                    "DEF twice(x:nat, b:bool):nat == IF b THEN add(x, x) ELSE x FI",
                    "DEF MAIN:nat == twice(21, true)",
                ]
        );
    }

    #[test]
    fn literals() {
        let source = "DEF MAIN:bool == eq(18446744073709551615, 0)";
        let_assert!(Ok(module) = parse(source).ok());
        let defs = lower(&module);
        check!(defs[0].return_type == Type::Bool);
        check!(
            defs[0].body.kind
                == ExprKind::Apply {
                    function: Box::from("eq"),
                    arguments: vec![
                        Expr::new(ExprKind::Literal(Literal::Nat(u64::MAX)), 20..40),
                        Expr::new(ExprKind::Literal(Literal::Nat(0)), 42..43),
                    ],
                }
        );
    }

    #[test]
    fn spans_point_into_the_source() {
        let source = "DEF MAIN:nat == add(1, ghost)";
        let_assert!(Ok(module) = parse(source).ok());
        let defs = lower(&module);
        let_assert!([main] = defs.as_slice());
        check!(&source[main.span.clone()] == "MAIN");
        check!(&source[main.body.span.clone()] == "add(1, ghost)");
        let_assert!(ExprKind::Apply { arguments, .. } = &main.body.kind);
        check!(&source[arguments[1].span.clone()] == "ghost");
        check!(&source[arguments[0].span.clone()] == "1");
    }

    #[test]
    fn params_keep_their_spans() {
        let source = "DEF id(n : nat):nat == n DEF MAIN:nat == id(1)";
        let_assert!(Ok(module) = parse(source).ok());
        let defs = lower(&module);
        check!(&source[defs[0].params[0].span.clone()] == "n : nat");
        check!(defs[1].body.to_string() == "id(1)");
    }

    #[test]
    fn incomplete_definitions_are_dropped() {
        let parse = parse("DEF f(n:nat):nat == \nDEF MAIN:nat == 1");
        check!(!parse.errors().is_empty());
        let defs = lower(&parse.module());
        check!(defs.len() == 1);
        check!(defs[0].name.as_ref() == "MAIN");
    }
}
