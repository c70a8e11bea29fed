//! The parser

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::{intern, BOp, RelOp};

use super::ast::*;
use super::lex::*;

#[derive(Display)]
pub enum ParseError {
    #[display("{_0}")]
    Lex(LexError),
    #[display("Unexpected token: {text} near {ctx} in line {line}")]
    Syntax {
        text: String,
        ctx: String,
        line: usize,
    },
}

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::Lex(e)
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next()? {
        tokens.push(tok);
    }
    Parser { tokens, pos: 0 }.parse_program()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<Token<'src>> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, ctx: &str) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::Syntax {
                text: tok.text.to_string(),
                ctx: ctx.to_string(),
                line: tok.line,
            },
            None => ParseError::Syntax {
                text: "<end of input>".to_string(),
                ctx: ctx.to_string(),
                line: self.tokens.last().map_or(1, |t| t.line),
            },
        }
    }

    fn expect(&mut self, kind: TokenKind, ctx: &str) -> Result<Token<'src>, ParseError> {
        match self.peek() {
            Some(tok) if tok.kind == kind => {
                self.pos += 1;
                Ok(tok)
            }
            _ => Err(self.error(ctx)),
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().map(|t| t.kind == kind) == Some(true)
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            stmts.push(self.parse_stmt()?);
        }
        Ok(Program { stmts })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace, "block")?;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace, "block")?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Int => {
                self.advance();
                let name = self.expect(TokenKind::Id, "definition")?;
                self.expect(TokenKind::Semi, "definition")?;
                Ok(Stmt::Definition {
                    ty: intern("int"),
                    name: intern(name.text),
                })
            }
            Some(tok) if tok.kind == TokenKind::Id => {
                self.advance();
                self.expect(TokenKind::Assign, "assignment")?;
                let expr = self.parse_arith()?;
                self.expect(TokenKind::Semi, "assignment")?;
                Ok(Stmt::Assign(intern(tok.text), expr))
            }
            Some(tok) if tok.kind == TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen, "if")?;
                let cond = self.parse_bool_or()?;
                self.expect(TokenKind::RParen, "if")?;
                let tt = self.parse_block()?;
                let ff = if self.at(TokenKind::Else) {
                    self.advance();
                    Some(self.parse_block()?)
                } else {
                    None
                };
                Ok(Stmt::If { cond, tt, ff })
            }
            Some(tok) if tok.kind == TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen, "while")?;
                let cond = self.parse_bool_or()?;
                self.expect(TokenKind::RParen, "while")?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            _ => Err(self.error("statement")),
        }
    }

    fn parse_bool_or(&mut self) -> Result<BoolExpr, ParseError> {
        let mut lhs = self.parse_bool_and()?;
        while self.at(TokenKind::OrOr) {
            self.advance();
            let rhs = self.parse_bool_and()?;
            lhs = BoolExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bool_and(&mut self) -> Result<BoolExpr, ParseError> {
        let mut lhs = self.parse_bool_not()?;
        while self.at(TokenKind::AndAnd) {
            self.advance();
            let rhs = self.parse_bool_not()?;
            lhs = BoolExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bool_not(&mut self) -> Result<BoolExpr, ParseError> {
        if self.at(TokenKind::Bang) {
            self.advance();
            let inner = self.parse_bool_not()?;
            return Ok(BoolExpr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<BoolExpr, ParseError> {
        let lhs = self.parse_arith()?;
        let op = match self.peek().map(|t| t.kind) {
            Some(TokenKind::Lt) => RelOp::Lt,
            Some(TokenKind::Le) => RelOp::Le,
            Some(TokenKind::Gt) => RelOp::Gt,
            Some(TokenKind::Ge) => RelOp::Ge,
            Some(TokenKind::EqEq) => RelOp::Eq,
            Some(TokenKind::Ne) => RelOp::Ne,
            _ => return Err(self.error("comparison")),
        };
        self.advance();
        let rhs = self.parse_arith()?;
        Ok(BoolExpr::Comparison { op, lhs, rhs })
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek().map(|t| t.kind) {
                Some(TokenKind::Plus) => BOp::Add,
                Some(TokenKind::Minus) => BOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek().map(|t| t.kind) {
                Some(TokenKind::Star) => BOp::Mul,
                Some(TokenKind::Slash) => BOp::Div,
                Some(TokenKind::Percent) => BOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = Expr::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(tok) if tok.kind == TokenKind::Id => {
                self.advance();
                Ok(Expr::Var(intern(tok.text)))
            }
            Some(tok) if tok.kind == TokenKind::Num => {
                self.advance();
                let value: i64 = tok.text.parse().map_err(|_| self.error("number"))?;
                Ok(Expr::Const(value))
            }
            Some(tok) if tok.kind == TokenKind::LParen => {
                self.advance();
                let expr = self.parse_arith()?;
                self.expect(TokenKind::RParen, "parenthesized expression")?;
                Ok(expr)
            }
            _ => Err(self.error("expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_assignment() {
        let program = parse("int i; i := 0;").unwrap();
        assert_eq!(program.stmts.len(), 2);
        assert!(matches!(program.stmts[0], Stmt::Definition { .. }));
        assert!(matches!(program.stmts[1], Stmt::Assign(_, Expr::Const(0))));
    }

    #[test]
    fn parses_while_and_if_with_and() {
        let src = "int i; int counter; i := 0; counter := 0; \
                   while (i < 100) { if (i % 2 == 0 && i % 3 == 0) { counter := counter + 1; } }";
        let program = parse(src).unwrap();
        assert_eq!(program.stmts.len(), 5);
        match &program.stmts[4] {
            Stmt::While { cond, body } => {
                assert!(matches!(cond, BoolExpr::Comparison { op: RelOp::Lt, .. }));
                assert_eq!(body.len(), 1);
                match &body[0] {
                    Stmt::If { cond, ff, .. } => {
                        assert!(matches!(cond, BoolExpr::And(_, _)));
                        assert!(ff.is_none());
                    }
                    _ => panic!("expected if statement"),
                }
            }
            _ => panic!("expected while statement"),
        }
    }

    #[test]
    fn parses_if_else() {
        let program = parse("int i; if (i < 1) { i := 1; } else { i := 2; }").unwrap();
        match &program.stmts[1] {
            Stmt::If { ff: Some(ff), .. } => assert_eq!(ff.len(), 1),
            _ => panic!("expected if/else with an else branch"),
        }
    }

    #[test]
    fn reports_unexpected_token() {
        let err = parse("int i; i = 0;").unwrap_err();
        assert!(format!("{err}").starts_with("Unexpected token:"));
    }
}
