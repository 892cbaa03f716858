//! The parser

use std::fmt::Debug;

use derive_more::derive::Display;

use crate::common::Id;
use super::ast::*;
use super::lex::{self, Token, TokenKind};

#[derive(Display)]
#[display("Parse error: {}", self.0)]
pub struct ParseError(String);

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let tokens = lex::tokens(input).map_err(|e| ParseError(e.to_string()))?;
    Parser { tokens, pos: 0 }.program()
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind())
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let token = self.tokens.get(self.pos).copied();
        self.pos += 1;
        token
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'src>, ParseError> {
        match self.advance() {
            Some(token) if token.kind() == kind => Ok(token),
            Some(token) => Err(ParseError(format!("expected '{kind}', found '{token}'"))),
            None => Err(ParseError(format!("expected '{kind}' at end of input"))),
        }
    }

    fn expect_id(&mut self) -> Result<Id, ParseError> {
        Ok(Id::from_ref(self.expect(TokenKind::Id)?.text()))
    }

    fn expect_num(&mut self) -> Result<i32, ParseError> {
        let token = self.expect(TokenKind::Num)?;
        token
            .text()
            .parse()
            .map_err(|_| ParseError(format!("number out of range: {}", token.text())))
    }

    fn unexpected<T>(&self, wanted: &str) -> Result<T, ParseError> {
        match self.tokens.get(self.pos) {
            Some(token) => Err(ParseError(format!("expected {wanted}, found '{token}'"))),
            None => Err(ParseError(format!("expected {wanted} at end of input"))),
        }
    }

    // ----- declarations -----

    fn program(mut self) -> Result<Program, ParseError> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            items.push(self.item()?);
        }
        Ok(Program { items })
    }

    fn item(&mut self) -> Result<Item, ParseError> {
        let ty = self.type_spec()?;
        let name = self.expect_id()?;
        if self.eat(TokenKind::LParen) {
            let params = self.params()?;
            let body = self.block()?;
            Ok(Item::Function(Function { ty, name, params, body }))
        } else {
            let decl = self.decl_tail(ty, name)?;
            self.expect(TokenKind::Semi)?;
            Ok(Item::Global(decl))
        }
    }

    fn type_spec(&mut self) -> Result<Type, ParseError> {
        let mut ty = match self.peek() {
            Some(TokenKind::Void) => Type::Void,
            Some(TokenKind::Int) => Type::Int,
            Some(TokenKind::Char) => Type::Char,
            _ => return self.unexpected("a type"),
        };
        self.pos += 1;
        while self.eat(TokenKind::Star) {
            ty = Type::Ptr(Box::new(ty));
        }
        Ok(ty)
    }

    fn params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if !self.eat(TokenKind::RParen) {
            loop {
                let ty = self.type_spec()?;
                let name = self.expect_id()?;
                params.push(Param { ty, name });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        Ok(params)
    }

    /// The rest of a declaration, after its type and name.
    fn decl_tail(&mut self, ty: Type, name: Id) -> Result<Decl, ParseError> {
        if self.eat(TokenKind::LBracket) {
            let len = self.expect_num()? as u32;
            self.expect(TokenKind::RBracket)?;
            let init = if self.eat(TokenKind::Assign) {
                self.expect(TokenKind::LBrace)?;
                let list = self.expr_list()?;
                self.expect(TokenKind::RBrace)?;
                Some(list)
            } else {
                None
            };
            Ok(Decl::Array { ty, name, len, init })
        } else {
            let init = if self.eat(TokenKind::Assign) {
                Some(self.expr()?)
            } else {
                None
            };
            Ok(Decl::Scalar { ty, name, init })
        }
    }

    // ----- statements -----

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.eat(TokenKind::RBrace) {
            if self.peek().is_none() {
                return self.unexpected("'}'");
            }
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    /// A single statement, or a whole block where the grammar allows one.
    fn stmt_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.at(TokenKind::LBrace) {
            self.block()
        } else {
            Ok(vec![self.stmt()?])
        }
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(TokenKind::LBrace) => Ok(Stmt::Block(self.block()?)),
            Some(TokenKind::If) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let tt = self.stmt_body()?;
                let ff = if self.eat(TokenKind::Else) {
                    Some(self.stmt_body()?)
                } else {
                    None
                };
                Ok(Stmt::If { cond, tt, ff })
            }
            Some(TokenKind::While) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.stmt_body()?;
                Ok(Stmt::While { cond, body })
            }
            Some(TokenKind::Do) => {
                self.pos += 1;
                let body = self.stmt_body()?;
                self.expect(TokenKind::While)?;
                self.expect(TokenKind::LParen)?;
                let cond = self.expr()?;
                self.expect(TokenKind::RParen)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::DoWhile { cond, body })
            }
            Some(TokenKind::For) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let init = self.expr()?;
                self.expect(TokenKind::Semi)?;
                let cond = self.expr()?;
                self.expect(TokenKind::Semi)?;
                let step = self.expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.stmt_body()?;
                Ok(Stmt::For { init, cond, step, body })
            }
            Some(TokenKind::Return) => {
                self.pos += 1;
                let value = if self.at(TokenKind::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(value))
            }
            Some(TokenKind::Break) => {
                self.pos += 1;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Break)
            }
            Some(TokenKind::Continue) => {
                self.pos += 1;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Continue)
            }
            Some(TokenKind::Void | TokenKind::Int | TokenKind::Char) => {
                let ty = self.type_spec()?;
                let name = self.expect_id()?;
                let decl = self.decl_tail(ty, name)?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Decl(decl))
            }
            _ => {
                let expr = self.expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    // ----- expressions -----

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut list = vec![self.expr()?];
        while self.eat(TokenKind::Comma) {
            list.push(self.expr()?);
        }
        Ok(list)
    }

    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.cond_expr()?;
        if self.eat(TokenKind::Assign) {
            let value = Box::new(self.expr()?);
            return match lhs {
                Expr::Id(name) => Ok(Expr::Assign { name, value }),
                Expr::Index { name, index } => Ok(Expr::IndexAssign { name, index, value }),
                Expr::Deref(name) => Ok(Expr::DerefAssign { name, value }),
                _ => self.unexpected("an assignable expression before '='"),
            };
        }
        if let Some(op) = compound_op(self.peek()) {
            return match lhs {
                Expr::Id(name) => {
                    self.pos += 1;
                    let rhs = self.expr()?;
                    Ok(assign_op(name, op, rhs))
                }
                _ => self.unexpected("a variable name before the compound assignment"),
            };
        }
        Ok(lhs)
    }

    fn cond_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.bit_expr()?;
        while let Some(op) = cond_op(self.peek()) {
            self.pos += 1;
            let rhs = self.bit_expr()?;
            lhs = Expr::Cond {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn bit_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Amp) => BinOp::And,
                Some(TokenKind::Pipe) => BinOp::Or,
                Some(TokenKind::Caret) => BinOp::Xor,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(TokenKind::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(TokenKind::Tilde) => {
                self.pos += 1;
                Ok(Expr::BitNot(Box::new(self.unary()?)))
            }
            Some(TokenKind::Amp) => {
                self.pos += 1;
                let name = self.expect_id()?;
                if self.eat(TokenKind::LBracket) {
                    let index = Box::new(self.expr()?);
                    self.expect(TokenKind::RBracket)?;
                    Ok(Expr::AddrOfIndex { name, index })
                } else {
                    Ok(Expr::AddrOf(name))
                }
            }
            Some(TokenKind::Star) => {
                self.pos += 1;
                Ok(Expr::Deref(self.expect_id()?))
            }
            Some(TokenKind::PlusPlus) => {
                self.pos += 1;
                let name = self.expect_id()?;
                Ok(Expr::Seq(vec![step(name, BinOp::Add), Expr::Id(name)]))
            }
            Some(TokenKind::MinusMinus) => {
                self.pos += 1;
                let name = self.expect_id()?;
                Ok(Expr::Seq(vec![step(name, BinOp::Sub), Expr::Id(name)]))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(TokenKind::Num) => Ok(Expr::Num(self.expect_num()?)),
            Some(TokenKind::CharConst) => {
                let token = self.expect(TokenKind::CharConst)?;
                Ok(Expr::Char(token.text().to_string()))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            Some(TokenKind::Asm) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let text = self.expect(TokenKind::Str)?.text().replace('"', "");
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Asm(text))
            }
            Some(TokenKind::PrintStr) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let text = self.expect(TokenKind::Str)?.text().to_string();
                self.expect(TokenKind::RParen)?;
                Ok(Expr::PrintStr(text))
            }
            Some(TokenKind::Id) => {
                let name = self.expect_id()?;
                if self.eat(TokenKind::LParen) {
                    let args = if self.eat(TokenKind::RParen) {
                        Vec::new()
                    } else {
                        let args = self.expr_list()?;
                        self.expect(TokenKind::RParen)?;
                        args
                    };
                    Ok(Expr::Call { name, args })
                } else if self.eat(TokenKind::LBracket) {
                    let index = Box::new(self.expr()?);
                    self.expect(TokenKind::RBracket)?;
                    Ok(Expr::Index { name, index })
                } else if self.eat(TokenKind::PlusPlus) {
                    Ok(Expr::Seq(vec![Expr::Id(name), step(name, BinOp::Add)]))
                } else if self.eat(TokenKind::MinusMinus) {
                    Ok(Expr::Seq(vec![Expr::Id(name), step(name, BinOp::Sub)]))
                } else {
                    Ok(Expr::Id(name))
                }
            }
            _ => self.unexpected("an expression"),
        }
    }
}

/// `name = name <op> 1`, the building block of the `++`/`--` desugarings.
fn step(name: Id, op: BinOp) -> Expr {
    assign_op(name, op, Expr::Num(1))
}

/// `name = name <op> rhs`, what the compound assignment operators mean.
fn assign_op(name: Id, op: BinOp, rhs: Expr) -> Expr {
    Expr::Assign {
        name,
        value: Box::new(Expr::Binary {
            op,
            lhs: Box::new(Expr::Id(name)),
            rhs: Box::new(rhs),
        }),
    }
}

fn compound_op(kind: Option<TokenKind>) -> Option<BinOp> {
    Some(match kind? {
        TokenKind::PlusAssign => BinOp::Add,
        TokenKind::MinusAssign => BinOp::Sub,
        TokenKind::MulAssign => BinOp::Mul,
        TokenKind::DivAssign => BinOp::Div,
        TokenKind::AndAssign => BinOp::And,
        TokenKind::OrAssign => BinOp::Or,
        TokenKind::XorAssign => BinOp::Xor,
        _ => return None,
    })
}

fn cond_op(kind: Option<TokenKind>) -> Option<CondOp> {
    Some(match kind? {
        TokenKind::EqEq => CondOp::Eq,
        TokenKind::Ne => CondOp::Ne,
        TokenKind::Lt => CondOp::Lt,
        TokenKind::Gt => CondOp::Gt,
        TokenKind::Le => CondOp::Le,
        TokenKind::Ge => CondOp::Ge,
        TokenKind::AndAnd => CondOp::And,
        TokenKind::OrOr => CondOp::Or,
        _ => return None,
    })
}
