// Expression evaluation for breakpoint conditions and watch expressions.
//
//   expr    := or
//   or      := and ("||" and)*
//   and     := cmp ("&&" cmp)*
//   cmp     := unary (("==" | "!=" | "<" | "<=" | ">" | ">=") unary)?
//   unary   := ("!" | "-") unary | primary
//   primary := number | string | "true" | "false" | "nil" | ident | "(" expr ")"

use std::cmp::Ordering;

use tickwork_events::Value;

use crate::context::ExecutionContext;
use crate::error::EvalError;

/// Evaluates condition and watch expressions against a paused scope
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, ctx: &dyn ExecutionContext) -> Result<Value, EvalError>;
}

/// Default evaluator: variables, literals, comparisons and boolean logic
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeEvaluator;

impl ExpressionEvaluator for ScopeEvaluator {
    fn evaluate(&self, expression: &str, ctx: &dyn ExecutionContext) -> Result<Value, EvalError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(EvalError::UnexpectedToken(tok.to_string()));
        }
        eval(&expr, ctx)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Value),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Num(v) => write!(f, "{}", v),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Op(op) => write!(f, "{}", op),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

const OPERATORS: [&str; 10] = ["==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "-"];

fn tokenize(src: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = if text.contains('.') {
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| EvalError::UnexpectedToken(text.clone()))?
            } else {
                text.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| EvalError::UnexpectedToken(text.clone()))?
            };
            tokens.push(Token::Num(value));
        } else if c == '"' || c == '\'' {
            let quote = c;
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Err(EvalError::UnterminatedString);
            }
            tokens.push(Token::Str(chars[start..i].iter().collect()));
            i += 1;
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                Some(op) => {
                    tokens.push(Token::Op(*op));
                    i += op.len();
                }
                None => return Err(EvalError::UnexpectedChar(c, i)),
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug)]
enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(&'static str, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.and()?;
        while self.eat_op(&["||"]).is_some() {
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.cmp()?;
        while self.eat_op(&["&&"]).is_some() {
            lhs = Expr::And(Box::new(lhs), Box::new(self.cmp()?));
        }
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.unary()?;
        match self.eat_op(&["==", "!=", "<", "<=", ">", ">="]) {
            Some(op) => Ok(Expr::Compare(op, Box::new(lhs), Box::new(self.unary()?))),
            None => Ok(lhs),
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        match self.eat_op(&["!", "-"]) {
            Some("!") => Ok(Expr::Not(Box::new(self.unary()?))),
            Some(_) => Ok(Expr::Neg(Box::new(self.unary()?))),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Token::Num(v)) => Ok(Expr::Literal(v)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "nil" => Expr::Literal(Value::Nil),
                _ => Expr::Var(name),
            }),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(tok) => Err(EvalError::UnexpectedToken(tok.to_string())),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(tok) => Err(EvalError::UnexpectedToken(tok.to_string())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}

fn eval(expr: &Expr, ctx: &dyn ExecutionContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => ctx
            .lookup(name)
            .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, ctx)?.is_truthy())),
        Expr::Neg(inner) => match eval(inner, ctx)? {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow("-")),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(EvalError::TypeMismatch {
                op: "-".to_string(),
                lhs: other.type_name(),
                rhs: "nothing",
            }),
        },
        Expr::And(lhs, rhs) => {
            let l = eval(lhs, ctx)?;
            if !l.is_truthy() {
                return Ok(l);
            }
            eval(rhs, ctx)
        }
        Expr::Or(lhs, rhs) => {
            let l = eval(lhs, ctx)?;
            if l.is_truthy() {
                return Ok(l);
            }
            eval(rhs, ctx)
        }
        Expr::Compare(op, lhs, rhs) => {
            let l = eval(lhs, ctx)?;
            let r = eval(rhs, ctx)?;
            compare(op, &l, &r).map(Value::Bool)
        }
    }
}

fn compare(op: &'static str, l: &Value, r: &Value) -> Result<bool, EvalError> {
    let ordering = match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };

    match op {
        "==" => Ok(ordering.map_or_else(|| l == r, |o| o == Ordering::Equal)),
        "!=" => Ok(ordering.map_or_else(|| l != r, |o| o != Ordering::Equal)),
        _ => {
            let o = ordering.ok_or_else(|| EvalError::TypeMismatch {
                op: op.to_string(),
                lhs: l.type_name(),
                rhs: r.type_name(),
            })?;
            Ok(match op {
                "<" => o == Ordering::Less,
                "<=" => o != Ordering::Greater,
                ">" => o == Ordering::Greater,
                _ => o != Ordering::Less,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScopeContext;

    fn scope() -> ScopeContext {
        let mut ctx = ScopeContext::new();
        ctx.set("x", 0i64);
        ctx.set("hp", 12i64);
        ctx.set("name", "zombie");
        ctx.set("ratio", 0.5);
        ctx
    }

    fn eval_str(src: &str) -> Result<Value, EvalError> {
        ScopeEvaluator.evaluate(src, &scope())
    }

    #[test]
    fn test_variables_and_literals() {
        assert_eq!(eval_str("x"), Ok(Value::Int(0)));
        assert_eq!(eval_str("name"), Ok(Value::from("zombie")));
        assert_eq!(eval_str("nil"), Ok(Value::Nil));
        assert_eq!(eval_str("-3"), Ok(Value::Int(-3)));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_str("hp > 10"), Ok(Value::Bool(true)));
        assert_eq!(eval_str("hp <= 10"), Ok(Value::Bool(false)));
        assert_eq!(eval_str("ratio == 0.5"), Ok(Value::Bool(true)));
        assert_eq!(eval_str("hp == 12.0"), Ok(Value::Bool(true)));
        assert_eq!(eval_str("name == 'zombie'"), Ok(Value::Bool(true)));
        assert_eq!(eval_str("name != \"skeleton\""), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_logic_short_circuits() {
        assert_eq!(eval_str("x && missing"), Ok(Value::Int(0)));
        assert_eq!(eval_str("hp || missing"), Ok(Value::Int(12)));
        assert_eq!(eval_str("!(hp > 10) || x == 0"), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            eval_str("missing"),
            Err(EvalError::UndefinedVariable("missing".to_string()))
        );
        assert_eq!(eval_str("hp >"), Err(EvalError::UnexpectedEnd));
        assert_eq!(eval_str("'open"), Err(EvalError::UnterminatedString));
        assert!(matches!(eval_str("hp # 2"), Err(EvalError::UnexpectedChar('#', 3))));
        assert!(matches!(eval_str("name < 3"), Err(EvalError::TypeMismatch { .. })));
        assert!(matches!(eval_str("hp hp"), Err(EvalError::UnexpectedToken(_))));
    }

    #[test]
    fn test_negating_min_int_is_an_error() {
        let mut ctx = scope();
        ctx.set("low", i64::MIN);
        assert_eq!(
            ScopeEvaluator.evaluate("-low", &ctx),
            Err(EvalError::Overflow("-"))
        );
        assert_eq!(
            ScopeEvaluator.evaluate("-hp", &ctx),
            Ok(Value::Int(-12))
        );
    }
}
