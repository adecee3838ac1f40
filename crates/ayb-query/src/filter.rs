//! Parses the `filter` query-string DSL into an [`Expr`] tree.
//!
//! Grammar, loosest to tightest binding:
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ( "||" and_expr )*
//! and_expr   := unary ( "&&" unary )*
//! unary      := "(" expr ")" | comparison
//! comparison := field op value
//! field      := ident ( "." ident )*        -- dotted path reaches through an expand
//! op         := "=" | "!=" | ">=" | "<=" | ">" | "<" | "~" | "!~"
//!             | "in" | "nin" | "is null" | "is not null"
//! value      := string | number | "true" | "false" | "null" | "(" value ("," value)* ")"
//! ```
//!
//! This module never touches the database or a [`ayb_schema::SchemaSnapshot`]
//! — it only builds the tree. Validating field names against a real schema
//! and turning the tree into parameterized SQL is [`crate::builder`]'s job.

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    List(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        field: String,
        op: Op,
        value: Value,
    },
}

pub fn parse(input: &str) -> Result<Expr, QueryError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(QueryError::InvalidFilter(format!(
            "unexpected trailing input in filter: {input:?}"
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Ident(String),
    Op(Op),
    Value(Value),
}

fn lex(input: &str) -> Result<Vec<Token>, QueryError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }
        if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
            continue;
        }
        if c == '&' && chars.get(i + 1) == Some(&'&') {
            tokens.push(Token::And);
            i += 2;
            continue;
        }
        if c == '|' && chars.get(i + 1) == Some(&'|') {
            tokens.push(Token::Or);
            i += 2;
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let start = i;
            let mut s = String::new();
            while i < chars.len() && chars[i] != quote {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    i += 1;
                }
                s.push(chars[i]);
                i += 1;
            }
            if i >= chars.len() {
                return Err(QueryError::InvalidFilter(format!(
                    "unterminated string literal starting at position {start}"
                )));
            }
            i += 1;
            tokens.push(Token::Value(Value::Str(s)));
            continue;
        }
        if c == '!' && chars.get(i + 1) == Some(&'=') {
            tokens.push(Token::Op(Op::Neq));
            i += 2;
            continue;
        }
        if c == '!' && chars.get(i + 1) == Some(&'~') {
            tokens.push(Token::Op(Op::NotLike));
            i += 2;
            continue;
        }
        if c == '>' && chars.get(i + 1) == Some(&'=') {
            tokens.push(Token::Op(Op::Gte));
            i += 2;
            continue;
        }
        if c == '<' && chars.get(i + 1) == Some(&'=') {
            tokens.push(Token::Op(Op::Lte));
            i += 2;
            continue;
        }
        if c == '=' {
            tokens.push(Token::Op(Op::Eq));
            i += 1;
            continue;
        }
        if c == '>' {
            tokens.push(Token::Op(Op::Gt));
            i += 1;
            continue;
        }
        if c == '<' {
            tokens.push(Token::Op(Op::Lt));
            i += 1;
            continue;
        }
        if c == '~' {
            tokens.push(Token::Op(Op::Like));
            i += 1;
            continue;
        }

        if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.' || chars[i] == '-')
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            tokens.push(classify_word(&word));
            continue;
        }

        return Err(QueryError::InvalidFilter(format!(
            "unexpected character {c:?} in filter"
        )));
    }

    Ok(merge_is_null_phrases(tokens))
}

fn classify_word(word: &str) -> Token {
    match word {
        "true" => Token::Value(Value::Bool(true)),
        "false" => Token::Value(Value::Bool(false)),
        "null" => Token::Value(Value::Null),
        "in" => Token::Op(Op::In),
        "nin" => Token::Op(Op::NotIn),
        "is" => Token::Ident("is".to_string()),
        "not" => Token::Ident("not".to_string()),
        _ => {
            if let Ok(n) = word.parse::<f64>() {
                Token::Value(Value::Num(n))
            } else {
                Token::Ident(word.to_string())
            }
        }
    }
}

/// `is null` and `is not null` are two or three bare words; collapse them
/// into single operator tokens after the naive word-by-word lex above.
fn merge_is_null_phrases(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == Token::Ident("is".to_string()) {
            if tokens.get(i + 1) == Some(&Token::Ident("not".to_string()))
                && tokens.get(i + 2) == Some(&Token::Value(Value::Null))
            {
                out.push(Token::Op(Op::IsNotNull));
                i += 3;
                continue;
            }
            if tokens.get(i + 1) == Some(&Token::Value(Value::Null)) {
                out.push(Token::Op(Op::IsNull));
                i += 2;
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_or(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, QueryError> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let inner = self.parse_or()?;
            match self.advance() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(QueryError::InvalidFilter("unmatched '('".to_string())),
            }
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, QueryError> {
        let field = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(QueryError::InvalidFilter(format!(
                    "expected a field name, got {other:?}"
                )))
            }
        };

        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(QueryError::InvalidFilter(format!(
                    "expected an operator after field {field:?}, got {other:?}"
                )))
            }
        };

        if matches!(op, Op::IsNull | Op::IsNotNull) {
            return Ok(Expr::Compare {
                field,
                op,
                value: Value::Null,
            });
        }

        let value = if matches!(op, Op::In | Op::NotIn) {
            self.parse_value_list()?
        } else {
            self.parse_single_value()?
        };

        Ok(Expr::Compare { field, op, value })
    }

    fn parse_single_value(&mut self) -> Result<Value, QueryError> {
        match self.advance() {
            Some(Token::Value(v)) => Ok(v),
            other => Err(QueryError::InvalidFilter(format!(
                "expected a value, got {other:?}"
            ))),
        }
    }

    fn parse_value_list(&mut self) -> Result<Value, QueryError> {
        match self.advance() {
            Some(Token::LParen) => {}
            other => {
                return Err(QueryError::InvalidFilter(format!(
                    "expected '(' to start an in/nin value list, got {other:?}"
                )))
            }
        }
        let mut values = Vec::new();
        loop {
            values.push(self.parse_single_value()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.advance();
                }
                Some(Token::RParen) => {
                    self.advance();
                    break;
                }
                other => {
                    return Err(QueryError::InvalidFilter(format!(
                        "expected ',' or ')' in value list, got {other:?}"
                    )))
                }
            }
        }
        Ok(Value::List(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_comparison() {
        let expr = parse("age >= 18").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                field: "age".to_string(),
                op: Op::Gte,
                value: Value::Num(18.0),
            }
        );
    }

    #[test]
    fn respects_and_or_precedence() {
        // && binds tighter than ||, so this is (a || (b && c))
        let expr = parse("a='1' || b='2' && c='3'").unwrap();
        match expr {
            Expr::Or(left, right) => {
                assert!(matches!(*left, Expr::Compare { .. }));
                assert!(matches!(*right, Expr::And(_, _)));
            }
            other => panic!("expected Or at the top, got {other:?}"),
        }
    }

    #[test]
    fn parens_override_precedence() {
        let expr = parse("(a='1' || b='2') && c='3'").unwrap();
        match expr {
            Expr::And(left, _) => assert!(matches!(*left, Expr::Or(_, _))),
            other => panic!("expected And at the top, got {other:?}"),
        }
    }

    #[test]
    fn parses_in_and_is_null() {
        let expr = parse("status in ('open','closed')").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                field: "status".to_string(),
                op: Op::In,
                value: Value::List(vec![
                    Value::Str("open".to_string()),
                    Value::Str("closed".to_string())
                ]),
            }
        );

        let expr = parse("deleted_at is not null").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                field: "deleted_at".to_string(),
                op: Op::IsNotNull,
                value: Value::Null,
            }
        );
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("a='1' b='2'").is_err());
    }
}
