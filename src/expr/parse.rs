//! Rule expression parser
//!
//! Recursive descent over a small token stream. Precedence, lowest first:
//!
//! | Level | Operators |
//! |-------|-----------|
//! | implication (right assoc) | `->`, `=>`, `→`, `IMPLIES` |
//! | disjunction | `\|\|`, `\|`, `OR`, `∨` |
//! | conjunction | `&&`, `&`, `AND`, `∧` |
//! | negation | `!`, `~`, `¬`, `NOT` |
//! | primary | `( expr )`, `true`, `false`, `ident`, `ident <op> number` |
//!
//! Keywords are case-insensitive. Identifiers start with a letter or `_` and
//! may contain letters, digits, `_`, `.` and `-` (a `-` directly followed by
//! `>` is always the implication arrow).

use super::ast::{BinaryOp, CmpOp, Expr};
use crate::error::{Error, Result};

/// Parse rule text into an expression tree
pub fn parse_expr(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(Error::ExprParse(format!("'{}': empty expression", input)));
    }
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    let expr = parser.implication()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error(&format!(
            "unexpected token {:?}",
            parser.tokens[parser.pos].kind
        )));
    }
    Ok(expr)
}

/// Check whether rule text parses
pub fn is_valid_expr(input: &str) -> bool {
    parse_expr(input).is_ok()
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number(f64),
    True,
    False,
    Not,
    And,
    Or,
    Implies,
    Cmp(CmpOp),
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = peek(i + 1);

        let (kind, width) = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            '¬' | '~' => (TokenKind::Not, 1),
            '∧' => (TokenKind::And, 1),
            '∨' => (TokenKind::Or, 1),
            '→' => (TokenKind::Implies, 1),
            '!' if next == Some('=') => (TokenKind::Cmp(CmpOp::Ne), 2),
            '!' => (TokenKind::Not, 1),
            '&' if next == Some('&') => (TokenKind::And, 2),
            '&' => (TokenKind::And, 1),
            '|' if next == Some('|') => (TokenKind::Or, 2),
            '|' => (TokenKind::Or, 1),
            '=' if next == Some('>') => (TokenKind::Implies, 2),
            '=' if next == Some('=') => (TokenKind::Cmp(CmpOp::Eq), 2),
            '-' if next == Some('>') => (TokenKind::Implies, 2),
            '<' if next == Some('=') => (TokenKind::Cmp(CmpOp::Le), 2),
            '<' => (TokenKind::Cmp(CmpOp::Lt), 1),
            '>' if next == Some('=') => (TokenKind::Cmp(CmpOp::Ge), 2),
            '>' => (TokenKind::Cmp(CmpOp::Gt), 1),
            c if c.is_ascii_digit()
                || (c == '-'
                    && next.is_some_and(|n| n.is_ascii_digit())
                    && matches!(tokens.last(), Some(Token { kind: TokenKind::Cmp(_), .. }))) =>
            {
                let start = i;
                let mut end = i + 1;
                while end < chars.len()
                    && (chars[end].1.is_ascii_digit() || chars[end].1 == '.')
                {
                    end += 1;
                }
                let ident_follows = c != '-'
                    && peek(end).is_some_and(|n| n.is_alphabetic() || n == '_');
                if ident_follows {
                    // Option IDs such as `4k_display`
                    let (kind, width) = scan_identifier(&chars, start);
                    tokens.push(Token { kind, offset });
                    i += width;
                    continue;
                }
                let text: String = chars[start..end].iter().map(|(_, c)| *c).collect();
                let value: f64 = text.parse().map_err(|_| {
                    Error::ExprParse(format!("'{}': invalid number '{}'", input, text))
                })?;
                (TokenKind::Number(value), end - start)
            }
            c if c.is_alphabetic() || c == '_' => scan_identifier(&chars, i),
            other => {
                return Err(Error::ExprParse(format!(
                    "'{}': unexpected character '{}' at {}",
                    input, other, offset
                )))
            }
        };

        tokens.push(Token { kind, offset });
        i += width;
    }

    Ok(tokens)
}

fn scan_identifier(chars: &[(usize, char)], start: usize) -> (TokenKind, usize) {
    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);
    let mut end = start + 1;
    while end < chars.len() {
        let ch = chars[end].1;
        let continues = ch.is_alphanumeric()
            || ch == '_'
            || ch == '.'
            || (ch == '-' && peek(end + 1) != Some('>'));
        if !continues {
            break;
        }
        end += 1;
    }
    let text: String = chars[start..end].iter().map(|(_, c)| *c).collect();
    let kind = match text.to_ascii_lowercase().as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "implies" => TokenKind::Implies,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => TokenKind::Ident(text),
    };
    (kind, end - start)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos).map(|t| t.kind.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: &str) -> Error {
        let at = self
            .tokens
            .get(self.pos)
            .map(|t| t.offset)
            .unwrap_or(self.input.len());
        Error::ExprParse(format!("'{}': {} at {}", self.input, message, at))
    }

    fn implication(&mut self) -> Result<Expr> {
        let left = self.disjunction()?;
        if self.peek() == Some(&TokenKind::Implies) {
            self.pos += 1;
            // Right associative: a -> b -> c == a -> (b -> c)
            let right = self.implication()?;
            return Ok(Expr::binary(BinaryOp::Implies, left, right));
        }
        Ok(left)
    }

    fn disjunction(&mut self) -> Result<Expr> {
        let mut left = self.conjunction()?;
        while self.peek() == Some(&TokenKind::Or) {
            self.pos += 1;
            let right = self.conjunction()?;
            left = Expr::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> Result<Expr> {
        let mut left = self.negation()?;
        while self.peek() == Some(&TokenKind::And) {
            self.pos += 1;
            let right = self.negation()?;
            left = Expr::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn negation(&mut self) -> Result<Expr> {
        if self.peek() == Some(&TokenKind::Not) {
            self.pos += 1;
            let inner = self.negation()?;
            return Ok(Expr::not(inner));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Some(TokenKind::LParen) => {
                let inner = self.implication()?;
                match self.advance() {
                    Some(TokenKind::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(TokenKind::True) => Ok(Expr::Const(true)),
            Some(TokenKind::False) => Ok(Expr::Const(false)),
            Some(TokenKind::Ident(name)) => {
                if let Some(TokenKind::Cmp(op)) = self.peek().cloned() {
                    self.pos += 1;
                    match self.advance() {
                        Some(TokenKind::Number(value)) => Ok(Expr::Compare {
                            var: name,
                            op,
                            value,
                        }),
                        _ => Err(self.error("expected number after comparison")),
                    }
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(other) => {
                self.pos -= 1;
                Err(self.error(&format!("unexpected token {:?}", other)))
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_implication() {
        let expr = parse_expr("optA -> optB").unwrap();
        assert_eq!(expr, Expr::implies(Expr::ident("optA"), Expr::ident("optB")));
    }

    #[test]
    fn test_parse_keywords_and_symbols_agree() {
        let a = parse_expr("a AND NOT b OR c").unwrap();
        let b = parse_expr("a && !b || c").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "(a && !b) || c");
    }

    #[test]
    fn test_parse_unicode_operators() {
        let expr = parse_expr("A → ¬B").unwrap();
        assert_eq!(expr, Expr::implies(Expr::ident("A"), Expr::not(Expr::ident("B"))));
        assert_eq!(
            parse_expr("a ∧ b ∨ c").unwrap(),
            parse_expr("(a && b) || c").unwrap()
        );
    }

    #[test]
    fn test_implication_is_right_associative() {
        let expr = parse_expr("a -> b -> c").unwrap();
        assert_eq!(
            expr,
            Expr::implies(
                Expr::ident("a"),
                Expr::implies(Expr::ident("b"), Expr::ident("c"))
            )
        );
    }

    #[test]
    fn test_parse_comparison() {
        let expr = parse_expr("quantity >= 10 && price < 99.5").unwrap();
        assert_eq!(
            expr,
            Expr::and(
                Expr::Compare {
                    var: "quantity".into(),
                    op: CmpOp::Ge,
                    value: 10.0
                },
                Expr::Compare {
                    var: "price".into(),
                    op: CmpOp::Lt,
                    value: 99.5
                }
            )
        );
    }

    #[test]
    fn test_negative_number_in_comparison() {
        let expr = parse_expr("delta > -5").unwrap();
        assert!(matches!(expr, Expr::Compare { value, .. } if value == -5.0));
    }

    #[test]
    fn test_hyphenated_identifiers() {
        let expr = parse_expr("opt-1->opt-2").unwrap();
        assert_eq!(expr, Expr::implies(Expr::ident("opt-1"), Expr::ident("opt-2")));
    }

    #[test]
    fn test_dotted_identifier() {
        let expr = parse_expr("customer.vip -> support_gold").unwrap();
        assert!(expr.identifiers().contains("customer.vip"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expr("").is_err());
        assert!(parse_expr("a &&").is_err());
        assert!(parse_expr("(a || b").is_err());
        assert!(parse_expr("a b").is_err());
        assert!(parse_expr("a # b").is_err());
        assert!(parse_expr("quantity >= x").is_err());
        assert!(!is_valid_expr("-> a"));
        assert!(is_valid_expr("true"));
    }
}
