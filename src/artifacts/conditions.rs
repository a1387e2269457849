//! Boolean gating expressions over knowledge base attributes.
//!
//! Grammar:
//!
//! ```text
//! expr       := and_expr ("or" and_expr)*
//! and_expr   := not_expr ("and" not_expr)*
//! not_expr   := "not" not_expr | primary
//! primary    := "(" expr ")" | operand [op operand]
//! op         := "==" | "!=" | "<" | "<=" | ">" | ">="
//! operand    := attribute | 'string' | "string" | integer
//! ```
//!
//! An attribute may be written bare (`users.homedir`) or as a placeholder
//! (`%%users.homedir%%`). A lone operand tests that the attribute has a value.

use std::cmp::Ordering;
use std::fmt;

use log::warn;

use crate::errors::{ArtifactError, ArtifactResult};
use crate::knowledge_base::KnowledgeBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Attribute(String),
    Literal(String),
}

impl Operand {
    fn resolve(&self, kb: &KnowledgeBase) -> Option<Vec<String>> {
        match self {
            Operand::Attribute(name) => kb.get_values(name),
            Operand::Literal(value) => Some(vec![value.clone()]),
        }
    }
}

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Or(Box<Condition>, Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Present(Operand),
}

impl Condition {
    /// Evaluate against `kb`. A clause naming an absent attribute is false,
    /// and `not` negates that clause like any other: `not environ_temp` and
    /// `not environ_temp == 'x'` both hold while `environ_temp` is missing.
    pub fn evaluate(&self, kb: &KnowledgeBase) -> bool {
        match self {
            Condition::Or(a, b) => a.evaluate(kb) || b.evaluate(kb),
            Condition::And(a, b) => a.evaluate(kb) && b.evaluate(kb),
            Condition::Not(inner) => !inner.evaluate(kb),
            Condition::Present(operand) => operand.resolve(kb).is_some(),
            Condition::Compare { left, op, right } => {
                let (Some(lefts), Some(rights)) = (left.resolve(kb), right.resolve(kb)) else {
                    return false;
                };
                // Multi-valued attributes match when any value does.
                lefts
                    .iter()
                    .any(|l| rights.iter().any(|r| op.holds(compare_values(l, r))))
            }
        }
    }

    /// Attribute names referenced anywhere in the expression.
    pub fn attributes(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes(&self, out: &mut Vec<String>) {
        fn push(operand: &Operand, out: &mut Vec<String>) {
            if let Operand::Attribute(name) = operand {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        }
        match self {
            Condition::Or(a, b) | Condition::And(a, b) => {
                a.collect_attributes(out);
                b.collect_attributes(out);
            }
            Condition::Not(inner) => inner.collect_attributes(out),
            Condition::Present(operand) => push(operand, out),
            Condition::Compare { left, right, .. } => {
                push(left, out);
                push(right, out);
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Attribute(name) => write!(f, "{}", name),
            Operand::Literal(value) => write!(f, "'{}'", value),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Or(a, b) => write!(f, "({} or {})", a, b),
            Condition::And(a, b) => write!(f, "({} and {})", a, b),
            Condition::Not(inner) => write!(f, "not {}", inner),
            Condition::Present(operand) => write!(f, "{}", operand),
            Condition::Compare { left, op, right } => write!(f, "{} {} {}", left, op.symbol(), right),
        }
    }
}

/// Integers compare numerically, everything else as strings.
fn compare_values(left: &str, right: &str) -> Ordering {
    match (left.trim().parse::<i64>(), right.trim().parse::<i64>()) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => left.cmp(right),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == c)
                    .ok_or_else(|| format!("unterminated string at offset {}", i))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CompareOp::Eq, 2),
                    ('!', Some('=')) => (CompareOp::Ne, 2),
                    ('<', Some('=')) => (CompareOp::Le, 2),
                    ('>', Some('=')) => (CompareOp::Ge, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    ('>', _) => (CompareOp::Gt, 1),
                    _ => return Err(format!("unexpected {:?} at offset {}", c, i)),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '%' => {
                let rest: String = chars[i..].iter().collect();
                let inner = rest
                    .strip_prefix("%%")
                    .and_then(|r| r.find("%%").map(|end| r[..end].to_string()))
                    .ok_or_else(|| format!("unterminated placeholder at offset {}", i))?;
                if inner.is_empty() {
                    return Err(format!("empty placeholder at offset {}", i));
                }
                i += inner.chars().count() + 4;
                tokens.push(Token::Ident(inner));
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let number: String = chars[start..i].iter().collect();
                if number == "-" {
                    return Err(format!("unexpected '-' at offset {}", start));
                }
                tokens.push(Token::Literal(number));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            _ => return Err(format!("unexpected {:?} at offset {}", c, i)),
        }
    }
    Ok(tokens)
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
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Condition, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, String> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Condition, String> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Condition::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, String> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                _ => Err("missing closing parenthesis".to_string()),
            };
        }

        let left = self.parse_operand()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Condition::Compare { left, op, right });
        }
        Ok(Condition::Present(left))
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Operand::Attribute(name)),
            Some(Token::Literal(value)) => Ok(Operand::Literal(value)),
            Some(other) => Err(format!("expected attribute or value, found {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parse a condition expression.
pub fn parse_condition(expression: &str) -> ArtifactResult<Condition> {
    let syntax = |reason: String| ArtifactError::ConditionSyntax {
        expression: expression.to_string(),
        reason,
    };

    let tokens = tokenize(expression).map_err(syntax)?;
    if tokens.is_empty() {
        return Err(syntax("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let condition = parser.parse_or().map_err(syntax)?;
    if let Some(token) = parser.peek() {
        return Err(syntax(format!("unexpected trailing {:?}", token)));
    }
    Ok(condition)
}

/// Evaluate an expression string. Malformed expressions are logged and
/// evaluate to false; definitions are validated before collection, so this
/// only happens for conditions built at runtime.
pub fn evaluate(expression: &str, kb: &KnowledgeBase) -> bool {
    match parse_condition(expression) {
        Ok(condition) => condition.evaluate(kb),
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Equivalent condition for a `supported_os` list, `None` when unrestricted.
pub fn convert_supported_os_to_conditions(supported_os: &[String]) -> Option<String> {
    if supported_os.is_empty() {
        return None;
    }
    Some(
        supported_os
            .iter()
            .map(|os| format!("os == '{}'", os))
            .collect::<Vec<_>>()
            .join(" or "),
    )
}

/// All conditions and the OS restriction must hold.
pub fn evaluate_all(conditions: &[String], supported_os: &[String], kb: &KnowledgeBase) -> bool {
    let os_condition = convert_supported_os_to_conditions(supported_os);
    conditions
        .iter()
        .chain(os_condition.iter())
        .all(|expression| evaluate(expression, kb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_base::User;

    fn kb(os: &str) -> KnowledgeBase {
        let mut kb = KnowledgeBase::with_os(os);
        kb.os_major_version = Some(10);
        kb.users.push(User::new("alice").with_homedir("/home/alice"));
        kb.users.push(User::new("bob"));
        kb
    }

    #[test]
    fn test_equality() {
        for os in ["Windows", "Linux", "Darwin"] {
            let kb = kb(os);
            assert_eq!(evaluate("os == 'Windows'", &kb), os == "Windows");
            assert_eq!(
                evaluate("os == 'Linux' or os == 'Windows'", &kb),
                os == "Linux" || os == "Windows"
            );
        }
    }

    #[test]
    fn test_unknown_attribute_is_false() {
        let kb = kb("Linux");
        assert!(!evaluate("environ_systemroot == 'C:\\Windows'", &kb));
        assert!(!evaluate("environ_systemroot != 'x'", &kb));
        assert!(evaluate("not environ_systemroot", &kb));
        assert!(evaluate("bogus == 'x' or os == 'Linux'", &kb));
    }

    #[test]
    fn test_negated_absent_attribute_holds() {
        let kb = kb("Windows");
        assert!(evaluate("not environ_temp", &kb));
        assert!(evaluate("not environ_temp == 'C:\\Temp'", &kb));
        assert!(evaluate("not (environ_temp != 'x')", &kb));
        assert!(!evaluate("not not environ_temp", &kb));

        let mut populated = kb.clone();
        populated.set_attribute("environ_temp", "C:\\Temp".into());
        assert!(!evaluate("not environ_temp", &populated));
        assert!(!evaluate("not environ_temp == 'C:\\Temp'", &populated));
    }

    #[test]
    fn test_numeric_comparison() {
        let kb = kb("Windows");
        assert!(evaluate("os_major_version >= 6", &kb));
        assert!(evaluate("os_major_version > 9 and os_major_version < 11", &kb));
        assert!(!evaluate("os_major_version <= 5", &kb));
        assert!(evaluate("os_major_version == \"10\"", &kb));
    }

    #[test]
    fn test_multi_valued_attributes() {
        let kb = kb("Linux");
        assert!(evaluate("users.username == 'bob'", &kb));
        assert!(evaluate("%%users.homedir%% == '/home/alice'", &kb));
        assert!(!evaluate("users.username == 'carol'", &kb));
    }

    #[test]
    fn test_precedence_and_parens() {
        let kb = kb("Linux");
        assert!(evaluate("os == 'Windows' and os_major_version == 10 or os == 'Linux'", &kb));
        assert!(!evaluate("os == 'Windows' and (os_major_version == 10 or os == 'Linux')", &kb));
        assert!(evaluate("NOT os == 'Darwin'", &kb));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["", "os ==", "(os == 'Linux'", "os == 'Linux", "os = 'Linux'", "os == 'a' 'b'", "%%os"] {
            assert!(
                matches!(parse_condition(bad), Err(ArtifactError::ConditionSyntax { .. })),
                "{:?} parsed",
                bad
            );
        }
        assert!(!evaluate("os ==", &kb("Linux")));
    }

    #[test]
    fn test_referenced_attributes() {
        let condition = parse_condition("os == 'Windows' and not %%environ_systemroot%% or os == 'x'").unwrap();
        assert_eq!(condition.attributes(), vec!["os", "environ_systemroot"]);
    }

    #[test]
    fn test_supported_os_conversion() {
        assert_eq!(convert_supported_os_to_conditions(&[]), None);
        let os = vec!["Linux".to_string(), "Darwin".to_string()];
        let condition = convert_supported_os_to_conditions(&os).unwrap();
        assert_eq!(condition, "os == 'Linux' or os == 'Darwin'");

        assert!(evaluate_all(&[], &os, &kb("Darwin")));
        assert!(!evaluate_all(&[], &os, &kb("Windows")));
        assert!(!evaluate_all(&["os_major_version > 20".to_string()], &os, &kb("Linux")));
        assert!(evaluate_all(&[], &[], &KnowledgeBase::new()));
    }
}
