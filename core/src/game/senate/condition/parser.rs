use std::iter::Peekable;
use std::str::Chars;

use anyhow::{Result, anyhow, bail};

use super::{ConditionContext, ConditionEvaluator};

pub(crate) fn parse_condition(text: &str) -> Result<Box<dyn ConditionEvaluator>> {
    let expr = ConditionExpr::parse(text)?;
    Ok(Box::new(expr))
}

#[derive(Debug, Clone)]
enum ConditionExpr {
    Literal(bool),
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
    Comparison(Comparison),
}

impl ConditionExpr {
    fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            bail!("condition is empty");
        }
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(expr)
    }
}

impl ConditionEvaluator for ConditionExpr {
    fn evaluate(&self, context: &ConditionContext<'_>) -> Result<bool> {
        match self {
            ConditionExpr::Literal(value) => Ok(*value),
            ConditionExpr::And(lhs, rhs) => Ok(lhs.evaluate(context)? && rhs.evaluate(context)?),
            ConditionExpr::Or(lhs, rhs) => Ok(lhs.evaluate(context)? || rhs.evaluate(context)?),
            ConditionExpr::Comparison(comparison) => comparison.evaluate(context),
        }
    }
}

#[derive(Debug, Clone)]
struct Comparison {
    metric: MetricKey,
    op: CompareOp,
    value: f64,
}

impl Comparison {
    fn evaluate(&self, context: &ConditionContext<'_>) -> Result<bool> {
        let left = self.metric.value(context)?;
        Ok(match self.op {
            CompareOp::Lt => left < self.value,
            CompareOp::Le => left <= self.value,
            CompareOp::Gt => left > self.value,
            CompareOp::Ge => left >= self.value,
            CompareOp::Eq => (left - self.value).abs() < f64::EPSILON,
            CompareOp::Ne => (left - self.value).abs() >= f64::EPSILON,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
enum MetricKey {
    Relation,
    RelationOf(String),
    Reputation,
    MerchantReputation(String),
    Round,
    Year,
    Season,
    Resource(String),
    Price { city: String, resource: String },
    Flag(String),
}

impl MetricKey {
    fn from_str(value: &str) -> Result<Self> {
        let mut parts = value.split(':');
        let head = parts.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();
        if args.iter().any(|arg| arg.is_empty()) {
            bail!("metric '{}' has an empty argument", value);
        }
        let metric = match (head.as_str(), args.as_slice()) {
            ("relation", []) => Self::Relation,
            ("relation", [senator]) => Self::RelationOf(senator.to_string()),
            ("reputation", []) => Self::Reputation,
            ("merchant_reputation", [city]) => Self::MerchantReputation(city.to_string()),
            ("round", []) => Self::Round,
            ("year", []) => Self::Year,
            ("season", []) => Self::Season,
            ("resource", [name]) => Self::Resource(name.to_string()),
            ("price", [city, resource]) => Self::Price {
                city: city.to_string(),
                resource: resource.to_string(),
            },
            ("flag", [tag]) => Self::Flag(tag.to_string()),
            _ => bail!("unknown condition metric '{}'", value),
        };
        Ok(metric)
    }

    fn value(&self, context: &ConditionContext<'_>) -> Result<f64> {
        let state = context.state;
        let value = match self {
            MetricKey::Relation => context.senator.relation(),
            MetricKey::RelationOf(senator) => state
                .relation_of(senator)
                .ok_or_else(|| anyhow!("condition refers to unknown senator '{}'", senator))?,
            MetricKey::Reputation => state.reputation(),
            MetricKey::MerchantReputation(city) => state
                .market()
                .city(city)
                .map(|market| market.merchant_reputation())
                .ok_or_else(|| anyhow!("condition refers to unknown city '{}'", city))?,
            MetricKey::Round => f64::from(state.round()),
            MetricKey::Year => f64::from(state.calendar().year),
            MetricKey::Season => f64::from(state.season().index()),
            MetricKey::Resource(name) => state
                .resource(name)
                .ok_or_else(|| anyhow!("condition refers to unknown resource '{}'", name))?,
            MetricKey::Price { city, resource } => state.price(city, resource).ok_or_else(|| {
                anyhow!("condition refers to unknown market {}:{}", city, resource)
            })?,
            MetricKey::Flag(tag) => {
                if state.flag_active(tag) {
                    1.0
                } else {
                    0.0
                }
            }
        };
        Ok(value)
    }
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    Number(f64),
    And,
    Or,
    LParen,
    RParen,
    Operator(CompareOp),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut chars = input.chars().peekable();
    let mut tokens = Vec::new();
    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_none() {
                    bail!("use '&&' for conjunction");
                }
                tokens.push(Token::And);
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_none() {
                    bail!("use '||' for disjunction");
                }
                tokens.push(Token::Or);
            }
            '<' | '>' | '=' | '!' => {
                let op = read_operator(&mut chars)?;
                tokens.push(Token::Operator(op));
            }
            '-' | '+' if matches!(tokens.last(), Some(Token::Operator(_))) => {
                let number = read_number(&mut chars)?;
                tokens.push(Token::Number(number));
            }
            '0'..='9' | '.' => {
                let number = read_number(&mut chars)?;
                tokens.push(Token::Number(number));
            }
            _ if is_ident_start(ch) => {
                let ident = read_ident(&mut chars);
                tokens.push(Token::Ident(ident));
            }
            _ => bail!("unexpected character '{}' in condition", ch),
        }
    }
    Ok(tokens)
}

fn read_operator(chars: &mut Peekable<Chars<'_>>) -> Result<CompareOp> {
    let first = chars
        .next()
        .ok_or_else(|| anyhow!("condition ended while reading an operator"))?;
    let followed_by_eq = chars.next_if_eq(&'=').is_some();
    match (first, followed_by_eq) {
        ('<', true) => Ok(CompareOp::Le),
        ('<', false) => Ok(CompareOp::Lt),
        ('>', true) => Ok(CompareOp::Ge),
        ('>', false) => Ok(CompareOp::Gt),
        ('=', true) => Ok(CompareOp::Eq),
        ('!', true) => Ok(CompareOp::Ne),
        ('=', false) => Err(anyhow!("use '==' for equality")),
        ('!', false) => Err(anyhow!("use '!=' for inequality")),
        _ => Err(anyhow!("invalid operator '{}'", first)),
    }
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Result<f64> {
    let mut buffer = String::new();
    if let Some(sign) = chars.next_if(|ch| *ch == '-' || *ch == '+') {
        buffer.push(sign);
    }
    while let Some(ch) = chars.next_if(|ch| ch.is_ascii_digit() || *ch == '.') {
        buffer.push(ch);
    }
    if buffer.is_empty() || buffer == "+" || buffer == "-" {
        bail!("expected a number");
    }
    buffer
        .parse()
        .map_err(|err| anyhow!("failed to parse number '{}': {}", buffer, err))
}

fn read_ident(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(ch) = chars.next_if(|ch| is_ident_part(*ch)) {
        ident.push(ch);
    }
    ident
}

const fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

const fn is_ident_part(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == ':'
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse_expression(&mut self) -> Result<ConditionExpr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ConditionExpr> {
        let mut expr = self.parse_and()?;
        while self.consume(|token| matches!(token, Token::Or)) {
            let rhs = self.parse_and()?;
            expr = ConditionExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<ConditionExpr> {
        let mut expr = self.parse_primary()?;
        while self.consume(|token| matches!(token, Token::And)) {
            let rhs = self.parse_primary()?;
            expr = ConditionExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ConditionExpr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.parse_expression()?;
                if !self.consume(|token| matches!(token, Token::RParen)) {
                    bail!("missing closing parenthesis");
                }
                Ok(expr)
            }
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("true") => {
                self.pos += 1;
                Ok(ConditionExpr::Literal(true))
            }
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("false") => {
                self.pos += 1;
                Ok(ConditionExpr::Literal(false))
            }
            Some(Token::Ident(_)) => self.parse_comparison(),
            Some(token) => Err(anyhow!("unexpected token {:?}", token)),
            None => Err(anyhow!("condition ended unexpectedly")),
        }
    }

    fn parse_comparison(&mut self) -> Result<ConditionExpr> {
        let metric = match self.advance() {
            Some(Token::Ident(ident)) => MetricKey::from_str(&ident)?,
            _ => bail!("expected a metric name"),
        };
        let op = match self.advance() {
            Some(Token::Operator(op)) => op,
            _ => bail!("expected a comparison operator"),
        };
        let value = match self.advance() {
            Some(Token::Number(value)) => value,
            _ => bail!("expected a number after the operator"),
        };
        Ok(ConditionExpr::Comparison(Comparison { metric, op, value }))
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(anyhow!("unexpected trailing token {:?}", token)),
        }
    }

    fn consume(&mut self, predicate: impl Fn(&Token) -> bool) -> bool {
        if self.peek().is_some_and(predicate) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::fixtures::sample_state;

    fn check(text: &str, senator: &str) -> Result<bool> {
        let state = sample_state();
        let senator = state.senator(senator).expect("senator");
        let evaluator = parse_condition(text)?;
        evaluator.evaluate(&ConditionContext {
            state: &state,
            senator,
        })
    }

    #[test]
    fn supports_and_or_grouping() {
        assert!(check("relation > 20 && (reputation >= 50 || round == 1)", "sulla").expect("eval"));
        let condition = "relation > 20 && (reputation >= 50 || round == 1)";
        assert!(!check(condition, "crassus").expect("eval"));
        assert!(check("true || relation > 90", "crassus").expect("eval"));
        assert!(!check("false", "sulla").expect("eval"));
    }

    #[test]
    fn reads_qualified_metrics() {
        assert!(check("relation:crassus < -5", "sulla").expect("eval"));
        assert!(check("resource:denarii >= 500 && price:roma:grain > 9.5", "sulla").expect("eval"));
        assert!(check("merchant_reputation:ostia == 50 && season == 0", "sulla").expect("eval"));
        assert!(check("flag:proscriptions == 0 && year >= 666", "sulla").expect("eval"));
    }

    #[test]
    fn unknown_references_fail_at_evaluation() {
        let err = check("relation:cato > 0", "sulla").expect_err("unknown senator");
        assert!(err.to_string().contains("cato"));
        assert!(check("resource:gold > 0", "sulla").is_err());
        assert!(check("price:carthago:grain > 0", "sulla").is_err());
    }

    #[test]
    fn malformed_text_fails_at_parse_time() {
        for text in [
            "",
            "popularity > 3",
            "relation >",
            "relation = 3",
            "relation > 3 &",
            "(relation > 3",
            "relation > 3 reputation",
            "price:roma > 3",
            "resource: > 3",
        ] {
            assert!(parse_condition(text).is_err(), "{} should not parse", text);
        }
    }
}
