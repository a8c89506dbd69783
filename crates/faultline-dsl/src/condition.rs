//! Boolean condition compiler.
//!
//! Conditions such as `alarm_on_host and (not host_contains_instance or
//! instance_down)` are parsed into an expression tree, pushed into negation
//! normal form with De Morgan's laws and distributed into disjunctive normal
//! form: a list of AND-clauses, any of which satisfies the condition.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::CompileError;

/// Upper bound on the number of clauses a condition may expand to
pub const MAX_DNF_CLAUSES: usize = 256;

/// Parsed boolean expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A template symbol
    Symbol(String),
    /// Negation
    Not(Box<Expr>),
    /// Conjunction
    And(Vec<Expr>),
    /// Disjunction
    Or(Vec<Expr>),
}

impl Expr {
    /// Evaluate the expression for a truth assignment; unknown symbols are false
    pub fn evaluate(&self, assignment: &HashMap<String, bool>) -> bool {
        match self {
            Expr::Symbol(name) => assignment.get(name).copied().unwrap_or(false),
            Expr::Not(inner) => !inner.evaluate(assignment),
            Expr::And(items) => items.iter().all(|e| e.evaluate(assignment)),
            Expr::Or(items) => items.iter().any(|e| e.evaluate(assignment)),
        }
    }

    /// Every symbol in the expression, sorted
    pub fn symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Symbol(name) => {
                out.insert(name.clone());
            }
            Expr::Not(inner) => inner.collect_symbols(out),
            Expr::And(items) | Expr::Or(items) => {
                items.iter().for_each(|e| e.collect_symbols(out))
            }
        }
    }
}

/// A possibly negated symbol inside an AND-clause
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionVar {
    /// Template symbol
    pub symbol_name: String,
    /// False when the symbol is negated
    pub positive: bool,
}

impl ConditionVar {
    /// Positive literal
    pub fn positive(symbol: &str) -> Self {
        Self {
            symbol_name: symbol.to_string(),
            positive: true,
        }
    }

    /// Negative literal
    pub fn negative(symbol: &str) -> Self {
        Self {
            symbol_name: symbol.to_string(),
            positive: false,
        }
    }
}

impl fmt::Display for ConditionVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.positive {
            f.write_str(&self.symbol_name)
        } else {
            write!(f, "not {}", self.symbol_name)
        }
    }
}

/// Disjunctive normal form: OR of AND-clauses
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dnf {
    /// The AND-clauses
    pub clauses: Vec<Vec<ConditionVar>>,
}

impl Dnf {
    /// Evaluate for a truth assignment; unknown symbols are false
    pub fn evaluate(&self, assignment: &HashMap<String, bool>) -> bool {
        self.clauses.iter().any(|clause| {
            clause.iter().all(|var| {
                assignment.get(&var.symbol_name).copied().unwrap_or(false) == var.positive
            })
        })
    }
}

/// Printable form of a single clause
pub fn clause_to_string(clause: &[ConditionVar]) -> String {
    clause
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" and ")
}

impl fmt::Display for Dnf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .clauses
            .iter()
            .map(|clause| format!("({})", clause_to_string(clause)))
            .collect::<Vec<_>>()
            .join(" or ");
        f.write_str(&text)
    }
}

// ---------------------------------------------------------------------------
// Tokenizer and parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Symbol(String),
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, CompileError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            tokens.push((pos, Token::LParen));
            chars.next();
        } else if c == ')' {
            tokens.push((pos, Token::RParen));
            chars.next();
        } else if is_symbol_char(c) {
            let mut word = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !is_symbol_char(c) {
                    break;
                }
                word.push(c);
                chars.next();
            }
            let token = match word.to_ascii_lowercase().as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                _ => Token::Symbol(word),
            };
            tokens.push((pos, token));
        } else {
            return Err(CompileError::Syntax {
                position: pos,
                message: format!("unexpected character '{}'", c),
            });
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map(|(p, _)| *p)
            .unwrap_or(self.input_len)
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError::Syntax {
            position: self.position(),
            message: message.to_string(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.cursor += 1;
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.cursor += 1;
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Expr::And(items)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        match self.peek().cloned() {
            Some(Token::Not) => {
                self.cursor += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.cursor += 1;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                self.cursor += 1;
                Ok(inner)
            }
            Some(Token::Symbol(name)) => {
                self.cursor += 1;
                Ok(Expr::Symbol(name))
            }
            Some(_) => Err(self.error("expected a symbol, 'not' or '('")),
            None => Err(self.error("unexpected end of condition")),
        }
    }
}

/// Parse a condition string into an expression tree
pub fn parse_condition(input: &str) -> Result<Expr, CompileError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        input_len: input.len(),
    };
    let expr = parser.parse_or()?;
    if parser.cursor != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// DNF conversion
// ---------------------------------------------------------------------------

type Clause = Vec<ConditionVar>;

fn product(left: Vec<Clause>, right: Vec<Clause>) -> Result<Vec<Clause>, CompileError> {
    let size = left.len().saturating_mul(right.len());
    if size > MAX_DNF_CLAUSES {
        return Err(CompileError::TooComplex(size));
    }
    let mut out = Vec::with_capacity(size);
    for l in &left {
        for r in &right {
            let mut clause = l.clone();
            clause.extend(r.iter().cloned());
            out.push(clause);
        }
    }
    Ok(out)
}

fn expand(expr: &Expr, negated: bool) -> Result<Vec<Clause>, CompileError> {
    match (expr, negated) {
        (Expr::Symbol(name), _) => Ok(vec![vec![ConditionVar {
            symbol_name: name.clone(),
            positive: !negated,
        }]]),
        (Expr::Not(inner), _) => expand(inner, !negated),
        // Conjunction, or a negated disjunction by De Morgan
        (Expr::And(items), false) | (Expr::Or(items), true) => {
            let mut acc: Vec<Clause> = vec![Vec::new()];
            for item in items {
                acc = product(acc, expand(item, negated)?)?;
            }
            Ok(acc)
        }
        // Disjunction, or a negated conjunction by De Morgan
        (Expr::Or(items), false) | (Expr::And(items), true) => {
            let mut acc = Vec::new();
            for item in items {
                acc.extend(expand(item, negated)?);
                if acc.len() > MAX_DNF_CLAUSES {
                    return Err(CompileError::TooComplex(acc.len()));
                }
            }
            Ok(acc)
        }
    }
}

/// Dedupe literals, drop contradictory clauses, duplicate clauses and
/// clauses absorbed by a smaller one. None of these change the truth table.
fn simplify(clauses: Vec<Clause>) -> Vec<Clause> {
    let mut normalized: Vec<(Clause, BTreeSet<ConditionVar>)> = Vec::new();

    for clause in clauses {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for var in clause {
            if seen.insert(var.clone()) {
                ordered.push(var);
            }
        }
        let contradictory = ordered.iter().any(|var| {
            seen.contains(&ConditionVar {
                symbol_name: var.symbol_name.clone(),
                positive: !var.positive,
            })
        });
        if contradictory || normalized.iter().any(|(_, set)| *set == seen) {
            continue;
        }
        normalized.push((ordered, seen));
    }

    let sets: Vec<BTreeSet<ConditionVar>> = normalized.iter().map(|(_, s)| s.clone()).collect();
    normalized
        .into_iter()
        .filter(|(_, set)| {
            !sets.iter().any(|other| other.len() < set.len() && other.is_subset(set))
        })
        .map(|(clause, _)| clause)
        .collect()
}

/// Convert an expression into simplified DNF
pub fn to_dnf(expr: &Expr) -> Result<Dnf, CompileError> {
    Ok(Dnf {
        clauses: simplify(expand(expr, false)?),
    })
}

// ---------------------------------------------------------------------------
// Policy checks
// ---------------------------------------------------------------------------

/// What a condition symbol refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    /// An entity
    Entity,
    /// A relationship between two entities
    Relationship {
        /// Source entity symbol
        source: String,
        /// Target entity symbol
        target: String,
    },
}

/// Resolves condition symbols
pub trait SymbolTable {
    /// Kind of the symbol, `None` if undefined
    fn lookup(&self, symbol: &str) -> Option<SymbolKind>;
}

impl SymbolTable for HashMap<String, SymbolKind> {
    fn lookup(&self, symbol: &str) -> Option<SymbolKind> {
        self.get(symbol).cloned()
    }
}

/// A condition that passed every policy check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCondition {
    /// The DNF
    pub dnf: Dnf,
    /// Entities shared by the positive literals of every clause, in order of
    /// first appearance
    pub common_targets: Vec<String>,
}

fn positive_entities(clause: &[ConditionVar], symbols: &dyn SymbolTable) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |id: &str| {
        if !out.iter().any(|existing| existing == id) {
            out.push(id.to_string());
        }
    };
    for var in clause.iter().filter(|v| v.positive) {
        match symbols.lookup(&var.symbol_name) {
            Some(SymbolKind::Entity) => push(&var.symbol_name),
            Some(SymbolKind::Relationship { source, target }) => {
                push(&source);
                push(&target);
            }
            None => {}
        }
    }
    out
}

/// Parse, normalize and validate a condition.
///
/// Fails when a symbol is unknown, an entity is negated, a clause has no
/// positive literal, or the clauses share no common target entity.
pub fn compile_condition(
    condition: &str,
    symbols: &dyn SymbolTable,
) -> Result<CompiledCondition, CompileError> {
    let expr = parse_condition(condition)?;

    for symbol in expr.symbols() {
        if symbols.lookup(&symbol).is_none() {
            return Err(CompileError::UnknownSymbol(symbol));
        }
    }

    let dnf = to_dnf(&expr)?;
    if dnf.clauses.is_empty() {
        return Err(CompileError::Unsatisfiable(condition.to_string()));
    }

    for clause in &dnf.clauses {
        for var in clause.iter().filter(|v| !v.positive) {
            if symbols.lookup(&var.symbol_name) == Some(SymbolKind::Entity) {
                return Err(CompileError::NegatedEntity(var.symbol_name.clone()));
            }
        }
        if !clause.iter().any(|v| v.positive) {
            return Err(CompileError::NoPositiveLiteral(clause_to_string(clause)));
        }
    }

    let mut common = positive_entities(&dnf.clauses[0], symbols);
    for clause in &dnf.clauses[1..] {
        let entities = positive_entities(clause, symbols);
        common.retain(|id| entities.contains(id));
    }
    if common.is_empty() {
        return Err(CompileError::NoCommonTarget(condition.to_string()));
    }

    Ok(CompiledCondition {
        dnf,
        common_targets: common,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn symbols() -> HashMap<String, SymbolKind> {
        let mut table = HashMap::new();
        for entity in ["alarm", "host", "instance", "zone"] {
            table.insert(entity.to_string(), SymbolKind::Entity);
        }
        let rel = |s: &str, t: &str| SymbolKind::Relationship {
            source: s.to_string(),
            target: t.to_string(),
        };
        table.insert("alarm_on_host".to_string(), rel("alarm", "host"));
        table.insert("host_contains_instance".to_string(), rel("host", "instance"));
        table.insert("zone_contains_host".to_string(), rel("zone", "host"));
        table.insert("alarm_on_instance".to_string(), rel("alarm", "instance"));
        table
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_condition("a or b and not c").unwrap();
        assert_eq!(
            expr,
            Expr::Or(vec![
                Expr::Symbol("a".to_string()),
                Expr::And(vec![
                    Expr::Symbol("b".to_string()),
                    Expr::Not(Box::new(Expr::Symbol("c".to_string()))),
                ]),
            ])
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_condition("a and (b or c"),
            Err(CompileError::Syntax { .. })
        ));
        assert!(matches!(
            parse_condition("a and"),
            Err(CompileError::Syntax { position: 5, .. })
        ));
        assert!(matches!(
            parse_condition("a && b"),
            Err(CompileError::Syntax { position: 2, .. })
        ));
        assert!(matches!(parse_condition("a b"), Err(CompileError::Syntax { .. })));
    }

    #[test]
    fn test_de_morgan_and_distribution() {
        let dnf = to_dnf(&parse_condition("a and not (b and c)").unwrap()).unwrap();
        assert_eq!(dnf.to_string(), "(a and not b) or (a and not c)");

        let dnf = to_dnf(&parse_condition("(a or b) and (c or d)").unwrap()).unwrap();
        assert_eq!(dnf.clauses.len(), 4);
    }

    #[test]
    fn test_simplification() {
        let dnf = to_dnf(&parse_condition("a and a and not a or b").unwrap()).unwrap();
        assert_eq!(dnf.to_string(), "(b)");

        let dnf = to_dnf(&parse_condition("a or (a and b)").unwrap()).unwrap();
        assert_eq!(dnf.to_string(), "(a)");
    }

    #[test]
    fn test_compile_common_target() {
        let compiled = compile_condition(
            "alarm_on_host and not host_contains_instance",
            &symbols(),
        )
        .unwrap();
        assert_eq!(compiled.common_targets, vec!["alarm", "host"]);
        assert_eq!(compiled.dnf.clauses.len(), 1);
    }

    #[test]
    fn test_compile_or_shares_host() {
        let compiled =
            compile_condition("alarm_on_host or zone_contains_host", &symbols()).unwrap();
        assert_eq!(compiled.common_targets, vec!["host"]);
    }

    #[test]
    fn test_negated_entity_rejected() {
        let err = compile_condition("alarm_on_host and not host", &symbols()).unwrap_err();
        assert_eq!(err, CompileError::NegatedEntity("host".to_string()));
    }

    #[test]
    fn test_all_negative_clause_rejected() {
        let err = compile_condition("alarm_on_host or not host_contains_instance", &symbols())
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::NoPositiveLiteral("not host_contains_instance".to_string())
        );
    }

    #[test]
    fn test_no_common_target_rejected() {
        let compiled = compile_condition(
            "alarm_on_host or host_contains_instance and alarm_on_instance",
            &symbols(),
        )
        .unwrap();
        assert_eq!(compiled.common_targets, vec!["alarm", "host"]);

        let err = compile_condition("zone_contains_host or alarm_on_instance", &symbols())
            .unwrap_err();
        assert!(matches!(err, CompileError::NoCommonTarget(_)));
    }

    #[test]
    fn test_unknown_symbol_rejected() {
        let err = compile_condition("alarm_on_host and mystery", &symbols()).unwrap_err();
        assert_eq!(err, CompileError::UnknownSymbol("mystery".to_string()));
    }

    #[test]
    fn test_unsatisfiable_rejected() {
        let err = compile_condition("alarm_on_host and not alarm_on_host", &symbols())
            .unwrap_err();
        assert!(matches!(err, CompileError::Unsatisfiable(_)));
    }
}
