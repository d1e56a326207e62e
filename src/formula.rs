//! Restricted arithmetic formulas for deriving the sale value of a row.
//!
//! A formula may only contain numeric literals, column aliases, the four
//! arithmetic operators and parentheses. Aliases are matched as whole tokens,
//! longest alias first, so an alias that is a prefix of another one (`Qty`
//! vs `QtyBox`) never captures part of the longer name.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::{parse_amount, RawTable};
use crate::error::{AnalyticsError, AnalyticsResult};

/// Formula settings for one analysis run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFormulaConfig {
    /// alias -> source column name
    pub aliases: BTreeMap<String, String>,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed formula
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Alias(String),
    Neg(Box<Expr>),
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate against alias bindings
    pub fn eval(&self, bindings: &HashMap<&str, f64>) -> Result<f64, String> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Alias(name) => bindings
                .get(name.as_str())
                .copied()
                .ok_or_else(|| format!("no value bound for alias '{}'", name)),
            Expr::Neg(inner) => Ok(-inner.eval(bindings)?),
            Expr::BinaryOp { op, left, right } => {
                let l = left.eval(bindings)?;
                let r = right.eval(bindings)?;
                match op {
                    Op::Add => Ok(l + r),
                    Op::Sub => Ok(l - r),
                    Op::Mul => Ok(l * r),
                    Op::Div if r == 0.0 => Err("division by zero".to_string()),
                    Op::Div => Ok(l / r),
                }
            }
        }
    }

    /// Aliases referenced by the expression, in order of first use
    pub fn aliases(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_aliases(&mut out);
        out
    }

    fn collect_aliases<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Alias(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_aliases(out),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_aliases(out);
                right.collect_aliases(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Alias(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(input: &str, aliases: &[&str]) -> Result<Vec<Token>, String> {
    // Longest first so that overlapping aliases resolve to the longest match
    let mut aliases = aliases.to_vec();
    aliases.retain(|alias| !alias.trim().is_empty());
    aliases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];
        let Some(c) = rest.chars().next() else {
            break;
        };

        match c {
            ' ' | '\t' | '\n' | '\r' => pos += c.len_utf8(),
            '+' => {
                tokens.push(Token::Plus);
                pos += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                pos += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                pos += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            _ => {
                if let Some(alias) = aliases.iter().find(|alias| {
                    rest.starts_with(**alias)
                        && !rest[alias.len()..].starts_with(is_ident_char)
                        && !input[..pos].ends_with(is_ident_char)
                }) {
                    tokens.push(Token::Alias(alias.to_string()));
                    pos += alias.len();
                } else if c.is_ascii_digit() || c == '.' {
                    let len = rest
                        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                        .unwrap_or(rest.len());
                    let literal = &rest[..len];
                    let value = literal
                        .parse::<f64>()
                        .map_err(|_| format!("invalid number '{}'", literal))?;
                    if rest[len..].starts_with(is_ident_char) {
                        return Err(format!("unexpected character after number '{}'", literal));
                    }
                    tokens.push(Token::Number(value));
                    pos += len;
                } else if is_ident_char(c) {
                    let len = rest.find(|ch: char| !is_ident_char(ch)).unwrap_or(rest.len());
                    return Err(format!("unknown identifier '{}'", &rest[..len]));
                } else {
                    return Err(format!("unexpected character '{}' at position {}", c, pos));
                }
            }
        }
    }

    Ok(tokens)
}

/// Parse `expression`, accepting only the given aliases as variables
pub fn parse_formula(expression: &str, aliases: &[&str]) -> AnalyticsResult<Expr> {
    let syntax_error = |reason: String| AnalyticsError::FormulaSyntax {
        expression: expression.to_string(),
        reason,
    };

    let tokens = tokenize(expression, aliases).map_err(syntax_error)?;
    if tokens.is_empty() {
        return Err(syntax_error("empty formula".to_string()));
    }

    let (expr, pos) = parse_add_sub(&tokens, 0).map_err(syntax_error)?;
    if pos < tokens.len() {
        return Err(syntax_error(format!("unexpected token at position {}", pos)));
    }
    Ok(expr)
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_unary(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_unary(tokens, pos + 1)?;
        left = Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_unary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    match tokens.get(pos) {
        Some(Token::Plus) => parse_unary(tokens, pos + 1),
        Some(Token::Minus) => {
            let (expr, pos) = parse_unary(tokens, pos + 1)?;
            Ok((Expr::Neg(Box::new(expr)), pos))
        }
        _ => parse_primary(tokens, pos),
    }
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    match tokens.get(pos) {
        None => Err("unexpected end of formula".to_string()),
        Some(Token::Number(n)) => Ok((Expr::Number(*n), pos + 1)),
        Some(Token::Alias(name)) => Ok((Expr::Alias(name.clone()), pos + 1)),
        Some(Token::LParen) => {
            let (expr, pos) = parse_add_sub(tokens, pos + 1)?;
            match tokens.get(pos) {
                Some(Token::RParen) => Ok((expr, pos + 1)),
                _ => Err("missing closing parenthesis".to_string()),
            }
        }
        Some(_) => Err(format!("unexpected token at position {}", pos)),
    }
}

/// Derive one value per table row from the configured formula.
///
/// The whole column is computed before anything is returned, so a failure on
/// any row leaves the caller's existing values untouched. A non-numeric cell
/// in an aliased column, or a result that is not finite, refuses the whole
/// column rather than dropping the row, even when that row would later be
/// dropped for another reason.
pub fn evaluate_value_formula(
    table: &RawTable,
    config: &ValueFormulaConfig,
) -> AnalyticsResult<Vec<f64>> {
    let alias_names: Vec<&str> = config.aliases.keys().map(String::as_str).collect();
    let expr = parse_formula(&config.expression, &alias_names)?;

    let eval_error = |reason: String| AnalyticsError::FormulaEvaluation {
        expression: config.expression.clone(),
        reason,
    };

    let mut columns = Vec::new();
    for alias in expr.aliases() {
        let column_name = &config.aliases[alias];
        let index = table.require_column(column_name)?;
        columns.push((alias, column_name.as_str(), index));
    }

    debug!(
        expression = %config.expression,
        aliases = columns.len(),
        rows = table.len(),
        "Evaluating value formula"
    );

    let mut values = Vec::with_capacity(table.len());
    let mut bindings: HashMap<&str, f64> = HashMap::with_capacity(columns.len());

    for row in 0..table.len() {
        for &(alias, column_name, index) in &columns {
            let raw = table.cell(row, index);
            let value = parse_amount(raw).ok_or_else(|| {
                eval_error(format!(
                    "row {}: column '{}' value '{}' is not numeric",
                    row + 2,
                    column_name,
                    raw
                ))
            })?;
            bindings.insert(alias, value);
        }

        let value = expr
            .eval(&bindings)
            .map_err(|reason| eval_error(format!("row {}: {}", row + 2, reason)))?;
        if !value.is_finite() {
            return Err(eval_error(format!(
                "row {}: result {} is not a finite number",
                row + 2,
                value
            )));
        }
        values.push(value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    fn config(aliases: &[(&str, &str)], expression: &str) -> ValueFormulaConfig {
        ValueFormulaConfig {
            aliases: aliases
                .iter()
                .map(|(a, c)| (a.to_string(), c.to_string()))
                .collect(),
            expression: expression.to_string(),
        }
    }

    #[test]
    fn test_quantity_times_price() {
        let table = raw_table(&["quantidade", "preco"], &[&["2", "10"], &["3", "5"]]);
        let cfg = config(&[("Qty", "quantidade"), ("Price", "preco")], "Qty*Price");
        assert_eq!(evaluate_value_formula(&table, &cfg).unwrap(), vec![20.0, 15.0]);
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let bindings = HashMap::from([("a", 2.0), ("b", 3.0)]);
        let eval = |src: &str| parse_formula(src, &["a", "b"]).unwrap().eval(&bindings).unwrap();

        assert_eq!(eval("a + b * 2"), 8.0);
        assert_eq!(eval("(a + b) * 2"), 10.0);
        assert_eq!(eval("a - b - 1"), -2.0);
        assert_eq!(eval("-a * b"), -6.0);
        assert_eq!(eval("b / a / 2"), 0.75);
        assert_eq!(eval("1.5 * 4"), 6.0);
    }

    #[test]
    fn test_overlapping_aliases() {
        let table = raw_table(&["q", "qb", "p"], &[&["2", "10", "3"]]);
        let cfg = config(&[("Qty", "q"), ("QtyBox", "qb"), ("P", "p")], "QtyBox * P + Qty");
        assert_eq!(evaluate_value_formula(&table, &cfg).unwrap(), vec![32.0]);
    }

    #[test]
    fn test_alias_with_spaces() {
        let table = raw_table(&["Unit Price", "Units"], &[&["2,50", "4"]]);
        let cfg = config(&[("Unit Price", "Unit Price"), ("Units", "Units")], "Unit Price * Units");
        assert_eq!(evaluate_value_formula(&table, &cfg).unwrap(), vec![10.0]);
    }

    #[test]
    fn test_rejects_function_calls_and_unknown_names() {
        let aliases = ["Qty", "Price"];
        for src in [
            "__import__('os').system('true')",
            "abs(Qty)",
            "Qty * Pricey",
            "Qty ** 2",
            "Qty; Price",
            "",
            "(Qty * Price",
            "Qty Price",
            "2Qty",
        ] {
            assert!(
                matches!(parse_formula(src, &aliases), Err(AnalyticsError::FormulaSyntax { .. })),
                "expected syntax error for {:?}",
                src
            );
        }
    }

    #[test]
    fn test_syntax_error_surfaces_expression() {
        let err = parse_formula("exec(1)", &[]).unwrap_err();
        assert!(err.to_string().contains("exec(1)"));
    }

    #[test]
    fn test_evaluation_errors() {
        let table = raw_table(&["a", "b"], &[&["1", "0"]]);
        let cfg = config(&[("A", "a"), ("B", "b")], "A / B");
        assert!(matches!(
            evaluate_value_formula(&table, &cfg),
            Err(AnalyticsError::FormulaEvaluation { .. })
        ));

        let table_text = raw_table(&["a"], &[&["x"]]);
        let cfg = config(&[("A", "a")], "A + 1");
        assert!(matches!(
            evaluate_value_formula(&table_text, &cfg),
            Err(AnalyticsError::FormulaEvaluation { .. })
        ));
    }

    #[test]
    fn test_overflowing_result_is_rejected() {
        let table = raw_table(&["q", "p"], &[&["1e200", "1e200"]]);
        let cfg = config(&[("Q", "q"), ("P", "p")], "Q*P");
        let err = evaluate_value_formula(&table, &cfg).unwrap_err();
        assert!(matches!(err, AnalyticsError::FormulaEvaluation { .. }));
        assert!(err.to_string().contains("not a finite number"));
    }

    #[test]
    fn test_unmapped_column() {
        let table = raw_table(&["a"], &[&["1"]]);
        let cfg = config(&[("A", "missing")], "A");
        assert!(matches!(
            evaluate_value_formula(&table, &cfg),
            Err(AnalyticsError::MissingColumn(_))
        ));
    }
}
