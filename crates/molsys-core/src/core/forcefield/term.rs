use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

/// Name of one energy component, e.g. `E_{coul}` or `E_{coul}_{intra}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The system-wide total energy, `E_{total}`.
    pub fn total() -> Self {
        Self::energy(&["total"])
    }

    /// `E_{a}_{b}...` built from the given parts.
    pub fn energy(parts: &[&str]) -> Self {
        let mut name = String::from("E");
        for part in parts {
            name.push_str("_{");
            name.push_str(part);
            name.push('}');
        }
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A linear combination of energy symbols plus a constant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    constant: f64,
    terms: BTreeMap<Symbol, f64>,
}

impl Expression {
    pub fn constant(value: f64) -> Self {
        Self {
            constant: value,
            terms: BTreeMap::new(),
        }
    }

    pub fn sum(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        symbols.into_iter().fold(Self::default(), |acc, s| acc + s)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.terms.keys()
    }

    pub fn coefficient(&self, symbol: &Symbol) -> f64 {
        self.terms.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn evaluate<F>(&self, mut value_of: F) -> Result<f64>
    where
        F: FnMut(&Symbol) -> Result<f64>,
    {
        let mut total = self.constant;
        for (symbol, coefficient) in &self.terms {
            total += coefficient * value_of(symbol)?;
        }
        Ok(total)
    }
}

impl From<Symbol> for Expression {
    fn from(symbol: Symbol) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(symbol, 1.0);
        Self {
            constant: 0.0,
            terms,
        }
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl AddAssign for Expression {
    fn add_assign(&mut self, rhs: Self) {
        self.constant += rhs.constant;
        for (symbol, coefficient) in rhs.terms {
            *self.terms.entry(symbol).or_insert(0.0) += coefficient;
        }
        self.terms.retain(|_, c| *c != 0.0);
    }
}

impl<T: Into<Expression>> Add<T> for Expression {
    type Output = Self;

    fn add(mut self, rhs: T) -> Self::Output {
        self += rhs.into();
        self
    }
}

impl<T: Into<Expression>> Sub<T> for Expression {
    type Output = Self;

    fn sub(self, rhs: T) -> Self::Output {
        let rhs: Expression = rhs.into();
        self + rhs * -1.0
    }
}

impl Mul<f64> for Expression {
    type Output = Self;

    fn mul(mut self, rhs: f64) -> Self::Output {
        self.constant *= rhs;
        for coefficient in self.terms.values_mut() {
            *coefficient *= rhs;
        }
        self.terms.retain(|_, c| *c != 0.0);
        self
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (symbol, coefficient) in &self.terms {
            if !first {
                f.write_str(" + ")?;
            }
            if *coefficient == 1.0 {
                write!(f, "{symbol}")?;
            } else {
                write!(f, "{coefficient}*{symbol}")?;
            }
            first = false;
        }
        if first || self.constant != 0.0 {
            if !first {
                f.write_str(" + ")?;
            }
            write!(f, "{}", self.constant)?;
        }
        Ok(())
    }
}

/// What a user-defined system component stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentValue {
    Constant(f64),
    Expression(Expression),
}

impl ComponentValue {
    pub fn symbols(&self) -> Vec<&Symbol> {
        match self {
            ComponentValue::Constant(_) => Vec::new(),
            ComponentValue::Expression(expr) => expr.symbols().collect(),
        }
    }
}

impl From<f64> for ComponentValue {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl From<Expression> for ComponentValue {
    fn from(value: Expression) -> Self {
        Self::Expression(value)
    }
}

/// The energy components published by one forcefield: a total `E_{name}`
/// plus `E_{name}_{part}` for each declared part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFComponents {
    ff_name: String,
    total: Symbol,
    parts: BTreeMap<String, Symbol>,
}

impl FFComponents {
    pub fn new(ff_name: &str, parts: &[String]) -> Self {
        Self {
            ff_name: ff_name.to_string(),
            total: Symbol::energy(&[ff_name]),
            parts: parts
                .iter()
                .map(|part| (part.clone(), Symbol::energy(&[ff_name, part])))
                .collect(),
        }
    }

    pub fn total(&self) -> &Symbol {
        &self.total
    }

    pub fn part(&self, name: &str) -> Result<&Symbol> {
        self.parts
            .get(name)
            .ok_or_else(|| Error::MissingComponent(Symbol::energy(&[&self.ff_name, name])))
    }

    /// The total first, then each part in name order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        std::iter::once(&self.total).chain(self.parts.values())
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols().any(|s| s == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_symbols_use_brace_notation() {
        assert_eq!(Symbol::total().as_str(), "E_{total}");
        assert_eq!(Symbol::energy(&["coul", "intra"]).as_str(), "E_{coul}_{intra}");
    }

    #[test]
    fn expression_arithmetic_merges_terms() {
        let a = Symbol::new("a");
        let b = Symbol::new("b");
        let expr = Expression::from(a.clone()) * 2.0 + b.clone() + 1.5 - a.clone();

        assert_eq!(expr.coefficient(&a), 1.0);
        assert_eq!(expr.coefficient(&b), 1.0);
        let value = expr
            .evaluate(|s| Ok(if *s == a { 10.0 } else { 100.0 }))
            .unwrap();
        assert_eq!(value, 111.5);
    }

    #[test]
    fn cancelled_terms_disappear() {
        let a = Symbol::new("a");
        let expr = Expression::from(a.clone()) - a;
        assert_eq!(expr.symbols().count(), 0);
        assert_eq!(expr.to_string(), "0");
    }

    #[test]
    fn evaluate_propagates_lookup_errors() {
        let expr = Expression::from(Symbol::new("x"));
        let err = expr
            .evaluate(|s| Err(Error::MissingComponent(s.clone())))
            .unwrap_err();
        assert!(matches!(err, Error::MissingComponent(_)));
    }

    #[test]
    fn ff_components_name_total_and_parts() {
        let components = FFComponents::new("coul", &["intra".to_string()]);
        assert_eq!(components.total().as_str(), "E_{coul}");
        assert_eq!(components.part("intra").unwrap().as_str(), "E_{coul}_{intra}");
        assert!(components.contains(&Symbol::new("E_{coul}_{intra}")));
        assert!(matches!(components.part("inter"), Err(Error::MissingComponent(_))));
        assert_eq!(components.symbols().count(), 2);
    }
}
