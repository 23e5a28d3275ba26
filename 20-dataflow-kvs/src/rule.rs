//! Declarative rules.
//!
//! A rule names a target relation, how its output is applied ([`Operator`]),
//! one or two source relations and a projection:
//!
//! ```
//! use dataflow_kvs::rule::{Operator, Rule};
//!
//! // kvget_response <~ (kvget * kvstate).pairs(:key => :key)
//! let rule = Rule::new(Operator::Send, "kvget_response")
//!     .from("kvget")
//!     .join("kvstate", [("key", "key")])
//!     .select(["client", "reqid", "kvstate.key", "value"]);
//! assert_eq!(rule.target(), "kvget_response");
//! ```
//!
//! Rules are plain data until [`crate::program::Program`] resolves their column
//! names against the declared schemas.

use std::fmt;

use crate::value::Value;

/// How a rule's output reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `<=`: derived into a Scratch within the tick.
    Derive,
    /// `<+`: merged into a Table at commit, replacing any tuple with the same key.
    Merge,
    /// `<-`: retracted from a Table at commit, after merges.
    Retract,
    /// `<~`: sent asynchronously through a Channel.
    Send,
}

impl Operator {
    pub fn is_deferred(self) -> bool {
        !matches!(self, Operator::Derive)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Derive => "<=",
            Operator::Merge => "<+",
            Operator::Retract => "<-",
            Operator::Send => "<~",
        };
        f.write_str(symbol)
    }
}

/// A column reference or a constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Column {
        relation: Option<String>,
        column: String,
    },
    Const(Value),
}

impl From<&str> for Expr {
    /// Parses `"relation.column"` or a bare `"column"`.
    fn from(reference: &str) -> Self {
        match reference.split_once('.') {
            Some((relation, column)) => Expr::Column {
                relation: Some(relation.to_string()),
                column: column.to_string(),
            },
            None => Expr::Column {
                relation: None,
                column: reference.to_string(),
            },
        }
    }
}

/// A constant expression.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Const(value.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq(Expr, Expr),
    Ne(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Scan,
    /// Equi-join on column pairs; an empty list is a cross product.
    Join {
        right: String,
        on: Vec<(String, String)>,
    },
    /// Left tuples with no match in `right` on the column pairs.
    AntiJoin {
        right: String,
        on: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    op: Operator,
    target: String,
    source: String,
    body: Body,
    filters: Vec<Predicate>,
    projection: Vec<Expr>,
}

impl Rule {
    pub fn new(op: Operator, target: &str) -> Self {
        Self {
            op,
            target: target.to_string(),
            source: String::new(),
            body: Body::Scan,
            filters: Vec::new(),
            projection: Vec::new(),
        }
    }

    pub fn derive(target: &str) -> Self {
        Self::new(Operator::Derive, target)
    }

    pub fn merge(target: &str) -> Self {
        Self::new(Operator::Merge, target)
    }

    pub fn retract(target: &str) -> Self {
        Self::new(Operator::Retract, target)
    }

    pub fn send(target: &str) -> Self {
        Self::new(Operator::Send, target)
    }

    pub fn from(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn join<'a, I>(mut self, right: &str, on: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.body = Body::Join {
            right: right.to_string(),
            on: pairs(on),
        };
        self
    }

    pub fn cross(self, right: &str) -> Self {
        self.join(right, std::iter::empty::<(&str, &str)>())
    }

    pub fn anti_join<'a, I>(mut self, right: &str, on: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.body = Body::AntiJoin {
            right: right.to_string(),
            on: pairs(on),
        };
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn select<I, E>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        self.projection = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn filters(&self) -> &[Predicate] {
        &self.filters
    }

    pub fn projection(&self) -> &[Expr] {
        &self.projection
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.target, self.op)?;
        match &self.body {
            Body::Scan => write!(f, "{}", self.source),
            Body::Join { right, .. } => write!(f, "({} * {})", self.source, right),
            Body::AntiJoin { right, .. } => write!(f, "({} ! {})", self.source, right),
        }
    }
}

fn pairs<'a, I>(on: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    on.into_iter()
        .map(|(l, r)| (l.to_string(), r.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qualified_and_bare_columns() {
        assert_eq!(
            Expr::from("kvstate.key"),
            Expr::Column {
                relation: Some("kvstate".into()),
                column: "key".into()
            }
        );
        assert_eq!(
            Expr::from("value"),
            Expr::Column {
                relation: None,
                column: "value".into()
            }
        );
    }

    #[test]
    fn joins_display_both_sides() {
        let rule = Rule::send("out").from("a").join("b", [("k", "k")]);
        assert_eq!(rule.to_string(), "out <~ (a * b)");
    }

    #[test]
    fn only_derive_is_immediate() {
        assert!(!Operator::Derive.is_deferred());
        assert!(Operator::Merge.is_deferred());
        assert!(Operator::Retract.is_deferred());
        assert!(Operator::Send.is_deferred());
    }
}
