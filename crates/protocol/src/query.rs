use serde_json::Value;

/// Comparison operators the translator understands. This is intentionally a
/// small, fixed set: it maps one-to-one onto SQL and onto a client-side
/// `matches` predicate, so server and in-memory filtering stay identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    Ne,
    In,
    NotIn,
    Like,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Ne => "!=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Like => "LIKE",
        }
    }
}

/// A field condition: either a bare scalar (equality) or an explicit
/// `(operator, value)` pair.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Op(Operator, Value),
}

impl<T: Into<Value>> From<T> for Condition {
    fn from(value: T) -> Self {
        Condition::Eq(value.into())
    }
}

impl Condition {
    pub fn op(op: Operator, value: impl Into<Value>) -> Self {
        Condition::Op(op, value.into())
    }

    /// The value this condition tests against, regardless of shape.
    pub fn value(&self) -> &Value {
        match self {
            Condition::Eq(v) => v,
            Condition::Op(_, v) => v,
        }
    }

    pub fn matches(&self, field: &Value) -> bool {
        match self {
            Condition::Eq(v) => field == v,
            Condition::Op(Operator::Eq, v) => field == v,
            Condition::Op(Operator::Ne, v) => field != v,
            Condition::Op(Operator::Gt, v) => compare(field, v) == Some(std::cmp::Ordering::Greater),
            Condition::Op(Operator::Lt, v) => compare(field, v) == Some(std::cmp::Ordering::Less),
            Condition::Op(Operator::Gte, v) => {
                matches!(
                    compare(field, v),
                    Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                )
            }
            Condition::Op(Operator::Lte, v) => {
                matches!(
                    compare(field, v),
                    Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                )
            }
            Condition::Op(Operator::In, v) => v.as_array().is_some_and(|xs| xs.contains(field)),
            Condition::Op(Operator::NotIn, v) => {
                !v.as_array().is_some_and(|xs| xs.contains(field))
            }
            Condition::Op(Operator::Like, v) => match (field.as_str(), v.as_str()) {
                (Some(f), Some(pattern)) => like_matches(f, pattern),
                _ => false,
            },
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// A minimal SQL `LIKE` matcher (`%` = any run, `_` = any one char) used by
/// the client-side predicate so it agrees with the SQL translation.
fn like_matches(text: &str, pattern: &str) -> bool {
    fn go(t: &[u8], p: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'%') => go(t, &p[1..]) || (!t.is_empty() && go(&t[1..], p)),
            Some(b'_') => !t.is_empty() && go(&t[1..], &p[1..]),
            Some(c) => t.first() == Some(c) && go(&t[1..], &p[1..]),
        }
    }
    go(text.as_bytes(), pattern.as_bytes())
}

/// A structured query: an ordered list of `field -> condition` clauses.
/// Order is preserved because it determines both the emitted SQL clause
/// order and the bound argument order.
#[derive(Debug, Clone, Default)]
pub struct Query(Vec<(String, Condition)>);

impl Query {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn field(mut self, name: impl Into<String>, cond: impl Into<Condition>) -> Self {
        self.0.push((name.into(), cond.into()));
        self
    }

    pub fn op(mut self, name: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.0.push((name.into(), Condition::op(op, value)));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Condition)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, doc: &crate::Document) -> bool {
        self.0
            .iter()
            .all(|(field, cond)| doc.get(field).is_some_and(|v| cond.matches(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let q = Query::new().field("a", 1).op("b", Operator::Gt, 2);
        let fields: Vec<&str> = q.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, vec!["a", "b"]);
    }

    #[test]
    fn like_matcher_handles_wildcards() {
        assert!(like_matches("hello", "hel%"));
        assert!(like_matches("hello", "h_llo"));
        assert!(!like_matches("hello", "world"));
    }
}
