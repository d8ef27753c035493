//! Index ranges: equality on a prefix of the index fields, then at most one
//! lower and one upper bound on the next field.

use serde::Serialize;

use crate::value::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IndexRangeExpression {
    Eq { field_path: String, value: Value },
    Gt { field_path: String, value: Value },
    Gte { field_path: String, value: Value },
    Lt { field_path: String, value: Value },
    Lte { field_path: String, value: Value },
}

impl IndexRangeExpression {
    pub fn field_path(&self) -> &str {
        match self {
            IndexRangeExpression::Eq { field_path, .. }
            | IndexRangeExpression::Gt { field_path, .. }
            | IndexRangeExpression::Gte { field_path, .. }
            | IndexRangeExpression::Lt { field_path, .. }
            | IndexRangeExpression::Lte { field_path, .. } => field_path,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            IndexRangeExpression::Eq { value, .. }
            | IndexRangeExpression::Gt { value, .. }
            | IndexRangeExpression::Gte { value, .. }
            | IndexRangeExpression::Lt { value, .. }
            | IndexRangeExpression::Lte { value, .. } => value,
        }
    }

    /// Whether `candidate` (the document's value at this field) is in range.
    pub fn admits(&self, candidate: &Value) -> bool {
        match self {
            IndexRangeExpression::Eq { value, .. } => candidate == value,
            IndexRangeExpression::Gt { value, .. } => candidate > value,
            IndexRangeExpression::Gte { value, .. } => candidate >= value,
            IndexRangeExpression::Lt { value, .. } => candidate < value,
            IndexRangeExpression::Lte { value, .. } => candidate <= value,
        }
    }
}

/// Built with `IndexRange::all().eq("channel", id).gte("score", 10.0)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IndexRange(Vec<IndexRangeExpression>);

impl IndexRange {
    /// The whole index.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn expressions(&self) -> &[IndexRangeExpression] {
        &self.0
    }

    fn push(mut self, expression: IndexRangeExpression) -> Self {
        self.0.push(expression);
        self
    }

    pub fn eq(self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(IndexRangeExpression::Eq {
            field_path: field_path.into(),
            value: value.into(),
        })
    }

    pub fn gt(self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(IndexRangeExpression::Gt {
            field_path: field_path.into(),
            value: value.into(),
        })
    }

    pub fn gte(self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(IndexRangeExpression::Gte {
            field_path: field_path.into(),
            value: value.into(),
        })
    }

    pub fn lt(self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(IndexRangeExpression::Lt {
            field_path: field_path.into(),
            value: value.into(),
        })
    }

    pub fn lte(self, field_path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(IndexRangeExpression::Lte {
            field_path: field_path.into(),
            value: value.into(),
        })
    }

    /// Check the range against the index's field list: equalities must
    /// cover a prefix of the fields in order, and bounds (at most one of
    /// each direction) must all be on the field right after that prefix.
    pub fn check_against(&self, index_fields: &[String]) -> anyhow::Result<()> {
        let mut position = 0;
        let mut expressions = self.0.iter().peekable();
        while let Some(IndexRangeExpression::Eq { field_path, .. }) = expressions.peek() {
            anyhow::ensure!(
                index_fields.get(position) == Some(field_path),
                "Index range equality on `{field_path}` is out of order for index fields \
                 {index_fields:?}"
            );
            position += 1;
            expressions.next();
        }
        let (mut lower, mut upper) = (false, false);
        for expression in expressions {
            let field_path = expression.field_path();
            anyhow::ensure!(
                index_fields.get(position).map(String::as_str) == Some(field_path),
                "Index range bound on `{field_path}` must be on the field after the equalities"
            );
            let seen = match expression {
                IndexRangeExpression::Eq { .. } => {
                    anyhow::bail!("Index range equality on `{field_path}` follows a bound")
                },
                IndexRangeExpression::Gt { .. } | IndexRangeExpression::Gte { .. } => {
                    &mut lower
                },
                IndexRangeExpression::Lt { .. } | IndexRangeExpression::Lte { .. } => {
                    &mut upper
                },
            };
            anyhow::ensure!(!*seen, "Index range has two bounds in the same direction");
            *seen = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::IndexRange;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_check_against() {
        let index = fields(&["channel", "score", "_creationTime"]);
        assert!(IndexRange::all().check_against(&index).is_ok());
        assert!(IndexRange::all()
            .eq("channel", "a")
            .gt("score", 1.0)
            .lte("score", 2.0)
            .check_against(&index)
            .is_ok());
        assert!(IndexRange::all().eq("score", 1.0).check_against(&index).is_err());
        assert!(IndexRange::all()
            .eq("channel", "a")
            .gt("score", 1.0)
            .gte("score", 2.0)
            .check_against(&index)
            .is_err());
        assert!(IndexRange::all()
            .gt("channel", "a")
            .eq("score", 1.0)
            .check_against(&index)
            .is_err());
    }
}
