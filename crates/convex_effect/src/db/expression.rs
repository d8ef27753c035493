//! Filter expressions, evaluated against each document a query reads.

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// `l == r`
    Eq(Box<Expression>, Box<Expression>),
    /// `l != r`
    Neq(Box<Expression>, Box<Expression>),
    /// `l < r`
    Lt(Box<Expression>, Box<Expression>),
    /// `l <= r`
    Lte(Box<Expression>, Box<Expression>),
    /// `l > r`
    Gt(Box<Expression>, Box<Expression>),
    /// `l >= r`
    Gte(Box<Expression>, Box<Expression>),
    /// `l + r`
    Add(Box<Expression>, Box<Expression>),
    /// `l - r`
    Sub(Box<Expression>, Box<Expression>),
    /// `l * r`
    Mul(Box<Expression>, Box<Expression>),
    /// `l / r`
    Div(Box<Expression>, Box<Expression>),
    /// `l % r`
    Mod(Box<Expression>, Box<Expression>),
    /// `-x`
    Neg(Box<Expression>),
    /// `a && b && ...`
    And(Vec<Expression>),
    /// `a || b || ...`
    Or(Vec<Expression>),
    /// `!x`
    Not(Box<Expression>),
    /// A dotted field path into the document.
    Field(String),
    Literal(Value),
}

impl Expression {
    /// Evaluate against a document. Missing fields evaluate to `None`, which
    /// sorts before every value.
    pub fn eval(&self, document: &Value) -> anyhow::Result<Option<Value>> {
        let result = match self {
            Expression::Field(path) => return Ok(document.get_path(path).cloned()),
            Expression::Literal(v) => v.clone(),
            Expression::Eq(l, r) => Value::from(l.eval(document)? == r.eval(document)?),
            Expression::Neq(l, r) => Value::from(l.eval(document)? != r.eval(document)?),
            Expression::Lt(l, r) => Value::from(l.eval(document)? < r.eval(document)?),
            Expression::Lte(l, r) => Value::from(l.eval(document)? <= r.eval(document)?),
            Expression::Gt(l, r) => Value::from(l.eval(document)? > r.eval(document)?),
            Expression::Gte(l, r) => Value::from(l.eval(document)? >= r.eval(document)?),
            Expression::Add(l, r) => {
                binary_arithmetic("add", document, l, r, i64::checked_add, |l, r| l + r)?
            },
            Expression::Sub(l, r) => {
                binary_arithmetic("subtract", document, l, r, i64::checked_sub, |l, r| l - r)?
            },
            Expression::Mul(l, r) => {
                binary_arithmetic("multiply", document, l, r, i64::checked_mul, |l, r| l * r)?
            },
            Expression::Div(l, r) => {
                binary_arithmetic("divide", document, l, r, i64::checked_div, |l, r| l / r)?
            },
            Expression::Mod(l, r) => {
                binary_arithmetic("mod", document, l, r, i64::checked_rem, |l, r| l % r)?
            },
            Expression::Neg(x) => match x.eval(document)? {
                Some(Value::Int64(x)) => Value::from(-x),
                Some(Value::Float64(x)) => Value::from(-x),
                x => anyhow::bail!("Cannot negate {}", display_maybe(&x)),
            },
            Expression::And(vs) => {
                for v in vs {
                    if !into_boolean(v.eval(document)?)? {
                        return Ok(Some(Value::from(false)));
                    }
                }
                Value::from(true)
            },
            Expression::Or(vs) => {
                for v in vs {
                    if into_boolean(v.eval(document)?)? {
                        return Ok(Some(Value::from(true)));
                    }
                }
                Value::from(false)
            },
            Expression::Not(x) => Value::from(!into_boolean(x.eval(document)?)?),
        };
        Ok(Some(result))
    }

    /// Whether a document passes this expression used as a filter.
    pub fn matches(&self, document: &Value) -> anyhow::Result<bool> {
        into_boolean(self.eval(document)?)
    }
}

fn display_maybe(v: &Option<Value>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "undefined".to_string(),
    }
}

fn into_boolean(v: Option<Value>) -> anyhow::Result<bool> {
    match v {
        Some(Value::Boolean(b)) => Ok(b),
        v => anyhow::bail!("Expected a boolean, found {}", display_maybe(&v)),
    }
}

fn binary_arithmetic(
    name: &str,
    document: &Value,
    l: &Expression,
    r: &Expression,
    int: impl Fn(i64, i64) -> Option<i64>,
    float: impl Fn(f64, f64) -> f64,
) -> anyhow::Result<Value> {
    let result = match (l.eval(document)?, r.eval(document)?) {
        (Some(Value::Int64(l)), Some(Value::Int64(r))) => match int(l, r) {
            Some(v) => Value::Int64(v),
            None => anyhow::bail!("Cannot {name} {l} and {r}: overflow or division by zero"),
        },
        (Some(Value::Float64(l)), Some(Value::Float64(r))) => Value::Float64(float(l, r)),
        (l, r) => anyhow::bail!(
            "Cannot {name} {} and {}",
            display_maybe(&l),
            display_maybe(&r)
        ),
    };
    Ok(result)
}

/// Builds filter expressions, as in
/// `q.eq(q.field("status"), q.literal("open"))`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterBuilder;

impl FilterBuilder {
    pub fn field(&self, path: impl Into<String>) -> Expression {
        Expression::Field(path.into())
    }

    pub fn literal(&self, value: impl Into<Value>) -> Expression {
        Expression::Literal(value.into())
    }

    pub fn eq(&self, l: Expression, r: Expression) -> Expression {
        Expression::Eq(Box::new(l), Box::new(r))
    }

    pub fn neq(&self, l: Expression, r: Expression) -> Expression {
        Expression::Neq(Box::new(l), Box::new(r))
    }

    pub fn lt(&self, l: Expression, r: Expression) -> Expression {
        Expression::Lt(Box::new(l), Box::new(r))
    }

    pub fn lte(&self, l: Expression, r: Expression) -> Expression {
        Expression::Lte(Box::new(l), Box::new(r))
    }

    pub fn gt(&self, l: Expression, r: Expression) -> Expression {
        Expression::Gt(Box::new(l), Box::new(r))
    }

    pub fn gte(&self, l: Expression, r: Expression) -> Expression {
        Expression::Gte(Box::new(l), Box::new(r))
    }

    pub fn add(&self, l: Expression, r: Expression) -> Expression {
        Expression::Add(Box::new(l), Box::new(r))
    }

    pub fn sub(&self, l: Expression, r: Expression) -> Expression {
        Expression::Sub(Box::new(l), Box::new(r))
    }

    pub fn mul(&self, l: Expression, r: Expression) -> Expression {
        Expression::Mul(Box::new(l), Box::new(r))
    }

    pub fn div(&self, l: Expression, r: Expression) -> Expression {
        Expression::Div(Box::new(l), Box::new(r))
    }

    pub fn modulo(&self, l: Expression, r: Expression) -> Expression {
        Expression::Mod(Box::new(l), Box::new(r))
    }

    pub fn neg(&self, x: Expression) -> Expression {
        Expression::Neg(Box::new(x))
    }

    pub fn and(&self, expressions: impl IntoIterator<Item = Expression>) -> Expression {
        Expression::And(expressions.into_iter().collect())
    }

    pub fn or(&self, expressions: impl IntoIterator<Item = Expression>) -> Expression {
        Expression::Or(expressions.into_iter().collect())
    }

    pub fn not(&self, x: Expression) -> Expression {
        Expression::Not(Box::new(x))
    }
}

/// The wire form of a filter expression.
#[derive(Deserialize, Serialize, Debug, PartialEq)]
pub enum JsonExpression {
    #[serde(rename = "$eq")]
    Eq(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$neq")]
    Neq(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$lt")]
    Lt(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$lte")]
    Lte(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$gt")]
    Gt(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$gte")]
    Gte(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$add")]
    Add(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$sub")]
    Sub(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$mul")]
    Mul(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$div")]
    Div(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$mod")]
    Mod(Box<JsonExpression>, Box<JsonExpression>),
    #[serde(rename = "$neg")]
    Neg(Box<JsonExpression>),
    #[serde(rename = "$and")]
    And(Vec<JsonExpression>),
    #[serde(rename = "$or")]
    Or(Vec<JsonExpression>),
    #[serde(rename = "$not")]
    Not(Box<JsonExpression>),
    #[serde(rename = "$field")]
    Field(String),
    #[serde(rename = "$literal")]
    Literal(JsonValue),
}

fn boxed(e: Box<Expression>) -> anyhow::Result<Box<JsonExpression>> {
    Ok(Box::new(JsonExpression::try_from(*e)?))
}

impl TryFrom<Expression> for JsonExpression {
    type Error = anyhow::Error;

    fn try_from(expr: Expression) -> anyhow::Result<Self> {
        let json = match expr {
            Expression::Eq(l, r) => JsonExpression::Eq(boxed(l)?, boxed(r)?),
            Expression::Neq(l, r) => JsonExpression::Neq(boxed(l)?, boxed(r)?),
            Expression::Lt(l, r) => JsonExpression::Lt(boxed(l)?, boxed(r)?),
            Expression::Lte(l, r) => JsonExpression::Lte(boxed(l)?, boxed(r)?),
            Expression::Gt(l, r) => JsonExpression::Gt(boxed(l)?, boxed(r)?),
            Expression::Gte(l, r) => JsonExpression::Gte(boxed(l)?, boxed(r)?),
            Expression::Add(l, r) => JsonExpression::Add(boxed(l)?, boxed(r)?),
            Expression::Sub(l, r) => JsonExpression::Sub(boxed(l)?, boxed(r)?),
            Expression::Mul(l, r) => JsonExpression::Mul(boxed(l)?, boxed(r)?),
            Expression::Div(l, r) => JsonExpression::Div(boxed(l)?, boxed(r)?),
            Expression::Mod(l, r) => JsonExpression::Mod(boxed(l)?, boxed(r)?),
            Expression::Neg(x) => JsonExpression::Neg(boxed(x)?),
            Expression::And(vs) => JsonExpression::And(
                vs.into_iter()
                    .map(JsonExpression::try_from)
                    .collect::<anyhow::Result<_>>()?,
            ),
            Expression::Or(vs) => JsonExpression::Or(
                vs.into_iter()
                    .map(JsonExpression::try_from)
                    .collect::<anyhow::Result<_>>()?,
            ),
            Expression::Not(x) => JsonExpression::Not(boxed(x)?),
            Expression::Field(path) => JsonExpression::Field(path),
            Expression::Literal(v) => JsonExpression::Literal(JsonValue::try_from(v)?),
        };
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        FilterBuilder,
        JsonExpression,
    };
    use crate::value::Value;

    #[test]
    fn test_eval() -> anyhow::Result<()> {
        let q = FilterBuilder;
        let doc = Value::try_from(json!({"status": "open", "votes": 3, "author": {"karma": 2.5}}))?;

        let open = q.eq(q.field("status"), q.literal("open"));
        assert!(open.matches(&doc)?);

        let popular = q.and([
            open.clone(),
            q.gt(q.add(q.field("votes"), q.literal(1i64)), q.literal(3i64)),
        ]);
        assert!(popular.matches(&doc)?);

        let missing = q.eq(q.field("archived"), q.literal(true));
        assert!(!missing.matches(&doc)?);
        assert!(q.not(missing).matches(&doc)?);

        assert!(q.lt(q.field("author.karma"), q.literal(3.0)).matches(&doc)?);
        assert!(q.neg(q.field("status")).eval(&doc).is_err());
        assert!(q.field("votes").matches(&doc).is_err());
        Ok(())
    }

    #[test]
    fn test_json_form() -> anyhow::Result<()> {
        let q = FilterBuilder;
        let expr = q.eq(q.field("status"), q.literal("open"));
        let json = serde_json::to_value(JsonExpression::try_from(expr)?)?;
        assert_eq!(json, json!({"$eq": [{"$field": "status"}, {"$literal": "open"}]}));
        Ok(())
    }
}
