//! Compiling schemas into host validators.
//!
//! The mapping is a recursive descent over the closed set of schema kinds.
//! Refinements and transformations are invisible to the host: a refinement
//! compiles to the validator of what it refines, a transformation to the
//! validator of its encoded side.

use std::collections::BTreeSet;

use super::{
    LiteralValue,
    PropertySignature,
    Schema,
};
use crate::{
    errors::SchemaError,
    validator::{
        FieldValidator,
        LiteralValidator,
        ObjectValidator,
        Validator,
    },
};

/// Compile a schema into the equivalent validator. Fails on schema kinds
/// that have no validator equivalent.
pub fn compile(schema: &Schema) -> Result<Validator, SchemaError> {
    let validator = match schema {
        Schema::Any | Schema::Unknown => Validator::Any,
        Schema::Literal(LiteralValue::Null) => Validator::Null,
        Schema::Literal(LiteralValue::Boolean(b)) => {
            Validator::Literal(LiteralValidator::Boolean(*b))
        },
        Schema::Literal(LiteralValue::Float64(f)) => {
            Validator::Literal(LiteralValidator::Float64(*f))
        },
        Schema::Literal(LiteralValue::Int64(i)) => Validator::Literal(LiteralValidator::Int64(*i)),
        Schema::Literal(LiteralValue::String(s)) => {
            Validator::Literal(LiteralValidator::String(s.clone()))
        },
        Schema::Union(members) => compile_union(members)?,
        Schema::Tuple { elements, rest } => {
            if let Some(index) = elements.iter().position(|e| e.optional) {
                return Err(SchemaError::OptionalTupleElement { index });
            }
            if elements.is_empty() && rest.is_none() {
                return Err(SchemaError::EmptyTuple);
            }
            let mut distinct: Vec<Validator> = vec![];
            for schema in elements
                .iter()
                .map(|e| &e.schema)
                .chain(rest.as_deref())
            {
                let validator = compile(schema)?;
                if !distinct.contains(&validator) {
                    distinct.push(validator);
                }
            }
            let element = if distinct.len() == 1 {
                distinct.remove(0)
            } else {
                Validator::Union(distinct)
            };
            Validator::Array(Box::new(element))
        },
        Schema::Struct(fields) => Validator::Object(compile_struct(fields)?),
        Schema::Record { key, value } => {
            let Schema::String { table: None } = **key else {
                return Err(SchemaError::NonStringRecordKey {
                    key: key.to_string(),
                });
            };
            Validator::Record(Box::new(Validator::String), Box::new(compile(value)?))
        },
        Schema::Number => Validator::Float64,
        Schema::BigInt => Validator::Int64,
        Schema::Boolean => Validator::Boolean,
        Schema::String { table: None } => Validator::String,
        Schema::String { table: Some(table) } => Validator::Id(table.clone()),
        Schema::Refinement { from, .. } => compile(from)?,
        Schema::Transform { from, .. } => compile(from)?,
        Schema::Undefined | Schema::Never => {
            return Err(SchemaError::UnsupportedKind {
                kind: schema.kind_name(),
            });
        },
    };
    Ok(validator)
}

/// Function arguments are always an object.
pub fn compile_args(schema: &Schema) -> Result<Validator, SchemaError> {
    let Schema::Struct(fields) = schema else {
        return Err(SchemaError::NotAStruct {
            context: "Function arguments",
        });
    };
    Ok(Validator::Object(compile_struct(fields)?))
}

fn compile_union(members: &[Schema]) -> Result<Validator, SchemaError> {
    if members.is_empty() {
        return Err(SchemaError::EmptyUnion);
    }
    // `s.union(s.literal(true), s.literal(false))` in either order.
    if let [Schema::Literal(LiteralValue::Boolean(a)), Schema::Literal(LiteralValue::Boolean(b))] =
        members
        && a != b
    {
        return Ok(Validator::Boolean);
    }
    let validators = members
        .iter()
        .map(compile)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Validator::Union(validators))
}

fn compile_struct(fields: &[PropertySignature]) -> Result<ObjectValidator, SchemaError> {
    let mut seen = BTreeSet::new();
    let mut object = ObjectValidator::default();
    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                field: field.name.clone(),
            });
        }
        let field_validator = if field.optional {
            FieldValidator::optional_field_type(compile_optional(&field.schema)?)
        } else {
            FieldValidator::required_field_type(compile(&field.schema)?)
        };
        object.0.insert(field.name.clone(), field_validator);
    }
    Ok(object)
}

/// Optional fields are unions with `undefined`. Every `undefined` member is
/// dropped wherever it appears, then what remains is compiled.
fn compile_optional(schema: &Schema) -> Result<Validator, SchemaError> {
    let Schema::Union(members) = schema else {
        return compile(schema);
    };
    if !members.iter().any(|m| matches!(m, Schema::Undefined)) {
        return compile(schema);
    }
    let mut remaining: Vec<Schema> = members
        .iter()
        .filter(|m| !matches!(m, Schema::Undefined))
        .cloned()
        .collect();
    match remaining.len() {
        0 => Err(SchemaError::UnsupportedKind {
            kind: Schema::Undefined.kind_name(),
        }),
        1 => compile(&remaining.remove(0)),
        _ => compile_union(&remaining),
    }
}

#[cfg(test)]
mod tests;
