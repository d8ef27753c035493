use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::{
    compile,
    compile_args,
};
use crate::{
    errors::SchemaError,
    knobs::env_config,
    schema::{
        s,
        Check,
        LiteralValue,
        PropertySignature,
        Schema,
        TupleElement,
    },
    struct_schema,
    validator::{
        FieldValidator,
        LiteralValidator,
        Validator,
    },
};

#[test]
fn test_struct_with_optional_field() -> anyhow::Result<()> {
    let schema = struct_schema!(
        "name" => s.string(),
        "age" => s.optional(s.number()),
    );
    assert_eq!(
        compile(&schema)?,
        Validator::Object(crate::object_validator!(
            "name" => FieldValidator::required_field_type(Validator::String),
            "age" => FieldValidator::optional_field_type(Validator::Float64),
        ))
    );
    Ok(())
}

#[test]
fn test_boolean_literal_union() -> anyhow::Result<()> {
    for members in [[true, false], [false, true]] {
        let schema = s.union(members.map(|b| s.literal(b)));
        assert_eq!(compile(&schema)?, Validator::Boolean);
    }
    assert_eq!(
        compile(&s.union([s.literal(true), s.literal(true)]))?,
        Validator::Union(vec![
            Validator::Literal(LiteralValidator::Boolean(true)),
            Validator::Literal(LiteralValidator::Boolean(true)),
        ])
    );
    Ok(())
}

#[test]
fn test_optional_boolean_field() -> anyhow::Result<()> {
    let schema = struct_schema!(
        "done" => s.optional(s.union([s.literal(true), s.literal(false)])),
    );
    assert_eq!(
        compile(&schema)?,
        Validator::Object(crate::object_validator!(
            "done" => FieldValidator::optional_field_type(Validator::Boolean),
        ))
    );
    Ok(())
}

#[test]
fn test_undefined_stripped_in_any_position() -> anyhow::Result<()> {
    let field = |members: Vec<Schema>| {
        Schema::Struct(vec![PropertySignature {
            name: "x".to_string(),
            schema: Schema::Union(members),
            optional: true,
        }])
    };
    let expected = Validator::Object(crate::object_validator!(
        "x" => FieldValidator::optional_field_type(Validator::String),
    ));
    assert_eq!(
        compile(&field(vec![Schema::Undefined, s.string()]))?,
        expected
    );
    assert_eq!(
        compile(&field(vec![s.string(), Schema::Undefined]))?,
        expected
    );

    let several = compile(&field(vec![s.string(), Schema::Undefined, s.null()]))?;
    assert_eq!(
        several,
        Validator::Object(crate::object_validator!(
            "x" => FieldValidator::optional_field_type(
                Validator::Union(vec![Validator::String, Validator::Null])
            ),
        ))
    );
    Ok(())
}

#[test]
fn test_tuples_become_arrays() -> anyhow::Result<()> {
    assert_eq!(
        compile(&s.tuple([s.string(), s.string()]))?,
        Validator::Array(Box::new(Validator::String))
    );
    assert_eq!(
        compile(&s.tuple([s.string(), s.number(), s.string()]))?,
        Validator::Array(Box::new(Validator::Union(vec![
            Validator::String,
            Validator::Float64,
        ])))
    );
    assert_eq!(
        compile(&s.array(s.big_int()))?,
        Validator::Array(Box::new(Validator::Int64))
    );

    let optional_element = Schema::Tuple {
        elements: vec![
            TupleElement {
                schema: s.string(),
                optional: false,
            },
            TupleElement {
                schema: s.number(),
                optional: true,
            },
        ],
        rest: None,
    };
    assert_eq!(
        compile(&optional_element),
        Err(SchemaError::OptionalTupleElement { index: 1 })
    );
    assert_eq!(compile(&s.tuple(Vec::<Schema>::new())), Err(SchemaError::EmptyTuple));
    Ok(())
}

#[test]
fn test_records() -> anyhow::Result<()> {
    assert_eq!(
        compile(&s.record(s.string(), s.number()))?,
        Validator::Record(Box::new(Validator::String), Box::new(Validator::Float64))
    );
    let users = "users".parse()?;
    assert!(matches!(
        compile(&s.record(s.id(&users), s.number())),
        Err(SchemaError::NonStringRecordKey { .. })
    ));
    assert!(matches!(
        compile(&s.record(s.literal("a"), s.number())),
        Err(SchemaError::NonStringRecordKey { .. })
    ));
    Ok(())
}

#[test]
fn test_ids_refinements_and_transforms() -> anyhow::Result<()> {
    let users = "users".parse()?;
    assert_eq!(compile(&s.id(&users))?, Validator::Id(users));
    assert_eq!(
        compile(&s.string().refine(Check::MinLength(3)))?,
        Validator::String
    );
    assert_eq!(compile(&s.number_from_string())?, Validator::String);
    assert_eq!(compile(&s.null())?, Validator::Null);
    assert_eq!(compile(&s.unknown())?, Validator::Any);
    assert_eq!(
        compile(&s.literal(2.5))?,
        Validator::Literal(LiteralValidator::Float64(2.5))
    );
    Ok(())
}

#[test]
fn test_unsupported_and_malformed() {
    assert_eq!(
        compile(&Schema::Never),
        Err(SchemaError::UnsupportedKind { kind: "never" })
    );
    assert_eq!(
        compile(&struct_schema!("x" => Schema::Undefined)),
        Err(SchemaError::UnsupportedKind { kind: "undefined" })
    );
    assert_eq!(compile(&s.union(Vec::<Schema>::new())), Err(SchemaError::EmptyUnion));
    assert_eq!(
        compile(&struct_schema!("a" => s.string(), "a" => s.number())),
        Err(SchemaError::DuplicateField {
            field: "a".to_string()
        })
    );
    assert!(matches!(
        compile_args(&s.string()),
        Err(SchemaError::NotAStruct { .. })
    ));
}

fn arbitrary_schema() -> impl Strategy<Value = Schema> {
    let leaf = prop_oneof![
        Just(Schema::Any),
        Just(Schema::Number),
        Just(Schema::BigInt),
        Just(Schema::Boolean),
        Just(s.string()),
        Just(s.null()),
        "[a-z]{0,4}".prop_map(|l| Schema::Literal(LiteralValue::String(l))),
        any::<bool>().prop_map(|b| Schema::Literal(LiteralValue::Boolean(b))),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Schema::Union),
            inner.clone().prop_map(|e| s.array(e)),
            prop::collection::vec(inner.clone(), 1..4).prop_map(|e| s.tuple(e)),
            inner.clone().prop_map(|v| s.record(s.string(), v)),
            prop::collection::btree_map("[a-z]{1,6}", (inner, any::<bool>()), 0..4).prop_map(
                |fields| {
                    Schema::Struct(
                        fields
                            .into_iter()
                            .map(|(name, (schema, optional))| PropertySignature {
                                name,
                                schema: if optional {
                                    s.optional(schema).schema
                                } else {
                                    schema
                                },
                                optional,
                            })
                            .collect(),
                    )
                }
            ),
        ]
    })
}

proptest! {
    #![proptest_config(
        ProptestConfig { cases: 256 * env_config("CONVEX_PROPTEST_MULTIPLIER", 1), failure_persistence: None, ..ProptestConfig::default() }
    )]

    #[test]
    fn test_compile_is_deterministic(schema in arbitrary_schema()) {
        let first = compile(&schema);
        prop_assert!(first.is_ok());
        prop_assert_eq!(first, compile(&schema.clone()));
    }
}
