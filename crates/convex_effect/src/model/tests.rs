use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::json;

use super::{
    Model,
    Shape,
};
use crate::{
    context::MutationCtx,
    db::{
        DatabaseWriter,
        IndexRange,
        Order,
        PaginationOptions,
        PaginationResult,
        QuerySpec,
    },
    definition::{
        SchemaDefinition,
        TableDefinition,
    },
    document::Document,
    errors::{
        CodecDirection,
        ConsistencyFault,
        DocumentNotFound,
        EffectError,
        SchemaError,
    },
    schema::{
        Schema,
        s,
    },
    host::{
        DatabaseReaderHost,
        DatabaseWriterHost,
    },
    struct_schema,
    testing::MockHost,
    types::{
        DocumentId,
        TableName,
    },
    validator::Validator,
    value::{
        Object,
        Value,
    },
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Message {
    channel: String,
    body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pinned: Option<bool>,
}

fn message(channel: &str, body: &str) -> Message {
    Message {
        channel: channel.to_string(),
        body: body.to_string(),
        pinned: None,
    }
}

fn messages() -> anyhow::Result<Model<Message>> {
    Ok(Model::new(
        "messages",
        struct_schema!(
            "channel" => s.string(),
            "body" => s.string(),
            "pinned" => s.optional(s.boolean()),
        ),
    )?)
}

fn setup() -> anyhow::Result<(Model<Message>, Arc<MockHost>, MutationCtx)> {
    crate::testing::config_test();
    let messages = messages()?;
    let schema = SchemaDefinition::new()
        .table(TableDefinition::from_model(&messages).index("by_channel", ["channel"]))?;
    let host = MockHost::new(schema);
    let ctx = MutationCtx::new(host.mutation_ctx());
    Ok((messages, host, ctx))
}

fn struct_fields(schema: &Schema) -> Vec<(String, bool)> {
    match schema {
        Schema::Struct(fields) => fields
            .iter()
            .map(|field| (field.name.clone(), field.optional))
            .collect(),
        _ => vec![],
    }
}

#[test]
fn test_derived_shapes() -> anyhow::Result<()> {
    let messages = messages()?;
    let shapes = messages.shapes();
    let named = |names: &[(&str, bool)]| -> Vec<(String, bool)> {
        names.iter().map(|(n, o)| (n.to_string(), *o)).collect()
    };
    assert_eq!(
        struct_fields(shapes.create().schema()),
        named(&[("channel", false), ("body", false), ("pinned", true)])
    );
    assert_eq!(
        struct_fields(shapes.update().schema()),
        named(&[
            ("_id", true),
            ("_creationTime", true),
            ("channel", true),
            ("body", true),
            ("pinned", true),
        ])
    );
    assert_eq!(
        struct_fields(shapes.document().schema()),
        named(&[
            ("_id", false),
            ("_creationTime", false),
            ("channel", false),
            ("body", false),
            ("pinned", true),
        ])
    );
    assert_eq!(
        struct_fields(shapes.optional_identity().schema()),
        named(&[
            ("_id", true),
            ("_creationTime", true),
            ("channel", false),
            ("body", false),
            ("pinned", true),
        ])
    );
    Ok(())
}

#[test]
fn test_invalid_model_schemas() {
    assert!(matches!(
        Model::<Message>::new("messages", s.string()),
        Err(SchemaError::NotAStruct { .. })
    ));
    assert!(matches!(
        Model::<Message>::new("messages", struct_schema!("_owner" => s.string())),
        Err(SchemaError::ReservedField { .. })
    ));
}

#[tokio::test]
async fn test_insert_and_get() -> anyhow::Result<()> {
    let (messages, _host, ctx) = setup()?;
    let inserted = messages
        .insert_and_get(ctx.db(), &message("general", "hello"))
        .await??;
    assert_eq!(inserted.fields, message("general", "hello"));

    let read = messages.get_by_id(ctx.db(), &inserted.id).await??;
    assert_eq!(read, inserted);

    let nullable = messages.get_by_id_nullable(ctx.db(), &inserted.id).await??;
    assert_eq!(
        nullable.get_path("_id"),
        Some(&Value::from(inserted.id.as_str()))
    );
    assert_eq!(nullable.get_path("body"), Some(&Value::from("hello")));
    Ok(())
}

#[tokio::test]
async fn test_get_after_delete() -> anyhow::Result<()> {
    let (messages, _host, ctx) = setup()?;
    let id = messages
        .insert(ctx.db(), &message("general", "hello"))
        .await??;
    messages.delete_by_id(ctx.db(), &id).await?;
    // Deleting twice is fine.
    messages.delete_by_id(ctx.db(), &id).await?;

    let err = messages
        .get_by_id(ctx.db(), &id)
        .await?
        .expect_err("document was deleted");
    assert_eq!(
        err,
        EffectError::DocumentNotFound(DocumentNotFound {
            table: "messages".parse()?,
            id: Some(id.clone()),
        })
    );
    assert_eq!(messages.get_by_id_option(ctx.db(), &id).await??, None);
    assert_eq!(
        messages.get_by_id_nullable(ctx.db(), &id).await??,
        Value::Null
    );
    Ok(())
}

#[tokio::test]
async fn test_unique_lookahead() -> anyhow::Result<()> {
    let (messages, _host, ctx) = setup()?;
    let in_channel = || {
        messages
            .query(ctx.db())
            .with_index("by_channel", IndexRange::all().eq("channel", "general"))
    };

    assert_eq!(in_channel().unique().await??, None);
    assert!(matches!(
        in_channel().unique_or_fail().await?,
        Err(EffectError::DocumentNotFound(DocumentNotFound { id: None, .. }))
    ));

    messages
        .insert(ctx.db(), &message("general", "first"))
        .await??;
    messages
        .insert(ctx.db(), &message("random", "elsewhere"))
        .await??;
    let only = in_channel().unique_or_fail().await??;
    assert_eq!(only.fields.body, "first");

    messages
        .insert(ctx.db(), &message("general", "second"))
        .await??;
    assert!(matches!(
        in_channel().unique().await?,
        Err(EffectError::DocumentNotUnique(_))
    ));
    assert_eq!(in_channel().first_or_fail().await??.fields.body, "first");
    Ok(())
}

#[tokio::test]
async fn test_query_order_and_pagination() -> anyhow::Result<()> {
    let (messages, _host, ctx) = setup()?;
    for body in ["a", "b", "c"] {
        messages
            .insert(ctx.db(), &message("general", body))
            .await??;
    }
    let bodies = |documents: Vec<Document<Message>>| -> Vec<String> {
        documents.into_iter().map(|d| d.fields.body).collect()
    };

    let newest_first = messages
        .query(ctx.db())
        .order(Order::Desc)
        .collect()
        .await??;
    assert_eq!(bodies(newest_first), vec!["c", "b", "a"]);

    let query = messages.query(ctx.db()).full_table_scan();
    let first = query.paginate(&PaginationOptions::first(2)).await??;
    assert!(!first.is_done);
    assert_eq!(bodies(first.page), vec!["a", "b"]);
    let rest = query
        .paginate(&PaginationOptions::after(2, first.continue_cursor))
        .await??;
    assert!(rest.is_done);
    assert_eq!(bodies(rest.page), vec!["c"]);

    let everything = query
        .paginate(&PaginationOptions::first(usize::MAX))
        .await??;
    assert!(everything.is_done);
    assert_eq!(bodies(everything.page), vec!["a", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn test_patch() -> anyhow::Result<()> {
    let (messages, _host, ctx) = setup()?;
    let id = messages
        .insert(ctx.db(), &message("general", "hello"))
        .await??;

    let patched = messages
        .patch_by_id_and_get(ctx.db(), &id, &json!({"body": "edited", "pinned": true}))
        .await??;
    assert_eq!(patched.fields.channel, "general");
    assert_eq!(patched.fields.body, "edited");
    assert_eq!(patched.fields.pinned, Some(true));

    let wrong_type = messages
        .patch_by_id(ctx.db(), &id, &json!({"body": 3}))
        .await?;
    assert!(matches!(
        wrong_type,
        Err(e) if e.direction == CodecDirection::Encode
    ));

    // Patches may carry the document's own identity fields.
    let read = messages.get_by_id(ctx.db(), &id).await??;
    let repinned = messages
        .patch_by_id_and_get(
            ctx.db(),
            &id,
            &json!({"_id": id.as_str(), "_creationTime": read.creation_time, "pinned": false}),
        )
        .await??;
    assert_eq!(repinned.fields.pinned, Some(false));
    let err = messages
        .patch_by_id(ctx.db(), &id, &json!({"_creationTime": read.creation_time + 1.0}))
        .await?
        .expect_err("creation time differs");
    assert_eq!(issue_path(&err), "._creationTime");

    // Writing to a document that doesn't exist is fatal, not a typed failure.
    let missing = DocumentId::new("messages:999");
    assert!(
        messages
            .patch_by_id(ctx.db(), &missing, &json!({"body": "x"}))
            .await
            .is_err()
    );
    assert!(
        messages
            .patch_by_id_and_get(ctx.db(), &missing, &json!({"body": "x"}))
            .await
            .is_err()
    );
    Ok(())
}

fn issue_path(err: &crate::errors::DocumentCodecError) -> String {
    err.issue.path().to_string()
}

#[tokio::test]
async fn test_replace() -> anyhow::Result<()> {
    let (messages, _host, ctx) = setup()?;
    let mut original = messages
        .insert_and_get(ctx.db(), &message("general", "hello"))
        .await??;
    original.fields.pinned = Some(true);
    messages
        .patch_by_id(ctx.db(), &original.id, &json!({"pinned": true}))
        .await??;

    // A whole document read earlier can be written back.
    let mut edited = original.clone();
    edited.fields = message("general", "rewritten");
    let replaced = messages
        .replace_by_id_and_get(ctx.db(), &original.id, &edited)
        .await??;
    assert_eq!(replaced.fields, message("general", "rewritten"));
    assert_eq!(replaced.creation_time, original.creation_time);

    // So can the bare user fields.
    messages
        .replace_by_id(ctx.db(), &original.id, &message("random", "moved"))
        .await??;

    let mut stale = edited.clone();
    stale.creation_time += 1.0;
    let err = messages
        .replace_by_id(ctx.db(), &original.id, &stale)
        .await?
        .expect_err("creation time differs");
    assert_eq!(err.direction, CodecDirection::Encode);
    assert_eq!(issue_path(&err), "._creationTime");

    let missing = DocumentId::new("messages:999");
    assert!(messages.replace_by_id(ctx.db(), &missing, &edited).await.is_err());
    assert!(
        messages
            .replace_by_id_and_get(ctx.db(), &missing, &message("random", "x"))
            .await
            .is_err()
    );
    Ok(())
}

#[tokio::test]
async fn test_decode_failure_is_typed() -> anyhow::Result<()> {
    let messages = messages()?;
    // No declared schema, so the host accepts anything.
    let host = MockHost::new(SchemaDefinition::new());
    let ctx = MutationCtx::new(host.mutation_ctx());
    let mut raw = Object::new();
    raw.insert("channel".to_string(), Value::from(5i64));
    let id = ctx.db().insert(messages.table(), raw).await?;

    assert!(matches!(
        messages.get_by_id(ctx.db(), &id).await?,
        Err(EffectError::DocumentCodec(e)) if e.direction == CodecDirection::Decode
    ));
    assert!(messages.query(ctx.db()).collect().await?.is_err());
    Ok(())
}

/// Accepts every write and then never finds the document again.
struct LosesWrites;

#[async_trait]
impl DatabaseReaderHost for LosesWrites {
    async fn get(&self, _: &DocumentId) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    fn normalize_id(&self, _: &TableName, id: &str) -> Option<DocumentId> {
        Some(DocumentId::new(id))
    }

    async fn query(&self, _: &QuerySpec, _: Option<usize>) -> anyhow::Result<Vec<Value>> {
        Ok(vec![])
    }

    async fn paginate(
        &self,
        _: &QuerySpec,
        _: &PaginationOptions,
    ) -> anyhow::Result<PaginationResult<Value>> {
        anyhow::bail!("not supported")
    }
}

#[async_trait]
impl DatabaseWriterHost for LosesWrites {
    async fn insert(&self, _: &TableName, _: Object) -> anyhow::Result<DocumentId> {
        Ok(DocumentId::new("messages:1"))
    }

    async fn patch(&self, _: &DocumentId, _: Object) -> anyhow::Result<()> {
        Ok(())
    }

    async fn replace(&self, _: &DocumentId, _: Object) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete(&self, _: &DocumentId) -> anyhow::Result<()> {
        Ok(())
    }
}

fn is_consistency_fault<T: std::fmt::Debug, E: std::fmt::Debug>(
    result: anyhow::Result<Result<T, E>>,
) -> bool {
    match result {
        Err(e) => e.downcast_ref::<ConsistencyFault>().is_some(),
        Ok(inner) => panic!("expected a fatal error, got {inner:?}"),
    }
}

#[tokio::test]
async fn test_missing_after_write_is_fatal() -> anyhow::Result<()> {
    let messages = messages()?;
    let db = DatabaseWriter::new(Arc::new(LosesWrites));
    let id = DocumentId::new("messages:1");

    assert!(is_consistency_fault(
        messages
            .insert_and_get(&db, &message("general", "hello"))
            .await
    ));
    assert!(is_consistency_fault(
        messages
            .patch_by_id_and_get(&db, &id, &json!({"body": "edited"}))
            .await
    ));
    assert!(is_consistency_fault(
        messages
            .replace_by_id_and_get(&db, &id, &message("general", "rewritten"))
            .await
    ));
    // Plain writes don't read back, so they succeed.
    messages
        .patch_by_id(&db, &id, &json!({"body": "edited"}))
        .await??;
    Ok(())
}

#[test]
fn test_schema_validator_disagreement_is_fatal() -> anyhow::Result<()> {
    let shape = Shape {
        schema: s.string(),
        validator: Validator::Float64,
    };
    assert!(is_consistency_fault(shape.encode(&Value::from("hello"))));
    Ok(())
}
