//! Typed tables.
//!
//! A [`Model`] pairs a table with the schema of its user fields and derives
//! the four shapes a document takes on its way in and out of the database:
//!
//! - *create*: the user fields, as passed to `insert`.
//! - *update*: the document shape with every field optional, as passed to
//!   `patch_by_id`.
//! - *document*: the user fields plus `_id` and `_creationTime`, as read.
//! - *optional identity*: the document shape with both system fields
//!   optional, as passed to `replace_by_id`.
//!
//! All four are built, and compiled to validators, when the model is
//! constructed. A model never changes afterwards.

use std::{
    collections::BTreeSet,
    fmt,
    marker::PhantomData,
    sync::Arc,
};

use anyhow::Context;
use serde::{
    Serialize,
    de::DeserializeOwned,
};

use crate::{
    db::{
        DatabaseReader,
        DatabaseWriter,
        DocumentDecoder,
        QueryInitializer,
    },
    document::{
        CREATION_TIME_FIELD,
        Document,
        ID_FIELD,
        is_system_field,
    },
    errors::{
        ConsistencyFault,
        DocumentCodecError,
        DocumentNotFound,
        EffectError,
        SchemaError,
    },
    schema::{
        IssueKind,
        LiteralValue,
        ParseIssue,
        ParsePath,
        PropertySignature,
        Schema,
        bridge,
        s,
    },
    types::{
        DocumentId,
        TableName,
    },
    validator::Validator,
    value::{
        Object,
        Value,
        from_value,
        to_value,
    },
};

/// A schema together with the validator compiled from it.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    schema: Schema,
    validator: Validator,
}

impl Shape {
    fn new(schema: Schema) -> Result<Self, SchemaError> {
        let validator = bridge::compile(&schema)?;
        Ok(Self { schema, validator })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Encode `value`, then check the result against the compiled
    /// validator. A value the schema accepts but the validator rejects means
    /// the two disagree, which is fatal.
    fn encode(&self, value: &Value) -> anyhow::Result<Result<Value, ParseIssue>> {
        let encoded = match self.schema.encode(value) {
            Ok(encoded) => encoded,
            Err(issue) => return Ok(Err(issue)),
        };
        if let Err(e) = self.validator.check_value(&encoded) {
            anyhow::bail!(ConsistencyFault(format!(
                "Encoded value rejected by its own validator: {e}"
            )));
        }
        Ok(Ok(encoded))
    }
}

#[derive(Debug, PartialEq)]
pub struct ModelShapes {
    table: TableName,
    create: Shape,
    update: Shape,
    document: Shape,
    optional_identity: Shape,
}

impl ModelShapes {
    fn derive(table: TableName, schema: Schema) -> Result<Self, SchemaError> {
        let Schema::Struct(fields) = schema else {
            return Err(SchemaError::NotAStruct {
                context: "A model's schema",
            });
        };
        let mut seen = BTreeSet::new();
        for field in &fields {
            if is_system_field(&field.name) {
                return Err(SchemaError::ReservedField {
                    field: field.name.clone(),
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    field: field.name.clone(),
                });
            }
        }

        let with_identity = |optional: bool| {
            let (id, creation_time) = if optional {
                (
                    s.optional(s.id(&table)).schema,
                    s.optional(s.number()).schema,
                )
            } else {
                (s.id(&table), s.number())
            };
            let mut all = vec![
                property(ID_FIELD, id, optional),
                property(CREATION_TIME_FIELD, creation_time, optional),
            ];
            all.extend(fields.iter().cloned());
            all
        };
        let update = with_identity(false)
            .into_iter()
            .map(|field| {
                if field.optional {
                    field
                } else {
                    property(&field.name, s.optional(field.schema).schema, true)
                }
            })
            .collect();

        Ok(Self {
            document: Shape::new(Schema::Struct(with_identity(false)))?,
            optional_identity: Shape::new(Schema::Struct(with_identity(true)))?,
            update: Shape::new(Schema::Struct(update))?,
            create: Shape::new(Schema::Struct(fields))?,
            table,
        })
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn create(&self) -> &Shape {
        &self.create
    }

    pub fn update(&self) -> &Shape {
        &self.update
    }

    pub fn document(&self) -> &Shape {
        &self.document
    }

    pub fn optional_identity(&self) -> &Shape {
        &self.optional_identity
    }

    fn decode_error(&self, issue: ParseIssue) -> DocumentCodecError {
        DocumentCodecError::decode(&self.table, issue)
    }

    fn encode_error(&self, issue: ParseIssue) -> DocumentCodecError {
        DocumentCodecError::encode(&self.table, issue)
    }

    fn not_found(&self, id: &DocumentId) -> DocumentNotFound {
        DocumentNotFound {
            table: self.table.clone(),
            id: Some(id.clone()),
        }
    }

    /// Check a document read from the host and produce its decoded form.
    fn decode_value(&self, raw: &Value) -> Result<Value, DocumentCodecError> {
        self.document
            .schema
            .decode(raw)
            .map_err(|issue| self.decode_error(issue))
    }

    /// Encode `value` with `shape` into the object handed to the host.
    fn encode_object<V: Serialize + ?Sized>(
        &self,
        shape: &Shape,
        value: &V,
    ) -> anyhow::Result<Result<Object, DocumentCodecError>> {
        let value = to_value(value)?;
        let encoded = match shape.encode(&value)? {
            Ok(encoded) => encoded,
            Err(issue) => return Ok(Err(self.encode_error(issue))),
        };
        let object = encoded
            .into_object()
            .context("Struct schemas always encode to objects")?;
        Ok(Ok(object))
    }
}

fn property(name: &str, schema: Schema, optional: bool) -> PropertySignature {
    PropertySignature {
        name: name.to_string(),
        schema,
        optional,
    }
}

/// A table whose documents are `Document<T>`.
///
/// `T` must serialize to the schema's decoded form. Fields with a
/// `s.number()` schema decode as floats, so they should be `f64`.
pub struct Model<T> {
    shapes: Arc<ModelShapes>,
    _document: PhantomData<fn() -> T>,
}

impl<T> Clone for Model<T> {
    fn clone(&self) -> Self {
        Self {
            shapes: self.shapes.clone(),
            _document: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Model<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("table", &self.shapes.table)
            .finish()
    }
}

impl<T> Model<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// `schema` must be a struct of the table's user fields. System fields
    /// (anything starting with `_`) are added by the model.
    pub fn new(table: &str, schema: Schema) -> Result<Self, SchemaError> {
        let table = table.parse()?;
        Ok(Self {
            shapes: Arc::new(ModelShapes::derive(table, schema)?),
            _document: PhantomData,
        })
    }

    /// A model for the same table with a different schema. Every shape is
    /// derived again from `schema`.
    pub fn with_schema<U>(&self, schema: Schema) -> Result<Model<U>, SchemaError>
    where
        U: Serialize + DeserializeOwned + Send + Sync,
    {
        Model::new(self.shapes.table.as_str(), schema)
    }

    pub fn table(&self) -> &TableName {
        &self.shapes.table
    }

    pub fn shapes(&self) -> &ModelShapes {
        &self.shapes
    }

    fn decoder(&self) -> ModelDecoder<T> {
        ModelDecoder {
            shapes: self.shapes.clone(),
            _document: PhantomData,
        }
    }

    fn decode(&self, raw: Value) -> anyhow::Result<Result<Document<T>, DocumentCodecError>> {
        self.decoder().decode(&self.shapes.table, raw)
    }

    async fn read(
        &self,
        db: &DatabaseReader,
        id: &DocumentId,
    ) -> anyhow::Result<Result<Option<Document<T>>, DocumentCodecError>> {
        let Some(raw) = db.get(id).await? else {
            return Ok(Ok(None));
        };
        Ok(self.decode(raw)?.map(Some))
    }

    /// Read back a document this invocation just wrote.
    async fn reread(
        &self,
        db: &DatabaseReader,
        id: &DocumentId,
    ) -> anyhow::Result<Result<Document<T>, DocumentCodecError>> {
        match self.read(db, id).await? {
            Ok(Some(document)) => Ok(Ok(document)),
            Ok(None) => Err(ConsistencyFault(format!(
                "Document {id} in `{}` is missing right after being written",
                self.shapes.table
            ))
            .into()),
            Err(e) => Ok(Err(e)),
        }
    }

    /// Fails with `DocumentNotFound` if the document doesn't exist.
    pub async fn get_by_id(
        &self,
        db: &impl AsRef<DatabaseReader>,
        id: &DocumentId,
    ) -> anyhow::Result<Result<Document<T>, EffectError>> {
        Ok(match self.read(db.as_ref(), id).await? {
            Ok(Some(document)) => Ok(document),
            Ok(None) => Err(self.shapes.not_found(id).into()),
            Err(e) => Err(e.into()),
        })
    }

    pub async fn get_by_id_option(
        &self,
        db: &impl AsRef<DatabaseReader>,
        id: &DocumentId,
    ) -> anyhow::Result<Result<Option<Document<T>>, DocumentCodecError>> {
        self.read(db.as_ref(), id).await
    }

    /// The document in its encoded form, or `Value::Null` if it doesn't
    /// exist. Unlike `get_by_id` and `get_by_id_option` this does not
    /// deserialize into `T`: the document is decoded to check it against
    /// the schema, then encoded again so it can be returned straight from a
    /// function declared to return a nullable document.
    pub async fn get_by_id_nullable(
        &self,
        db: &impl AsRef<DatabaseReader>,
        id: &DocumentId,
    ) -> anyhow::Result<Result<Value, DocumentCodecError>> {
        let Some(raw) = db.as_ref().get(id).await? else {
            return Ok(Ok(Value::Null));
        };
        let decoded = match self.shapes.decode_value(&raw) {
            Ok(decoded) => decoded,
            Err(e) => return Ok(Err(e)),
        };
        Ok(self
            .shapes
            .document
            .encode(&decoded)?
            .map_err(|issue| self.shapes.encode_error(issue)))
    }

    pub async fn insert(
        &self,
        db: &DatabaseWriter,
        value: &T,
    ) -> anyhow::Result<Result<DocumentId, DocumentCodecError>> {
        let object = match self.shapes.encode_object(&self.shapes.create, value)? {
            Ok(object) => object,
            Err(e) => return Ok(Err(e)),
        };
        Ok(Ok(db.insert(&self.shapes.table, object).await?))
    }

    pub async fn insert_and_get(
        &self,
        db: &DatabaseWriter,
        value: &T,
    ) -> anyhow::Result<Result<Document<T>, DocumentCodecError>> {
        let id = match self.insert(db, value).await? {
            Ok(id) => id,
            Err(e) => return Ok(Err(e)),
        };
        self.reread(db.reader(), &id).await
    }

    /// Shallow merge `patch` into the document. `patch` may hold any subset
    /// of the document's fields; fields it leaves out keep their current
    /// values. Patching a document that doesn't exist is fatal.
    pub async fn patch_by_id<P: Serialize + ?Sized>(
        &self,
        db: &DatabaseWriter,
        id: &DocumentId,
        patch: &P,
    ) -> anyhow::Result<Result<(), DocumentCodecError>> {
        let mut object = match self.shapes.encode_object(&self.shapes.update, patch)? {
            Ok(object) => object,
            Err(e) => return Ok(Err(e)),
        };
        if let Err(e) = self.strip_identity(db, id, &mut object).await? {
            return Ok(Err(e));
        }
        db.patch(id, object).await?;
        Ok(Ok(()))
    }

    pub async fn patch_by_id_and_get<P: Serialize + ?Sized>(
        &self,
        db: &DatabaseWriter,
        id: &DocumentId,
        patch: &P,
    ) -> anyhow::Result<Result<Document<T>, DocumentCodecError>> {
        if let Err(e) = self.patch_by_id(db, id, patch).await? {
            return Ok(Err(e));
        }
        self.reread(db.reader(), id).await
    }

    /// Replace every user field of the document. `value` may carry `_id`
    /// and `_creationTime` (eg a `Document<T>` read earlier), in which case
    /// they must match the stored document. Replacing a document that
    /// doesn't exist is fatal.
    pub async fn replace_by_id<R: Serialize + ?Sized>(
        &self,
        db: &DatabaseWriter,
        id: &DocumentId,
        value: &R,
    ) -> anyhow::Result<Result<(), DocumentCodecError>> {
        let mut object = match self
            .shapes
            .encode_object(&self.shapes.optional_identity, value)?
        {
            Ok(object) => object,
            Err(e) => return Ok(Err(e)),
        };
        if let Err(e) = self.strip_identity(db, id, &mut object).await? {
            return Ok(Err(e));
        }
        db.replace(id, object).await?;
        Ok(Ok(()))
    }

    /// Remove `_id` and `_creationTime` from an encoded write, checking that
    /// any supplied value matches the stored document.
    async fn strip_identity(
        &self,
        db: &DatabaseWriter,
        id: &DocumentId,
        object: &mut Object,
    ) -> anyhow::Result<Result<(), DocumentCodecError>> {
        let supplied: Vec<_> = [ID_FIELD, CREATION_TIME_FIELD]
            .into_iter()
            .filter_map(|field| object.remove(field).map(|value| (field, value)))
            .collect();
        if supplied.is_empty() {
            return Ok(Ok(()));
        }
        // A missing document fails the write that follows.
        let Some(existing) = db.get(id).await? else {
            return Ok(Ok(()));
        };
        for (field, supplied) in supplied {
            let stored = existing
                .get_path(field)
                .with_context(|| format!("Stored document {id} has no `{field}`"))?;
            if &supplied == stored {
                continue;
            }
            let expected = match stored {
                Value::String(stored_id) => LiteralValue::String(stored_id.clone()),
                Value::Float64(f) => LiteralValue::Float64(*f),
                other => anyhow::bail!("Unexpected `{field}` {other} on document {id}"),
            };
            let issue = ParseIssue::new(
                ParsePath::root().with(format!(".{field}")),
                IssueKind::LiteralMismatch {
                    expected,
                    actual: supplied,
                },
            );
            return Ok(Err(self.shapes.encode_error(issue)));
        }
        Ok(Ok(()))
    }

    pub async fn replace_by_id_and_get<R: Serialize + ?Sized>(
        &self,
        db: &DatabaseWriter,
        id: &DocumentId,
        value: &R,
    ) -> anyhow::Result<Result<Document<T>, DocumentCodecError>> {
        if let Err(e) = self.replace_by_id(db, id, value).await? {
            return Ok(Err(e));
        }
        self.reread(db.reader(), id).await
    }

    /// Deleting a document that doesn't exist succeeds.
    pub async fn delete_by_id(&self, db: &DatabaseWriter, id: &DocumentId) -> anyhow::Result<()> {
        db.delete(id).await
    }

    /// Query the table, decoding each result into a `Document<T>`.
    pub fn query(&self, db: &impl AsRef<DatabaseReader>) -> QueryInitializer<ModelDecoder<T>> {
        db.as_ref().query_with(&self.shapes.table, self.decoder())
    }
}

/// Decodes query results with a model's document shape.
pub struct ModelDecoder<T> {
    shapes: Arc<ModelShapes>,
    _document: PhantomData<fn() -> T>,
}

impl<T> Clone for ModelDecoder<T> {
    fn clone(&self) -> Self {
        Self {
            shapes: self.shapes.clone(),
            _document: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> DocumentDecoder for ModelDecoder<T> {
    type Output = Document<T>;

    fn decode(
        &self,
        _: &TableName,
        document: Value,
    ) -> anyhow::Result<Result<Document<T>, DocumentCodecError>> {
        let decoded = match self.shapes.decode_value(&document) {
            Ok(decoded) => decoded,
            Err(e) => return Ok(Err(e)),
        };
        let document = from_value(decoded).with_context(|| {
            format!(
                "Document in `{}` matches its schema but not its Rust type",
                self.shapes.table
            )
        })?;
        Ok(Ok(document))
    }
}

#[cfg(test)]
mod tests;
