//! Schema definitions: the tables of an application, their document types
//! and their indexes, exported in the host's schema JSON format.

use std::collections::{
    BTreeMap,
    BTreeSet,
};

use itertools::Itertools;
use serde::{
    Serialize,
    de::DeserializeOwned,
};

use crate::{
    document::{
        CREATION_TIME_FIELD,
        ID_FIELD,
        is_system_field,
    },
    errors::SchemaError,
    model::Model,
    types::TableName,
    validator::{
        Validator,
        ValidatorJson,
    },
};

pub const MAX_INDEXES_PER_TABLE: usize = 64;
pub const MAX_INDEX_FIELDS_SIZE: usize = 16;
pub const MAX_FILTER_FIELDS_SIZE: usize = 16;
pub const MIN_VECTOR_DIMENSIONS: u32 = 2;
pub const MAX_VECTOR_DIMENSIONS: u32 = 4096;

pub const INDEX_BY_ID: &str = "by_id";
pub const INDEX_BY_CREATION_TIME: &str = "by_creation_time";

/// The fields of the indexes every table has, declared or not.
pub fn system_index_fields(name: &str) -> Option<Vec<String>> {
    match name {
        INDEX_BY_ID => Some(vec![ID_FIELD.to_string()]),
        INDEX_BY_CREATION_TIME => Some(vec![CREATION_TIME_FIELD.to_string()]),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    /// `_creationTime` is appended implicitly as a tiebreaker.
    pub fields: Vec<String>,
    /// Staged indexes are backfilled but can't be queried yet.
    pub staged: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchIndexDefinition {
    pub name: String,
    pub search_field: String,
    pub filter_fields: BTreeSet<String>,
    pub staged: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorIndexDefinition {
    pub name: String,
    pub vector_field: String,
    pub dimensions: u32,
    pub filter_fields: BTreeSet<String>,
    pub staged: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableDefinition {
    table: TableName,
    document_type: Validator,
    indexes: Vec<IndexDefinition>,
    search_indexes: Vec<SearchIndexDefinition>,
    vector_indexes: Vec<VectorIndexDefinition>,
}

fn fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Vec<String> {
    fields.into_iter().map(Into::into).collect()
}

impl TableDefinition {
    pub fn new(table: TableName, document_type: Validator) -> Self {
        Self {
            table,
            document_type,
            indexes: vec![],
            search_indexes: vec![],
            vector_indexes: vec![],
        }
    }

    /// A table holding `model`'s documents.
    pub fn from_model<T>(model: &Model<T>) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        Self::new(
            model.table().clone(),
            model.shapes().create().validator().clone(),
        )
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn document_type(&self) -> &Validator {
        &self.document_type
    }

    pub fn index<S: Into<String>>(
        self,
        name: impl Into<String>,
        index_fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.add_index(name.into(), fields(index_fields), false)
    }

    pub fn staged_index<S: Into<String>>(
        self,
        name: impl Into<String>,
        index_fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.add_index(name.into(), fields(index_fields), true)
    }

    fn add_index(mut self, name: String, fields: Vec<String>, staged: bool) -> Self {
        self.indexes.push(IndexDefinition {
            name,
            fields,
            staged,
        });
        self
    }

    pub fn search_index<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        search_field: impl Into<String>,
        filter_fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.search_indexes.push(SearchIndexDefinition {
            name: name.into(),
            search_field: search_field.into(),
            filter_fields: filter_fields.into_iter().map(Into::into).collect(),
            staged: false,
        });
        self
    }

    pub fn vector_index<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        vector_field: impl Into<String>,
        dimensions: u32,
        filter_fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.vector_indexes.push(VectorIndexDefinition {
            name: name.into(),
            vector_field: vector_field.into(),
            dimensions,
            filter_fields: filter_fields.into_iter().map(Into::into).collect(),
            staged: false,
        });
        self
    }

    /// The fields of a database index as the host orders documents in it,
    /// including the implicit system fields.
    pub fn index_fields(&self, name: &str) -> Option<Vec<String>> {
        if let Some(fields) = system_index_fields(name) {
            return Some(fields);
        }
        self.indexes
            .iter()
            .find(|index| index.name == name && !index.staged)
            .map(|index| {
                let mut fields = index.fields.clone();
                fields.push(CREATION_TIME_FIELD.to_string());
                fields
            })
    }

    pub fn search_index_definition(&self, name: &str) -> Option<&SearchIndexDefinition> {
        self.search_indexes
            .iter()
            .find(|index| index.name == name && !index.staged)
    }

    pub fn vector_index_definition(&self, name: &str) -> Option<&VectorIndexDefinition> {
        self.vector_indexes
            .iter()
            .find(|index| index.name == name && !index.staged)
    }

    fn invalid(&self, index: &str, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidIndex {
            table: self.table.clone(),
            index: index.to_string(),
            reason: reason.into(),
        }
    }

    fn check_field(&self, index: &str, field: &str) -> Result<(), SchemaError> {
        if is_system_field(field) {
            return Err(self.invalid(
                index,
                format!("`{field}` is a system field and can't be indexed"),
            ));
        }
        if !self.document_type.can_contain_field(field) {
            return Err(self.invalid(
                index,
                format!("`{field}` is not a field of the document type"),
            ));
        }
        Ok(())
    }

    fn check_filter_fields(&self, index: &str, fields: &BTreeSet<String>) -> Result<(), SchemaError> {
        if fields.len() > MAX_FILTER_FIELDS_SIZE {
            return Err(self.invalid(
                index,
                format!("at most {MAX_FILTER_FIELDS_SIZE} filter fields are allowed"),
            ));
        }
        fields
            .iter()
            .try_for_each(|field| self.check_field(index, field))
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let names = self
            .indexes
            .iter()
            .map(|i| &i.name)
            .chain(self.search_indexes.iter().map(|i| &i.name))
            .chain(self.vector_indexes.iter().map(|i| &i.name))
            .collect_vec();
        if names.len() > MAX_INDEXES_PER_TABLE {
            return Err(self.invalid(
                names[MAX_INDEXES_PER_TABLE],
                format!("tables can have at most {MAX_INDEXES_PER_TABLE} indexes"),
            ));
        }
        if let Some(duplicate) = names.iter().duplicates().next() {
            return Err(self.invalid(duplicate, "index names must be unique"));
        }
        for name in &names {
            if *name == INDEX_BY_ID || *name == INDEX_BY_CREATION_TIME {
                return Err(self.invalid(name, "this index name is reserved"));
            }
            let mut chars = name.chars();
            let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
            if !starts_with_letter || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(self.invalid(
                    name,
                    "index names must start with a letter and contain only letters, digits and \
                     underscores",
                ));
            }
        }

        for index in &self.indexes {
            if index.fields.is_empty() || index.fields.len() > MAX_INDEX_FIELDS_SIZE {
                return Err(self.invalid(
                    &index.name,
                    format!("indexes must have between 1 and {MAX_INDEX_FIELDS_SIZE} fields"),
                ));
            }
            if let Some(duplicate) = index.fields.iter().duplicates().next() {
                return Err(self.invalid(&index.name, format!("`{duplicate}` appears twice")));
            }
            for field in &index.fields {
                self.check_field(&index.name, field)?;
            }
        }
        for index in &self.search_indexes {
            self.check_field(&index.name, &index.search_field)?;
            self.check_filter_fields(&index.name, &index.filter_fields)?;
        }
        for index in &self.vector_indexes {
            if !(MIN_VECTOR_DIMENSIONS..=MAX_VECTOR_DIMENSIONS).contains(&index.dimensions) {
                return Err(self.invalid(
                    &index.name,
                    format!(
                        "dimensions must be between {MIN_VECTOR_DIMENSIONS} and \
                         {MAX_VECTOR_DIMENSIONS}, got {}",
                        index.dimensions
                    ),
                ));
            }
            self.check_field(&index.name, &index.vector_field)?;
            if !self
                .document_type
                .overlaps_with_array_float64(&index.vector_field)
            {
                return Err(self.invalid(
                    &index.name,
                    format!("`{}` can't hold an array of numbers", index.vector_field),
                ));
            }
            self.check_filter_fields(&index.name, &index.filter_fields)?;
        }
        Ok(())
    }
}

/// Every table of an application.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDefinition {
    tables: BTreeMap<TableName, TableDefinition>,
    schema_validation: bool,
}

impl Default for SchemaDefinition {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            schema_validation: true,
        }
    }
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, definition: TableDefinition) -> Result<Self, SchemaError> {
        definition.validate()?;
        if self.tables.contains_key(&definition.table) {
            return Err(SchemaError::DuplicateTable {
                table: definition.table,
            });
        }
        self.tables.insert(definition.table.clone(), definition);
        Ok(self)
    }

    /// Whether the host should check documents against their table's
    /// document type on every write.
    pub fn schema_validation(mut self, enabled: bool) -> Self {
        self.schema_validation = enabled;
        self
    }

    pub fn get(&self, table: &TableName) -> Option<&TableDefinition> {
        self.tables.get(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }

    pub fn to_json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(DatabaseSchemaJson::try_from(self)?)?)
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchemaJson {
    tables: Vec<TableDefinitionJson>,
    schema_validation: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinitionJson {
    table_name: String,
    indexes: Vec<IndexSchemaJson>,
    staged_db_indexes: Vec<IndexSchemaJson>,
    search_indexes: Vec<TextIndexSchemaJson>,
    staged_search_indexes: Vec<TextIndexSchemaJson>,
    vector_indexes: Vec<VectorIndexSchemaJson>,
    staged_vector_indexes: Vec<VectorIndexSchemaJson>,
    document_type: ValidatorJson,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchemaJson {
    index_descriptor: String,
    fields: Vec<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TextIndexSchemaJson {
    index_descriptor: String,
    search_field: String,
    filter_fields: BTreeSet<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexSchemaJson {
    index_descriptor: String,
    vector_field: String,
    dimensions: u32,
    filter_fields: Vec<String>,
}

impl TryFrom<&SchemaDefinition> for DatabaseSchemaJson {
    type Error = anyhow::Error;

    fn try_from(schema: &SchemaDefinition) -> anyhow::Result<Self> {
        Ok(DatabaseSchemaJson {
            tables: schema
                .tables
                .values()
                .map(TableDefinitionJson::try_from)
                .collect::<anyhow::Result<Vec<_>>>()?,
            schema_validation: schema.schema_validation,
        })
    }
}

impl TryFrom<&TableDefinition> for TableDefinitionJson {
    type Error = anyhow::Error;

    fn try_from(table: &TableDefinition) -> anyhow::Result<Self> {
        let (staged_db_indexes, indexes): (Vec<_>, Vec<_>) =
            table.indexes.iter().partition_map(|index| {
                let json = IndexSchemaJson {
                    index_descriptor: index.name.clone(),
                    fields: index.fields.clone(),
                };
                if index.staged {
                    itertools::Either::Left(json)
                } else {
                    itertools::Either::Right(json)
                }
            });
        let (staged_search_indexes, search_indexes): (Vec<_>, Vec<_>) =
            table.search_indexes.iter().partition_map(|index| {
                let json = TextIndexSchemaJson {
                    index_descriptor: index.name.clone(),
                    search_field: index.search_field.clone(),
                    filter_fields: index.filter_fields.clone(),
                };
                if index.staged {
                    itertools::Either::Left(json)
                } else {
                    itertools::Either::Right(json)
                }
            });
        let (staged_vector_indexes, vector_indexes): (Vec<_>, Vec<_>) =
            table.vector_indexes.iter().partition_map(|index| {
                let json = VectorIndexSchemaJson {
                    index_descriptor: index.name.clone(),
                    vector_field: index.vector_field.clone(),
                    dimensions: index.dimensions,
                    filter_fields: index.filter_fields.iter().cloned().collect(),
                };
                if index.staged {
                    itertools::Either::Left(json)
                } else {
                    itertools::Either::Right(json)
                }
            });
        Ok(TableDefinitionJson {
            table_name: table.table.to_string(),
            indexes,
            staged_db_indexes,
            search_indexes,
            staged_search_indexes,
            vector_indexes,
            staged_vector_indexes,
            document_type: ValidatorJson::try_from(table.document_type.clone())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreeset;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{
        SchemaDefinition,
        TableDefinition,
    };
    use crate::{
        errors::SchemaError,
        schema::s,
        struct_schema,
        validator::Validator,
    };

    fn messages() -> anyhow::Result<TableDefinition> {
        let users = "users".parse()?;
        let schema = struct_schema!(
            "author" => s.id(&users),
            "body" => s.string(),
            "channel" => s.string(),
            "embedding" => s.optional(s.array(s.number())),
        );
        Ok(TableDefinition::new(
            "messages".parse()?,
            crate::schema::bridge::compile(&schema)?,
        ))
    }

    #[test]
    fn test_valid_indexes() -> anyhow::Result<()> {
        let table = messages()?
            .index("by_channel", ["channel"])
            .search_index("search_body", "body", ["channel"])
            .vector_index("by_embedding", "embedding", 1536, ["author"]);
        table.validate()?;
        assert_eq!(
            table.index_fields("by_channel"),
            Some(vec!["channel".to_string(), "_creationTime".to_string()])
        );
        assert_eq!(table.index_fields("by_id"), Some(vec!["_id".to_string()]));
        assert_eq!(table.index_fields("missing"), None);
        assert_eq!(
            table
                .vector_index_definition("by_embedding")
                .map(|index| index.filter_fields.clone()),
            Some(btreeset! {"author".to_string()})
        );
        Ok(())
    }

    #[test]
    fn test_invalid_indexes() -> anyhow::Result<()> {
        let invalid = |table: TableDefinition| {
            matches!(table.validate(), Err(SchemaError::InvalidIndex { .. }))
        };
        assert!(invalid(messages()?.index("by_id", ["channel"])));
        assert!(invalid(messages()?.index("by_x", ["missing"])));
        assert!(invalid(messages()?.index("by_x", ["_creationTime"])));
        assert!(invalid(messages()?.index("by_x", Vec::<String>::new())));
        assert!(invalid(messages()?.index("by_x", ["body", "body"])));
        assert!(invalid(
            messages()?
                .index("dup", ["body"])
                .search_index("dup", "body", Vec::<String>::new())
        ));
        assert!(invalid(messages()?.index("1st", ["body"])));
        assert!(invalid(messages()?.vector_index(
            "v",
            "body",
            1536,
            Vec::<String>::new()
        )));
        assert!(invalid(messages()?.vector_index(
            "v",
            "embedding",
            1,
            Vec::<String>::new()
        )));
        Ok(())
    }

    #[test]
    fn test_duplicate_table() -> anyhow::Result<()> {
        let schema = SchemaDefinition::new().table(messages()?)?;
        assert!(matches!(
            schema.table(messages()?),
            Err(SchemaError::DuplicateTable { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_json_export() -> anyhow::Result<()> {
        let table = TableDefinition::new("tags".parse()?, Validator::Any)
            .index("by_name", ["name"])
            .staged_index("by_color", ["color"]);
        let schema = SchemaDefinition::new().table(table)?;
        assert_eq!(
            schema.to_json()?,
            json!({
                "tables": [{
                    "tableName": "tags",
                    "indexes": [{"indexDescriptor": "by_name", "fields": ["name"]}],
                    "stagedDbIndexes": [{"indexDescriptor": "by_color", "fields": ["color"]}],
                    "searchIndexes": [],
                    "stagedSearchIndexes": [],
                    "vectorIndexes": [],
                    "stagedVectorIndexes": [],
                    "documentType": {"type": "any"},
                }],
                "schemaValidation": true,
            })
        );
        Ok(())
    }
}
