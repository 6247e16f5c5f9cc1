//! Schema definition and boundary validation.
//!
//! Remote snapshots arrive as loosely shaped documents. Every document is
//! checked against the payment schema exactly once, at ingestion, and turned
//! into a typed [`Payment`]. Nothing downstream re-validates.

use crate::{
    error::Result,
    record::{BankInfo, Category, DraftPayment, LocalMeta, Payment, PaymentStatus, Urgency},
    Error, ProjectId, RecordId,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Color used when a project is unknown or has none.
pub const DEFAULT_PROJECT_COLOR: &str = "#4A90E2";

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Bool,
    /// Milliseconds since the Unix epoch, non-negative
    Timestamp,
    /// Identifier stored either as a string or as an integer
    Id,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Id => write!(f, "Id"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(Value::Null) if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64(),
            FieldType::Id => value.is_string() || value.is_i64() || value.is_u64(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// A document exactly as the remote store hands it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: RecordId,
    pub data: Value,
}

impl RawDocument {
    pub fn new(id: impl Into<RecordId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A project as listed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

impl ProjectRef {
    pub fn new(id: impl Into<ProjectId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
        }
    }
}

/// Display data resolved for a project id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLabel {
    pub name: String,
    pub color: String,
}

impl Default for ProjectLabel {
    fn default() -> Self {
        Self {
            name: String::new(),
            color: DEFAULT_PROJECT_COLOR.to_string(),
        }
    }
}

/// Project id → display label lookup used to enrich payments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectIndex {
    labels: HashMap<ProjectId, ProjectLabel>,
}

impl ProjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_refs(refs: impl IntoIterator<Item = ProjectRef>) -> Self {
        let labels = refs
            .into_iter()
            .map(|project| {
                let label = ProjectLabel {
                    name: project.name,
                    color: project
                        .color
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string()),
                };
                (project.id, label)
            })
            .collect();
        Self { labels }
    }

    /// Label for a project; unknown ids get an empty name and the default color.
    pub fn resolve(&self, id: &str) -> ProjectLabel {
        self.labels.get(id).cloned().unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.labels.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Schema for payment request documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSchema {
    fields: Vec<FieldDef>,
}

impl Default for PaymentSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentSchema {
    pub fn new() -> Self {
        Self {
            fields: vec![
                FieldDef::required("projectId", FieldType::Id),
                FieldDef::required("requestedBy", FieldType::String),
                FieldDef::required("category", FieldType::String),
                FieldDef::required("amount", FieldType::Int),
                FieldDef::required("status", FieldType::String),
                FieldDef::optional("vendor", FieldType::String),
                FieldDef::optional("itemName", FieldType::String),
                FieldDef::optional("description", FieldType::String),
                FieldDef::optional("materialAmount", FieldType::Int),
                FieldDef::optional("laborAmount", FieldType::Int),
                FieldDef::optional("includesVat", FieldType::Bool),
                FieldDef::optional("applyTaxDeduction", FieldType::Bool),
                FieldDef::optional("urgency", FieldType::String),
                FieldDef::optional("requestedAt", FieldType::Timestamp),
                FieldDef::optional("approvedAt", FieldType::Timestamp),
                FieldDef::optional("bankInfo", FieldType::Json),
                FieldDef::optional("notes", FieldType::String),
            ],
        }
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Validate a document body against this schema.
    pub fn validate(&self, data: &Value) -> Result<()> {
        let obj = data
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("document must be an object".into()))?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }

    /// Validate a document and turn it into a typed payment.
    pub fn ingest(&self, doc: &RawDocument, projects: &ProjectIndex) -> Result<Payment> {
        if doc.id.is_empty() {
            return Err(Error::InvalidDocument("document id is empty".into()));
        }
        self.validate(&doc.data)?;
        let obj = doc
            .data
            .as_object()
            .ok_or_else(|| Error::InvalidDocument("document must be an object".into()))?;

        let project_id = id_field(obj, "projectId");
        let label = projects.resolve(&project_id);
        let category: Category = enum_field(obj, "category")?
            .ok_or_else(|| Error::MissingRequiredField("category".into()))?;
        let status: PaymentStatus = enum_field(obj, "status")?
            .ok_or_else(|| Error::MissingRequiredField("status".into()))?;
        let bank_info: Option<BankInfo> = enum_field(obj, "bankInfo")?;

        Ok(Payment {
            id: doc.id.clone(),
            project_id,
            project_name: label.name,
            project_color: label.color,
            requested_by: text_field(obj, "requestedBy"),
            category,
            vendor: text_field(obj, "vendor"),
            item_name: text_field(obj, "itemName"),
            description: text_field(obj, "description"),
            amount: int_field(obj, "amount"),
            material_amount: int_field(obj, "materialAmount"),
            labor_amount: int_field(obj, "laborAmount"),
            includes_vat: flag_field(obj, "includesVat"),
            apply_tax_deduction: flag_field(obj, "applyTaxDeduction"),
            status,
            urgency: enum_field::<Urgency>(obj, "urgency")?.unwrap_or_default(),
            requested_at: obj.get("requestedAt").and_then(Value::as_u64).unwrap_or(0),
            approved_at: obj.get("approvedAt").and_then(Value::as_u64),
            bank_info,
            notes: text_field(obj, "notes"),
            local: LocalMeta::default(),
        })
    }

    /// Ingest a whole snapshot, keeping snapshot order.
    ///
    /// Documents that fail validation are returned separately so one bad row
    /// cannot withhold the rest of the list.
    pub fn ingest_all(
        &self,
        docs: &[RawDocument],
        projects: &ProjectIndex,
    ) -> (Vec<Payment>, Vec<(RecordId, Error)>) {
        let mut payments = Vec::with_capacity(docs.len());
        let mut rejected = Vec::new();
        for doc in docs {
            match self.ingest(doc, projects) {
                Ok(payment) => payments.push(payment),
                Err(e) => rejected.push((doc.id.clone(), e)),
            }
        }
        (payments, rejected)
    }

    /// Document body the remote store persists for a new draft.
    pub fn draft_document(draft: &DraftPayment) -> Result<Value> {
        let mut data =
            serde_json::to_value(draft).map_err(|e| Error::InvalidDocument(e.to_string()))?;
        if let Some(obj) = data.as_object_mut() {
            obj.insert(
                "status".into(),
                Value::String(PaymentStatus::Pending.as_str().into()),
            );
        }
        Ok(data)
    }
}

fn text_field(obj: &Map<String, Value>, name: &str) -> String {
    obj.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn int_field(obj: &Map<String, Value>, name: &str) -> i64 {
    obj.get(name).and_then(Value::as_i64).unwrap_or(0)
}

fn flag_field(obj: &Map<String, Value>, name: &str) -> bool {
    obj.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn id_field(obj: &Map<String, Value>, name: &str) -> ProjectId {
    match obj.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn enum_field<T: DeserializeOwned>(obj: &Map<String, Value>, name: &str) -> Result<Option<T>> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|_| Error::InvalidValue {
                field: name.to_string(),
                value: v.to_string(),
            }),
    }
}
