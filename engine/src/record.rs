//! Record types: the payment request schema and its local-only metadata.

use crate::{schema::ProjectIndex, Money, ProjectId, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix carried by every client-generated placeholder id.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Whether an id is a client-generated placeholder.
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Anything the reconciliation core can track.
///
/// Implementors expose their identifier, the status used for fingerprinting,
/// and the local-only protection metadata.
pub trait Entity: Clone + PartialEq {
    fn id(&self) -> &str;

    /// Value folded into the collection fingerprint next to the id.
    fn status_key(&self) -> &str;

    fn local(&self) -> &LocalMeta;

    fn local_mut(&mut self) -> &mut LocalMeta;

    fn set_id(&mut self, id: RecordId);

    fn is_temporary(&self) -> bool {
        self.local().is_temporary
    }

    /// Equal in every field except the local metadata.
    fn same_visible(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        if self.local() == other.local() {
            return false;
        }
        let mut aligned = self.clone();
        *aligned.local_mut() = *other.local();
        aligned == *other
    }
}

/// Whether two lists look the same to a reader: same ids in the same order
/// with the same fields. Local metadata is ignored.
pub fn visibly_equal<T: Entity>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_visible(y))
}

/// Local-only metadata. Never part of what is sent to the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMeta {
    /// Record exists only locally, under a temporary id
    pub is_temporary: bool,
    /// When the record was last stamped by a local mutation (milliseconds)
    pub added_at: Option<Timestamp>,
}

impl LocalMeta {
    /// Metadata for a record just inserted optimistically.
    pub fn temporary(now: Timestamp) -> Self {
        Self {
            is_temporary: true,
            added_at: Some(now),
        }
    }

    /// Metadata for a record the server just acknowledged.
    pub fn acknowledged(now: Timestamp) -> Self {
        Self {
            is_temporary: false,
            added_at: Some(now),
        }
    }

    /// Whether `added_at` is still inside a window of `window_ms`.
    pub fn within_window(&self, now: Timestamp, window_ms: u64) -> bool {
        match self.added_at {
            Some(added_at) => now.saturating_sub(added_at) < window_ms,
            None => false,
        }
    }
}

/// Lifecycle status of a payment request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Reviewing,
    Approved,
    OnHold,
    Rejected,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Reviewing => "reviewing",
            PaymentStatus::Approved => "approved",
            PaymentStatus::OnHold => "on-hold",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the money is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Material,
    Labor,
    Equipment,
    Transport,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Normal,
    Urgent,
    Emergency,
}

/// Payee bank details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankInfo {
    pub account_holder: String,
    pub bank_name: String,
    pub account_number: String,
}

/// The fields a user fills in when requesting a payment.
///
/// This is exactly what the remote store receives on create; the server
/// assigns the id and the initial status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftPayment {
    pub project_id: ProjectId,
    pub requested_by: String,
    pub category: Category,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub description: String,
    pub amount: Money,
    #[serde(default)]
    pub material_amount: Money,
    #[serde(default)]
    pub labor_amount: Money,
    #[serde(default)]
    pub includes_vat: bool,
    #[serde(default)]
    pub apply_tax_deduction: bool,
    #[serde(default)]
    pub urgency: Urgency,
    #[serde(default)]
    pub requested_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_info: Option<BankInfo>,
    #[serde(default)]
    pub notes: String,
}

impl DraftPayment {
    /// Create a draft with the required fields; everything else defaults.
    pub fn new(
        project_id: impl Into<ProjectId>,
        requested_by: impl Into<String>,
        category: Category,
        amount: Money,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            requested_by: requested_by.into(),
            category,
            vendor: String::new(),
            item_name: String::new(),
            description: String::new(),
            amount,
            material_amount: 0,
            labor_amount: 0,
            includes_vat: false,
            apply_tax_deduction: false,
            urgency: Urgency::Normal,
            requested_at: 0,
            bank_info: None,
            notes: String::new(),
        }
    }

    pub fn with_item_name(mut self, item_name: impl Into<String>) -> Self {
        self.item_name = item_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_requested_at(mut self, requested_at: Timestamp) -> Self {
        self.requested_at = requested_at;
        self
    }
}

/// A payment request as shown in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: RecordId,
    pub project_id: ProjectId,
    /// Display name resolved through the project directory
    pub project_name: String,
    pub project_color: String,
    pub requested_by: String,
    pub category: Category,
    pub vendor: String,
    pub item_name: String,
    pub description: String,
    pub amount: Money,
    pub material_amount: Money,
    pub labor_amount: Money,
    pub includes_vat: bool,
    pub apply_tax_deduction: bool,
    pub status: PaymentStatus,
    pub urgency: Urgency,
    pub requested_at: Timestamp,
    pub approved_at: Option<Timestamp>,
    pub bank_info: Option<BankInfo>,
    pub notes: String,
    #[serde(default)]
    pub local: LocalMeta,
}

impl Payment {
    /// Build the list entry for a draft under the given id.
    ///
    /// Used both for the optimistic placeholder and, by test doubles, for
    /// the server-side record.
    pub fn from_draft(id: impl Into<RecordId>, draft: &DraftPayment, projects: &ProjectIndex) -> Self {
        let label = projects.resolve(&draft.project_id);
        Self {
            id: id.into(),
            project_id: draft.project_id.clone(),
            project_name: label.name,
            project_color: label.color,
            requested_by: draft.requested_by.clone(),
            category: draft.category,
            vendor: draft.vendor.clone(),
            item_name: draft.item_name.clone(),
            description: draft.description.clone(),
            amount: draft.amount,
            material_amount: draft.material_amount,
            labor_amount: draft.labor_amount,
            includes_vat: draft.includes_vat,
            apply_tax_deduction: draft.apply_tax_deduction,
            status: PaymentStatus::Pending,
            urgency: draft.urgency,
            requested_at: draft.requested_at,
            approved_at: None,
            bank_info: draft.bank_info.clone(),
            notes: draft.notes.clone(),
            local: LocalMeta::default(),
        }
    }
}

impl Entity for Payment {
    fn id(&self) -> &str {
        &self.id
    }

    fn status_key(&self) -> &str {
        self.status.as_str()
    }

    fn local(&self) -> &LocalMeta {
        &self.local
    }

    fn local_mut(&mut self) -> &mut LocalMeta {
        &mut self.local
    }

    fn set_id(&mut self, id: RecordId) {
        self.id = id;
    }
}

/// A partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_info: Option<BankInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PaymentPatch {
    /// Patch that only moves the status.
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_status_only(&self) -> bool {
        self.status.is_some() && self == &Self::status(self.status.unwrap_or_default())
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch in place. Project relabelling is left to the caller,
    /// which owns the project directory.
    pub fn apply_to(&self, payment: &mut Payment) {
        if let Some(project_id) = &self.project_id {
            payment.project_id = project_id.clone();
        }
        if let Some(category) = self.category {
            payment.category = category;
        }
        if let Some(vendor) = &self.vendor {
            payment.vendor = vendor.clone();
        }
        if let Some(item_name) = &self.item_name {
            payment.item_name = item_name.clone();
        }
        if let Some(description) = &self.description {
            payment.description = description.clone();
        }
        if let Some(amount) = self.amount {
            payment.amount = amount;
        }
        if let Some(status) = self.status {
            payment.status = status;
        }
        if let Some(urgency) = self.urgency {
            payment.urgency = urgency;
        }
        if let Some(bank_info) = &self.bank_info {
            payment.bank_info = Some(bank_info.clone());
        }
        if let Some(notes) = &self.notes {
            payment.notes = notes.clone();
        }
    }
}
