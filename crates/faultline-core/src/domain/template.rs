//! Template lifecycle records.

use chrono::{DateTime, Utc};
use faultline_dsl::{TemplateDocument, TemplateType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    /// Accepted, compilation and installation in progress
    Loading,
    /// Installed on the workers
    Active,
    /// Removal in progress
    Deleting,
    /// Removed from every worker
    Deleted,
    /// Failed to compile or install
    Error,
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TemplateStatus::Loading => "LOADING",
            TemplateStatus::Active => "ACTIVE",
            TemplateStatus::Deleting => "DELETING",
            TemplateStatus::Deleted => "DELETED",
            TemplateStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A template as tracked by the template store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    /// Template name
    pub name: String,
    /// Template kind
    pub template_type: TemplateType,
    /// Current status
    pub status: TemplateStatus,
    /// Reason for the `Error` status
    pub status_details: Option<String>,
    /// The source document
    pub document: TemplateDocument,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl TemplateRecord {
    /// New record in `Loading` state
    pub fn loading(document: TemplateDocument) -> Self {
        Self {
            name: document.name().to_string(),
            template_type: document.template_type(),
            status: TemplateStatus::Loading,
            status_details: None,
            document,
            updated_at: Utc::now(),
        }
    }

    /// Move to another status
    pub fn transition(&mut self, status: TemplateStatus, details: Option<String>) {
        self.status = status;
        self.status_details = details;
        self.updated_at = Utc::now();
    }
}
