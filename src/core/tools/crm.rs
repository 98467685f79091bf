//! CRM contact tools.
//!
//! The contact store belongs to the platform; every query is scoped to the
//! session's tenant so one tenant's contacts never reach another's calls.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ToolBackend, ToolDefinition, ToolError, require_arg};
use crate::core::credentials::{StoreError, TenantId};

const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 25;

/// Pipeline stage of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    #[default]
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

/// A CRM contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub phone_number: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub status: ContactStatus,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref().filter(|l| !l.is_empty()) {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

/// Tenant-scoped contact storage.
#[async_trait]
pub trait ContactStore: Send + Sync {
    async fn find_by_phone(
        &self,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<Option<Contact>, StoreError>;

    async fn search(
        &self,
        tenant: &TenantId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Contact>, StoreError>;
}

/// Digits only, so "+1 (555) 010-2030" and "15550102030" compare equal.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

fn phones_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_phone(a), normalize_phone(b));
    if a.is_empty() || b.is_empty() {
        return false;
    }
    // Tolerate a missing country code on one side
    a == b || (a.len().min(b.len()) >= 10 && (a.ends_with(&b) || b.ends_with(&a)))
}

/// In-process contact store.
#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    contacts: DashMap<TenantId, Vec<Contact>>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: TenantId, contact: Contact) {
        self.contacts.entry(tenant).or_default().push(contact);
    }
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn find_by_phone(
        &self,
        tenant: &TenantId,
        phone_number: &str,
    ) -> Result<Option<Contact>, StoreError> {
        Ok(self.contacts.get(tenant).and_then(|contacts| {
            contacts
                .iter()
                .find(|c| phones_match(&c.phone_number, phone_number))
                .cloned()
        }))
    }

    async fn search(
        &self,
        tenant: &TenantId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Contact>, StoreError> {
        let needle = query.to_lowercase();
        Ok(self
            .contacts
            .get(tenant)
            .map(|contacts| {
                contacts
                    .iter()
                    .filter(|c| {
                        [
                            Some(c.full_name()),
                            c.email.clone(),
                            c.company_name.clone(),
                            Some(c.phone_number.clone()),
                        ]
                        .into_iter()
                        .flatten()
                        .any(|field| field.to_lowercase().contains(&needle))
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// `crm_lookup_contact` and `crm_search_contacts`, bound to one tenant.
pub struct CrmTools {
    tenant: TenantId,
    store: Arc<dyn ContactStore>,
}

impl CrmTools {
    pub fn new(tenant: TenantId, store: Arc<dyn ContactStore>) -> Self {
        Self { tenant, store }
    }

    async fn lookup(&self, arguments: &Value) -> Result<Value, ToolError> {
        let phone = require_arg(arguments, "phone_number")?;
        if normalize_phone(phone).is_empty() {
            return Err(ToolError::InvalidArgument(format!(
                "'{phone}' is not a phone number"
            )));
        }
        let contact = self
            .store
            .find_by_phone(&self.tenant, phone)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(match contact {
            Some(contact) => json!({"found": true, "contact": contact}),
            None => json!({
                "found": false,
                "message": format!("No contact found for {phone}"),
            }),
        })
    }

    async fn search(&self, arguments: &Value) -> Result<Value, ToolError> {
        let query = require_arg(arguments, "query")?;
        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| (l as usize).clamp(1, MAX_SEARCH_LIMIT))
            .unwrap_or(DEFAULT_SEARCH_LIMIT);
        let contacts = self
            .store
            .search(&self.tenant, query, limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!({
            "query": query,
            "contacts": contacts,
            "total_matches": contacts.len(),
        }))
    }
}

#[async_trait]
impl ToolBackend for CrmTools {
    fn name(&self) -> &'static str {
        "crm"
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "crm_lookup_contact",
                "Look up a CRM contact by phone number. Use this to identify the caller \
                 or check whether a number belongs to an existing customer.",
                json!({
                    "type": "object",
                    "properties": {
                        "phone_number": {
                            "type": "string",
                            "description": "Phone number in any format, e.g. '+1 555 010 2030'"
                        }
                    },
                    "required": ["phone_number"]
                }),
            ),
            ToolDefinition::new(
                "crm_search_contacts",
                "Search CRM contacts by name, email, company or phone.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Text to search for"},
                        "limit": {
                            "type": "integer",
                            "description": "Maximum contacts to return (default 5)"
                        }
                    },
                    "required": ["query"]
                }),
            ),
        ]
    }

    async fn execute(&self, tool: &str, arguments: &Value) -> Result<Value, ToolError> {
        match tool {
            "crm_lookup_contact" => self.lookup(arguments).await,
            "crm_search_contacts" => self.search(arguments).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
