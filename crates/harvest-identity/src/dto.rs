//! Ingress normalization of raw supplier records

use harvest_core::HarvestError;
use serde_json::Value;

use crate::resolver::AuxFields;

const ID_FIELDS: &[&str] = &["id", "cnpj", "document", "tax_id"];
const NAME_FIELDS: &[&str] = &["name", "razao_social", "supplier_name"];
const CATEGORY_FIELDS: &[&str] = &["category"];
const REGION_FIELDS: &[&str] = &["region", "uf", "state"];

/// Upstream entity record with field aliases resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntity {
    pub id: Option<String>,
    pub name: String,
    pub category: Option<String>,
    pub region: Option<String>,
}

/// First alias holding a non-empty string or a number.
fn pick(obj: &serde_json::Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| match obj.get(*f)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(
            n.as_u64()
                .map(|v| v.to_string())
                .or_else(|| n.as_i64().map(|v| v.to_string()))
                .unwrap_or_else(|| n.to_string()),
        ),
        _ => None,
    })
}

impl RawEntity {
    /// Normalize one JSON record. A record without any name field is rejected.
    pub fn from_json(value: &Value) -> Result<Self, HarvestError> {
        let obj = value
            .as_object()
            .ok_or_else(|| HarvestError::validation("entity record must be a JSON object"))?;
        let name = pick(obj, NAME_FIELDS).ok_or_else(|| {
            HarvestError::validation(format!(
                "entity record has none of the name fields {NAME_FIELDS:?}"
            ))
        })?;
        Ok(Self {
            id: pick(obj, ID_FIELDS),
            name,
            category: pick(obj, CATEGORY_FIELDS),
            region: pick(obj, REGION_FIELDS),
        })
    }

    pub fn aux(&self) -> AuxFields {
        AuxFields {
            category: self.category.clone(),
            region: self.region.clone(),
        }
    }
}
