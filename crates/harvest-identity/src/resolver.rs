//! Entity resolution through a prioritized strategy chain
//!
//! First match wins:
//!
//! | Strategy            | Identity                       | Confidence |
//! |---------------------|--------------------------------|-----------:|
//! | exact id            | normalized id digits           | 100        |
//! | linked by name      | id of a known, similar name    | 85         |
//! | new by name         | `NAME_<hash of normalized>`    | 70         |
//! | category fallback   | `CAT_<CATEGORY>_<REGION>`      | 50         |

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, Table};
use harvest_core::HarvestError;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::dto::RawEntity;
use crate::normalize::{is_valid_id, jaccard, normalize_id, normalize_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ExactId,
    LinkedByName,
    NewByName,
    CategoryFallback,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Self::ExactId,
        Self::LinkedByName,
        Self::NewByName,
        Self::CategoryFallback,
    ];

    pub fn confidence(self) -> u8 {
        match self {
            Self::ExactId => 100,
            Self::LinkedByName => 85,
            Self::NewByName => 70,
            Self::CategoryFallback => 50,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExactId => "exact_id",
            Self::LinkedByName => "linked_by_name",
            Self::NewByName => "new_by_name",
            Self::CategoryFallback => "category_fallback",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse fields used when the name is unusable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxFields {
    pub category: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityIdentity {
    pub id: String,
    pub strategy: Strategy,
    pub confidence: u8,
    pub raw_id: Option<String>,
    pub raw_name: String,
    pub normalized_name: String,
    pub aux: AuxFields,
}

impl EntityIdentity {
    /// Identity not backed by a valid id or an already known name
    pub fn is_low_confidence(&self) -> bool {
        self.confidence < Strategy::LinkedByName.confidence()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Digits required for an id to be trusted
    pub min_id_digits: usize,
    /// Jaccard similarity at which two names are the same entity
    pub similarity_threshold: f64,
    /// Shorter normalized names are unusable
    pub min_name_len: usize,
    pub default_category: String,
    pub default_region: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_id_digits: 11,
            similarity_threshold: 0.85,
            min_name_len: 3,
            default_category: "UNKNOWN".to_string(),
            default_region: "XX".to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(HarvestError::config(format!(
                "similarity_threshold {} must be within (0, 1]",
                self.similarity_threshold
            )));
        }
        if self.min_id_digits == 0 {
            return Err(HarvestError::config("min_id_digits must be >= 1"));
        }
        Ok(())
    }
}

/// Resolution counts per strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolverStats {
    pub exact_id: usize,
    pub linked_by_name: usize,
    pub new_by_name: usize,
    pub category_fallback: usize,
    confidence_sum: u64,
}

impl ResolverStats {
    fn record(&mut self, strategy: Strategy) {
        *self.count_mut(strategy) += 1;
        self.confidence_sum += u64::from(strategy.confidence());
    }

    fn count_mut(&mut self, strategy: Strategy) -> &mut usize {
        match strategy {
            Strategy::ExactId => &mut self.exact_id,
            Strategy::LinkedByName => &mut self.linked_by_name,
            Strategy::NewByName => &mut self.new_by_name,
            Strategy::CategoryFallback => &mut self.category_fallback,
        }
    }

    pub fn count(&self, strategy: Strategy) -> usize {
        match strategy {
            Strategy::ExactId => self.exact_id,
            Strategy::LinkedByName => self.linked_by_name,
            Strategy::NewByName => self.new_by_name,
            Strategy::CategoryFallback => self.category_fallback,
        }
    }

    pub fn total(&self) -> usize {
        self.exact_id + self.linked_by_name + self.new_by_name + self.category_fallback
    }

    /// Zero when nothing was resolved
    pub fn mean_confidence(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.confidence_sum as f64 / n as f64,
        }
    }

    pub fn format_table(&self) -> String {
        let total = self.total();
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            Cell::new("Strategy").fg(Color::Cyan),
            Cell::new("Count").fg(Color::Cyan),
            Cell::new("Share").fg(Color::Cyan),
        ]);
        for strategy in Strategy::ALL {
            let n = self.count(strategy);
            let pct = if total == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total as f64
            };
            table.add_row(vec![
                Cell::new(strategy.as_str()),
                Cell::new(n),
                Cell::new(format!("{pct:.1}%")),
            ]);
        }
        table.add_row(vec![
            Cell::new("mean confidence"),
            Cell::new(format!("{:.1}", self.mean_confidence())),
            Cell::new(""),
        ]);
        format!("\n{table}")
    }

    pub fn log(&self) {
        log::info!(
            "Resolved {}: exact_id={} linked_by_name={} new_by_name={} category_fallback={} mean_confidence={:.1}",
            self.total(),
            self.exact_id,
            self.linked_by_name,
            self.new_by_name,
            self.category_fallback,
            self.mean_confidence()
        );
    }
}

#[derive(Debug)]
struct KnownName {
    name: String,
    id: String,
}

/// Resolver with a growing index of known names and identities.
///
/// Not thread-safe by itself; wrap in a mutex to share.
#[derive(Debug, Default)]
pub struct EntityResolver {
    config: ResolverConfig,
    /// Insertion order decides which similar name wins
    names: Vec<KnownName>,
    by_name: FxHashMap<String, usize>,
    by_id: FxHashMap<String, EntityIdentity>,
    stats: ResolverStats,
}

/// `NAME_` plus the first 12 hex chars of the blake3 hash of the normalized name
fn name_id(normalized: &str) -> String {
    let hash = blake3::hash(normalized.as_bytes());
    format!("NAME_{}", &hash.to_hex()[..12])
}

fn label(raw: Option<&str>, default: &str) -> String {
    let normalized = raw.map(normalize_name).unwrap_or_default();
    let source = if normalized.is_empty() {
        default.to_uppercase()
    } else {
        normalized
    };
    source.split_whitespace().collect::<Vec<_>>().join("_")
}

impl EntityResolver {
    pub fn new(config: ResolverConfig) -> Result<Self, HarvestError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    /// Number of names in the index
    pub fn known_names(&self) -> usize {
        self.names.len()
    }

    pub fn lookup(&self, id: &str) -> Option<&EntityIdentity> {
        self.by_id.get(id)
    }

    fn usable(&self, normalized: &str) -> bool {
        normalized.chars().count() >= self.config.min_name_len
    }

    /// Seed the index with an identity from a previous run.
    pub fn register_known(&mut self, id: &str, name: &str) -> Result<(), HarvestError> {
        let normalized = normalize_name(name);
        if id.trim().is_empty() || !self.usable(&normalized) {
            return Err(HarvestError::validation(format!(
                "cannot register {id:?} with name {name:?}"
            )));
        }
        let identity = EntityIdentity {
            id: id.to_string(),
            strategy: Strategy::ExactId,
            confidence: Strategy::ExactId.confidence(),
            raw_id: Some(id.to_string()),
            raw_name: name.to_string(),
            normalized_name: normalized,
            aux: AuxFields::default(),
        };
        self.register(identity);
        Ok(())
    }

    fn register(&mut self, identity: EntityIdentity) {
        let name = &identity.normalized_name;
        if self.usable(name) && !self.by_name.contains_key(name) {
            self.by_name.insert(name.clone(), self.names.len());
            self.names.push(KnownName {
                name: name.clone(),
                id: identity.id.clone(),
            });
        }
        self.by_id.entry(identity.id.clone()).or_insert(identity);
    }

    fn find_by_name(&self, normalized: &str) -> Option<&KnownName> {
        if let Some(&i) = self.by_name.get(normalized) {
            return self.names.get(i);
        }
        self.names
            .iter()
            .find(|known| jaccard(&known.name, normalized) >= self.config.similarity_threshold)
    }

    /// Resolve a raw id and name to a stable identity.
    pub fn resolve(
        &mut self,
        raw_id: Option<&str>,
        raw_name: &str,
        aux: &AuxFields,
    ) -> EntityIdentity {
        let normalized = normalize_name(raw_name);
        let base = |id: String, strategy: Strategy| EntityIdentity {
            id,
            strategy,
            confidence: strategy.confidence(),
            raw_id: raw_id.map(str::to_string),
            raw_name: raw_name.to_string(),
            normalized_name: normalized.clone(),
            aux: aux.clone(),
        };

        let digits = raw_id.map(normalize_id).unwrap_or_default();
        let identity = if is_valid_id(&digits, self.config.min_id_digits) {
            base(digits, Strategy::ExactId)
        } else if !self.usable(&normalized) {
            let id = format!(
                "CAT_{}_{}",
                label(aux.category.as_deref(), &self.config.default_category),
                label(aux.region.as_deref(), &self.config.default_region)
            );
            base(id, Strategy::CategoryFallback)
        } else if let Some(known) = self.find_by_name(&normalized) {
            let identity = base(known.id.clone(), Strategy::LinkedByName);
            self.stats.record(identity.strategy);
            log::debug!("{raw_name:?} linked to {}", identity.id);
            return identity;
        } else {
            base(name_id(&normalized), Strategy::NewByName)
        };

        if identity.is_low_confidence() {
            log::debug!(
                "low confidence identity {} for {raw_name:?} ({})",
                identity.id,
                identity.strategy
            );
        }
        self.stats.record(identity.strategy);
        self.register(identity.clone());
        identity
    }

    /// Resolve a record normalized at ingress.
    pub fn resolve_entity(&mut self, entity: &RawEntity) -> EntityIdentity {
        self.resolve(entity.id.as_deref(), &entity.name, &entity.aux())
    }
}
