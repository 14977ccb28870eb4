//! Query policy: the OMOP CDM table vocabulary and the configurable
//! allow/deny sets consulted by the validator.
//!
//! A [`Policy`] is built once at startup and only read afterwards, so it can
//! be shared freely across concurrent validation calls.

/// Canonical OMOP CDM table names (CDM v5.4). Sorted, lowercase.
pub const OMOP_TABLES: &[&str] = &[
    "care_site",
    "cdm_source",
    "concept",
    "concept_ancestor",
    "concept_class",
    "concept_relationship",
    "concept_synonym",
    "condition_era",
    "condition_occurrence",
    "cost",
    "death",
    "device_exposure",
    "domain",
    "dose_era",
    "drug_era",
    "drug_exposure",
    "drug_strength",
    "episode",
    "episode_event",
    "fact_relationship",
    "location",
    "measurement",
    "metadata",
    "note",
    "note_nlp",
    "observation",
    "observation_period",
    "payer_plan_period",
    "person",
    "procedure_occurrence",
    "provider",
    "relationship",
    "specimen",
    "visit_detail",
    "visit_occurrence",
    "vocabulary",
];

/// Column-name suffixes that carry raw source-system values. Restricted by
/// default because source values may contain identifying or non-standardized
/// data.
pub const SOURCE_VALUE_SUFFIXES: &[&str] = &["_source_value", "_source_concept_id"];

/// Immutable per-validator policy set.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Allow queries to read `*_source_value` / `*_source_concept_id` columns.
    pub allow_source_value_columns: bool,
    /// Tables denied even though they are part of the OMOP vocabulary. Lowercase.
    pub exclude_tables: Vec<String>,
    /// Columns denied across all tables. Lowercase.
    pub exclude_columns: Vec<String>,
    /// Maximum number of rows the engine returns per query.
    pub row_limit: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allow_source_value_columns: false,
            exclude_tables: Vec::new(),
            exclude_columns: Vec::new(),
            row_limit: 1000,
        }
    }
}

impl Policy {
    /// Build a policy from configured deny-lists. Names are folded to
    /// lowercase so later checks can compare folded identifiers directly.
    pub fn new(
        allow_source_value_columns: bool,
        exclude_tables: &[String],
        exclude_columns: &[String],
    ) -> Self {
        Self {
            allow_source_value_columns,
            exclude_tables: exclude_tables.iter().map(|t| t.to_lowercase()).collect(),
            exclude_columns: exclude_columns.iter().map(|c| c.to_lowercase()).collect(),
            ..Self::default()
        }
    }

    /// Is `name` (already lowercased) part of the OMOP CDM vocabulary?
    pub fn is_omop_table(&self, name: &str) -> bool {
        // OMOP_TABLES is sorted.
        OMOP_TABLES.binary_search(&name).is_ok()
    }

    pub fn is_excluded_table(&self, name: &str) -> bool {
        self.exclude_tables.iter().any(|t| t == name)
    }

    pub fn is_excluded_column(&self, name: &str) -> bool {
        self.exclude_columns.iter().any(|c| c == name)
    }

    /// Does `name` (already lowercased) follow the source-value naming
    /// convention?
    pub fn is_source_value_column(&self, name: &str) -> bool {
        SOURCE_VALUE_SUFFIXES.iter().any(|s| name.ends_with(s))
    }

    /// Tables visible to schema introspection: the vocabulary minus the
    /// configured exclusions.
    pub fn visible_tables(&self) -> Vec<&'static str> {
        OMOP_TABLES
            .iter()
            .copied()
            .filter(|t| !self.is_excluded_table(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_is_sorted() {
        let mut sorted = OMOP_TABLES.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, OMOP_TABLES);
    }

    #[test]
    fn test_omop_lookup() {
        let policy = Policy::default();
        assert!(policy.is_omop_table("person"));
        assert!(policy.is_omop_table("condition_occurrence"));
        assert!(!policy.is_omop_table("patients"));
    }

    #[test]
    fn test_exclusions_folded() {
        let policy = Policy::new(false, &["Death".to_string()], &["Year_Of_Birth".to_string()]);
        assert!(policy.is_excluded_table("death"));
        assert!(policy.is_excluded_column("year_of_birth"));
        assert!(!policy.is_excluded_table("person"));
    }

    #[test]
    fn test_source_value_convention() {
        let policy = Policy::default();
        assert!(policy.is_source_value_column("gender_source_value"));
        assert!(policy.is_source_value_column("condition_source_concept_id"));
        assert!(!policy.is_source_value_column("gender_concept_id"));
    }

    #[test]
    fn test_visible_tables() {
        let policy = Policy::new(false, &["death".to_string()], &[]);
        let visible = policy.visible_tables();
        assert!(!visible.contains(&"death"));
        assert!(visible.contains(&"person"));
    }
}
