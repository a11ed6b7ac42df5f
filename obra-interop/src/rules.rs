//! Declarative field rule sets
//!
//! Pure data: which fields each record type must carry and what their values
//! may look like. Evaluation lives in [`crate::services::validator`].

use std::collections::HashMap;

use crate::error::ConfigurationError;
use crate::models::RecordType;

/// Whether a violated rule blocks the record or only advises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLevel {
    Error,
    Warning,
}

/// Shape a text field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    /// ASCII digits only
    Digits,
    /// CPF (11 digits) or CNPJ (14 digits); `.`, `-` and `/` separators allowed
    Document,
    /// Upper-case letters, digits, `-` and `/`
    Code,
}

/// Condition gating a conditional rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    TextEquals { field: &'static str, value: &'static str },
    IntegerAtLeast { field: &'static str, value: i64 },
}

impl Condition {
    pub fn field(&self) -> &'static str {
        match self {
            Condition::TextEquals { field, .. } | Condition::IntegerAtLeast { field, .. } => field,
        }
    }
}

/// One declarative rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    Required { field: &'static str },
    Format { field: &'static str, format: TextFormat },
    /// Character count bounds, inclusive
    Length { field: &'static str, min: usize, max: usize },
    /// Integer bounds, inclusive
    Range { field: &'static str, min: i64, max: i64 },
    OneOf { field: &'static str, allowed: &'static [&'static str] },
    /// `earlier` must not be after `later`
    DateOrder { earlier: &'static str, later: &'static str },
    RequiredWhen { field: &'static str, condition: Condition },
    /// `field` should hold `value` whenever `condition` holds
    EqualsWhen { field: &'static str, value: &'static str, condition: Condition },
}

/// Evaluation category; lower runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleCategory {
    Presence,
    Format,
    Bounds,
    Enumeration,
    CrossField,
}

impl FieldRule {
    pub fn category(&self) -> RuleCategory {
        match self {
            FieldRule::Required { .. } => RuleCategory::Presence,
            FieldRule::Format { .. } => RuleCategory::Format,
            FieldRule::Length { .. } | FieldRule::Range { .. } => RuleCategory::Bounds,
            FieldRule::OneOf { .. } => RuleCategory::Enumeration,
            FieldRule::DateOrder { .. }
            | FieldRule::RequiredWhen { .. }
            | FieldRule::EqualsWhen { .. } => RuleCategory::CrossField,
        }
    }

    /// Short rule name used in configuration errors
    pub fn name(&self) -> &'static str {
        match self {
            FieldRule::Required { .. } => "required",
            FieldRule::Format { .. } => "format",
            FieldRule::Length { .. } => "length",
            FieldRule::Range { .. } => "range",
            FieldRule::OneOf { .. } => "one_of",
            FieldRule::DateOrder { .. } => "date_order",
            FieldRule::RequiredWhen { .. } => "required_when",
            FieldRule::EqualsWhen { .. } => "equals_when",
        }
    }

    /// Every field name the rule reads
    pub fn fields(&self) -> Vec<&'static str> {
        match self {
            FieldRule::Required { field }
            | FieldRule::Format { field, .. }
            | FieldRule::Length { field, .. }
            | FieldRule::Range { field, .. }
            | FieldRule::OneOf { field, .. } => vec![field],
            FieldRule::DateOrder { earlier, later } => vec![earlier, later],
            FieldRule::RequiredWhen { field, condition }
            | FieldRule::EqualsWhen { field, condition, .. } => vec![field, condition.field()],
        }
    }
}

/// A rule with its level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub rule: FieldRule,
    pub level: RuleLevel,
}

/// All rules for one record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRuleSet {
    pub record_type: RecordType,
    pub rules: Vec<RuleSpec>,
}

impl FieldRuleSet {
    pub fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            rules: Vec::new(),
        }
    }

    pub fn error(mut self, rule: FieldRule) -> Self {
        self.rules.push(RuleSpec {
            rule,
            level: RuleLevel::Error,
        });
        self
    }

    pub fn warning(mut self, rule: FieldRule) -> Self {
        self.rules.push(RuleSpec {
            rule,
            level: RuleLevel::Warning,
        });
        self
    }

    /// Rules in evaluation order: by category, declaration order within one
    pub fn ordered(&self) -> Vec<&RuleSpec> {
        let mut rules: Vec<&RuleSpec> = self.rules.iter().collect();
        rules.sort_by_key(|spec| spec.rule.category());
        rules
    }
}

/// Rule sets keyed by record type
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    sets: HashMap<RecordType, FieldRuleSet>,
}

/// Contract modality codes accepted by the Regulator
pub const CONTRACT_MODALITIES: &[&str] = &[
    "pregao",
    "concorrencia",
    "concurso",
    "leilao",
    "dialogo_competitivo",
    "dispensa",
    "inexigibilidade",
];

/// Works status codes accepted by the Regulator
pub const WORKS_STATUS_CODES: &[&str] = &["nao_iniciada", "em_andamento", "paralisada", "concluida"];

impl RuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rule sets for every record type
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(contract_rules());
        registry.register(measurement_rules());
        registry.register(works_status_rules());
        registry
    }

    /// Add or replace the rule set for its record type
    pub fn register(&mut self, set: FieldRuleSet) {
        self.sets.insert(set.record_type, set);
    }

    pub fn rule_set(&self, record_type: RecordType) -> Result<&FieldRuleSet, ConfigurationError> {
        self.sets
            .get(&record_type)
            .ok_or(ConfigurationError::MissingRuleSet(record_type))
    }
}

fn contract_rules() -> FieldRuleSet {
    FieldRuleSet::new(RecordType::Contract)
        .error(FieldRule::Required { field: "number" })
        .error(FieldRule::Required { field: "year" })
        .error(FieldRule::Required { field: "supplier_document" })
        .error(FieldRule::Required { field: "supplier_name" })
        .error(FieldRule::Required { field: "object" })
        .error(FieldRule::Required { field: "modality" })
        .error(FieldRule::Required { field: "value_cents" })
        .error(FieldRule::Required { field: "start_date" })
        .error(FieldRule::Required { field: "end_date" })
        .error(FieldRule::Format {
            field: "number",
            format: TextFormat::Code,
        })
        .error(FieldRule::Format {
            field: "supplier_document",
            format: TextFormat::Document,
        })
        .error(FieldRule::Length {
            field: "number",
            min: 1,
            max: 20,
        })
        .error(FieldRule::Range {
            field: "year",
            min: 1990,
            max: 2100,
        })
        .error(FieldRule::Length {
            field: "supplier_name",
            min: 3,
            max: 150,
        })
        .warning(FieldRule::Length {
            field: "object",
            min: 10,
            max: 2000,
        })
        .error(FieldRule::Range {
            field: "value_cents",
            min: 1,
            max: i64::MAX,
        })
        .error(FieldRule::OneOf {
            field: "modality",
            allowed: CONTRACT_MODALITIES,
        })
        .error(FieldRule::DateOrder {
            earlier: "start_date",
            later: "end_date",
        })
        .warning(FieldRule::DateOrder {
            earlier: "signed_on",
            later: "start_date",
        })
}

fn measurement_rules() -> FieldRuleSet {
    FieldRuleSet::new(RecordType::Measurement)
        .error(FieldRule::Required {
            field: "contract_external_id",
        })
        .error(FieldRule::Required { field: "sequence" })
        .error(FieldRule::Required { field: "period_start" })
        .error(FieldRule::Required { field: "period_end" })
        .error(FieldRule::Required {
            field: "measured_value_cents",
        })
        .error(FieldRule::Required {
            field: "percent_complete",
        })
        .error(FieldRule::Format {
            field: "contract_external_id",
            format: TextFormat::Code,
        })
        .error(FieldRule::Range {
            field: "sequence",
            min: 1,
            max: 999,
        })
        .error(FieldRule::Range {
            field: "measured_value_cents",
            min: 1,
            max: i64::MAX,
        })
        .error(FieldRule::Range {
            field: "percent_complete",
            min: 0,
            max: 100,
        })
        .error(FieldRule::DateOrder {
            earlier: "period_start",
            later: "period_end",
        })
}

fn works_status_rules() -> FieldRuleSet {
    FieldRuleSet::new(RecordType::WorksStatus)
        .error(FieldRule::Required {
            field: "works_external_id",
        })
        .error(FieldRule::Required { field: "status_code" })
        .error(FieldRule::Required {
            field: "physical_progress",
        })
        .error(FieldRule::Required {
            field: "reference_date",
        })
        .error(FieldRule::Format {
            field: "works_external_id",
            format: TextFormat::Code,
        })
        .error(FieldRule::Range {
            field: "physical_progress",
            min: 0,
            max: 100,
        })
        .error(FieldRule::Length {
            field: "justification",
            min: 0,
            max: 1000,
        })
        .error(FieldRule::OneOf {
            field: "status_code",
            allowed: WORKS_STATUS_CODES,
        })
        .error(FieldRule::RequiredWhen {
            field: "justification",
            condition: Condition::TextEquals {
                field: "status_code",
                value: "paralisada",
            },
        })
        .warning(FieldRule::EqualsWhen {
            field: "status_code",
            value: "concluida",
            condition: Condition::IntegerAtLeast {
                field: "physical_progress",
                value: 100,
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_every_record_type() {
        let registry = RuleRegistry::standard();
        for record_type in RecordType::ALL {
            let set = registry.rule_set(record_type).unwrap();
            assert_eq!(set.record_type, record_type);
            assert!(!set.rules.is_empty());
        }
    }

    #[test]
    fn test_missing_rule_set_is_configuration_error() {
        let registry = RuleRegistry::new();
        assert_eq!(
            registry.rule_set(RecordType::Contract).unwrap_err(),
            ConfigurationError::MissingRuleSet(RecordType::Contract)
        );
    }

    #[test]
    fn test_ordered_sorts_by_category_and_keeps_declaration_order() {
        let set = FieldRuleSet::new(RecordType::Measurement)
            .error(FieldRule::DateOrder {
                earlier: "period_start",
                later: "period_end",
            })
            .error(FieldRule::Range {
                field: "sequence",
                min: 1,
                max: 9,
            })
            .error(FieldRule::Required { field: "sequence" })
            .error(FieldRule::Required { field: "period_end" });

        let names: Vec<&str> = set
            .ordered()
            .iter()
            .map(|spec| spec.rule.name())
            .collect();
        assert_eq!(names, vec!["required", "required", "range", "date_order"]);
        assert_eq!(set.ordered()[1].rule.fields(), vec!["period_end"]);
    }

    #[test]
    fn test_conditional_rule_reads_both_fields() {
        let rule = FieldRule::RequiredWhen {
            field: "justification",
            condition: Condition::TextEquals {
                field: "status_code",
                value: "paralisada",
            },
        };
        assert_eq!(rule.fields(), vec!["justification", "status_code"]);
        assert_eq!(rule.category(), RuleCategory::CrossField);
    }
}
