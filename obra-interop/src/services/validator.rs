//! Record validator
//!
//! Applies a [`crate::rules::FieldRuleSet`] to one record and reports every issue found.
//!
//! # Evaluation
//! - Rules run in category order: presence, format, length/range, enumeration,
//!   cross-field. Within a category, declaration order.
//! - Every rule runs even after an earlier one failed, so one pass surfaces
//!   all issues.
//! - Blank text counts as missing for `Required`; every other rule skips a
//!   missing value.
//! - Warning-level rules produce warnings, which never affect `valid`.
//!
//! # Configuration errors
//! A rule naming a field the record type does not have, or a rule applied to a
//! value of the wrong kind, is a rule set bug and fails the whole call with a
//! [`ConfigurationError`] instead of producing a result.

use chrono::NaiveDate;

use crate::error::ConfigurationError;
use crate::models::{FieldIssue, FieldLookup, FieldValue, Record, RecordType, ValidationResult};
use crate::rules::{Condition, FieldRule, RuleLevel, RuleRegistry, TextFormat};

/// Validate one record against the registered rule set for its type
///
/// Pure: never mutates the record, no I/O, same input gives the same output.
pub fn validate(
    record: &Record,
    rules: &RuleRegistry,
) -> Result<ValidationResult, ConfigurationError> {
    let record_type = record.record_type();
    let set = rules.rule_set(record_type)?;

    // Reject broken rule sets before reporting anything
    for spec in &set.rules {
        for field in spec.rule.fields() {
            if record.field(field) == FieldLookup::Absent {
                return Err(ConfigurationError::UnknownField {
                    record_type,
                    field: field.to_string(),
                });
            }
        }
    }

    let eval = RuleEval {
        record,
        record_type,
    };
    let mut issues = Vec::new();
    for spec in set.ordered() {
        if let Some((field, message)) = eval.check(&spec.rule)? {
            issues.push(match spec.level {
                RuleLevel::Error => FieldIssue::error(field, message),
                RuleLevel::Warning => FieldIssue::warning(field, message),
            });
        }
    }

    Ok(ValidationResult::from_issues(
        record.id(),
        record_type,
        issues,
    ))
}

struct RuleEval<'a> {
    record: &'a Record,
    record_type: RecordType,
}

type Violation = Option<(&'static str, String)>;

impl<'a> RuleEval<'a> {
    fn value(&self, field: &str) -> Option<FieldValue> {
        self.record.field(field).value().cloned()
    }

    fn incompatible(&self, field: &str, rule: &'static str, found: &FieldValue) -> ConfigurationError {
        ConfigurationError::IncompatibleRule {
            record_type: self.record_type,
            field: field.to_string(),
            rule,
            kind: found.kind(),
        }
    }

    fn text(&self, field: &str, rule: &'static str) -> Result<Option<String>, ConfigurationError> {
        match self.value(field) {
            None => Ok(None),
            Some(FieldValue::Text(s)) => Ok(Some(s)),
            Some(other) => Err(self.incompatible(field, rule, &other)),
        }
    }

    fn integer(&self, field: &str, rule: &'static str) -> Result<Option<i64>, ConfigurationError> {
        match self.value(field) {
            None => Ok(None),
            Some(FieldValue::Integer(n)) => Ok(Some(n)),
            Some(other) => Err(self.incompatible(field, rule, &other)),
        }
    }

    fn date(&self, field: &str, rule: &'static str) -> Result<Option<NaiveDate>, ConfigurationError> {
        match self.value(field) {
            None => Ok(None),
            Some(FieldValue::Date(d)) => Ok(Some(d)),
            Some(other) => Err(self.incompatible(field, rule, &other)),
        }
    }

    fn holds(&self, condition: &Condition, rule: &'static str) -> Result<bool, ConfigurationError> {
        match condition {
            Condition::TextEquals { field, value } => {
                Ok(self.text(field, rule)?.is_some_and(|s| s.trim() == *value))
            }
            Condition::IntegerAtLeast { field, value } => {
                Ok(self.integer(field, rule)?.is_some_and(|n| n >= *value))
            }
        }
    }

    fn check(&self, rule: &FieldRule) -> Result<Violation, ConfigurationError> {
        let name = rule.name();
        let violation = match rule {
            FieldRule::Required { field } => self
                .value(field)
                .is_none()
                .then(|| (*field, "is required".to_string())),

            FieldRule::Format { field, format } => self
                .text(field, name)?
                .filter(|s| !matches_format(s.trim(), *format))
                .map(|_| (*field, format_message(*format).to_string())),

            FieldRule::Length { field, min, max } => self
                .text(field, name)?
                .map(|s| s.trim().chars().count())
                .filter(|len| len < min || len > max)
                .map(|_| {
                    (
                        *field,
                        format!("must be between {} and {} characters", min, max),
                    )
                }),

            FieldRule::Range { field, min, max } => self
                .integer(field, name)?
                .filter(|n| n < min || n > max)
                .map(|_| {
                    let message = if *max == i64::MAX {
                        format!("must be at least {}", min)
                    } else {
                        format!("must be between {} and {}", min, max)
                    };
                    (*field, message)
                }),

            FieldRule::OneOf { field, allowed } => self
                .text(field, name)?
                .filter(|s| !allowed.iter().any(|code| *code == s.trim()))
                .map(|_| (*field, format!("must be one of: {}", allowed.join(", ")))),

            FieldRule::DateOrder { earlier, later } => {
                match (self.date(earlier, name)?, self.date(later, name)?) {
                    (Some(first), Some(second)) if first > second => {
                        Some((*later, format!("must not precede {}", earlier)))
                    }
                    _ => None,
                }
            }

            FieldRule::RequiredWhen { field, condition } => {
                if self.holds(condition, name)? && self.value(field).is_none() {
                    Some((*field, format!("is required when {}", describe(condition))))
                } else {
                    None
                }
            }

            FieldRule::EqualsWhen {
                field,
                value,
                condition,
            } => {
                let differs = self
                    .text(field, name)?
                    .is_some_and(|current| current.trim() != *value);
                if differs && self.holds(condition, name)? {
                    Some((
                        *field,
                        format!("should be '{}' when {}", value, describe(condition)),
                    ))
                } else {
                    None
                }
            }
        };

        Ok(violation)
    }
}

fn describe(condition: &Condition) -> String {
    match condition {
        Condition::TextEquals { field, value } => format!("{} is '{}'", field, value),
        Condition::IntegerAtLeast { field, value } => format!("{} is at least {}", field, value),
    }
}

fn matches_format(value: &str, format: TextFormat) -> bool {
    match format {
        TextFormat::Digits => !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()),
        TextFormat::Document => {
            let stripped: String = value
                .chars()
                .filter(|c| !matches!(c, '.' | '-' | '/'))
                .collect();
            stripped.chars().all(|c| c.is_ascii_digit()) && matches!(stripped.len(), 11 | 14)
        }
        TextFormat::Code => value
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '/'),
    }
}

fn format_message(format: TextFormat) -> &'static str {
    match format {
        TextFormat::Digits => "must contain digits only",
        TextFormat::Document => "must be a CPF (11 digits) or CNPJ (14 digits)",
        TextFormat::Code => "must use upper-case letters, digits, '-' or '/'",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContractRecord, IssueSeverity, RecordStage, WorksStatusRecord};
    use crate::rules::FieldRuleSet;

    fn valid_contract() -> ContractRecord {
        ContractRecord {
            id: "c-1".to_string(),
            tenant_id: "pref-01".to_string(),
            external_id: Some("CT-2024-001".to_string()),
            stage: RecordStage::Approved,
            number: Some("012/2024".to_string()),
            year: Some(2024),
            supplier_document: Some("12.345.678/0001-90".to_string()),
            supplier_name: Some("Construtora Horizonte Ltda".to_string()),
            object: Some("Pavimentação da Rua das Flores".to_string()),
            modality: Some("concorrencia".to_string()),
            value_cents: Some(125_000_000),
            signed_on: NaiveDate::from_ymd_opt(2024, 2, 1),
            start_date: NaiveDate::from_ymd_opt(2024, 2, 15),
            end_date: NaiveDate::from_ymd_opt(2024, 12, 31),
        }
    }

    fn works_status(status_code: &str, progress: i64, justification: Option<&str>) -> Record {
        Record::WorksStatus(WorksStatusRecord {
            id: "w-1".to_string(),
            tenant_id: "pref-01".to_string(),
            external_id: None,
            stage: RecordStage::Approved,
            works_external_id: Some("OB-77".to_string()),
            status_code: Some(status_code.to_string()),
            physical_progress: Some(progress),
            reference_date: NaiveDate::from_ymd_opt(2024, 6, 30),
            justification: justification.map(str::to_string),
        })
    }

    #[test]
    fn test_valid_contract_passes() {
        let result = validate(&Record::Contract(valid_contract()), &RuleRegistry::standard()).unwrap();
        assert!(result.valid, "unexpected errors: {}", result.error_summary());
        assert!(result.warnings.is_empty());
        assert_eq!(result.record_id, "c-1");
    }

    #[test]
    fn test_every_issue_is_reported_in_category_order() {
        let mut contract = valid_contract();
        contract.number = None;
        contract.supplier_document = Some("123".to_string());
        contract.modality = Some("convite".to_string());
        contract.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);

        let result = validate(&Record::Contract(contract), &RuleRegistry::standard()).unwrap();

        assert!(!result.valid);
        let fields: Vec<&str> = result.errors.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["number", "supplier_document", "modality", "end_date"]);
        assert_eq!(result.errors[3].message, "must not precede start_date");
    }

    #[test]
    fn test_blank_text_counts_as_missing() {
        let mut contract = valid_contract();
        contract.supplier_name = Some("   ".to_string());

        let result = validate(&Record::Contract(contract), &RuleRegistry::standard()).unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].field, "supplier_name");
        assert_eq!(result.errors[0].message, "is required");
    }

    #[test]
    fn test_warnings_leave_record_valid() {
        let mut contract = valid_contract();
        contract.object = Some("Obra".to_string());
        contract.signed_on = NaiveDate::from_ymd_opt(2024, 3, 1);

        let result = validate(&Record::Contract(contract), &RuleRegistry::standard()).unwrap();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 2);
        assert!(result
            .warnings
            .iter()
            .all(|issue| issue.severity == IssueSeverity::Warning));
    }

    #[test]
    fn test_validate_is_deterministic() {
        let mut contract = valid_contract();
        contract.year = Some(1800);
        contract.value_cents = Some(0);
        let record = Record::Contract(contract);
        let registry = RuleRegistry::standard();

        let first = validate(&record, &registry).unwrap();
        let second = validate(&record, &registry).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_paralysed_works_need_justification() {
        let registry = RuleRegistry::standard();

        let result = validate(&works_status("paralisada", 40, None), &registry).unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors[0].field, "justification");
        assert_eq!(
            result.errors[0].message,
            "is required when status_code is 'paralisada'"
        );

        let result = validate(&works_status("paralisada", 40, Some("Chuvas")), &registry).unwrap();
        assert!(result.valid);
    }

    #[test]
    fn test_full_progress_without_completion_is_a_warning() {
        let result = validate(
            &works_status("em_andamento", 100, None),
            &RuleRegistry::standard(),
        )
        .unwrap();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].field, "status_code");
    }

    #[test]
    fn test_rule_on_unknown_field_is_configuration_error() {
        let mut registry = RuleRegistry::new();
        registry.register(
            FieldRuleSet::new(RecordType::Contract).error(FieldRule::Required { field: "budget" }),
        );

        let err = validate(&Record::Contract(valid_contract()), &registry).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownField {
                record_type: RecordType::Contract,
                field: "budget".to_string()
            }
        );
    }

    #[test]
    fn test_rule_on_wrong_kind_is_configuration_error() {
        let mut registry = RuleRegistry::new();
        registry.register(FieldRuleSet::new(RecordType::Contract).error(FieldRule::Range {
            field: "start_date",
            min: 0,
            max: 10,
        }));

        let err = validate(&Record::Contract(valid_contract()), &registry).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::IncompatibleRule { rule: "range", kind: "date", .. }
        ));
    }

    #[test]
    fn test_missing_rule_set_fails_before_evaluation() {
        let err = validate(&Record::Contract(valid_contract()), &RuleRegistry::new()).unwrap_err();
        assert_eq!(err, ConfigurationError::MissingRuleSet(RecordType::Contract));
    }

    #[test]
    fn test_document_format_accepts_cpf_and_cnpj() {
        assert!(matches_format("123.456.789-09", TextFormat::Document));
        assert!(matches_format("12345678000190", TextFormat::Document));
        assert!(!matches_format("1234567890", TextFormat::Document));
        assert!(!matches_format("123.456.789-0X", TextFormat::Document));
    }
}
