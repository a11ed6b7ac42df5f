//! Payload mapper
//!
//! Turns a [`Record`] into the Regulator's wire representation: Portuguese
//! field names, money as a decimal string, dates as `dd/mm/yyyy`.
//!
//! Mapping only fails on schema mismatch. A field that exists on the record
//! but is empty maps to `null`; whether that is acceptable is the validator's
//! call, not the mapper's.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::MappingError;
use crate::models::{FieldLookup, FieldValue, Record, RecordType};

/// Wire representation of one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// String; integers are rendered in decimal
    Text,
    Integer,
    /// Cents rendered as "1234.56"
    Money,
    /// Date rendered as "dd/mm/yyyy"
    Date,
}

impl WireFormat {
    fn name(&self) -> &'static str {
        match self {
            WireFormat::Text => "text",
            WireFormat::Integer => "integer",
            WireFormat::Money => "money",
            WireFormat::Date => "date",
        }
    }
}

/// One field of the wire body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireField {
    pub wire_name: &'static str,
    /// Record field the value comes from
    pub source: &'static str,
    pub format: WireFormat,
}

const fn wire(wire_name: &'static str, source: &'static str, format: WireFormat) -> WireField {
    WireField {
        wire_name,
        source,
        format,
    }
}

const CONTRACT_FIELDS: &[WireField] = &[
    wire("identificador_externo", "external_id", WireFormat::Text),
    wire("numero_contrato", "number", WireFormat::Text),
    wire("ano", "year", WireFormat::Integer),
    wire("documento_fornecedor", "supplier_document", WireFormat::Text),
    wire("nome_fornecedor", "supplier_name", WireFormat::Text),
    wire("objeto", "object", WireFormat::Text),
    wire("modalidade", "modality", WireFormat::Text),
    wire("valor", "value_cents", WireFormat::Money),
    wire("data_assinatura", "signed_on", WireFormat::Date),
    wire("data_inicio", "start_date", WireFormat::Date),
    wire("data_fim", "end_date", WireFormat::Date),
];

const MEASUREMENT_FIELDS: &[WireField] = &[
    wire("identificador_externo", "external_id", WireFormat::Text),
    wire("contrato", "contract_external_id", WireFormat::Text),
    wire("numero_medicao", "sequence", WireFormat::Integer),
    wire("periodo_inicio", "period_start", WireFormat::Date),
    wire("periodo_fim", "period_end", WireFormat::Date),
    wire("valor_medido", "measured_value_cents", WireFormat::Money),
    wire("percentual_executado", "percent_complete", WireFormat::Integer),
];

const WORKS_STATUS_FIELDS: &[WireField] = &[
    wire("identificador_externo", "external_id", WireFormat::Text),
    wire("obra", "works_external_id", WireFormat::Text),
    wire("situacao", "status_code", WireFormat::Text),
    wire("percentual_fisico", "physical_progress", WireFormat::Integer),
    wire("data_referencia", "reference_date", WireFormat::Date),
    wire("justificativa", "justification", WireFormat::Text),
];

/// Wire layout of one record type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireSchema {
    pub record_type: RecordType,
    pub fields: Vec<WireField>,
}

impl WireSchema {
    /// Layout the Regulator expects for `record_type`
    pub fn for_type(record_type: RecordType) -> Self {
        let fields = match record_type {
            RecordType::Contract => CONTRACT_FIELDS,
            RecordType::Measurement => MEASUREMENT_FIELDS,
            RecordType::WorksStatus => WORKS_STATUS_FIELDS,
        };
        Self {
            record_type,
            fields: fields.to_vec(),
        }
    }
}

/// Mapped record ready for the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WirePayload {
    pub record_type: RecordType,
    /// Local record id
    pub reference_id: String,
    pub tenant_id: String,
    pub body: Map<String, Value>,
}

impl WirePayload {
    /// Regulator endpoint path for this payload's record type
    pub fn endpoint(&self) -> &'static str {
        endpoint_for(self.record_type)
    }
}

pub fn endpoint_for(record_type: RecordType) -> &'static str {
    match record_type {
        RecordType::Contract => "contratos",
        RecordType::Measurement => "medicoes",
        RecordType::WorksStatus => "situacao-obras",
    }
}

/// Map a record with the standard schema for its type
pub fn map_record(record: &Record) -> Result<WirePayload, MappingError> {
    map_with_schema(record, &WireSchema::for_type(record.record_type()))
}

/// Map a record with an explicit schema
pub fn map_with_schema(record: &Record, schema: &WireSchema) -> Result<WirePayload, MappingError> {
    let mut body = Map::new();

    for field in &schema.fields {
        let value = match record.field(field.source) {
            FieldLookup::Absent => {
                return Err(MappingError::MissingSource {
                    record_type: record.record_type(),
                    wire_field: field.wire_name.to_string(),
                    source_field: field.source.to_string(),
                });
            }
            FieldLookup::Present(None) => Value::Null,
            FieldLookup::Present(Some(value)) if value.is_blank() => Value::Null,
            FieldLookup::Present(Some(value)) => coerce(field, value)?,
        };
        body.insert(field.wire_name.to_string(), value);
    }

    Ok(WirePayload {
        record_type: record.record_type(),
        reference_id: record.id().to_string(),
        tenant_id: record.tenant_id().to_string(),
        body,
    })
}

fn coerce(field: &WireField, value: FieldValue) -> Result<Value, MappingError> {
    let coerced = match (field.format, &value) {
        (WireFormat::Text, FieldValue::Text(s)) => Value::String(s.trim().to_string()),
        (WireFormat::Text, FieldValue::Integer(n)) => Value::String(n.to_string()),
        (WireFormat::Integer, FieldValue::Integer(n)) => Value::from(*n),
        (WireFormat::Money, FieldValue::Integer(cents)) => Value::String(format_money(*cents)),
        (WireFormat::Date, FieldValue::Date(date)) => {
            Value::String(date.format("%d/%m/%Y").to_string())
        }
        _ => {
            return Err(MappingError::TypeMismatch {
                wire_field: field.wire_name.to_string(),
                expected: field.format.name(),
                found: value.kind(),
            })
        }
    };
    Ok(coerced)
}

/// Render cents as a decimal amount with two places
pub fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeasurementRecord, RecordStage};
    use chrono::NaiveDate;

    fn measurement() -> MeasurementRecord {
        MeasurementRecord {
            id: "m-1".to_string(),
            tenant_id: "pref-01".to_string(),
            external_id: Some("MD-0003".to_string()),
            stage: RecordStage::Approved,
            contract_external_id: Some("CT-9".to_string()),
            sequence: Some(3),
            period_start: NaiveDate::from_ymd_opt(2024, 5, 1),
            period_end: NaiveDate::from_ymd_opt(2024, 5, 31),
            measured_value_cents: Some(4_512_307),
            percent_complete: Some(45),
        }
    }

    #[test]
    fn test_measurement_maps_to_wire_layout() {
        let payload = map_record(&Record::Measurement(measurement())).unwrap();

        assert_eq!(payload.endpoint(), "medicoes");
        assert_eq!(payload.reference_id, "m-1");
        assert_eq!(payload.tenant_id, "pref-01");
        assert_eq!(payload.body["contrato"], "CT-9");
        assert_eq!(payload.body["numero_medicao"], 3);
        assert_eq!(payload.body["periodo_inicio"], "01/05/2024");
        assert_eq!(payload.body["valor_medido"], "45123.07");
        assert_eq!(payload.body["percentual_executado"], 45);
    }

    #[test]
    fn test_empty_field_maps_to_null() {
        let mut record = measurement();
        record.contract_external_id = None;
        record.period_end = None;

        let payload = map_record(&Record::Measurement(record)).unwrap();
        assert_eq!(payload.body["contrato"], Value::Null);
        assert_eq!(payload.body["periodo_fim"], Value::Null);
    }

    #[test]
    fn test_schema_without_source_field_is_mapping_error() {
        let schema = WireSchema {
            record_type: RecordType::Measurement,
            fields: vec![wire("valor", "value_cents", WireFormat::Money)],
        };

        let err = map_with_schema(&Record::Measurement(measurement()), &schema).unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingSource {
                record_type: RecordType::Measurement,
                wire_field: "valor".to_string(),
                source_field: "value_cents".to_string(),
            }
        );
    }

    #[test]
    fn test_uncoercible_value_is_type_mismatch() {
        let schema = WireSchema {
            record_type: RecordType::Measurement,
            fields: vec![wire("periodo_inicio", "period_start", WireFormat::Money)],
        };

        let err = map_with_schema(&Record::Measurement(measurement()), &schema).unwrap_err();
        assert!(matches!(
            err,
            MappingError::TypeMismatch { expected: "money", found: "date", .. }
        ));
    }

    #[test]
    fn test_every_standard_schema_maps_its_own_type() {
        for record_type in RecordType::ALL {
            let schema = WireSchema::for_type(record_type);
            assert!(schema.fields.iter().any(|f| f.wire_name == "identificador_externo"));
            assert!(!endpoint_for(record_type).is_empty());
        }
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(0), "0.00");
        assert_eq!(format_money(7), "0.07");
        assert_eq!(format_money(123_456), "1234.56");
        assert_eq!(format_money(-350), "-3.50");
    }
}
