use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// 逻辑字段 -> 源字段名 (按优先级排列, 取第一个非空值)
pub struct FieldAliases;

impl FieldAliases {
    pub const DOCUMENT_ID: &'static [&'static str] = &["COMPROBANTE"];
    pub const TRANSACTION_ID: &'static [&'static str] = &["TRANSACCIONID"];
    pub const INTERNAL_NUMBER: &'static [&'static str] = &["DOCNROINT"];
    pub const CLIENT: &'static [&'static str] = &["CLIENTE"];
    // 源系统字段名有拼写错误的版本, 两个都要认
    pub const TAX_ID_TYPE: &'static [&'static str] =
        &["INDENTIFICACIONTRIBUTARIA", "IDENTIFICACIONTRIBUTARIA"];
    pub const TAX_ID_NUMBER: &'static [&'static str] = &["NRODEIDENTIFICACION"];
    pub const REGION: &'static [&'static str] = &["PROVINCIADESTINO", "PROVINCIADESTINOITEM"];
    pub const PAYMENT_TERMS: &'static [&'static str] = &["CONDICIONPAGO"];
    pub const COMPANY: &'static [&'static str] = &["EMPRESA"];
    pub const UNTAXED: &'static [&'static str] = &["IMPORTE"];
    pub const TAXED: &'static [&'static str] = &["GRAVADO"];
    pub const EXEMPT: &'static [&'static str] = &["NO GRAVADO"];
    pub const TOTAL: &'static [&'static str] = &["TOTAL"];
    pub const DELIVERY_DATE: &'static [&'static str] = &["FECHAENTREGA", "FECHACOMPROBANTE"];
}

/// 日期字段解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DateField {
    Missing,
    Invalid,
    Valid(NaiveDate),
}

impl DateField {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            DateField::Valid(d) => Some(*d),
            _ => None,
        }
    }
}

/// 销售系统返回的原始明细行
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineItem {
    fields: Map<String, Value>,
}

impl LineItem {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// 按别名顺序取第一个非空值 (null / "" / [] 视为空)
    pub fn resolve(&self, aliases: &[&str]) -> Option<&Value> {
        aliases
            .iter()
            .filter_map(|key| self.fields.get(*key))
            .find(|v| !is_empty(v))
    }

    pub fn text(&self, aliases: &[&str]) -> Option<String> {
        self.resolve(aliases).and_then(|v| match v {
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    /// 金额字段; 无法解析时返回 None
    pub fn amount(&self, aliases: &[&str]) -> Option<BigDecimal> {
        self.resolve(aliases).and_then(parse_amount)
    }

    pub fn date(&self, aliases: &[&str]) -> DateField {
        match self.resolve(aliases) {
            None => DateField::Missing,
            Some(v) => match v.as_str().and_then(parse_date) {
                Some(d) => DateField::Valid(d),
                None => DateField::Invalid,
            },
        }
    }

    pub fn document_id(&self) -> Option<String> {
        self.text(FieldAliases::DOCUMENT_ID)
    }

    pub fn company(&self) -> Option<String> {
        self.text(FieldAliases::COMPANY)
    }
}

impl From<Value> for LineItem {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self { fields },
            _ => Self::default(),
        }
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// 解析金额: JSON 数字或数字字符串 (容忍小数逗号)
pub fn parse_amount(v: &Value) -> Option<BigDecimal> {
    match v {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Some(BigDecimal::zero());
            }
            let normalized = if s.contains(',') && !s.contains('.') {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            };
            BigDecimal::from_str(&normalized).ok()
        }
        Value::Null => Some(BigDecimal::zero()),
        _ => None,
    }
}

/// 支持: ISO 8601 (含 Z / 时区), YYYY-MM-DDTHH:MM:SS, YYYY-MM-DD, DD/MM/YYYY
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.date_naive());
        }
        if let Some(prefix) = s.get(..19) {
            if let Ok(dt) = NaiveDateTime::parse_from_str(prefix, "%Y-%m-%dT%H:%M:%S") {
                return Some(dt.date());
            }
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(v: Value) -> LineItem {
        LineItem::from(v)
    }

    #[test]
    fn resolve_prefers_first_non_empty_alias() {
        let li = item(json!({
            "INDENTIFICACIONTRIBUTARIA": "",
            "IDENTIFICACIONTRIBUTARIA": "CUIT",
        }));
        assert_eq!(li.text(FieldAliases::TAX_ID_TYPE).as_deref(), Some("CUIT"));

        let li = item(json!({
            "INDENTIFICACIONTRIBUTARIA": "DNI",
            "IDENTIFICACIONTRIBUTARIA": "CUIT",
        }));
        assert_eq!(li.text(FieldAliases::TAX_ID_TYPE).as_deref(), Some("DNI"));
    }

    #[test]
    fn resolve_treats_null_and_empty_array_as_missing() {
        let li = item(json!({
            "PROVINCIADESTINO": null,
            "PROVINCIADESTINOITEM": "Tucumán",
        }));
        assert_eq!(li.text(FieldAliases::REGION).as_deref(), Some("Tucumán"));

        let li = item(json!({ "PROVINCIADESTINO": [] }));
        assert!(li.text(FieldAliases::REGION).is_none());
    }

    #[test]
    fn amounts_accept_numbers_and_strings() {
        assert_eq!(parse_amount(&json!(100.5)), BigDecimal::from_str("100.5").ok());
        assert_eq!(parse_amount(&json!("1234,56")), BigDecimal::from_str("1234.56").ok());
        assert_eq!(parse_amount(&json!("1,234.56")), BigDecimal::from_str("1234.56").ok());
        assert_eq!(parse_amount(&json!("")), Some(BigDecimal::zero()));
        assert_eq!(parse_amount(&json!("abc")), None);
    }

    #[test]
    fn dates_in_supported_formats() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert_eq!(parse_date("2025-03-14"), Some(d));
        assert_eq!(parse_date("14/03/2025"), Some(d));
        assert_eq!(parse_date("2025-03-14T10:20:30"), Some(d));
        assert_eq!(parse_date("2025-03-14T10:20:30Z"), Some(d));
        assert_eq!(parse_date("2025-03-14T10:20:30-03:00"), Some(d));
        assert_eq!(parse_date("14.03.2025"), None);
    }

    #[test]
    fn date_field_distinguishes_missing_and_invalid() {
        let li = item(json!({ "FECHAENTREGA": "" }));
        assert_eq!(li.date(FieldAliases::DELIVERY_DATE), DateField::Missing);

        let li = item(json!({ "FECHAENTREGA": "ayer" }));
        assert_eq!(li.date(FieldAliases::DELIVERY_DATE), DateField::Invalid);
    }
}
