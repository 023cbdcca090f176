use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

use super::line_item::DateField;

/// 聚合后的 remito (同一 COMPROBANTE 的所有明细行合并)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub internal_number: Option<String>,
    pub client: Option<String>,
    pub tax_id_type: Option<String>,
    pub tax_id_number: Option<String>,
    pub region: Option<String>,
    pub payment_terms: Option<String>,
    pub untaxed_amount: BigDecimal,
    pub taxed_amount: BigDecimal,
    pub exempt_amount: BigDecimal,
    pub total_amount: BigDecimal,
    pub delivery_date: DateField,
    /// 合并的明细行数
    pub line_count: usize,
}

impl Document {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            internal_number: None,
            client: None,
            tax_id_type: None,
            tax_id_number: None,
            region: None,
            payment_terms: None,
            untaxed_amount: BigDecimal::zero(),
            taxed_amount: BigDecimal::zero(),
            exempt_amount: BigDecimal::zero(),
            total_amount: BigDecimal::zero(),
            delivery_date: DateField::Missing,
            line_count: 0,
        }
    }

    /// 证件号去掉非数字字符 (CUIT "20-22301293-1" -> "20223012931")
    pub fn normalized_tax_id(&self) -> Option<String> {
        self.tax_id_number.as_deref().and_then(normalize_tax_id)
    }

    pub fn is_zero_amount(&self) -> bool {
        self.untaxed_amount.is_zero()
    }
}

pub fn normalize_tax_id(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then_some(digits)
}
