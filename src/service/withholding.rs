use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;

use crate::clients::rates::{RateLookup, RateLookupError};
use crate::config::WithholdingConfig;
use crate::models::Document;

#[derive(Debug, thiserror::Error)]
pub enum WithholdingError {
    /// 查不到税率且目的地为升级省份: 需要先更新客户主数据, 不自动套用默认税率
    #[error(
        "no withholding rate found for {tax_id} (destination {region}); customer master must be \
         updated before invoicing, default rate {default_rate}% was not applied"
    )]
    Escalation {
        tax_id: String,
        region: String,
        default_rate: BigDecimal,
    },
    #[error("withholding mismatch on {document_id}: expected {expected}, ERP computed {reported}")]
    Mismatch {
        document_id: String,
        expected: BigDecimal,
        reported: String,
    },
    #[error("document {0} has a fiscal id type but no usable tax id number")]
    MissingTaxId(String),
    #[error("rate lookup failed")]
    Lookup(#[from] RateLookupError),
}

/// 单据的 percepción 计算结果
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    /// 规范化后的税号 (仅 fiscal 类型)
    pub tax_id: Option<String>,
    pub rate: BigDecimal,
    pub amount: BigDecimal,
    /// 是否需要与 ERP 表单计算结果交叉校验
    pub requires_validation: bool,
}

impl Assessment {
    fn exempt() -> Self {
        Self {
            tax_id: None,
            rate: BigDecimal::zero(),
            amount: BigDecimal::zero(),
            requires_validation: false,
        }
    }
}

/// 金额四舍五入到 2 位小数 (half away from zero)
pub fn round_money(value: &BigDecimal) -> BigDecimal {
    let hundred = BigDecimal::from(100);
    let scaled = value * &hundred;
    let truncated = scaled.with_scale(0);
    let twice_frac = (&scaled - &truncated) * BigDecimal::from(2);
    let one = BigDecimal::from(1);
    let rounded = if twice_frac >= one {
        truncated + one
    } else if twice_frac <= -one.clone() {
        truncated - one
    } else {
        truncated
    };
    (rounded / hundred).with_scale(2)
}

/// 省份名比较用: 小写并去掉西语重音 ("TUCUMÁN" == "tucuman")
fn fold_region(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// 期望 percepción = 未税金额 × 税率 / 100, 保留两位
pub fn expected_withholding(untaxed: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
    round_money(&(untaxed * rate / BigDecimal::from(100)))
}

pub struct WithholdingCalculator {
    rates: Arc<dyn RateLookup>,
    config: WithholdingConfig,
}

impl WithholdingCalculator {
    pub fn new(rates: Arc<dyn RateLookup>, config: WithholdingConfig) -> Self {
        Self { rates, config }
    }

    pub fn is_fiscal(&self, doc: &Document) -> bool {
        doc.tax_id_type.as_deref().is_some_and(|t| {
            self.config
                .fiscal_id_types
                .iter()
                .any(|f| f.trim().eq_ignore_ascii_case(t.trim()))
        })
    }

    fn is_escalation_region(&self, region: Option<&str>) -> bool {
        let target = fold_region(&self.config.escalation_region);
        !target.is_empty() && region.is_some_and(|r| fold_region(r).contains(&target))
    }

    /// 计算单据的期望 percepción
    pub async fn assess(&self, doc: &Document) -> Result<Assessment, WithholdingError> {
        if !self.is_fiscal(doc) {
            return Ok(Assessment::exempt());
        }
        let tax_id = doc
            .normalized_tax_id()
            .ok_or_else(|| WithholdingError::MissingTaxId(doc.document_id.clone()))?;

        let rates = self.rates.get_rates(std::slice::from_ref(&tax_id)).await?;
        let rate = match rates.get(&tax_id).cloned().flatten() {
            Some(rate) => rate,
            None if self.is_escalation_region(doc.region.as_deref()) => {
                return Err(WithholdingError::Escalation {
                    tax_id,
                    region: doc.region.clone().unwrap_or_default(),
                    default_rate: self.config.escalation_default_rate.clone(),
                });
            }
            None => {
                tracing::info!("No rate for {} outside {}, withholding is zero", tax_id, self.config.escalation_region);
                BigDecimal::zero()
            }
        };

        let amount = expected_withholding(&doc.untaxed_amount, &rate);
        Ok(Assessment {
            tax_id: Some(tax_id),
            rate,
            amount,
            requires_validation: true,
        })
    }

    /// 交叉校验 ERP 表单的计算值, 差额超过容差即失败
    pub fn cross_validate(
        &self,
        document_id: &str,
        assessment: &Assessment,
        reported: Option<&BigDecimal>,
    ) -> Result<(), WithholdingError> {
        if !assessment.requires_validation {
            return Ok(());
        }
        let zero = BigDecimal::zero();
        let value = match reported {
            Some(v) => v,
            // 表单不显示 percepción 只在期望为 0 时可接受
            None if assessment.amount.is_zero() => &zero,
            None => {
                return Err(WithholdingError::Mismatch {
                    document_id: document_id.to_string(),
                    expected: assessment.amount.clone(),
                    reported: "none".to_string(),
                })
            }
        };
        if (&assessment.amount - value).abs() > self.config.tolerance {
            return Err(WithholdingError::Mismatch {
                document_id: document_id.to_string(),
                expected: assessment.amount.clone(),
                reported: value.to_string(),
            });
        }
        Ok(())
    }
}
