use bigdecimal::BigDecimal;
use indexmap::IndexMap;

use crate::models::{DateField, Document, FieldAliases, LineItem};

/// 明细行 -> 单据聚合
///
/// 同一 COMPROBANTE 的金额字段求和, 表头字段取第一个非空值,
/// 结果按单据号排序。对同一批输入重复执行结果相同, 与输入顺序无关。
pub fn aggregate(items: &[LineItem]) -> Vec<Document> {
    let mut grouped: IndexMap<String, Document> = IndexMap::new();
    let mut dropped = 0usize;

    for item in items {
        let Some(id) = item.document_id() else {
            dropped += 1;
            continue;
        };
        let doc = grouped
            .entry(id.clone())
            .or_insert_with(|| Document::new(id.clone()));
        doc.line_count += 1;

        accumulate(&mut doc.untaxed_amount, item, FieldAliases::UNTAXED, &id);
        accumulate(&mut doc.taxed_amount, item, FieldAliases::TAXED, &id);
        accumulate(&mut doc.exempt_amount, item, FieldAliases::EXEMPT, &id);
        accumulate(&mut doc.total_amount, item, FieldAliases::TOTAL, &id);

        coalesce(&mut doc.internal_number, item, FieldAliases::INTERNAL_NUMBER);
        coalesce(&mut doc.client, item, FieldAliases::CLIENT);
        coalesce(&mut doc.tax_id_type, item, FieldAliases::TAX_ID_TYPE);
        coalesce(&mut doc.tax_id_number, item, FieldAliases::TAX_ID_NUMBER);
        coalesce(&mut doc.region, item, FieldAliases::REGION);
        coalesce(&mut doc.payment_terms, item, FieldAliases::PAYMENT_TERMS);

        if doc.delivery_date == DateField::Missing {
            doc.delivery_date = item.date(FieldAliases::DELIVERY_DATE);
        }
    }

    if dropped > 0 {
        tracing::warn!("{} line items without document id were dropped", dropped);
    }

    let mut documents: Vec<Document> = grouped.into_values().collect();
    documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));
    documents
}

fn accumulate(total: &mut BigDecimal, item: &LineItem, aliases: &[&str], document_id: &str) {
    let Some(raw) = item.resolve(aliases) else {
        return;
    };
    match crate::models::line_item::parse_amount(raw) {
        Some(v) => *total += v,
        None => tracing::warn!(
            "unparseable amount {} = {} on {}, counted as zero",
            aliases.first().copied().unwrap_or_default(),
            raw,
            document_id
        ),
    }
}

fn coalesce(slot: &mut Option<String>, item: &LineItem, aliases: &[&str]) {
    if slot.is_none() {
        *slot = item.text(aliases);
    }
}
