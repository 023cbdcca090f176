use crate::models::InvoiceRecord;

fn opt(val: &Option<String>) -> String {
    val.clone().unwrap_or_default()
}

/// 导出待发送发票为 CSV (带表头)
pub fn export_pending_csv<W: std::io::Write>(
    records: &[InvoiceRecord],
    writer: W,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record([
        "comprobante",
        "numero_factura",
        "nro_cae",
        "cuit",
        "empresa",
        "provincia_destino",
        "alicuota",
        "estado",
        "fecha_hora",
    ])?;

    for r in records {
        writer.write_record(&[
            r.comprobante.clone(),
            opt(&r.numero_factura),
            opt(&r.nro_cae),
            opt(&r.cuit),
            opt(&r.empresa),
            opt(&r.provincia_destino),
            r.alicuota.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            r.estado.clone(),
            r.fecha_hora.format("%Y-%m-%d %H:%M:%S").to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
