use sqlx::PgPool;

/// 发票台账表; comprobante 唯一 (一张 remito 只开一张发票)
const CREATE_LEDGER: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS facturas_generadas (
        id SERIAL PRIMARY KEY,
        fecha_hora TIMESTAMP NOT NULL,
        comprobante VARCHAR(100) NOT NULL,
        cuit VARCHAR(20),
        empresa VARCHAR(200),
        provincia_destino VARCHAR(100),
        alicuota NUMERIC(10,4),
        numero_factura VARCHAR(100),
        nro_cae VARCHAR(100),
        estado VARCHAR(30) NOT NULL DEFAULT 'Generado',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "ALTER TABLE facturas_generadas ADD COLUMN IF NOT EXISTS nro_cae VARCHAR(100)",
    "CREATE INDEX IF NOT EXISTS idx_facturas_estado ON facturas_generadas(estado)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_facturas_comprobante ON facturas_generadas(comprobante)",
];

/// 启动时建表 (幂等)
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for stmt in CREATE_LEDGER {
        sqlx::query(stmt).execute(pool).await?;
    }
    tracing::info!("Table facturas_generadas created/verified");
    Ok(())
}
