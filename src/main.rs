use remito_invoicer::clients::{HttpRateLookup, HttpSalesSource, RateLookup, WebhookNotifier};
use remito_invoicer::config::RateSourceMode;
use remito_invoicer::db::{InvoiceLedger, PadronRateLookup, PgInvoiceLedger};
use remito_invoicer::driver::RemoteUiDriver;
use remito_invoicer::service::WithholdingCalculator;
use remito_invoicer::{api, create_pool, ensure_schema, AppConfig, BatchRunner, JobManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 使用本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = Arc::new(AppConfig::from_env()?);
    info!(
        "Starting server on {}:{} (rates: {:?}, driver: {})",
        config.server.host, config.server.port, config.rates.mode, config.driver.base_url
    );

    // 数据库连接池 + 建表
    let pool = create_pool(&config.database).await?;
    ensure_schema(&pool).await?;
    info!("Database pool created");

    // 外部协作方
    let ledger: Arc<dyn InvoiceLedger> = Arc::new(PgInvoiceLedger::new(pool.clone()));
    let rate_timeout = Duration::from_secs(config.rates.timeout_secs);
    let rates: Arc<dyn RateLookup> = match config.rates.mode {
        RateSourceMode::Http => Arc::new(HttpRateLookup::new(config.rates.url.clone(), rate_timeout)?),
        RateSourceMode::Padron => Arc::new(PadronRateLookup::new(pool.clone(), rate_timeout)),
    };
    let sales = Arc::new(HttpSalesSource::new(&config.sales)?);
    let driver = Arc::new(RemoteUiDriver::new(&config.driver)?);
    let calculator = Arc::new(WithholdingCalculator::new(rates, config.withholding.clone()));
    let notifier = WebhookNotifier::new(Duration::from_secs(config.webhook.timeout_secs))?;

    // 作业管理器 (进程内, 随服务启动/关闭)
    let runner = Arc::new(BatchRunner::new(sales, driver, ledger.clone(), calculator, config.clone()));
    let jobs = JobManager::new(runner, notifier, config.webhook.default_url.clone());

    let app = api::router(api::AppState {
        jobs: jobs.clone(),
        ledger,
    });

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/runs                          - start a run");
    info!("  GET  /api/runs/:job_id                  - run status");
    info!("  GET  /api/runs                          - list runs");
    info!("  GET  /api/invoices/pending?company=     - invoices pending to send");
    info!("  GET  /api/invoices/pending/export       - same, as CSV");
    info!("  POST /api/invoices/:key/sent            - mark invoice as sent");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    jobs.shutdown();
    pool.close().await;
    Ok(())
}
