//! HTTP 接口：分组与订阅管理、触发合并、读取最新输出。

mod api;

use once_cell::sync::OnceCell;
use salvo::prelude::*;
use serde_json::json;
use tracing::info;

use crate::error::PipelineError;
use crate::fetcher::HttpDownloader;
use crate::model::WebConfig;
use crate::service::aggregator::Aggregator;

/// 全局流水线实例，HTTP 接口与启动时的首次聚合共用
static AGGREGATOR: OnceCell<Aggregator<HttpDownloader>> = OnceCell::new();

/// 程序启动时调用一次
pub fn init(aggregator: Aggregator<HttpDownloader>) -> anyhow::Result<&'static Aggregator<HttpDownloader>> {
    AGGREGATOR
        .set(aggregator)
        .map_err(|_| anyhow::anyhow!("Aggregator already initialized"))?;
    Ok(aggregator_ref())
}

pub fn aggregator_ref() -> &'static Aggregator<HttpDownloader> {
    AGGREGATOR.get().expect("Aggregator not initialized")
}

impl Scribe for PipelineError {
    fn render(self, res: &mut Response) {
        let status = match &self {
            PipelineError::UnknownGroup(_) | PipelineError::UnknownSubscription(_) => StatusCode::NOT_FOUND,
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::RunInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        res.status_code(status);
        res.render(Json(json!({ "error": self.to_string() })));
    }
}

pub fn router() -> Router {
    Router::with_path("api")
        .push(api::group_api::group_router())
        .push(api::merge_api::merge_router())
}

pub async fn serve(config: &WebConfig) -> anyhow::Result<()> {
    let acceptor = TcpListener::new(config.listen.clone()).try_bind().await?;
    info!("🌍 HTTP 接口已启动: http://{}", config.listen);
    Server::new(acceptor).serve(router()).await;
    Ok(())
}
