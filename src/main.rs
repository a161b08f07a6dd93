mod common;
mod error;
mod fetcher;
mod model;
mod section;
mod service;
mod web;

use tracing::{error, info};

use crate::common::log::init_logging;
use crate::fetcher::HttpDownloader;
use crate::model::APP_CONFIG;
use crate::service::aggregator::{Aggregator, TemplateChoice};
use crate::service::store::GroupStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 必须是程序第一个调用！
    init_logging(&APP_CONFIG.log)?;

    let store = GroupStore::open(APP_CONFIG.store.clone())?;
    info!("数据目录: {}", store.data_dir().display());
    let downloader = HttpDownloader::new(&APP_CONFIG.fetch)?;
    let aggregator = web::init(Aggregator::new(&APP_CONFIG, store, downloader))?;

    info!("========== [启动聚合] ==========");
    match aggregator.run_all(false, TemplateChoice::Default).await {
        Ok(summary) => info!(
            "启动聚合完成：{} 个分组，{} 个代理",
            summary.groups.len(),
            summary.total_proxies
        ),
        Err(e) => error!("启动聚合失败: {}", e),
    }

    if APP_CONFIG.web.enabled {
        web::serve(&APP_CONFIG.web).await?;
    }

    Ok(())
}
