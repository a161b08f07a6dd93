//! # aggregator 模块
//!
//! 串联整条流水线：下载订阅 → 解析代理 → 注册去重 → 分组 → 写入模板。
//!
//! - [`Aggregator::merge_group`]：单个分组，使用全新的注册表；
//! - [`Aggregator::run_all`]：按创建时间依次处理全部分组，共用一个注册表；
//! - 两者都需要先拿到运行锁，已有运行进行中时直接返回 `RunInProgress`。
//!
//! 单个订阅或单个分组的失败只记录在汇总中，不会中断其余部分。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::common::cache::LATEST_OUTPUTS;
use crate::error::{PipelineError, Result};
use crate::fetcher::{AttemptError, Downloader, RetryPolicy, candidate_urls, check_content};
use crate::model::{AppConfig, FetchConfig, Group, ProxyRecord, TemplateConfig};
use crate::section::{IndentScanner, split_lines};
use crate::service::document::extract_proxy_entries;
use crate::service::grouper::RuleTable;
use crate::service::merger::{MergedOutput, TemplateMerger};
use crate::service::registry::{DocumentStats, ProxyRegistry, has_name};
use crate::service::store::{CacheState, GroupStore};

/// 使用哪个模板
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateChoice {
    #[default]
    Default,
    Custom,
}

impl TemplateChoice {
    /// 查询参数取值，无法识别时使用默认模板
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "custom" => Self::Custom,
            _ => Self::Default,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDownload {
    pub name: String,
    pub errors: Vec<AttemptError>,
}

/// 一个分组的下载结果，按处理方式归类订阅名称。
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadSummary {
    /// 缓存未过期，未下载
    pub skipped: Vec<String>,
    pub inline: Vec<String>,
    /// 之前没有缓存
    pub downloaded: Vec<String>,
    /// 强制刷新
    pub redownloaded: Vec<String>,
    /// 缓存过期后重新下载
    pub expired: Vec<String>,
    pub failed: Vec<FailedDownload>,
    pub missing_url: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadSummary {
    pub documents: usize,
    pub stats: DocumentStats,
    /// 订阅已过有效期，未参与合并
    pub expired: Vec<String>,
    pub missing_cache: Vec<String>,
    pub errors: Vec<String>,
    /// 本分组引用的代理 id，按出现顺序去重
    #[serde(skip)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: String,
    pub download: DownloadSummary,
    pub load: LoadSummary,
    pub output: MergedOutput,
    pub updated_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    pub group: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub total_proxies: usize,
    pub groups: Vec<GroupReport>,
    pub failures: Vec<GroupFailure>,
}

pub struct Aggregator<D: Downloader> {
    store: GroupStore,
    downloader: D,
    fetch: FetchConfig,
    template: TemplateConfig,
    merger: TemplateMerger,
    run_lock: Mutex<()>,
}

impl<D: Downloader> Aggregator<D> {
    pub fn new(config: &AppConfig, store: GroupStore, downloader: D) -> Self {
        let merger = TemplateMerger::new(
            RuleTable::from_config(&config.rules),
            &config.merge,
            config.output.clone(),
        );
        Self {
            store,
            downloader,
            fetch: config.fetch.clone(),
            template: config.template.clone(),
            merger,
            run_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &GroupStore {
        &self.store
    }

    /// 下载订阅文档并校验：基础内容检查通过，且至少有一个带名称的代理条目。
    fn validate(&self, body: &str) -> Result<()> {
        check_content(body, &self.fetch.invalid_markers)?;
        let entries = extract_proxy_entries(&IndentScanner, body)
            .map_err(|_| PipelineError::InvalidContent("no proxies section".into()))?;
        if entries.iter().any(|entry| has_name(entry)) {
            Ok(())
        } else {
            Err(PipelineError::InvalidContent("no named proxy entries".into()))
        }
    }

    /// 按缓存状态逐个下载分组内的订阅；失败的订阅保留原有缓存。
    pub async fn download_group(&self, group: &Group, force: bool) -> Result<DownloadSummary> {
        info!("========== [订阅下载阶段: {}] ==========", group.name);
        let mut summary = DownloadSummary::default();
        let entries = self.store.entries(group)?;
        let now = Utc::now();

        for entry in &entries {
            let name = entry.display_name().to_string();
            if entry.is_inline() {
                summary.inline.push(name);
                continue;
            }
            let Some(url) = entry.source_url.as_deref().filter(|u| !u.trim().is_empty()) else {
                warn!("⚠️ [{}] 订阅缺少地址", name);
                summary.missing_url.push(name);
                continue;
            };

            let state = match self.store.cache_state(group, entry, force, now) {
                Ok(state) => state,
                Err(e) => {
                    error!("❌ [{}] 读取缓存状态失败: {}", name, e);
                    summary.failed.push(FailedDownload {
                        name,
                        errors: vec![AttemptError { url: url.to_string(), error: e.to_string() }],
                    });
                    continue;
                }
            };
            if state == CacheState::Fresh {
                info!("📦 [{}] 缓存有效，跳过下载 (剩余有效期: {})", name, entry.remaining(now));
                summary.skipped.push(name);
                continue;
            }

            let policy = RetryPolicy::new(
                candidate_urls(url, &self.fetch.endpoints, &self.fetch.config_url),
                self.fetch.retry_delay(),
            );
            let report = policy.run(&self.downloader, |body: &str| self.validate(body)).await;

            let Some(body) = report.body() else {
                error!("❌ [{}] 下载失败，共尝试 {} 次", name, report.attempts);
                summary.failed.push(FailedDownload { name, errors: report.errors });
                continue;
            };
            match self.store.write_cache(group, entry, body) {
                Ok(path) => {
                    info!("✅ [{}] 已缓存到 {}", name, path.display());
                    match state {
                        CacheState::Missing => summary.downloaded.push(name),
                        CacheState::Stale => summary.expired.push(name),
                        CacheState::Forced | CacheState::Fresh => summary.redownloaded.push(name),
                    }
                }
                Err(e) => {
                    error!("❌ [{}] 写入缓存失败: {}", name, e);
                    summary.failed.push(FailedDownload {
                        name,
                        errors: vec![AttemptError { url: url.to_string(), error: e.to_string() }],
                    });
                }
            }
        }

        info!(
            "📊 [{}] 下载完成: 新下载 {}，重新下载 {}，过期刷新 {}，跳过 {}，内联 {}，失败 {}，缺少地址 {}",
            group.name,
            summary.downloaded.len(),
            summary.redownloaded.len(),
            summary.expired.len(),
            summary.skipped.len(),
            summary.inline.len(),
            summary.failed.len(),
            summary.missing_url.len()
        );
        Ok(summary)
    }

    /// 按加入顺序解析分组内的缓存文档，代理写入 `registry`。
    pub fn load_group(&self, group: &Group, registry: &mut ProxyRegistry) -> Result<LoadSummary> {
        info!("========== [代理解析阶段: {}] ==========", group.name);
        let mut summary = LoadSummary::default();
        let mut seen = HashSet::new();
        let now = Utc::now();

        for entry in self.store.entries(group)? {
            let name = entry.display_name().to_string();
            if entry.is_expired(now) {
                warn!("⏰ [{}] 订阅已过期，跳过", name);
                summary.expired.push(name);
                continue;
            }

            let text = match self.store.read_cache(group, &entry) {
                Ok(text) => text,
                Err(e) => {
                    warn!("⚠️ [{}] 没有可用缓存: {}", name, e);
                    summary.missing_cache.push(name);
                    continue;
                }
            };
            let lines = match extract_proxy_entries(&IndentScanner, &text) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!("⚠️ [{}] 解析失败: {}", name, e);
                    summary.errors.push(format!("{}: {}", name, e));
                    continue;
                }
            };

            let source = entry.cached_file_name.as_deref().unwrap_or(&name);
            let mut stats = DocumentStats::default();
            for line in &lines {
                let resolution = registry.resolve(line, source);
                stats.record(line, &resolution);
                if let Some(id) = resolution.id() {
                    if seen.insert(id.to_string()) {
                        summary.member_ids.push(id.to_string());
                    }
                }
            }
            info!(
                "📄 [{}] 共 {} 条：新增 {}，改名 {}，重复 {}，无名称 {}",
                name, stats.total, stats.added, stats.renamed, stats.duplicates, stats.unnamed
            );
            summary.documents += 1;
            summary.stats.merge(&stats);
        }

        Ok(summary)
    }

    /// 自定义模板不存在时退回默认模板
    fn template_path(&self, choice: TemplateChoice) -> PathBuf {
        match choice {
            TemplateChoice::Custom if self.template.custom_path.exists() => self.template.custom_path.clone(),
            TemplateChoice::Custom => {
                warn!("⚠️ 自定义模板 {} 不存在，使用默认模板", self.template.custom_path.display());
                self.template.default_path.clone()
            }
            TemplateChoice::Default => self.template.default_path.clone(),
        }
    }

    async fn process_group(&self, group: &Group, registry: &mut ProxyRegistry, choice: TemplateChoice, force: bool) -> Result<GroupReport> {
        let download = self.download_group(group, force).await?;
        let load = self.load_group(group, registry)?;

        info!("========== [模板合并阶段: {}] ==========", group.name);
        let template_path = self.template_path(choice);
        let template = fs::read_to_string(&template_path).map_err(|e| PipelineError::io(&template_path, e))?;

        let records: Vec<&ProxyRecord> = load.member_ids.iter().filter_map(|id| registry.get(id)).collect();
        let (records, buckets) = self.merger.prepare(records);
        for (tag, count) in buckets.counts() {
            info!("🏷️ [{}] {}: {} 个", group.name, tag, count);
        }

        let doc = self.merger.merge(&split_lines(&template), &records, &buckets);
        let now = Utc::now();
        let path = self.merger.write(&template_path, &group.name, &doc, now)?;

        let output = MergedOutput {
            group: group.name.clone(),
            template: template_path,
            path,
            proxy_count: doc.proxy_count,
            missing: doc.missing.clone(),
            created_at: now,
            content: doc.text(),
        };
        LATEST_OUTPUTS.set(group.name.clone(), output.clone());

        Ok(GroupReport {
            group: group.name.clone(),
            download,
            load,
            output,
            updated_groups: doc.updated_groups,
        })
    }

    /// 单独合并一个分组，使用全新的注册表。
    pub async fn merge_group(&self, name: &str, choice: TemplateChoice, force: bool) -> Result<GroupReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| PipelineError::RunInProgress)?;
        let group = self.store.group(name)?;
        let mut registry = ProxyRegistry::new();
        self.process_group(&group, &mut registry, choice, force).await
    }

    /// 按创建时间依次处理全部分组，所有分组共用一个注册表。
    pub async fn run_all(&self, force: bool, choice: TemplateChoice) -> Result<RunSummary> {
        let _guard = self.run_lock.try_lock().map_err(|_| PipelineError::RunInProgress)?;
        let started_at = Utc::now();
        let start = Instant::now();
        info!("🚀 开始聚合全部分组 (force = {}, template = {:?})", force, choice);

        let mut registry = ProxyRegistry::new();
        let mut groups = Vec::new();
        let mut failures = Vec::new();
        for group in self.store.list_groups()? {
            match self.process_group(&group, &mut registry, choice, force).await {
                Ok(report) => groups.push(report),
                Err(e) => {
                    error!("❌ 分组 [{}] 处理失败: {}", group.name, e);
                    failures.push(GroupFailure {
                        group: group.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if registry.is_empty() {
            warn!("⚠️ 本次运行没有解析到任何代理");
        }
        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!("========== [聚合完成 ✅] ==========");
        info!(
            "✅ 分组 {} 个成功，{} 个失败，共 {} 个代理，耗时 {}ms",
            groups.len(),
            failures.len(),
            registry.len(),
            elapsed_ms
        );

        Ok(RunSummary {
            started_at,
            elapsed_ms,
            total_proxies: registry.len(),
            groups,
            failures,
        })
    }
}
