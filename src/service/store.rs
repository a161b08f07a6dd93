//! # store 模块
//!
//! 基于 JSON 文件的分组与订阅存储，目录结构：
//!
//! ```text
//! <data_dir>/groups.json                  分组 id -> 分组元数据
//! <data_dir>/groups/<group_id>.json       分组内的订阅列表（有序数组，旧版为以 key 为键的对象）
//! <data_dir>/yamls/<group_id>/<file>      订阅文档缓存
//! ```
//!
//! 读取订阅列表时会补全缺失的派生字段（名称、key、缓存文件名）并同步分组计数，
//! 只有内容确实变化时才写回。所有写入都先写临时文件再重命名。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::common::utils::{compact_timestamp, hash_hex, name_from_url, sanitize_file_name};
use crate::error::{PipelineError, Result};
use crate::model::{Group, INLINE_PREFIX, StoreConfig, SubscriptionEntry, SubscriptionPatch};

pub const DEFAULT_GROUP: &str = "default";

/// 缓存文件相对于当前时间的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheState {
    Missing,
    /// 超过最大缓存时长
    Stale,
    Fresh,
    /// 文件存在但要求强制刷新
    Forced,
}

/// 订阅列表文件的两种布局，读取后统一为数组。
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntriesFile {
    List(Vec<SubscriptionEntry>),
    /// 旧版布局，对象的键即订阅 key
    Keyed(BTreeMap<String, SubscriptionEntry>),
}

impl Default for EntriesFile {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl EntriesFile {
    /// 返回有序列表，第二项表示是否需要按数组布局写回。
    fn into_entries(self) -> (Vec<SubscriptionEntry>, bool) {
        match self {
            Self::List(entries) => (entries, false),
            Self::Keyed(map) => {
                let mut entries: Vec<SubscriptionEntry> = map
                    .into_iter()
                    .map(|(key, mut entry)| {
                        if entry.key.is_empty() {
                            entry.key = key;
                        }
                        entry
                    })
                    .collect();
                entries.sort_by(|a, b| a.submission_time.cmp(&b.submission_time));
                (entries, true)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupStore {
    config: StoreConfig,
}

impl GroupStore {
    /// 打开存储目录，确保目录结构与 `default` 分组存在。
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = Self { config };
        for dir in [store.config.data_dir.join("groups"), store.config.data_dir.join("yamls")] {
            fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        }
        store.ensure_group(DEFAULT_GROUP)?;
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn groups_file(&self) -> PathBuf {
        self.config.data_dir.join("groups.json")
    }

    fn entries_file(&self, group: &Group) -> PathBuf {
        self.config.data_dir.join("groups").join(format!("{}.json", group.id))
    }

    fn cache_dir(&self, group: &Group) -> PathBuf {
        self.config.data_dir.join("yamls").join(&group.id)
    }

    // ---------------------------------------------------------------- 分组

    fn load_groups(&self) -> Result<BTreeMap<String, Group>> {
        read_json_or_default(&self.groups_file())
    }

    fn save_groups(&self, groups: &BTreeMap<String, Group>) -> Result<()> {
        write_json(&self.groups_file(), groups)
    }

    /// 第一次引用时创建分组。
    pub fn ensure_group(&self, name: &str) -> Result<Group> {
        self.create_group(name).map(|(group, _)| group)
    }

    /// 创建分组，返回值的第二项表示本次是否新建。
    pub fn create_group(&self, name: &str) -> Result<(Group, bool)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PipelineError::InvalidInput("group name must not be empty".into()));
        }

        let mut groups = self.load_groups()?;
        let candidate = Group::new(name);
        if let Some(existing) = groups.get(&candidate.id) {
            return Ok((existing.clone(), false));
        }

        let dir = self.cache_dir(&candidate);
        fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        let entries_file = self.entries_file(&candidate);
        if !entries_file.exists() {
            write_json(&entries_file, &Vec::<SubscriptionEntry>::new())?;
        }

        groups.insert(candidate.id.clone(), candidate.clone());
        self.save_groups(&groups)?;
        info!("📁 新建分组 [{}] ({})", candidate.name, candidate.id);
        Ok((candidate, true))
    }

    /// 按创建时间排序的全部分组
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut groups: Vec<Group> = self.load_groups()?.into_values().collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(groups)
    }

    pub fn group(&self, name: &str) -> Result<Group> {
        self.load_groups()?
            .remove(&hash_hex(name.trim()))
            .ok_or_else(|| PipelineError::UnknownGroup(name.to_string()))
    }

    fn sync_count(&self, group: &Group, count: usize) -> Result<()> {
        let mut groups = self.load_groups()?;
        let stored = groups
            .entry(group.id.clone())
            .or_insert_with(|| group.clone());
        if stored.subscription_count != count {
            stored.subscription_count = count;
            self.save_groups(&groups)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------- 订阅

    /// 读取分组内的订阅，顺序即加入顺序。
    pub fn entries(&self, group: &Group) -> Result<Vec<SubscriptionEntry>> {
        let path = self.entries_file(group);
        let (mut entries, mut changed) = read_json_or_default::<EntriesFile>(&path)?.into_entries();
        if changed {
            info!("[{}] 旧版订阅列表转换为数组布局", group.name);
        }

        for entry in entries.iter_mut() {
            changed |= heal_entry(entry);
        }
        if changed {
            debug!("[{}] 补全订阅字段后写回 {}", group.name, path.display());
            write_json(&path, &entries)?;
        }

        self.sync_count(group, entries.len())?;
        Ok(entries)
    }

    fn save_entries(&self, group: &Group, entries: &[SubscriptionEntry]) -> Result<()> {
        write_json(&self.entries_file(group), &entries)?;
        self.sync_count(group, entries.len())
    }

    fn upsert(&self, group: &Group, entry: SubscriptionEntry) -> Result<SubscriptionEntry> {
        let mut entries = self.entries(group)?;
        match entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => {
                existing.expiry_time = entry.expiry_time;
                existing.submission_time = entry.submission_time;
                if entry.name.is_some() {
                    existing.name = entry.name.clone();
                }
                info!("🔁 [{}] 更新订阅 {}", group.name, existing.display_name());
            }
            None => {
                info!("➕ [{}] 新增订阅 {}", group.name, entry.display_name());
                entries.push(entry.clone());
            }
        }
        self.save_entries(group, &entries)?;
        entries
            .into_iter()
            .find(|e| e.key == entry.key)
            .ok_or(PipelineError::UnknownSubscription(entry.key))
    }

    /// 新增或更新远程订阅（按 `hash(url)` 去重），`expiry_days` 缺省时用配置的默认值。
    pub fn add_subscription(&self, group_name: &str, url: &str, expiry_days: Option<i64>) -> Result<SubscriptionEntry> {
        let url = url.trim();
        match url::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(PipelineError::InvalidInput(format!("not an http(s) url: {}", url))),
        }

        let group = self.ensure_group(group_name)?;
        let now = Utc::now();
        let days = expiry_days.unwrap_or(self.config.default_expiry_days);
        let mut entry = SubscriptionEntry {
            source_url: Some(url.to_string()),
            expiry_time: Some(now + Duration::days(days)),
            submission_time: Some(now),
            ..Default::default()
        };
        heal_entry(&mut entry);
        self.upsert(&group, entry)
    }

    /// 直接提交订阅文档内容，写入缓存后登记为内联订阅。
    pub fn add_inline_subscription(&self, group_name: &str, name: &str, text: &str) -> Result<SubscriptionEntry> {
        if !text.contains("proxies") {
            return Err(PipelineError::InvalidInput("content has no `proxies` section".into()));
        }

        let group = self.ensure_group(group_name)?;
        let now = Utc::now();
        let base = match sanitize_file_name(name) {
            s if s.is_empty() => compact_timestamp(now),
            s => s,
        };
        let file_name = format!("{}.yaml", base);
        let mut entry = SubscriptionEntry {
            name: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
            source_url: Some(format!("{}{}", INLINE_PREFIX, file_name)),
            cached_file_name: Some(file_name),
            submission_time: Some(now),
            ..Default::default()
        };
        heal_entry(&mut entry);

        self.write_cache(&group, &entry, text)?;
        self.upsert(&group, entry)
    }

    pub fn update_subscription(&self, group_name: &str, key: &str, patch: SubscriptionPatch) -> Result<SubscriptionEntry> {
        let group = self.group(group_name)?;
        let mut entries = self.entries(&group)?;
        let entry = entries
            .iter_mut()
            .find(|e| e.key == key)
            .ok_or_else(|| PipelineError::UnknownSubscription(key.to_string()))?;

        if let Some(name) = patch.name {
            entry.name = Some(name);
        }
        if let Some(url) = patch.source_url {
            entry.source_url = Some(url);
        }
        if let Some(expiry) = patch.expiry_time {
            entry.expiry_time = Some(expiry);
        }
        let updated = entry.clone();

        self.save_entries(&group, &entries)?;
        Ok(updated)
    }

    /// 删除订阅及其缓存文件。
    pub fn delete_subscription(&self, group_name: &str, key: &str) -> Result<SubscriptionEntry> {
        let group = self.group(group_name)?;
        let mut entries = self.entries(&group)?;
        let pos = entries
            .iter()
            .position(|e| e.key == key)
            .ok_or_else(|| PipelineError::UnknownSubscription(key.to_string()))?;
        let removed = entries.remove(pos);

        let path = self.cache_path(&group, &removed);
        match fs::remove_file(&path) {
            Ok(()) => debug!("🗑️ 删除缓存 {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️ 删除缓存 {} 失败: {}", path.display(), e),
        }

        self.save_entries(&group, &entries)?;
        info!("➖ [{}] 删除订阅 {}", group.name, removed.display_name());
        Ok(removed)
    }

    // ---------------------------------------------------------------- 缓存

    pub fn cache_path(&self, group: &Group, entry: &SubscriptionEntry) -> PathBuf {
        let file_name = entry
            .cached_file_name
            .clone()
            .unwrap_or_else(|| format!("{}.yaml", entry.key));
        self.cache_dir(group).join(file_name)
    }

    /// 判断缓存是否需要重新下载。内联订阅的缓存永不过期。
    pub fn cache_state(&self, group: &Group, entry: &SubscriptionEntry, force: bool, now: DateTime<Utc>) -> Result<CacheState> {
        let path = self.cache_path(group, entry);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CacheState::Missing),
            Err(e) => return Err(PipelineError::io(&path, e)),
        };
        if entry.is_inline() {
            return Ok(CacheState::Fresh);
        }
        if force {
            return Ok(CacheState::Forced);
        }

        let modified: DateTime<Utc> = metadata
            .modified()
            .map_err(|e| PipelineError::io(&path, e))?
            .into();
        if now - modified > Duration::hours(self.config.max_cache_age_hours) {
            Ok(CacheState::Stale)
        } else {
            Ok(CacheState::Fresh)
        }
    }

    pub fn write_cache(&self, group: &Group, entry: &SubscriptionEntry, content: &str) -> Result<PathBuf> {
        let path = self.cache_path(group, entry);
        write_atomic(&path, content.as_bytes())?;
        Ok(path)
    }

    pub fn read_cache(&self, group: &Group, entry: &SubscriptionEntry) -> Result<String> {
        let path = self.cache_path(group, entry);
        fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))
    }
}

/// 补全缺失的名称、key 与缓存文件名，返回是否有改动。
fn heal_entry(entry: &mut SubscriptionEntry) -> bool {
    let mut changed = false;

    if entry.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
        entry.name = Some(match entry.source_url.as_deref() {
            Some(url) if !url.starts_with(INLINE_PREFIX) => name_from_url(url),
            _ => compact_timestamp(entry.submission_time.unwrap_or_else(Utc::now)),
        });
        changed = true;
    }

    if entry.key.is_empty() {
        entry.key = match entry.source_url.as_deref() {
            Some(url) => hash_hex(url),
            None => hash_hex(entry.display_name()),
        };
        changed = true;
    }

    if entry.cached_file_name.as_deref().is_none_or(str::is_empty) {
        let base = sanitize_file_name(entry.display_name());
        let base = if base.is_empty() { hash_hex(&entry.key)[..16].to_string() } else { base };
        entry.cached_file_name = Some(format!("{}.yaml", base));
        changed = true;
    }

    changed
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(T::default()),
        Ok(text) => serde_json::from_str(&text).map_err(|e| PipelineError::json(path, e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| PipelineError::json(path, e))?;
    write_atomic(path, text.as_bytes())
}

/// 先写同目录临时文件再重命名，读者不会看到半截内容。
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|e| PipelineError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration as StdDuration, SystemTime};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, GroupStore) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            data_dir: dir.path().join("cache"),
            ..StoreConfig::default()
        };
        let store = GroupStore::open(config).unwrap();
        (dir, store)
    }

    fn set_age(path: &Path, age: StdDuration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_open_creates_default_group() {
        let (_dir, store) = open_store();
        let groups = store.list_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, DEFAULT_GROUP);
        assert!(store.data_dir().join("groups.json").exists());
        assert!(store.entries(&groups[0]).unwrap().is_empty());
    }

    #[test]
    fn test_create_group_reports_existing() {
        let (_dir, store) = open_store();
        let (_, created) = store.create_group("work").unwrap();
        assert!(created);
        let (group, created) = store.create_group("work").unwrap();
        assert!(!created);
        assert_eq!(store.group("work").unwrap(), group);
        assert!(matches!(store.group("nope"), Err(PipelineError::UnknownGroup(_))));
        assert!(store.create_group("  ").is_err());
    }

    #[test]
    fn test_add_subscription_upserts_by_url() {
        let (_dir, store) = open_store();
        let first = store.add_subscription("work", "https://sub.example.com/api?t=1", None).unwrap();
        assert_eq!(first.display_name(), "sub_example_com");
        assert_eq!(first.cached_file_name.as_deref(), Some("sub_example_com.yaml"));
        assert_eq!(first.key, hash_hex("https://sub.example.com/api?t=1"));

        let second = store.add_subscription("work", "https://sub.example.com/api?t=1", Some(7)).unwrap();
        assert_eq!(second.key, first.key);

        let group = store.group("work").unwrap();
        assert_eq!(store.entries(&group).unwrap().len(), 1);
        assert_eq!(store.group("work").unwrap().subscription_count, 1);
    }

    #[test]
    fn test_add_subscription_rejects_non_http() {
        let (_dir, store) = open_store();
        let err = store.add_subscription(DEFAULT_GROUP, "ftp://x/sub", None).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn test_entries_self_heal_legacy_file() {
        let (_dir, store) = open_store();
        let group = store.group(DEFAULT_GROUP).unwrap();
        let path = store.entries_file(&group);
        fs::write(&path, r#"[{"subscribe_url": "https://a.example.org/s"}, {"subscribe_url": "https://b.example.org/s"}]"#).unwrap();

        let entries = store.entries(&group).unwrap();
        assert_eq!(entries[0].display_name(), "a_example_org");
        assert_eq!(entries[1].key, hash_hex("https://b.example.org/s"));
        assert_eq!(entries[1].cached_file_name.as_deref(), Some("b_example_org.yaml"));

        // 补全后的字段已写回文件，计数同步
        let stored: Vec<SubscriptionEntry> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, entries);
        assert_eq!(store.group(DEFAULT_GROUP).unwrap().subscription_count, 2);
    }

    #[test]
    fn test_short_key_with_unsanitizable_name_heals() {
        let (_dir, store) = open_store();
        let group = store.group(DEFAULT_GROUP).unwrap();
        let path = store.entries_file(&group);
        fs::write(&path, r#"[{"key": "k1", "name": "香港订阅", "subscribe_url": "https://a.example.org/s"}]"#).unwrap();

        let entries = store.entries(&group).unwrap();
        assert_eq!(entries[0].key, "k1");
        let expected = format!("{}.yaml", &hash_hex("k1")[..16]);
        assert_eq!(entries[0].cached_file_name.as_deref(), Some(expected.as_str()));
        assert!(store.cache_path(&group, &entries[0]).starts_with(store.cache_dir(&group)));
    }

    #[test]
    fn test_entries_legacy_keyed_object() {
        let (_dir, store) = open_store();
        let group = store.group(DEFAULT_GROUP).unwrap();
        let path = store.entries_file(&group);
        fs::write(
            &path,
            r#"{
                "5f1d": {"subscribe_url": "https://b.example.org/s", "submissionTime": "2024-01-02T00:00:00Z"},
                "0a9c": {"subscribe_url": "https://a.example.org/s", "yaml_file_name": "a.yaml", "submissionTime": "2024-01-01T00:00:00Z"}
            }"#,
        )
        .unwrap();

        let entries = store.entries(&group).unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["0a9c", "5f1d"]);
        assert_eq!(entries[0].cached_file_name.as_deref(), Some("a.yaml"));
        assert_eq!(entries[1].display_name(), "b_example_org");

        // 写回为数组布局
        let stored: Vec<SubscriptionEntry> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, entries);
        assert_eq!(store.group(DEFAULT_GROUP).unwrap().subscription_count, 2);
    }

    #[test]
    fn test_inline_subscription() {
        let (_dir, store) = open_store();
        assert!(store.add_inline_subscription(DEFAULT_GROUP, "local", "port: 1").is_err());

        let entry = store
            .add_inline_subscription(DEFAULT_GROUP, "local", "proxies:\n  - {name: a}\n")
            .unwrap();
        assert!(entry.is_inline());
        assert_eq!(entry.source_url.as_deref(), Some("file::local.yaml"));

        let group = store.group(DEFAULT_GROUP).unwrap();
        assert_eq!(store.read_cache(&group, &entry).unwrap(), "proxies:\n  - {name: a}\n");
        let state = store.cache_state(&group, &entry, true, Utc::now()).unwrap();
        assert_eq!(state, CacheState::Fresh);
    }

    #[test]
    fn test_update_and_delete_subscription() {
        let (_dir, store) = open_store();
        let entry = store.add_subscription(DEFAULT_GROUP, "https://sub.example.com/x", None).unwrap();
        let group = store.group(DEFAULT_GROUP).unwrap();
        let cache = store.write_cache(&group, &entry, "proxies:\n").unwrap();

        let patch = SubscriptionPatch {
            name: Some("renamed".into()),
            ..Default::default()
        };
        let updated = store.update_subscription(DEFAULT_GROUP, &entry.key, patch).unwrap();
        assert_eq!(updated.display_name(), "renamed");
        assert_eq!(updated.cached_file_name, entry.cached_file_name);

        store.delete_subscription(DEFAULT_GROUP, &entry.key).unwrap();
        assert!(!cache.exists());
        assert!(store.entries(&group).unwrap().is_empty());
        assert!(matches!(
            store.delete_subscription(DEFAULT_GROUP, &entry.key),
            Err(PipelineError::UnknownSubscription(_))
        ));
    }

    #[test]
    fn test_cache_staleness() {
        let (_dir, store) = open_store();
        let entry = store.add_subscription(DEFAULT_GROUP, "https://sub.example.com/x", None).unwrap();
        let group = store.group(DEFAULT_GROUP).unwrap();
        let now = Utc::now();

        assert_eq!(store.cache_state(&group, &entry, false, now).unwrap(), CacheState::Missing);

        let path = store.write_cache(&group, &entry, "proxies:\n").unwrap();
        set_age(&path, StdDuration::from_secs(25 * 3600));
        assert_eq!(store.cache_state(&group, &entry, false, now).unwrap(), CacheState::Stale);

        set_age(&path, StdDuration::from_secs(3600));
        assert_eq!(store.cache_state(&group, &entry, false, now).unwrap(), CacheState::Fresh);
        assert_eq!(store.cache_state(&group, &entry, true, now).unwrap(), CacheState::Forced);
    }

    #[test]
    fn test_write_cache_leaves_no_temp_file() {
        let (_dir, store) = open_store();
        let entry = store.add_subscription(DEFAULT_GROUP, "https://sub.example.com/x", None).unwrap();
        let group = store.group(DEFAULT_GROUP).unwrap();
        let path = store.write_cache(&group, &entry, "one").unwrap();
        store.write_cache(&group, &entry, "two").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
