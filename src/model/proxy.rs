use serde::Serialize;

/// 单次聚合运行中解析出的一条代理定义。
///
/// 只存在于本次运行的注册表中，不单独持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyRecord {
    /// 原始定义行的哈希，字节完全相同的定义共享同一个 id。
    pub id: String,

    /// 冲突处理后的名称，本次运行内唯一（不含引号）。
    pub display_name: String,

    /// 订阅文档中声明的原始名称。
    pub original_name: String,

    /// 写回模板的单行定义，名称字段已替换为 `display_name`。
    pub raw_text: String,

    /// 来源缓存文件名，仅用于日志。
    pub source: String,
}
