use url::form_urlencoded::byte_serialize;

fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// 把订阅地址套入每个转换服务模板，顺序与配置一致。
///
/// 模板中的 `{url}` 替换为编码后的订阅地址，`{config}` 替换为编码后的远程规则配置地址。
/// 没有配置任何模板时直接下载订阅地址本身。
pub fn candidate_urls(source_url: &str, endpoints: &[String], config_url: &str) -> Vec<String> {
    if endpoints.is_empty() {
        return vec![source_url.to_string()];
    }
    let url = encode(source_url);
    let config = encode(config_url);
    endpoints
        .iter()
        .map(|template| template.replace("{url}", &url).replace("{config}", &config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_urls_order_and_encoding() {
        let endpoints = vec![
            "http://127.0.0.1:8011/clash?sub={url}".to_string(),
            "https://api.example.com/sub?target=clash&url={url}&config={config}".to_string(),
        ];
        let urls = candidate_urls("https://s.example.com/api?token=a&x=1", &endpoints, "https://r.example.com/a.ini");
        assert_eq!(
            urls,
            vec![
                "http://127.0.0.1:8011/clash?sub=https%3A%2F%2Fs.example.com%2Fapi%3Ftoken%3Da%26x%3D1",
                "https://api.example.com/sub?target=clash&url=https%3A%2F%2Fs.example.com%2Fapi%3Ftoken%3Da%26x%3D1&config=https%3A%2F%2Fr.example.com%2Fa.ini",
            ]
        );
    }

    #[test]
    fn test_no_endpoints_uses_source() {
        assert_eq!(candidate_urls("https://a/b", &[], ""), vec!["https://a/b"]);
    }
}
