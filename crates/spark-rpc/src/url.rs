//! # 服务地址描述（ServiceUrl）
//!
//! ## 契约（What）
//! - 描述一次引用或一个已发现端点：协议标签、主机、端口、路径与开放式多值参数表；
//! - 参数表由读写锁保护：`get_param` 之间可并发，`set_param`/`add_param` 与读互斥；
//! - 标量读取以同名键的第一个值为准；
//! - `clone` 生成互不共享的参数副本，嵌套的 `sub_url` 以 `Arc` 共享；
//! - 文本形式 `scheme://host:port/path?k=v&...`，参数按键排序并做 URL 编码，
//!   `parse(to_string())` 可还原协议、主机、端口、路径与参数集合。
//!
//! ## 身份（How）
//! - 服务键：`[group/]interface[:version]`，版本 `0.0.0` 省略；
//! - [`ServiceUrl::key`]：`proto://host:port/?interface=..&group=..&version=..`，用于加权轮询身份与不健康表；
//! - [`ServiceUrl::cache_invoker_map_key`]：在 `key` 之上追加 `timestamp`，作为注册事件的缓存键；
//! - [`ServiceUrl::is_equals`]：主机、端口以及剔除排除键后的参数投影全部一致即视为同一地址。

use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use parking_lot::RwLock;
use url::form_urlencoded;

use crate::{
    constant::{
        DEFAULT_VERSION, GROUP_KEY, INTERFACE_KEY, TIMESTAMP_KEY, VERSION_KEY,
    },
    error::RpcError,
};

/// `get_param_duration` 在参数缺失或无法解析且未给出默认值时的回落时长。
pub const DEFAULT_PARAM_DURATION: Duration = Duration::from_secs(3);

type ParamTable = BTreeMap<String, Vec<String>>;

/// 服务地址描述。
pub struct ServiceUrl {
    protocol: String,
    host: String,
    port: Option<u16>,
    path: String,
    params: RwLock<ParamTable>,
    sub_url: Option<Arc<ServiceUrl>>,
}

impl ServiceUrl {
    /// 以协议、主机、端口构造空参数地址。
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: String::new(),
            params: RwLock::new(ParamTable::new()),
            sub_url: None,
        }
    }

    /// 解析文本形式的地址。
    pub fn parse(input: &str) -> Result<Self, RpcError> {
        let invalid = |reason: String| RpcError::InvalidUrl {
            input: input.to_owned(),
            reason,
        };
        if !input.contains("://") {
            return Err(invalid("missing `scheme://` prefix".into()));
        }
        let parsed = url::Url::parse(input).map_err(|err| invalid(err.to_string()))?;

        let mut params = ParamTable::new();
        for (key, value) in parsed.query_pairs() {
            params
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        Ok(Self {
            protocol: parsed.scheme().to_owned(),
            host: parsed.host_str().unwrap_or_default().to_owned(),
            // 协议的缺省端口在解析时被省略，这里补回。
            port: parsed.port_or_known_default(),
            path: parsed.path().to_owned(),
            params: RwLock::new(params),
            sub_url: None,
        })
    }

    pub fn with_path(mut self, path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        self.path = if path.is_empty() || path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        };
        self
    }

    /// 链式追加参数（追加而非覆盖）。
    pub fn with_param(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_param(key, value);
        self
    }

    pub fn with_sub_url(mut self, sub_url: Arc<ServiceUrl>) -> Self {
        self.sub_url = Some(sub_url);
        self
    }

    /// 复制当前地址并替换协议标签。
    pub fn with_protocol(&self, protocol: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.protocol = protocol.into();
        copy
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// `host:port` 形式的位置，端口缺失时仅为主机。
    pub fn location(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sub_url(&self) -> Option<&Arc<ServiceUrl>> {
        self.sub_url.as_ref()
    }

    /// 读取参数的第一个值。
    pub fn get_param(&self, key: &str) -> Option<String> {
        self.params
            .read()
            .get(key)
            .and_then(|values| values.first().cloned())
    }

    /// 读取参数，缺失或为空串时返回默认值。
    pub fn get_param_or(&self, key: &str, default: &str) -> String {
        match self.get_param(key) {
            Some(value) if !value.is_empty() => value,
            _ => default.to_owned(),
        }
    }

    /// 读取参数的全部值。
    pub fn get_params(&self, key: &str) -> Vec<String> {
        self.params.read().get(key).cloned().unwrap_or_default()
    }

    pub fn get_param_bool(&self, key: &str, default: bool) -> bool {
        self.get_param(key)
            .and_then(|value| parse_bool(&value))
            .unwrap_or(default)
    }

    pub fn get_param_int(&self, key: &str, default: i64) -> i64 {
        self.get_param(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    /// 读取 humantime 形式的时长（如 `500ms`、`3s`），缺失或非法时返回 `default`。
    pub fn get_param_duration(&self, key: &str, default: Option<Duration>) -> Duration {
        self.get_param(key)
            .and_then(|value| humantime::parse_duration(value.trim()).ok())
            .or(default)
            .unwrap_or(DEFAULT_PARAM_DURATION)
    }

    /// 覆盖写入参数。
    pub fn set_param(&self, key: impl Into<String>, value: impl Into<String>) {
        self.params.write().insert(key.into(), vec![value.into()]);
    }

    /// 追加参数值，已有值保持权威地位。
    pub fn add_param(&self, key: impl Into<String>, value: impl Into<String>) {
        self.params
            .write()
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    pub fn del_param(&self, key: &str) {
        self.params.write().remove(key);
    }

    /// 在读锁内遍历参数，回调返回 `false` 时提前结束。
    pub fn range_params(&self, mut visit: impl FnMut(&str, &[String]) -> bool) {
        for (key, values) in self.params.read().iter() {
            if !visit(key, values) {
                break;
            }
        }
    }

    /// 参数表快照。
    pub fn params(&self) -> BTreeMap<String, Vec<String>> {
        self.params.read().clone()
    }

    /// 参数的单值投影，并附带 `protocol`、`host`、`port`、`path` 四个位置字段。
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = self
            .params
            .read()
            .iter()
            .filter_map(|(key, values)| values.first().map(|value| (key.clone(), value.clone())))
            .collect();
        map.insert("protocol".into(), self.protocol.clone());
        map.insert("host".into(), self.host.clone());
        map.insert(
            "port".into(),
            self.port.map(|port| port.to_string()).unwrap_or_default(),
        );
        map.insert("path".into(), self.path.clone());
        map
    }

    /// 接口名：`interface` 参数，否则为去掉前导 `/` 的路径，再否则取嵌套地址的接口名。
    pub fn service(&self) -> String {
        if let Some(interface) = self.get_param(INTERFACE_KEY).filter(|v| !v.is_empty()) {
            return interface;
        }
        let trimmed = self.path.trim_start_matches('/');
        if !trimmed.is_empty() {
            return trimmed.to_owned();
        }
        self.sub_url
            .as_ref()
            .map(|sub| sub.service())
            .unwrap_or_default()
    }

    pub fn group(&self) -> String {
        self.get_param_or(GROUP_KEY, "")
    }

    pub fn version(&self) -> String {
        self.get_param_or(VERSION_KEY, "")
    }

    /// 服务键 `[group/]interface[:version]`。
    pub fn service_key(&self) -> String {
        let interface = self.get_param_or(INTERFACE_KEY, self.path.trim_start_matches('/'));
        service_key(&interface, &self.group(), &self.version())
    }

    /// 端点身份键。
    pub fn key(&self) -> String {
        format!(
            "{}://{}:{}/?interface={}&group={}&version={}",
            self.protocol,
            self.host,
            self.port.map(|port| port.to_string()).unwrap_or_default(),
            self.service(),
            self.group(),
            self.version(),
        )
    }

    /// 注册事件缓存键：身份键加时间戳。
    pub fn cache_invoker_map_key(&self) -> String {
        format!(
            "{}&{}={}",
            self.key(),
            TIMESTAMP_KEY,
            self.get_param_or(TIMESTAMP_KEY, "")
        )
    }

    /// 复制地址并剔除指定参数。
    pub fn clone_except_params(&self, excludes: &[&str]) -> Self {
        let mut copy = self.clone();
        copy.params
            .get_mut()
            .retain(|key, _| !excludes.contains(&key.as_str()));
        copy
    }

    /// 复制地址并仅保留指定参数。
    pub fn clone_with_params(&self, reserve: &[&str]) -> Self {
        let mut copy = self.clone();
        copy.params
            .get_mut()
            .retain(|key, _| reserve.contains(&key.as_str()));
        copy
    }

    /// 复制地址并按谓词保留参数。
    pub fn clone_retaining(&self, mut keep: impl FnMut(&str) -> bool) -> Self {
        let mut copy = self.clone();
        copy.params.get_mut().retain(|key, _| keep(key));
        copy
    }

    /// 判断两个地址是否指向同一端点：主机、端口相同且剔除 `excludes` 后的参数投影一致。
    pub fn is_equals(left: &ServiceUrl, right: &ServiceUrl, excludes: &[&str]) -> bool {
        if left.host != right.host || left.port != right.port {
            return false;
        }
        let project = |url: &ServiceUrl| {
            let mut map = url.to_map();
            map.retain(|key, _| !excludes.contains(&key.as_str()));
            map
        };
        project(left) == project(right)
    }
}

/// 组装服务键，接口为空时返回空串。
pub fn service_key(interface: &str, group: &str, version: &str) -> String {
    if interface.is_empty() {
        return String::new();
    }
    let mut key = String::with_capacity(group.len() + interface.len() + version.len() + 2);
    if !group.is_empty() {
        key.push_str(group);
        key.push('/');
    }
    key.push_str(interface);
    if !version.is_empty() && version != DEFAULT_VERSION {
        key.push(':');
        key.push_str(version);
    }
    key
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

impl Clone for ServiceUrl {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol.clone(),
            host: self.host.clone(),
            port: self.port,
            path: self.path.clone(),
            params: RwLock::new(self.params.read().clone()),
            sub_url: self.sub_url.clone(),
        }
    }
}

impl fmt::Display for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.location())?;
        if !self.path.is_empty() {
            f.write_str(&self.path)?;
        }
        let params = self.params.read();
        if !params.is_empty() {
            let mut encoder = form_urlencoded::Serializer::new(String::new());
            for (key, values) in params.iter() {
                for value in values {
                    encoder.append_pair(key, value);
                }
            }
            write!(f, "?{}", encoder.finish())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceUrl")
            .field(&self.to_string())
            .finish()
    }
}

impl FromStr for ServiceUrl {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceUrl::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_key_omits_default_version_and_empty_group() {
        assert_eq!(service_key("Echo", "g1", "v1"), "g1/Echo:v1");
        assert_eq!(service_key("Echo", "", "0.0.0"), "Echo");
        assert_eq!(service_key("", "g1", "v1"), "");
    }

    #[test]
    fn first_value_is_authoritative_for_scalar_reads() {
        let url = ServiceUrl::new("tri", "127.0.0.1", Some(20000))
            .with_param("weight", "3")
            .with_param("weight", "7");
        assert_eq!(url.get_param_int("weight", 1), 3);
        assert_eq!(url.get_params("weight"), vec!["3", "7"]);
        url.set_param("weight", "5");
        assert_eq!(url.get_params("weight"), vec!["5"]);
    }

    #[test]
    fn service_falls_back_to_path_then_sub_url() {
        let provider = Arc::new(ServiceUrl::new("tri", "10.0.0.1", Some(1)).with_path("Echo"));
        assert_eq!(provider.service(), "Echo");
        let registry = ServiceUrl::new("registry", "10.0.0.9", Some(2181)).with_sub_url(provider);
        assert_eq!(registry.service(), "Echo");
    }

    #[test]
    fn typed_reads_fall_back_on_garbage() {
        let url = ServiceUrl::new("tri", "h", None)
            .with_param("flag", "yes")
            .with_param("timeout", "250ms")
            .with_param("bad", "soon");
        assert!(url.get_param_bool("flag", true));
        assert_eq!(
            url.get_param_duration("timeout", None),
            Duration::from_millis(250)
        );
        assert_eq!(url.get_param_duration("bad", None), DEFAULT_PARAM_DURATION);
        assert_eq!(
            url.get_param_duration("missing", Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn parse_rejects_scheme_less_input() {
        let err = ServiceUrl::parse("127.0.0.1:80/Echo").unwrap_err();
        assert_eq!(err.code(), "rpc.url.invalid");
    }
}
