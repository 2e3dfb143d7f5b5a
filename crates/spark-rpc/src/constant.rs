//! 地址参数键与默认值。
//!
//! 所有组件通过这些键读写 [`ServiceUrl`](crate::ServiceUrl) 的参数表，新增键时需保证不与既有键冲突。

pub const INTERFACE_KEY: &str = "interface";
pub const GROUP_KEY: &str = "group";
pub const VERSION_KEY: &str = "version";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const WEIGHT_KEY: &str = "weight";
pub const CLUSTER_KEY: &str = "cluster";
pub const LOADBALANCE_KEY: &str = "loadbalance";
pub const REGISTRY_KEY: &str = "registry";
pub const TAG_KEY: &str = "tag";

/// 提供方过滤链参数键。
pub const SERVICE_FILTER_KEY: &str = "service.filter";
/// 消费方过滤链参数键。
pub const REFERENCE_FILTER_KEY: &str = "reference.filter";

/// 注册中心地址上控制“简化注册”的开关，缺省为 `true`。
pub const SIMPLIFIED_KEY: &str = "simplified";

/// 易变参数：计算导出缓存键时剔除。
pub const DYNAMIC_KEY: &str = "dynamic";
pub const ENABLED_KEY: &str = "enabled";
pub const EXPORT_VOLATILE_KEYS: [&str; 2] = [DYNAMIC_KEY, ENABLED_KEY];

/// 简化注册时保留的参数。
pub const REGISTRY_RESERVED_KEYS: [&str; 3] = [GROUP_KEY, VERSION_KEY, INTERFACE_KEY];

/// 注册中心协议标签。
pub const REGISTRY_PROTOCOL: &str = "registry";
/// 进程内传输协议标签。
pub const LOCAL_PROTOCOL: &str = "injvm";

pub const DEFAULT_LOADBALANCE: &str = "roundrobin";
pub const DEFAULT_CLUSTER: &str = "failfast";
pub const DEFAULT_PROXY_FACTORY: &str = "default";
pub const DEFAULT_WEIGHT: i64 = 1;
/// 该版本号在服务键中省略。
pub const DEFAULT_VERSION: &str = "0.0.0";
