//! 调用管线的可调参数。
//!
//! # 契约（What）
//! - 重选次数、注销宽限期、权重缓存回收周期与导出等待窗口均来自 [`PipelineConfig`]，组件内部不写死常量；
//! - 支持从 TOML 文本加载，缺失字段回落到默认值，时长字段使用 `15s`、`50ms` 这类 humantime 表达；
//! - [`PipelineConfig::validate`] 拒绝会让管线失去进展的取值（零次重选、零轮询间隔）。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    constant::{DEFAULT_CLUSTER, DEFAULT_LOADBALANCE, DEFAULT_PROXY_FACTORY},
    error::RpcError,
};

/// 管线配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 选中候选不可用时的最大重选次数。
    pub reselect_attempts: usize,
    /// 注册协议销毁时，从注销到真正卸载本地导出之间的宽限期。
    #[serde(with = "humantime_serde")]
    pub unexport_grace: Duration,
    /// 加权轮询状态在多久未被访问后回收。
    #[serde(with = "humantime_serde")]
    pub weight_recycle_period: Duration,
    #[serde(with = "humantime_serde")]
    pub export_wait_poll: Duration,
    #[serde(with = "humantime_serde")]
    pub export_wait_timeout: Duration,
    /// 选择时是否校验候选可用性。
    pub available_check: bool,
    pub default_loadbalance: String,
    pub default_cluster: String,
    pub default_proxy_factory: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reselect_attempts: 3,
            unexport_grace: Duration::from_secs(15),
            weight_recycle_period: Duration::from_secs(60),
            export_wait_poll: Duration::from_millis(50),
            export_wait_timeout: Duration::from_secs(10),
            available_check: true,
            default_loadbalance: DEFAULT_LOADBALANCE.to_owned(),
            default_cluster: DEFAULT_CLUSTER.to_owned(),
            default_proxy_factory: DEFAULT_PROXY_FACTORY.to_owned(),
        }
    }
}

impl PipelineConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, RpcError> {
        let config: PipelineConfig =
            toml::from_str(text).map_err(|err| RpcError::Configuration {
                detail: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值合法性。
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.reselect_attempts == 0 {
            return Err(RpcError::Configuration {
                detail: "reselect_attempts must be at least 1".into(),
            });
        }
        if self.export_wait_poll.is_zero() {
            return Err(RpcError::Configuration {
                detail: "export_wait_poll must be positive".into(),
            });
        }
        if self.export_wait_timeout < self.export_wait_poll {
            return Err(RpcError::Configuration {
                detail: "export_wait_timeout must not be shorter than export_wait_poll".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            reselect_attempts = 5
            unexport_grace = "2s"
            "#,
        )
        .expect("合法配置应能解析");
        assert_eq!(config.reselect_attempts, 5);
        assert_eq!(config.unexport_grace, Duration::from_secs(2));
        assert_eq!(config.weight_recycle_period, Duration::from_secs(60));
        assert_eq!(config.default_loadbalance, "roundrobin");
    }

    #[test]
    fn zero_reselect_attempts_is_rejected() {
        let err = PipelineConfig::from_toml_str("reselect_attempts = 0").unwrap_err();
        assert_eq!(err.code(), "rpc.config.invalid");
    }

    #[test]
    fn malformed_duration_is_a_configuration_error() {
        let err = PipelineConfig::from_toml_str(r#"unexport_grace = "soon""#).unwrap_err();
        assert!(matches!(err, RpcError::Configuration { .. }));
    }
}
