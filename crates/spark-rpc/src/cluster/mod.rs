//! # cluster 模块
//!
//! 容错策略层：目录产出候选、路由链收窄、负载均衡挑选、集群调用器驱动选择与重选。
//!
//! - `directory`：[`Directory`] 契约与固定集合目录；
//! - `router`：路由链与标签路由；
//! - `loadbalance`：平滑加权轮询；
//! - `invoker`：集群调用器骨架与快速失败策略；
//! - `interceptor`：集群外层拦截链；
//! - `health`：不健康调用器登记表。

use std::sync::Arc;

use crate::{extension::ExtensionRegistry, protocol::SharedInvoker};

mod directory;
mod health;
mod interceptor;
mod invoker;
mod loadbalance;
pub mod router;

pub use directory::{Directory, SharedDirectory, StaticDirectory};
pub use health::UnhealthyInvokers;
pub use interceptor::{ClusterInterceptor, SharedClusterInterceptor, build_interceptor_chain};
pub use invoker::{ClusterInvokerBase, FailfastCluster, FailfastClusterInvoker};
pub use loadbalance::{
    LoadBalance, RoundRobinLoadBalance, SharedLoadBalance, invoker_weight, round_robin_cache_key,
};

/// 集群策略：把目录合并为一个对外的调用器。
pub trait Cluster: Send + Sync {
    fn join(&self, directory: SharedDirectory, extensions: &Arc<ExtensionRegistry>) -> SharedInvoker;
}

pub type SharedCluster = Arc<dyn Cluster>;
