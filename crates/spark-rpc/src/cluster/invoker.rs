//! # 集群调用器
//!
//! ## 公共骨架 [`ClusterInvokerBase`]
//! - 持有目录、可用性校验开关、重选上限与 CAS 保护的销毁标志；
//! - `do_select` 实现带重选的选择算法，所有集群策略共享；
//! - 选择失败在内部消化：耗尽重选仍无可用候选时回落到最初选中的调用器，绝不无限等待。
//!
//! ## 快速失败策略 [`FailfastClusterInvoker`]
//! - 列出候选 → 空则返回“无提供方”错误 → 解析负载均衡 → 检查销毁 → 选择 → 调用一次；
//! - 每次逻辑调用最多一次到达传输层，重选只改变“调用谁”，发生在任何传输调用之前。

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{
    Cluster,
    directory::SharedDirectory,
    interceptor::build_interceptor_chain,
    loadbalance::SharedLoadBalance,
};
use crate::{
    constant::LOADBALANCE_KEY,
    context::CallContext,
    error::RpcError,
    extension::ExtensionRegistry,
    invocation::RpcInvocation,
    net::local_ip,
    protocol::{Invoker, Node, SharedInvoker, same_invoker},
    result::RpcResult,
    url::ServiceUrl,
};

/// 集群调用器公共状态。
pub struct ClusterInvokerBase {
    directory: SharedDirectory,
    extensions: Arc<ExtensionRegistry>,
    available_check: bool,
    reselect_attempts: usize,
    destroyed: AtomicBool,
}

impl ClusterInvokerBase {
    pub fn new(directory: SharedDirectory, extensions: Arc<ExtensionRegistry>) -> Self {
        let config = extensions.config();
        let available_check = config.available_check;
        let reselect_attempts = config.reselect_attempts;
        Self {
            directory,
            extensions,
            available_check,
            reselect_attempts,
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn directory(&self) -> &SharedDirectory {
        &self.directory
    }

    pub fn url(&self) -> Arc<ServiceUrl> {
        self.directory.url()
    }

    pub fn is_available(&self) -> bool {
        !self.is_destroyed() && self.directory.is_available()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// 销毁；仅首次生效并级联销毁目录。
    pub fn destroy(&self) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.directory.destroy();
        }
    }

    /// 候选为空时构造携带诊断信息的错误。
    pub fn check_invokers(
        &self,
        invokers: &[SharedInvoker],
        invocation: &RpcInvocation,
    ) -> Result<(), RpcError> {
        if !invokers.is_empty() {
            return Ok(());
        }
        Err(RpcError::NoProvider {
            method: invocation.method_name().to_owned(),
            service_key: self.directory.consumer_url().service_key(),
            directory: self.directory.url().to_string(),
            local_ip: local_ip().to_owned(),
        })
    }

    pub fn check_whether_destroyed(&self) -> Result<(), RpcError> {
        if self.is_destroyed() {
            return Err(RpcError::ClusterDestroyed {
                directory: self.directory.url().to_string(),
            });
        }
        Ok(())
    }

    /// 按首个候选地址上的 `loadbalance` 参数解析负载均衡实现。
    pub fn load_balance(&self, invokers: &[SharedInvoker]) -> Result<SharedLoadBalance, RpcError> {
        let default = &self.extensions.config().default_loadbalance;
        let name = invokers
            .first()
            .map(|invoker| invoker.url().get_param_or(LOADBALANCE_KEY, default))
            .unwrap_or_else(|| default.clone());
        self.extensions.load_balance(&name)
    }

    /// 带重选的选择。
    ///
    /// - 单个候选：可用即返回，否则登记为不健康并返回 `None`；
    /// - 多个候选：选中者不可用（且开启校验）或已在 `invoked` 中时，登记不健康并在其余候选中至多重选
    ///   `reselect_attempts` 次；重选出的候选若已调用过或不可用则剔除后继续；
    ///   耗尽后返回最初选中者。
    pub fn do_select(
        &self,
        load_balance: &SharedLoadBalance,
        invocation: &RpcInvocation,
        invokers: &[SharedInvoker],
        invoked: &[SharedInvoker],
    ) -> Option<SharedInvoker> {
        match invokers {
            [] => return None,
            [only] => {
                if only.is_available() {
                    return Some(Arc::clone(only));
                }
                self.extensions.unhealthy().mark(only);
                warn!(url = %only.url(), "the only candidate is unavailable");
                return None;
            }
            _ => {}
        }

        let selected = load_balance
            .select(invokers, invocation)
            .unwrap_or_else(|| Arc::clone(&invokers[0]));
        let already_invoked = contains(invoked, &selected);
        let unusable = self.available_check && !selected.is_available();
        if !already_invoked && !unusable {
            return Some(selected);
        }

        self.extensions.unhealthy().mark(&selected);
        let mut others: Vec<SharedInvoker> = invokers
            .iter()
            .filter(|invoker| !same_invoker(invoker, &selected))
            .cloned()
            .collect();

        for _ in 0..self.reselect_attempts {
            if others.is_empty() {
                break;
            }
            let Some(candidate) = load_balance.select(&others, invocation) else {
                break;
            };
            if contains(invoked, &candidate) {
                others.retain(|invoker| !same_invoker(invoker, &candidate));
                continue;
            }
            if self.available_check && !candidate.is_available() {
                self.extensions.unhealthy().mark(&candidate);
                others.retain(|invoker| !same_invoker(invoker, &candidate));
                continue;
            }
            debug!(url = %candidate.url(), "reselected invoker");
            return Some(candidate);
        }

        warn!(
            url = %selected.url(),
            "reselection exhausted, falling back to the original selection"
        );
        Some(selected)
    }
}

fn contains(invokers: &[SharedInvoker], target: &SharedInvoker) -> bool {
    invokers.iter().any(|invoker| same_invoker(invoker, target))
}

/// 快速失败集群调用器：不重试调用本身。
pub struct FailfastClusterInvoker {
    base: ClusterInvokerBase,
}

impl FailfastClusterInvoker {
    pub fn new(directory: SharedDirectory, extensions: Arc<ExtensionRegistry>) -> Self {
        Self {
            base: ClusterInvokerBase::new(directory, extensions),
        }
    }

    pub fn base(&self) -> &ClusterInvokerBase {
        &self.base
    }

    async fn try_invoke(
        &self,
        ctx: &CallContext,
        invocation: &RpcInvocation,
    ) -> Result<RpcResult, RpcError> {
        let invokers = self.base.directory().list(invocation);
        self.base.check_invokers(&invokers, invocation)?;
        let load_balance = self.base.load_balance(&invokers)?;
        self.base.check_whether_destroyed()?;

        let Some(selected) = self.base.do_select(&load_balance, invocation, &invokers, &[]) else {
            return Err(RpcError::NoProvider {
                method: invocation.method_name().to_owned(),
                service_key: self.base.directory().consumer_url().service_key(),
                directory: self.base.url().to_string(),
                local_ip: local_ip().to_owned(),
            });
        };
        ctx.check()?;
        invocation.set_invoker(Arc::clone(&selected));
        Ok(selected.invoke(ctx, invocation).await)
    }
}

impl Node for FailfastClusterInvoker {
    fn url(&self) -> Arc<ServiceUrl> {
        self.base.url()
    }

    fn is_available(&self) -> bool {
        self.base.is_available()
    }

    fn destroy(&self) {
        self.base.destroy();
    }

    fn is_destroyed(&self) -> bool {
        self.base.is_destroyed()
    }
}

#[async_trait]
impl Invoker for FailfastClusterInvoker {
    async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult {
        self.try_invoke(ctx, invocation)
            .await
            .unwrap_or_else(RpcResult::from_error)
    }
}

/// 快速失败集群策略。
#[derive(Default)]
pub struct FailfastCluster;

impl Cluster for FailfastCluster {
    fn join(&self, directory: SharedDirectory, extensions: &Arc<ExtensionRegistry>) -> SharedInvoker {
        let invoker: SharedInvoker = Arc::new(FailfastClusterInvoker::new(
            directory,
            Arc::clone(extensions),
        ));
        build_interceptor_chain(invoker, extensions.cluster_interceptors())
    }
}
