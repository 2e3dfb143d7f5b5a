//! # 过滤链
//!
//! ## 契约（What）
//! - [`Filter::invoke`] 以剩余链路为 `next` 处理调用，[`Filter::on_response`] 对结果做后处理；
//! - 过滤器名单读自目标地址的参数：提供方为 `service.filter`，消费方为 `reference.filter`，逗号分隔；
//! - 名单缺失或为空时原样返回被包装的调用器；
//! - 名单 `"a,b"` 的执行顺序为 `a.invoke → b.invoke → 调用器 → b.on_response → a.on_response`。
//!
//! ## 构造（How）
//! - 先把名称逐一解析为过滤器实例（未知名称即报错），再交给 [`chain_filters`] 折叠。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    chain::fold_chain,
    context::CallContext,
    error::RpcError,
    extension::ExtensionRegistry,
    invocation::RpcInvocation,
    protocol::{Invoker, Node, SharedInvoker},
    result::RpcResult,
    url::ServiceUrl,
};

mod wrapper;

pub use wrapper::ProtocolFilterWrapper;

#[async_trait]
pub trait Filter: Send + Sync {
    async fn invoke(
        &self,
        ctx: &CallContext,
        next: &SharedInvoker,
        invocation: &RpcInvocation,
    ) -> RpcResult;

    /// 结果后处理，缺省原样返回。
    async fn on_response(
        &self,
        _ctx: &CallContext,
        result: RpcResult,
        _invoker: &SharedInvoker,
        _invocation: &RpcInvocation,
    ) -> RpcResult {
        result
    }
}

pub type SharedFilter = Arc<dyn Filter>;

/// 链上的一环：对外表现为原始调用器，调用时先经过本环过滤器。
struct FilterInvoker {
    name: String,
    next: SharedInvoker,
    origin: SharedInvoker,
    filter: SharedFilter,
}

impl Node for FilterInvoker {
    fn url(&self) -> Arc<ServiceUrl> {
        self.origin.url()
    }

    fn is_available(&self) -> bool {
        self.origin.is_available()
    }

    fn destroy(&self) {
        self.origin.destroy();
    }

    fn is_destroyed(&self) -> bool {
        self.origin.is_destroyed()
    }
}

#[async_trait]
impl Invoker for FilterInvoker {
    async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult {
        let result = self.filter.invoke(ctx, &self.next, invocation).await;
        self.filter
            .on_response(ctx, result, &self.origin, invocation)
            .await
    }
}

impl std::fmt::Debug for FilterInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterInvoker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// 解析逗号分隔的过滤器名单。
pub fn parse_filter_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}

/// 按地址参数 `key` 构造过滤链。
pub fn build_invoker_chain(
    invoker: SharedInvoker,
    key: &str,
    extensions: &ExtensionRegistry,
) -> Result<SharedInvoker, RpcError> {
    let names = parse_filter_names(&invoker.url().get_param_or(key, ""));
    if names.is_empty() {
        return Ok(invoker);
    }
    let filters = names
        .into_iter()
        .map(|name| extensions.filter(&name).map(|filter| (name, filter)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(chain_filters(invoker, filters))
}

/// 把已解析的过滤器折叠到调用器外层，名单最左者最先执行。
pub fn chain_filters(invoker: SharedInvoker, filters: Vec<(String, SharedFilter)>) -> SharedInvoker {
    if filters.is_empty() {
        return invoker;
    }
    let description = filters
        .iter()
        .map(|(name, _)| name.as_str())
        .chain(std::iter::once("invoker"))
        .collect::<Vec<_>>()
        .join(" -> ");
    debug!(url = %invoker.url(), chain = %description, "filter chain built");

    let origin = Arc::clone(&invoker);
    fold_chain(invoker, filters, |next, (name, filter)| {
        Arc::new(FilterInvoker {
            name,
            next,
            origin: Arc::clone(&origin),
            filter,
        })
    })
}
