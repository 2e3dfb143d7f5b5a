//! 标签路由。
//!
//! 请求标签取自调用附件 `tag`，其次是消费方地址参数 `tag`：
//! - 有标签：保留 `tag` 参数与之相同的提供方；无一匹配时回落到未打标签的提供方；
//! - 无标签：保留未打标签的提供方；若全部都带标签则原样放行。

use std::sync::Arc;

use super::{Router, RouterFactory, SharedRouter};
use crate::{
    constant::TAG_KEY, error::RpcError, invocation::RpcInvocation, protocol::SharedInvoker,
    url::ServiceUrl,
};

pub const TAG_ROUTER_PRIORITY: i64 = 100;

pub struct TagRouter {
    url: Arc<ServiceUrl>,
    priority: i64,
}

impl TagRouter {
    pub fn new(url: Arc<ServiceUrl>) -> Self {
        Self {
            url,
            priority: TAG_ROUTER_PRIORITY,
        }
    }
}

fn tag_of(invoker: &SharedInvoker) -> String {
    invoker.url().get_param_or(TAG_KEY, "")
}

impl Router for TagRouter {
    fn route(
        &self,
        invokers: Vec<SharedInvoker>,
        url: &ServiceUrl,
        invocation: &RpcInvocation,
    ) -> Vec<SharedInvoker> {
        if invokers.is_empty() {
            return invokers;
        }
        let requested = invocation
            .attachment_str(TAG_KEY)
            .filter(|tag| !tag.is_empty())
            .unwrap_or_else(|| url.get_param_or(TAG_KEY, ""));

        let (tagged, untagged): (Vec<_>, Vec<_>) = invokers
            .iter()
            .cloned()
            .partition(|invoker| !tag_of(invoker).is_empty());

        if requested.is_empty() {
            return if untagged.is_empty() { invokers } else { untagged };
        }
        let matched: Vec<_> = tagged
            .into_iter()
            .filter(|invoker| tag_of(invoker) == requested)
            .collect();
        if matched.is_empty() { untagged } else { matched }
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn url(&self) -> Option<Arc<ServiceUrl>> {
        Some(Arc::clone(&self.url))
    }
}

#[derive(Default)]
pub struct TagRouterFactory;

impl RouterFactory for TagRouterFactory {
    fn new_router(&self, url: &Arc<ServiceUrl>) -> Result<SharedRouter, RpcError> {
        Ok(Arc::new(TagRouter::new(Arc::clone(url))))
    }
}
