//! 集群拦截器：包裹整个集群调用器的横切逻辑。
//!
//! 注册顺序即执行顺序，先注册者位于最外层。

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    chain::fold_chain,
    context::CallContext,
    invocation::RpcInvocation,
    protocol::{Invoker, Node, SharedInvoker},
    result::RpcResult,
    url::ServiceUrl,
};

#[async_trait]
pub trait ClusterInterceptor: Send + Sync {
    async fn invoke(
        &self,
        ctx: &CallContext,
        next: &SharedInvoker,
        invocation: &RpcInvocation,
    ) -> RpcResult;
}

pub type SharedClusterInterceptor = Arc<dyn ClusterInterceptor>;

struct InterceptorInvoker {
    next: SharedInvoker,
    interceptor: SharedClusterInterceptor,
}

impl Node for InterceptorInvoker {
    fn url(&self) -> Arc<ServiceUrl> {
        self.next.url()
    }

    fn is_available(&self) -> bool {
        self.next.is_available()
    }

    fn destroy(&self) {
        self.next.destroy();
    }

    fn is_destroyed(&self) -> bool {
        self.next.is_destroyed()
    }
}

#[async_trait]
impl Invoker for InterceptorInvoker {
    async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult {
        self.interceptor.invoke(ctx, &self.next, invocation).await
    }
}

/// 将拦截器折叠到集群调用器外层；列表为空时原样返回。
pub fn build_interceptor_chain(
    invoker: SharedInvoker,
    interceptors: Vec<SharedClusterInterceptor>,
) -> SharedInvoker {
    fold_chain(invoker, interceptors, |next, interceptor| {
        Arc::new(InterceptorInvoker { next, interceptor })
    })
}
