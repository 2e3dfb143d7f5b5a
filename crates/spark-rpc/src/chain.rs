//! 装饰链折叠。
//!
//! 过滤链与集群拦截链共用同一折叠方向：给定 `[a, b, c]` 与最内层调用器 `inner`，
//! 结果为 `a(b(c(inner)))`，即最左侧的层最先执行、最后看到结果。

use crate::protocol::SharedInvoker;

/// 自右向左把 `layers` 折叠到 `innermost` 外层。
pub fn fold_chain<L>(
    innermost: SharedInvoker,
    layers: Vec<L>,
    wrap: impl FnMut(SharedInvoker, L) -> SharedInvoker,
) -> SharedInvoker {
    layers.into_iter().rev().fold(innermost, wrap)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        context::CallContext,
        invocation::RpcInvocation,
        protocol::{Invoker, Node},
        result::RpcResult,
        url::ServiceUrl,
    };

    struct Layer {
        name: &'static str,
        next: Option<SharedInvoker>,
        trace: Arc<Mutex<Vec<&'static str>>>,
        url: Arc<ServiceUrl>,
    }

    impl Node for Layer {
        fn url(&self) -> Arc<ServiceUrl> {
            Arc::clone(&self.url)
        }
        fn is_available(&self) -> bool {
            true
        }
        fn destroy(&self) {}
    }

    #[async_trait]
    impl Invoker for Layer {
        async fn invoke(&self, ctx: &CallContext, invocation: &RpcInvocation) -> RpcResult {
            self.trace.lock().expect("trace lock").push(self.name);
            match &self.next {
                Some(next) => next.invoke(ctx, invocation).await,
                None => RpcResult::empty(),
            }
        }
    }

    #[test]
    fn leftmost_layer_runs_first() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let url = Arc::new(ServiceUrl::new("injvm", "127.0.0.1", Some(1)));
        let inner: SharedInvoker = Arc::new(Layer {
            name: "inner",
            next: None,
            trace: Arc::clone(&trace),
            url: Arc::clone(&url),
        });
        let chain = fold_chain(inner, vec!["a", "b", "c"], |next, name| {
            Arc::new(Layer {
                name,
                next: Some(next),
                trace: Arc::clone(&trace),
                url: Arc::clone(&url),
            })
        });
        futures::executor::block_on(
            chain.invoke(&CallContext::new(), &RpcInvocation::new("m", Vec::new())),
        );
        assert_eq!(*trace.lock().expect("trace lock"), vec!["a", "b", "c", "inner"]);
    }
}
