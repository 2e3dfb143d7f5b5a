//! 过滤链的装配顺序与过滤包装协议。

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use spark_rpc::{
    CallContext, RpcError, RpcInvocation, RpcResult,
    filter::{Filter, ProtocolFilterWrapper, build_invoker_chain, parse_filter_names},
    protocol::{Exporter, Invoker, Protocol, SharedInvoker},
};
use support::{CountingInvoker, echo_url, extensions, shared};

#[tokio::test]
async fn leftmost_filter_runs_outermost() {
    let extensions = extensions();
    let log = Arc::new(Mutex::new(Vec::new()));
    extensions
        .register_filter("auth", support::RecordingFilter::new("auth", Arc::clone(&log)))
        .expect("首次登记");
    extensions
        .register_filter("log", support::RecordingFilter::new("log", Arc::clone(&log)))
        .expect("首次登记");

    let target = CountingInvoker::new(echo_url(20001).with_param("service.filter", "auth,log"));
    let chained = build_invoker_chain(shared(&target), "service.filter", &extensions)
        .expect("过滤器均已登记");

    let result = chained
        .invoke(&CallContext::new(), &RpcInvocation::new("Echo", Vec::new()))
        .await;
    assert!(result.is_ok());
    assert_eq!(target.calls(), 1);
    assert_eq!(
        *log.lock(),
        vec!["auth:before", "log:before", "log:after", "auth:after"]
    );
    assert_eq!(chained.url().location(), "127.0.0.1:20001", "链头对外表现为原始调用器");
}

#[test]
fn missing_filter_names_leave_the_invoker_untouched() {
    let extensions = extensions();
    let target = shared(&CountingInvoker::new(echo_url(20001)));
    let chained =
        build_invoker_chain(Arc::clone(&target), "service.filter", &extensions).expect("无过滤器");
    assert!(Arc::ptr_eq(&chained, &target));
    assert_eq!(parse_filter_names(" auth, ,log "), vec!["auth", "log"]);
}

#[test]
fn unknown_filter_is_an_extension_error() {
    let extensions = extensions();
    let target = CountingInvoker::new(echo_url(20001).with_param("reference.filter", "metrics"));
    let error = build_invoker_chain(shared(&target), "reference.filter", &extensions)
        .err()
        .expect("未登记的过滤器");
    assert_eq!(
        error,
        RpcError::ExtensionNotFound {
            kind: "filter",
            name: "metrics".into()
        }
    );
}

struct Deny;

#[async_trait]
impl Filter for Deny {
    async fn invoke(
        &self,
        _ctx: &CallContext,
        _next: &SharedInvoker,
        invocation: &RpcInvocation,
    ) -> RpcResult {
        RpcResult::from_error(RpcError::application(format!(
            "{} denied",
            invocation.method_name()
        )))
    }
}

#[tokio::test]
async fn wrapper_applies_service_filters_on_export_and_reference_filters_on_refer() {
    let extensions = extensions();
    extensions
        .register_filter("deny", Arc::new(Deny))
        .expect("首次登记");
    let wrapper = ProtocolFilterWrapper::new(Arc::clone(&extensions));

    let target = CountingInvoker::new(echo_url(20001).with_param("service.filter", "deny"));
    let exporter = wrapper.export(shared(&target)).expect("injvm 已登记");
    let result = exporter
        .invoker()
        .invoke(&CallContext::new(), &RpcInvocation::new("Echo", Vec::new()))
        .await;
    assert_eq!(result.error(), Some(&RpcError::application("Echo denied")));
    assert_eq!(target.calls(), 0, "被拒绝的调用不应到达目标");

    let reference = wrapper
        .refer(Arc::new(echo_url(20002).with_param("reference.filter", "deny")))
        .expect("injvm 已登记");
    let result = reference
        .invoke(&CallContext::new(), &RpcInvocation::new("Ping", Vec::new()))
        .await;
    assert_eq!(result.error(), Some(&RpcError::application("Ping denied")));
}

#[test]
fn wrapper_rejects_unknown_protocol() {
    let wrapper = ProtocolFilterWrapper::new(extensions());
    let url = spark_rpc::ServiceUrl::new("tri", "127.0.0.1", Some(20000)).with_path("Echo");
    let error = wrapper
        .refer(Arc::new(url))
        .err()
        .expect("未登记的协议");
    assert_eq!(error.code(), "rpc.extension.not_found");
}
