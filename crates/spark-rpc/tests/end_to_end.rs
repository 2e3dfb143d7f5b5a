//! 端到端：提供方经注册协议导出 `Echo`，消费方经内存注册中心与进程内协议调用。
//!
//! # 覆盖范围（What）
//! - 代理工厂分派、注册与订阅、路由、负载均衡、快速失败集群与过滤链的完整串联；
//! - 业务 panic、未知方法、实参不符等错误以结果信封返回，不会穿透到调用方。

mod support;

use std::{sync::Arc, time::Duration};

use serde_json::json;
use spark_rpc::{
    AttachmentValue, CallContext, ExtensionRegistry, RpcError, ServiceUrl,
    invocation::ReplySlot,
    protocol::{Invoker, Node, Protocol, wait_for_exports},
    proxy::{MethodCall, MethodDescriptor, MethodOutcome, ReturnType, ServiceDefinition, ServiceProxy},
    registry::RegistryProtocol,
};
use support::{RecordingFilter, extensions};

fn registry_url(sub_url: ServiceUrl) -> Arc<ServiceUrl> {
    Arc::new(
        ServiceUrl::new("registry", "127.0.0.1", Some(2181))
            .with_param("registry", "memory")
            .with_sub_url(Arc::new(sub_url)),
    )
}

fn identity(url: ServiceUrl) -> ServiceUrl {
    url.with_path("Echo")
        .with_param("interface", "Echo")
        .with_param("group", "g1")
        .with_param("version", "v1")
}

fn explode(reason: &str) -> MethodOutcome {
    panic!("{reason}")
}

fn echo_service() -> ServiceDefinition {
    ServiceDefinition::new("Echo")
        .with_method(MethodDescriptor::unary(
            "Echo",
            |_ctx: CallContext, text: String| async move { Ok::<_, RpcError>(text) },
        ))
        .and_then(|service| {
            service.with_method(MethodDescriptor::new(
                "Boom",
                Vec::new(),
                ReturnType::Unit,
                |_call: MethodCall| async move { explode("boom") },
            ))
        })
        .expect("方法声明合法")
}

struct Deployment {
    extensions: Arc<ExtensionRegistry>,
    protocol: RegistryProtocol,
    consumer_url: Arc<ServiceUrl>,
}

impl Deployment {
    fn start(provider_params: &[(&str, &str)]) -> Self {
        let extensions = extensions();
        extensions
            .services()
            .register("injvm", "g1/Echo:v1", echo_service())
            .expect("服务首次登记");

        let mut provider = identity(ServiceUrl::new("injvm", "127.0.0.1", Some(20880)));
        for (key, value) in provider_params {
            provider = provider.with_param(*key, *value);
        }
        let invoker = extensions
            .default_proxy_factory()
            .expect("缺省代理工厂已登记")
            .get_invoker(registry_url(provider));
        let protocol = RegistryProtocol::new(Arc::clone(&extensions));
        protocol.export(invoker).expect("导出成功");

        let consumer_url = Arc::new(identity(ServiceUrl::new("consumer", "127.0.0.1", None)));
        Self {
            extensions,
            protocol,
            consumer_url,
        }
    }

    fn proxy(&self) -> ServiceProxy {
        self.proxy_with(Arc::clone(&self.consumer_url))
    }

    fn proxy_with(&self, consumer_url: Arc<ServiceUrl>) -> ServiceProxy {
        let cluster = self
            .protocol
            .refer(registry_url(ServiceUrl::clone(&consumer_url)))
            .expect("引用成功");
        ServiceProxy::new(cluster, consumer_url)
    }
}

#[tokio::test]
async fn echo_round_trip_through_the_whole_pipeline() {
    let deployment = Deployment::start(&[]);
    let proxy = deployment.proxy();

    let result = proxy
        .call(&CallContext::new(), "Echo", vec![json!("hello")])
        .await;
    assert_eq!(result.decode::<String>().expect("应返回字符串"), "hello");
    assert_eq!(
        result.attachment("interface").and_then(AttachmentValue::as_str),
        Some("Echo"),
        "结果附件复制自请求附件"
    );
    assert_eq!(
        result.attachment("group").and_then(AttachmentValue::as_str),
        Some("g1")
    );
}

#[tokio::test]
async fn reply_slot_is_filled_by_the_local_transport() {
    let deployment = Deployment::start(&[]);
    let proxy = deployment.proxy();
    let slot = ReplySlot::new();
    let invocation = proxy
        .invocation("Echo", vec![json!("slot")])
        .with_reply(slot.clone());

    let result = proxy.invoker().invoke(&CallContext::new(), &invocation).await;
    assert!(result.is_ok());
    assert_eq!(slot.get(), Some(json!("slot")));
}

#[tokio::test]
async fn business_panic_becomes_a_fault_result() {
    let deployment = Deployment::start(&[]);
    let result = deployment
        .proxy()
        .call(&CallContext::new(), "Boom", Vec::new())
        .await;
    assert_eq!(
        result.error(),
        Some(&RpcError::BusinessFault {
            method: "Boom".into(),
            detail: "boom".into(),
        })
    );
}

#[tokio::test]
async fn dispatch_errors_are_reported_in_the_result() {
    let deployment = Deployment::start(&[]);
    let proxy = deployment.proxy();
    let ctx = CallContext::new();

    let missing = proxy.call(&ctx, "Shout", vec![json!("x")]).await;
    assert_eq!(missing.error().map(RpcError::code), Some("rpc.proxy.method_not_found"));

    let arity = proxy.call(&ctx, "Echo", vec![json!("a"), json!("b")]).await;
    assert_eq!(arity.error().map(RpcError::code), Some("rpc.proxy.argument_mismatch"));

    let shape = proxy.call(&ctx, "Echo", vec![json!(42)]).await;
    assert_eq!(shape.error().map(RpcError::code), Some("rpc.proxy.argument_mismatch"));
}

#[tokio::test]
async fn unknown_service_key_has_no_provider() {
    let deployment = Deployment::start(&[]);
    let other = Arc::new(
        ServiceUrl::new("consumer", "127.0.0.1", None)
            .with_path("Echo")
            .with_param("interface", "Echo")
            .with_param("group", "g2")
            .with_param("version", "v1"),
    );
    let result = deployment
        .proxy_with(other)
        .call(&CallContext::new(), "Echo", vec![json!("hello")])
        .await;
    let error = result.error().expect("g2 组没有提供方");
    assert_eq!(error.code(), "rpc.cluster.no_provider");
    assert!(error.to_string().contains("g2/Echo:v1"));
}

#[tokio::test]
async fn provider_filters_run_on_the_serving_side() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let extensions = extensions();
    extensions
        .register_filter("audit", RecordingFilter::new("audit", Arc::clone(&log)))
        .expect("首次登记");
    extensions
        .services()
        .register("injvm", "g1/Echo:v1", echo_service())
        .expect("服务首次登记");
    let provider = identity(ServiceUrl::new("injvm", "127.0.0.1", Some(20881)))
        .with_param("service.filter", "audit");
    let invoker = extensions
        .default_proxy_factory()
        .expect("缺省代理工厂已登记")
        .get_invoker(registry_url(provider));
    let protocol = RegistryProtocol::new(Arc::clone(&extensions));
    protocol.export(invoker).expect("导出成功");

    let consumer_url = Arc::new(identity(ServiceUrl::new("consumer", "127.0.0.1", None)));
    let cluster = protocol
        .refer(registry_url(ServiceUrl::clone(&consumer_url)))
        .expect("引用成功");
    let result = ServiceProxy::new(cluster, consumer_url)
        .call(&CallContext::new(), "Echo", vec![json!("hi")])
        .await;
    assert!(result.is_ok());
    assert_eq!(*log.lock(), vec!["audit:before", "audit:after"]);
}

#[tokio::test]
async fn tagged_consumer_still_reaches_the_provider() {
    let deployment = Deployment::start(&[("tag", "gray")]);
    let tagged_consumer = Arc::new(
        identity(ServiceUrl::new("consumer", "127.0.0.1", None)).with_param("tag", "gray"),
    );
    let result = deployment
        .proxy_with(tagged_consumer)
        .call(&CallContext::new(), "Echo", vec![json!("gray")])
        .await;
    assert!(result.is_ok(), "调用失败: {:?}", result.error());
}

#[tokio::test]
async fn export_barrier_observes_the_deployment() {
    let deployment = Deployment::start(&[]);
    let config = deployment.extensions.config();
    wait_for_exports(
        1,
        || deployment.protocol.exported_count(),
        config.export_wait_poll,
        config.export_wait_timeout,
    )
    .await
    .expect("唯一的服务已导出");

    let error = wait_for_exports(
        2,
        || deployment.protocol.exported_count(),
        Duration::from_millis(5),
        Duration::from_millis(30),
    )
    .await
    .err()
    .expect("第二个服务从未导出");
    assert!(error.is_fatal());
}

#[tokio::test]
async fn destroyed_reference_fails_fast() {
    let deployment = Deployment::start(&[]);
    let proxy = deployment.proxy();
    proxy.invoker().destroy();
    assert!(!proxy.invoker().is_available());

    let result = proxy
        .call(&CallContext::new(), "Echo", vec![json!("late")])
        .await;
    assert!(result.error().is_some(), "销毁后的引用不能再调用");
}
