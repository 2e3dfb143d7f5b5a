//! 路由链快照、路由器排序与标签路由。

mod support;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use parking_lot::Mutex;
use spark_rpc::{
    RpcInvocation, ServiceUrl,
    cluster::router::{Router, RouterChain, SharedRouter, TAG_ROUTER_PRIORITY, TagRouter},
    protocol::{SharedInvoker, same_invoker},
};
use support::{CountingInvoker, echo_url, shared};

fn consumer() -> ServiceUrl {
    ServiceUrl::new("consumer", "127.0.0.1", None)
        .with_path("Echo")
        .with_param("interface", "Echo")
}

fn tagged(port: u16, tag: &str) -> SharedInvoker {
    shared(&CountingInvoker::new(echo_url(port).with_param("tag", tag)))
}

fn plain(port: u16) -> SharedInvoker {
    shared(&CountingInvoker::new(echo_url(port)))
}

fn ports(invokers: &[SharedInvoker]) -> Vec<u16> {
    invokers
        .iter()
        .filter_map(|invoker| invoker.url().port())
        .collect()
}

#[test]
fn route_prefers_matching_service_key_and_falls_back_to_all() {
    let chain = RouterChain::default();
    let other = shared(&CountingInvoker::new(
        ServiceUrl::new("injvm", "127.0.0.1", Some(20009))
            .with_path("Other")
            .with_param("interface", "Other"),
    ));
    chain.set_invokers(vec![plain(20001), other]);
    let invocation = RpcInvocation::new("Echo", Vec::new());

    assert_eq!(ports(&chain.route(&consumer(), &invocation)), vec![20001]);

    let unknown = ServiceUrl::new("consumer", "127.0.0.1", None).with_param("interface", "Missing");
    assert_eq!(
        ports(&chain.route(&unknown, &invocation)),
        vec![20001, 20009],
        "无一致服务键时回落到全集"
    );
}

/// 记录执行顺序的路由器。
struct Ordered {
    name: &'static str,
    priority: i64,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Router for Ordered {
    fn route(
        &self,
        invokers: Vec<SharedInvoker>,
        _url: &ServiceUrl,
        _invocation: &RpcInvocation,
    ) -> Vec<SharedInvoker> {
        self.log.lock().push(self.name);
        invokers
    }

    fn priority(&self) -> i64 {
        self.priority
    }
}

#[test]
fn routers_run_by_ascending_priority_with_stable_ties() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let router = |name, priority| -> SharedRouter {
        Arc::new(Ordered {
            name,
            priority,
            log: Arc::clone(&log),
        })
    };
    let chain = RouterChain::new(vec![router("builtin", 10)]);
    chain.add_routers(vec![router("late", 5), router("first-tie", 20), router("second-tie", 20)]);
    chain.set_invokers(vec![plain(20001)]);

    chain.route(&consumer(), &RpcInvocation::new("Echo", Vec::new()));
    assert_eq!(*log.lock(), vec!["late", "builtin", "first-tie", "second-tie"]);

    log.lock().clear();
    chain.add_routers(vec![router("replacement", 0)]);
    chain.route(&consumer(), &RpcInvocation::new("Echo", Vec::new()));
    assert_eq!(
        *log.lock(),
        vec!["replacement", "builtin"],
        "再次加入时以内置路由器为基础重建"
    );
}

#[test]
fn every_replacement_bumps_generation() {
    let chain = RouterChain::default();
    let start = chain.generation();
    chain.set_invokers(vec![plain(20001)]);
    chain.add_routers(Vec::new());
    chain.set_invokers(Vec::new());
    assert_eq!(chain.generation(), start + 3);
}

#[test]
fn readers_never_observe_a_torn_snapshot() {
    let chain = Arc::new(RouterChain::default());
    let first = vec![plain(20001), plain(20002), plain(20003)];
    let second = vec![plain(20004), plain(20005)];
    let generations = [first.clone(), second.clone()];
    chain.set_invokers(first.clone());
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let chain = Arc::clone(&chain);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut rounds = 0_u64;
            while !stop.load(Ordering::Acquire) {
                chain.set_invokers(if rounds % 2 == 0 { second.clone() } else { first.clone() });
                rounds += 1;
            }
            rounds
        })
    };

    let invocation = RpcInvocation::new("Echo", Vec::new());
    for _ in 0..5_000 {
        let routed = chain.route(&consumer(), &invocation);
        let matching = generations
            .iter()
            .filter(|generation| {
                generation.len() == routed.len()
                    && routed
                        .iter()
                        .all(|invoker| generation.iter().any(|member| same_invoker(member, invoker)))
            })
            .count();
        assert_eq!(matching, 1, "候选集合混杂了两代快照: {:?}", ports(&routed));
    }
    stop.store(true, Ordering::Release);
    let rounds = writer.join().expect("写线程不应 panic");
    assert_eq!(chain.generation(), rounds + 1);
}

#[test]
fn tag_router_selects_matching_tag_from_attachment() {
    let router = TagRouter::new(Arc::new(consumer()));
    assert_eq!(router.priority(), TAG_ROUTER_PRIORITY);
    let invokers = vec![tagged(20001, "gray"), tagged(20002, "blue"), plain(20003)];

    let invocation = RpcInvocation::new("Echo", Vec::new()).with_attachment("tag", "gray");
    assert_eq!(ports(&router.route(invokers.clone(), &consumer(), &invocation)), vec![20001]);

    let missing = RpcInvocation::new("Echo", Vec::new()).with_attachment("tag", "red");
    assert_eq!(
        ports(&router.route(invokers.clone(), &consumer(), &missing)),
        vec![20003],
        "无匹配标签时回落到未打标签的提供方"
    );

    let untagged_request = RpcInvocation::new("Echo", Vec::new());
    assert_eq!(ports(&router.route(invokers, &consumer(), &untagged_request)), vec![20003]);
}

#[test]
fn tag_router_reads_consumer_tag_and_passes_all_tagged_through() {
    let router = TagRouter::new(Arc::new(consumer()));
    let invokers = vec![tagged(20001, "gray"), tagged(20002, "blue")];
    let invocation = RpcInvocation::new("Echo", Vec::new());

    let blue_consumer = consumer().with_param("tag", "blue");
    assert_eq!(ports(&router.route(invokers.clone(), &blue_consumer, &invocation)), vec![20002]);
    assert_eq!(
        ports(&router.route(invokers, &consumer(), &invocation)),
        vec![20001, 20002],
        "全部带标签且请求无标签时原样放行"
    );
}
