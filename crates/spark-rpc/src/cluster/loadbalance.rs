//! # 负载均衡
//!
//! ## 平滑加权轮询（What）
//! - 零个候选返回 `None`，单个候选直接返回；
//! - 按 `(服务路径, 方法名)` 维护每个候选（以 [`ServiceUrl::key`] 为身份）的 `{weight, current, last_update}`；
//! - 每次选择：所有候选 `current += weight`，取 `current` 最大者（并列时取先出现者），
//!   再令胜者 `current -= 总权重`；
//! - 权重来自地址参数 `weight`（缺省 1，负数按 0 处理），权重变化时 `current` 归零；
//! - 本次选择新建了状态条目时，尝试回收超过回收周期未被访问的条目；回收由 CAS 守卫保证同一时刻只有一个
//!   调用者在清扫，其余调用者直接跳过。
//!
//! ## 并发（How）
//! - 两级 `DashMap` 承载缓存，单条状态的 `weight`/`current` 为原子整数，增减不丢更新；
//! - `last_update` 用互斥锁保护，仅在选择与清扫时短暂持有。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    constant::{DEFAULT_WEIGHT, WEIGHT_KEY},
    invocation::RpcInvocation,
    protocol::SharedInvoker,
};

/// 从候选中选出一个调用器。
pub trait LoadBalance: Send + Sync {
    fn select(
        &self,
        invokers: &[SharedInvoker],
        invocation: &RpcInvocation,
    ) -> Option<SharedInvoker>;
}

pub type SharedLoadBalance = Arc<dyn LoadBalance>;

/// 读取候选权重，负数按 0 处理。
pub fn invoker_weight(invoker: &SharedInvoker) -> i64 {
    invoker
        .url()
        .get_param_int(WEIGHT_KEY, DEFAULT_WEIGHT)
        .max(0)
}

struct WeightedRoundRobin {
    weight: AtomicI64,
    current: AtomicI64,
    last_update: Mutex<Instant>,
}

impl WeightedRoundRobin {
    fn new(weight: i64, now: Instant) -> Self {
        Self {
            weight: AtomicI64::new(weight),
            current: AtomicI64::new(0),
            last_update: Mutex::new(now),
        }
    }

    fn set_weight(&self, weight: i64) {
        self.weight.store(weight, Ordering::Release);
        self.current.store(0, Ordering::Release);
    }

    fn increase_current(&self) -> i64 {
        let weight = self.weight.load(Ordering::Acquire);
        self.current.fetch_add(weight, Ordering::AcqRel) + weight
    }
}

type WeightCache = DashMap<String, Arc<WeightedRoundRobin>>;

/// 平滑加权轮询。
pub struct RoundRobinLoadBalance {
    methods: DashMap<String, Arc<WeightCache>>,
    recycle_period: Duration,
    sweeping: AtomicBool,
}

impl RoundRobinLoadBalance {
    pub fn new(recycle_period: Duration) -> Self {
        Self {
            methods: DashMap::new(),
            recycle_period,
            sweeping: AtomicBool::new(false),
        }
    }

    fn clean_if_required(&self, created: bool, cache: &WeightCache, now: Instant) {
        if !created {
            return;
        }
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let before = cache.len();
        cache.retain(|_, state| {
            now.saturating_duration_since(*state.last_update.lock()) <= self.recycle_period
        });
        let evicted = before.saturating_sub(cache.len());
        if evicted > 0 {
            debug!(evicted, "recycled stale round robin weights");
        }
        self.sweeping.store(false, Ordering::Release);
    }

    /// 某个 `(路径, 方法)` 下当前缓存的状态条目数。
    pub fn cached_entries(&self, cache_key: &str) -> usize {
        self.methods
            .get(cache_key)
            .map(|cache| cache.len())
            .unwrap_or_default()
    }
}

impl Default for RoundRobinLoadBalance {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// 加权轮询状态缓存的分组键。
pub fn round_robin_cache_key(invokers: &[SharedInvoker], invocation: &RpcInvocation) -> String {
    let path = invokers
        .first()
        .map(|invoker| invoker.url().path().to_owned())
        .unwrap_or_default();
    format!("{path}.{}", invocation.method_name())
}

impl LoadBalance for RoundRobinLoadBalance {
    fn select(
        &self,
        invokers: &[SharedInvoker],
        invocation: &RpcInvocation,
    ) -> Option<SharedInvoker> {
        match invokers {
            [] => return None,
            [only] => return Some(Arc::clone(only)),
            _ => {}
        }

        let cache = Arc::clone(
            self.methods
                .entry(round_robin_cache_key(invokers, invocation))
                .or_default()
                .value(),
        );

        let now = Instant::now();
        let mut created = false;
        let mut total_weight = 0_i64;
        let mut max_current = i64::MIN;
        let mut selected: Option<(SharedInvoker, Arc<WeightedRoundRobin>)> = None;

        for invoker in invokers {
            let weight = invoker_weight(invoker);
            let state = match cache.entry(invoker.url().key()) {
                Entry::Occupied(entry) => Arc::clone(entry.get()),
                Entry::Vacant(entry) => {
                    created = true;
                    Arc::clone(
                        entry
                            .insert(Arc::new(WeightedRoundRobin::new(weight, now)))
                            .value(),
                    )
                }
            };
            if state.weight.load(Ordering::Acquire) != weight {
                state.set_weight(weight);
            }
            let current = state.increase_current();
            *state.last_update.lock() = now;
            if current > max_current {
                max_current = current;
                selected = Some((Arc::clone(invoker), state));
            }
            total_weight += weight;
        }

        self.clean_if_required(created, &cache, now);

        match selected {
            Some((invoker, state)) => {
                state.current.fetch_sub(total_weight, Ordering::AcqRel);
                Some(invoker)
            }
            None => invokers.first().cloned(),
        }
    }
}
