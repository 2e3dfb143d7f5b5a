//! 调用上下文：取消令牌与截止时间。
//!
//! # 契约（What）
//! - [`Cancellation`] 以共享原子位表达“调用方已放弃”，`cancel` 仅在首次成功时返回 `true`；
//! - [`Deadline`] 为可选的单调时钟绝对时间点，未设置时不施加超时；
//! - 管线本身不会在发出唯一一次传输调用之后重试，因此取消语义收敛为“若已取消或超时则不发起调用”，
//!   之后的中断交给传输层自行处理。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use crate::error::RpcError;

/// 取消令牌，克隆体共享同一原子位。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 标记取消；返回 `true` 表示本次调用首次触发。
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 派生共享同一取消位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

/// 截止时间。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { instant: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    pub fn with_timeout(now: Instant, timeout: Duration) -> Self {
        Self::at(now + timeout)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.instant.is_some_and(|deadline| now >= deadline)
    }
}

/// 贯穿一次逻辑调用的上下文。
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 以当前时刻为基准设置超时。
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Deadline::with_timeout(Instant::now(), timeout))
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// 发起调用前的检查：已取消或已超时即返回错误。
    pub fn check(&self) -> Result<(), RpcError> {
        if self.cancellation.is_cancelled() {
            return Err(RpcError::Cancelled);
        }
        if self.deadline.is_expired(Instant::now()) {
            return Err(RpcError::DeadlineExceeded);
        }
        Ok(())
    }
}
