use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 取消原语，统一表达跨模块的可中断性契约。
///
/// # 设计背景（Why）
/// - 所有可能长时间阻塞的传输操作（握手、读写重试）都必须能被外部主动打断，
///   避免调用线程无限期占用；
/// - 阻塞模型下没有任务调度器可以强制终止操作，因此通过轻量的原子位提供
///   最小可行的协作式取消。
///
/// # 逻辑解析（How）
/// - 内部使用 [`AtomicBool`] 表达取消状态，并通过 [`Arc`] 支持多方共享；
/// - `cancel` 在首次成功设置取消位时返回 `true`，重复调用返回 `false`，
///   提示调用方避免重复执行兜底逻辑；
/// - `child` 生成共享同一原子位的派生实例，便于跨线程传播取消信号。
///
/// # 契约说明（What）
/// - **前置条件**：构造时默认处于“未取消”状态；
/// - **后置条件**：`cancel` 成功后 `is_cancelled` 全局可见，持有该令牌的
///   阻塞循环应在下一个检查点尽快退出。
///
/// # 风险提示（Trade-offs）
/// - 未提供回调注册接口；正在执行的系统调用不会被强制打断，调用方需在
///   循环的检查点轮询取消位，或配合传输层的关闭操作解除阻塞。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的取消令牌。
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 将当前令牌标记为取消。
    ///
    /// 返回 `true` 表示本次调用首次触发取消；`false` 表示之前已被取消。
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 派生共享同一原子位的子令牌。
    pub fn child(&self) -> Self {
        self.clone()
    }
}

/// 截止原语，描述操作的最迟完成时间。
///
/// # 契约说明（What）
/// - `Deadline` 可以为空（未设置），此时表示调用方未施加硬超时限制；
/// - `after` 以当前时刻加持续时间生成新的截止点；
/// - `remaining` 返回距截止点的剩余时长，已超时返回 `Duration::ZERO`，
///   未设置截止返回 `None`，便于直接换算为套接字超时参数。
///
/// # 风险提示（Trade-offs）
/// - 截止时间不会自动驱动取消；检测到超时后是否调用
///   [`Cancellation::cancel`] 由调用方决定。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    /// 创建未设置截止时间的实例。
    pub const fn none() -> Self {
        Self { instant: None }
    }

    /// 根据绝对时间点构造截止时间。
    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 基于当前时刻加持续时间生成截止时间。
    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    /// 返回内部时间点，便于与自定义调度协作。
    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    /// 判断是否已经超时。
    pub fn is_expired(&self) -> bool {
        match self.instant {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// 距截止点的剩余时长；已超时返回零，未设置返回 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        self.instant
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::none()
    }
}

#[derive(Debug)]
struct CallContextInner {
    cancellation: Cancellation,
    deadline: Deadline,
}

/// 调用上下文，在传输 API 之间传递取消与截止二元组。
///
/// # 设计背景（Why）
/// - 握手、读写、关闭等阻塞操作都需要感知统一的取消/截止语义，将两者捆绑
///   在一个可廉价克隆的载体中，避免每个接口重复声明两个参数；
/// - 上下文一经构造即不可变，多个线程可安全共享同一实例。
///
/// # 契约说明（What）
/// - `cancellation()`：获取取消令牌，阻塞循环需在检查点轮询；
/// - `deadline()`：查询截止时间，可换算为套接字超时；
/// - [`CallContext::background`]：无取消、无截止的默认上下文，适合测试与
///   不限时的后台操作。
///
/// # 风险提示（Trade-offs）
/// - 上下文自身不执行计时或轮询，超时与取消的落地由持有它的操作负责。
#[derive(Clone, Debug)]
pub struct CallContext {
    inner: Arc<CallContextInner>,
}

impl CallContext {
    /// 创建上下文构建器。
    pub fn builder() -> CallContextBuilder {
        CallContextBuilder::default()
    }

    /// 返回无取消、无截止约束的默认上下文。
    pub fn background() -> Self {
        Self::builder().build()
    }

    /// 获取取消原语。
    pub fn cancellation(&self) -> &Cancellation {
        &self.inner.cancellation
    }

    /// 查询截止时间。
    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CallContext{{cancelled={}, deadline={}}}",
            self.cancellation().is_cancelled(),
            match self.deadline().remaining() {
                Some(remaining) => format!("{remaining:?}"),
                None => "none".to_string(),
            }
        )
    }
}

/// `CallContext` 构建器。
#[derive(Default)]
pub struct CallContextBuilder {
    cancellation: Cancellation,
    deadline: Deadline,
}

impl CallContextBuilder {
    /// 设置取消原语。
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 设置截止时间。
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// 构建上下文。
    pub fn build(self) -> CallContext {
        CallContext {
            inner: Arc::new(CallContextInner {
                cancellation: self.cancellation,
                deadline: self.deadline,
            }),
        }
    }
}
