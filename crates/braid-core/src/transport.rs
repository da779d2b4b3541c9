use crate::contract::CallContext;
use crate::error::CoreError;

/// 单次读取的语义化结果。
///
/// # 设计背景（Why）
/// - 字节通道需要区分三种彼此独立的读取结局：读到了数据、当前暂无数据、
///   对端已经有序关闭。用裸 `usize` 无法表达后两者的差别，而这一差别直接
///   决定调用方是重试还是释放连接；
/// - 显式枚举让“暂无数据”成为可匹配的正常分支，避免借助错误类型或魔数
///   传递流控信号。
///
/// # 契约说明（What）
/// - `Bytes(n)`：`n > 0` 个字节已写入目标缓冲区；
/// - `NoData`：当前没有可读数据，连接仍然存活，调用方稍后重试；
/// - `EndOfStream`：对端已关闭，后续读取不会再产生数据。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// 成功读取的字节数。
    Bytes(usize),
    /// 当前无数据可读。
    NoData,
    /// 对端已结束数据流。
    EndOfStream,
}

/// 阻塞式双向字节通道契约。
///
/// # 设计背景（Why）
/// - 为上层调用方提供与具体传输（明文 TCP、TLS 加密通道）无关的统一读写
///   接口：调用方不需要知道底下是否有加密层介入；
/// - 方法全部以 `&self` 暴露，实现内部通过互斥或原子原语自行序列化，
///   允许一读一写两个线程共享同一通道实例。
///
/// # 契约说明（What）
/// - `read`：将可用数据写入 `dst`，返回 [`ReadOutcome`]；实现不得在无数据
///   与流结束之间混淆语义；
/// - `write`：提交 `src` 中的字节，返回实际接受的字节数；返回 `0` 表示
///   背压（前一批数据尚未排空），调用方应在传输侧排空后重试，剩余字节
///   由调用方自行保留；
/// - `close`：有序关闭通道并释放传输资源；重复调用应被实现保护为无害；
/// - `is_open`：反映底层传输的存活状态。
///
/// # 并发约束（Trade-offs）
/// - 读路径与写路径各自必须内部串行（同方向不允许并发重入）；一读一写
///   并发由实现负责协调共享状态；
/// - 所有方法都应尊重 [`CallContext`] 的取消与截止语义，在阻塞点检查并
///   尽快返回对应的错误分类。
pub trait ByteChannel: Send + Sync {
    /// 读取数据到 `dst`。
    fn read(&self, ctx: &CallContext, dst: &mut [u8]) -> Result<ReadOutcome, CoreError>;

    /// 写入 `src` 中的数据，返回实际接受的字节数。
    fn write(&self, ctx: &CallContext, src: &[u8]) -> Result<usize, CoreError>;

    /// 有序关闭通道。
    fn close(&self, ctx: &CallContext) -> Result<(), CoreError>;

    /// 查询通道是否仍然可用。
    fn is_open(&self) -> bool;
}
