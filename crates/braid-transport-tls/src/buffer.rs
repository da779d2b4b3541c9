/// 固定容量的游标对缓冲区，是加密通道四个缓冲区域的统一载体。
///
/// # 设计动机（Why）
/// - 记录式加密引擎的输入输出天然是“部分消费”的：一次解密可能只吃掉
///   缓冲区前半段的完整记录，剩余半条记录必须原样保留到下一轮；
/// - 用显式的读游标 + 写游标表达这种生命周期，比隐式翻转缓冲语义更易
///   审计：任何时刻 `0 <= read_pos <= write_pos <= capacity` 恒成立。
///
/// # 核心契约（What）
/// - `readable()`：`read_pos..write_pos` 区间，尚未消费的数据；
/// - `writable()`：`write_pos..capacity` 区间，可追加写入的空间；
/// - `advance_read`/`advance_write`：消费/生产后推进对应游标；
/// - `compact()`：把未读数据搬移到偏移 0，重置写上限为全容量；
/// - `clear()`：丢弃全部内容，两游标归零；
/// - 容量在构造时确定，永不扩容。
///
/// # 风险提示（Trade-offs）
/// - `compact` 为 O(未读字节数) 的搬移；调用点集中在每轮解码之后，搬移
///   量以单条记录为上界，实测成本可忽略；
/// - 游标越界属于调用方逻辑错误，以断言暴露而非静默截断。
#[derive(Debug)]
pub struct SessionBuffer {
    data: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl SessionBuffer {
    /// 以固定容量创建空缓冲区。
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// 缓冲区总容量。
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 尚未消费的字节数。
    pub fn readable_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// 剩余可写空间。
    pub fn writable_len(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// 是否没有未消费数据。
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// 未消费数据的只读视图。
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// 可写空间的可变视图。
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..]
    }

    /// 消费 `n` 个字节。
    pub fn advance_read(&mut self, n: usize) {
        assert!(
            self.read_pos + n <= self.write_pos,
            "读游标越过写游标：advance_read({n}) 超出未读区间"
        );
        self.read_pos += n;
    }

    /// 记录新写入的 `n` 个字节。
    pub fn advance_write(&mut self, n: usize) {
        assert!(
            self.write_pos + n <= self.data.len(),
            "写游标越过容量上限：advance_write({n}) 超出可写区间"
        );
        self.write_pos += n;
    }

    /// 把未读数据搬移到偏移 0，恢复全部尾部空间。
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let len = self.readable_len();
        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = len;
    }

    /// 丢弃全部内容。
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// 追加一段数据，返回实际放入的字节数。
    pub fn extend_from_slice(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.writable_len());
        self.data[self.write_pos..self.write_pos + n].copy_from_slice(&src[..n]);
        self.write_pos += n;
        n
    }
}
