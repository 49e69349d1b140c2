//! 序列号分配
//!
//! 每个CA一个计数器，读取、递增、写回在同一把锁内完成，并发签发不会拿到
//! 相同的序列号。序列号只增不减，撤销后也不会复用。

use parking_lot::Mutex;

use crate::error::{PkiError, Result};

/// 单个CA的序列号计数器
#[derive(Debug)]
pub struct SerialAllocator {
    /// `None`表示`u64::MAX`已分配，计数器用尽
    next: Mutex<Option<u64>>,
}

impl SerialAllocator {
    /// 下一个分配的序列号为`next`（0会被跳过）
    pub fn new(next: u64) -> Self {
        Self {
            next: Mutex::new(Some(next.max(1))),
        }
    }

    /// 从持久化的最后一个序列号恢复
    pub fn resume_after(last_issued: u64) -> Self {
        Self {
            next: Mutex::new(last_issued.checked_add(1)),
        }
    }

    /// 分配序列号，返回数值；计数器用尽时返回错误
    pub fn allocate_value(&self) -> Result<u64> {
        let mut next = self.next.lock();
        let value = next.ok_or(PkiError::SerialExhausted(u64::MAX))?;
        *next = value.checked_add(1);
        Ok(value)
    }

    /// 分配序列号，返回大写十六进制（无前导零）
    pub fn allocate(&self) -> Result<String> {
        Ok(format!("{:X}", self.allocate_value()?))
    }

    /// 下一个将被分配的值，不消耗计数器
    pub fn peek(&self) -> Option<u64> {
        *self.next.lock()
    }
}

impl Default for SerialAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    #[test]
    fn test_hex_format() {
        let serials = SerialAllocator::new(255);
        assert_eq!(serials.allocate().unwrap(), "FF");
        assert_eq!(serials.allocate().unwrap(), "100");
        assert_eq!(serials.peek(), Some(257));
        assert_eq!(SerialAllocator::new(0).allocate().unwrap(), "1");
        assert_eq!(SerialAllocator::resume_after(9).allocate().unwrap(), "A");
    }

    #[test]
    fn test_exhausted_counter_never_reuses() {
        let serials = SerialAllocator::resume_after(u64::MAX - 1);
        assert_eq!(serials.allocate_value().unwrap(), u64::MAX);
        assert_eq!(serials.peek(), None);
        assert!(matches!(
            serials.allocate(),
            Err(PkiError::SerialExhausted(u64::MAX))
        ));
        // still exhausted on the next call
        assert!(serials.allocate_value().is_err());

        let serials = SerialAllocator::resume_after(u64::MAX);
        assert_eq!(serials.peek(), None);
        assert!(matches!(
            serials.allocate_value(),
            Err(PkiError::SerialExhausted(_))
        ));

        assert_eq!(SerialAllocator::new(u64::MAX).allocate_value().unwrap(), u64::MAX);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let serials = Arc::new(SerialAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let serials = Arc::clone(&serials);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| serials.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for serial in handle.join().unwrap() {
                assert!(seen.insert(serial));
            }
        }
        assert_eq!(seen.len(), 2000);
    }
}
