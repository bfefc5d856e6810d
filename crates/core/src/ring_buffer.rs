use serde::{Serialize, Serializer};

/// 固定容量的环形缓冲区
///
/// 存储区在创建时一次性分配，写满后覆盖最旧的元素。迭代顺序始终从最旧到最新。
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// 容量为 0 时按 1 处理
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 追加元素，缓冲区已满时返回被淘汰的最旧元素
    pub fn push(&mut self, item: T) -> Option<T> {
        let capacity = self.capacity();
        let tail = (self.head + self.len) % capacity;
        if self.len == capacity {
            let evicted = self.slots[self.head].replace(item);
            self.head = (self.head + 1) % capacity;
            evicted
        } else {
            self.slots[tail] = Some(item);
            self.len += 1;
            None
        }
    }

    pub fn latest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        let index = (self.head + self.len - 1) % self.capacity();
        self.slots[index].as_ref()
    }

    pub fn oldest(&self) -> Option<&T> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |offset| self.slots[(self.head + offset) % capacity].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for RingBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut buffer = RingBuffer::with_capacity(3);
        assert!(buffer.is_empty());
        assert!(buffer.push(1).is_none());
        assert!(buffer.push(2).is_none());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.to_vec(), vec![1, 2]);
        assert_eq!(buffer.oldest(), Some(&1));
        assert_eq!(buffer.latest(), Some(&2));
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut buffer = RingBuffer::with_capacity(3);
        for i in 1..=3 {
            buffer.push(i);
        }
        assert_eq!(buffer.push(4), Some(1));
        assert_eq!(buffer.push(5), Some(2));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.to_vec(), vec![3, 4, 5]);
        assert_eq!(buffer.latest(), Some(&5));
    }

    #[test]
    fn test_long_run_keeps_order() {
        let mut buffer = RingBuffer::with_capacity(4);
        for i in 0..103 {
            buffer.push(i);
        }
        assert_eq!(buffer.to_vec(), vec![99, 100, 101, 102]);
    }

    #[test]
    fn test_zero_capacity_is_one() {
        let mut buffer = RingBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push("a");
        assert_eq!(buffer.push("b"), Some("a"));
        assert_eq!(buffer.to_vec(), vec!["b"]);
    }

    #[test]
    fn test_clear() {
        let mut buffer = RingBuffer::with_capacity(2);
        buffer.push(1);
        buffer.push(2);
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        buffer.push(7);
        assert_eq!(buffer.to_vec(), vec![7]);
    }

    #[test]
    fn test_serialize_as_sequence() {
        let mut buffer = RingBuffer::with_capacity(2);
        buffer.push(1);
        buffer.push(2);
        buffer.push(3);
        assert_eq!(serde_json::to_string(&buffer).unwrap(), "[2,3]");
    }
}
