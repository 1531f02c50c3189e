//! 失败计数表
//!
//! 以消息 ID 为键记录每条消息累计的回调失败次数，只由所属消费循环读写。
//! 表只在内存中，进程重启后计数归零。

use std::collections::HashMap;

use crate::stream::Message;

/// 失败记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    pub message: Message,
    pub count: u32,
}

/// 失败计数表
#[derive(Debug, Default)]
pub struct FailureTable {
    entries: HashMap<String, FailureEntry>,
}

impl FailureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次失败，返回累计失败次数
    pub fn record_failure(&mut self, msg: &Message) -> u32 {
        let entry = self
            .entries
            .entry(msg.id.clone())
            .or_insert_with(|| FailureEntry {
                message: msg.clone(),
                count: 0,
            });
        entry.count = entry.count.saturating_add(1);
        entry.count
    }

    /// 移除记录，返回记录是否存在
    pub fn clear(&mut self, msg_id: &str) -> bool {
        self.entries.remove(msg_id).is_some()
    }

    /// 当前失败次数，没有记录时为 0
    pub fn count(&self, msg_id: &str) -> u32 {
        self.entries.get(msg_id).map(|e| e.count).unwrap_or(0)
    }

    /// 失败次数达到 `limit` 的记录
    pub fn exhausted(&self, limit: u32) -> Vec<FailureEntry> {
        let mut exhausted: Vec<FailureEntry> = self
            .entries
            .values()
            .filter(|e| e.count >= limit)
            .cloned()
            .collect();
        exhausted.sort_by(|a, b| {
            stream_order(&a.message.id).cmp(&stream_order(&b.message.id))
        });
        exhausted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 按 `<毫秒>-<序号>` 解析消息 ID，无法解析的排在最后
fn stream_order(id: &str) -> (u64, u64, &str) {
    let parsed = id
        .split_once('-')
        .and_then(|(ms, seq)| Some((ms.parse().ok()?, seq.parse().ok()?)));
    match parsed {
        Some((ms, seq)) => (ms, seq, ""),
        None => (u64::MAX, u64::MAX, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_until_cleared() {
        let mut table = FailureTable::new();
        let msg = Message::new("1-0", "k", "v");

        assert_eq!(table.record_failure(&msg), 1);
        assert_eq!(table.record_failure(&msg), 2);
        assert_eq!(table.count("1-0"), 2);

        assert!(table.clear("1-0"));
        assert!(!table.clear("1-0"));
        assert_eq!(table.count("1-0"), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn keyed_by_id_alone() {
        let mut table = FailureTable::new();
        table.record_failure(&Message::new("1-0", "k", "v"));
        table.record_failure(&Message::new("1-0", "k", "changed"));
        table.record_failure(&Message::new("2-0", "k", "v"));

        assert_eq!(table.count("1-0"), 2);
        assert_eq!(table.count("2-0"), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn exhausted_respects_limit() {
        let mut table = FailureTable::new();
        let a = Message::new("1-0", "a", "v");
        let b = Message::new("2-0", "b", "v");
        table.record_failure(&a);
        table.record_failure(&a);
        table.record_failure(&b);

        let exhausted = table.exhausted(2);
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].message, a);

        // 上限为 0 时所有失败过的消息都满足条件
        assert_eq!(table.exhausted(0).len(), 2);
    }

    #[test]
    fn exhausted_in_stream_order() {
        let mut table = FailureTable::new();
        for id in ["10-0", "9-1", "9-0"] {
            table.record_failure(&Message::new(id, "k", "v"));
        }

        let ids: Vec<String> = table
            .exhausted(1)
            .into_iter()
            .map(|e| e.message.id)
            .collect();
        assert_eq!(ids, vec!["9-0", "9-1", "10-0"]);
    }
}
