//! 进程内流存储
//!
//! 具备与 Redis Streams 一致的消费者组语义：
//! - 每个组维护一个投递游标，同一条新消息只会被组内一个消费者认领
//! - 每个消费者维护自己的 pending 集合，确认后移出
//! - 追加时按 `max_len` 裁剪旧消息
//!
//! 同时提供故障注入接口，便于测试传输失败路径。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Message, PendingBatch, StreamClient, ensure_not_empty};
use crate::error::{ErrorCode, MqError, Result};

/// 消息 ID：毫秒时间戳 + 序号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    fn parse(raw: &str) -> Result<Self> {
        let invalid = || {
            MqError::transport(
                ErrorCode::CommandFailed,
                format!("Invalid stream ID specified as stream command argument: {}", raw),
            )
        };
        let (ms, seq) = raw.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            ms: ms.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    id: EntryId,
    key: String,
    value: String,
}

impl Entry {
    fn to_message(&self) -> Message {
        Message::new(self.id.to_string(), self.key.clone(), self.value.clone())
    }
}

#[derive(Debug, Default)]
struct Group {
    /// 已投递的最大 ID，`None` 表示从流起点开始
    last_delivered: Option<EntryId>,
    /// 已认领未确认的消息 -> 认领它的消费者
    pending: BTreeMap<EntryId, String>,
}

#[derive(Debug, Default)]
struct Topic {
    entries: VecDeque<Entry>,
    groups: HashMap<String, Group>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    last_id: Option<EntryId>,
    failing_claims: usize,
    failing_pending_claims: usize,
    failing_acks: usize,
    enqueued: u64,
    acknowledged: u64,
}

impl State {
    fn next_id(&mut self) -> EntryId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let id = match self.last_id {
            Some(last) if now_ms <= last.ms => EntryId {
                ms: last.ms,
                seq: last.seq + 1,
            },
            _ => EntryId { ms: now_ms, seq: 0 },
        };
        self.last_id = Some(id);
        id
    }

    fn group_mut(&mut self, topic: &str, group: &str) -> Result<(&VecDeque<Entry>, &mut Group)> {
        let topic_state = self.topics.get_mut(topic).ok_or_else(|| no_group(topic, group))?;
        let group_state = topic_state
            .groups
            .get_mut(group)
            .ok_or_else(|| no_group(topic, group))?;
        Ok((&topic_state.entries, group_state))
    }
}

fn no_group(topic: &str, group: &str) -> MqError {
    MqError::transport(
        ErrorCode::CommandFailed,
        format!(
            "NOGROUP No such key '{}' or consumer group '{}'",
            topic, group
        ),
    )
}

fn injected_failure(command: &str) -> MqError {
    MqError::transport(
        ErrorCode::ConnectionClosed,
        format!("injected {} failure", command),
    )
}

/// 进程内流存储
///
/// 可以直接作为 [`StreamClient`] 使用，多个消费者共享同一个实例（通常包装在 `Arc` 中）。
#[derive(Debug, Default)]
pub struct InMemoryStream {
    state: Mutex<State>,
    appended: Notify,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 令接下来 `n` 次新消息认领返回传输错误
    pub fn fail_next_claims(&self, n: usize) {
        self.lock().failing_claims = n;
    }

    /// 令接下来 `n` 次 pending 消息读取返回传输错误
    pub fn fail_next_pending_claims(&self, n: usize) {
        self.lock().failing_pending_claims = n;
    }

    /// 令接下来 `n` 次确认返回传输错误
    pub fn fail_next_acks(&self, n: usize) {
        self.lock().failing_acks = n;
    }

    /// topic 当前保留的消息数
    pub fn len(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.entries.len())
            .unwrap_or(0)
    }

    /// topic 是否为空
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// 某个消费者已认领未确认的消息 ID
    pub fn pending_ids(&self, topic: &str, group: &str, consumer_id: &str) -> Vec<String> {
        let state = self.lock();
        state
            .topics
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|g| {
                g.pending
                    .iter()
                    .filter(|(_, owner)| owner.as_str() == consumer_id)
                    .map(|(id, _)| id.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 累计成功追加的消息数
    pub fn enqueued_count(&self) -> u64 {
        self.lock().enqueued
    }

    /// 累计成功确认的消息数
    pub fn acknowledged_count(&self) -> u64 {
        self.lock().acknowledged
    }

    /// 尝试认领新消息，不阻塞
    fn try_claim_new(&self, group: &str, consumer_id: &str, topic: &str) -> Result<Vec<Message>> {
        let mut state = self.lock();
        let (entries, group_state) = state.group_mut(topic, group)?;

        let claimed: Vec<Entry> = entries
            .iter()
            .filter(|e| group_state.last_delivered.is_none_or(|last| e.id > last))
            .cloned()
            .collect();

        if let Some(last) = claimed.last() {
            group_state.last_delivered = Some(last.id);
        }
        for entry in &claimed {
            group_state.pending.insert(entry.id, consumer_id.to_string());
        }

        Ok(claimed.iter().map(Entry::to_message).collect())
    }
}

#[async_trait]
impl StreamClient for InMemoryStream {
    async fn enqueue(&self, topic: &str, max_len: usize, key: &str, value: &str) -> Result<String> {
        ensure_not_empty("XADD", &[("topic", topic)])?;

        let id = {
            let mut state = self.lock();
            let id = state.next_id();
            let topic_state = state.topics.entry(topic.to_string()).or_default();
            topic_state.entries.push_back(Entry {
                id,
                key: key.to_string(),
                value: value.to_string(),
            });
            while topic_state.entries.len() > max_len {
                topic_state.entries.pop_front();
            }
            state.enqueued += 1;
            id
        };

        self.appended.notify_waiters();
        Ok(id.to_string())
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<()> {
        ensure_not_empty("XGROUP", &[("topic", topic), ("group", group)])?;

        let mut state = self.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn claim_new(
        &self,
        group: &str,
        consumer_id: &str,
        topic: &str,
        block: Duration,
    ) -> Result<Vec<Message>> {
        ensure_not_empty(
            "XREADGROUP",
            &[("group", group), ("consumer_id", consumer_id), ("topic", topic)],
        )?;

        {
            let mut state = self.lock();
            if state.failing_claims > 0 {
                state.failing_claims -= 1;
                return Err(injected_failure("XREADGROUP"));
            }
        }

        // 超出 Instant 表示范围的阻塞时长等同于一直阻塞
        let deadline = (!block.is_zero())
            .then(|| Instant::now().checked_add(block))
            .flatten();
        loop {
            // 先注册唤醒再检查状态，避免错过检查与等待之间的追加
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let claimed = self.try_claim_new(group, consumer_id, topic)?;
            if !claimed.is_empty() {
                return Ok(claimed);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, appended).await.is_err() {
                        return Err(MqError::NoMessage);
                    }
                }
                None => appended.await,
            }
        }
    }

    async fn claim_pending(
        &self,
        group: &str,
        consumer_id: &str,
        topic: &str,
    ) -> Result<PendingBatch> {
        ensure_not_empty(
            "XREADGROUP",
            &[("group", group), ("consumer_id", consumer_id), ("topic", topic)],
        )?;

        let mut state = self.lock();
        if state.failing_pending_claims > 0 {
            state.failing_pending_claims -= 1;
            return Err(injected_failure("XREADGROUP"));
        }

        let (entries, group_state) = state.group_mut(topic, group)?;
        let mut batch = PendingBatch::default();
        for id in group_state
            .pending
            .iter()
            .filter(|(_, owner)| owner.as_str() == consumer_id)
            .map(|(id, _)| *id)
        {
            match entries.iter().find(|e| e.id == id) {
                Some(entry) => batch.messages.push(entry.to_message()),
                None => batch.trimmed.push(id.to_string()),
            }
        }

        if batch.is_empty() {
            return Err(MqError::NoMessage);
        }
        Ok(batch)
    }

    async fn acknowledge(&self, topic: &str, group: &str, msg_id: &str) -> Result<()> {
        ensure_not_empty(
            "XACK",
            &[("topic", topic), ("group", group), ("msg_id", msg_id)],
        )?;
        let id = EntryId::parse(msg_id)?;

        let mut state = self.lock();
        if state.failing_acks > 0 {
            state.failing_acks -= 1;
            return Err(injected_failure("XACK"));
        }

        let (_, group_state) = state.group_mut(topic, group)?;
        if group_state.pending.remove(&id).is_none() {
            return Err(MqError::invalid_reply("xack reply: 0"));
        }
        state.acknowledged += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn ids_are_monotonic() {
        let stream = InMemoryStream::new();
        let first = stream.enqueue("t", 10, "k", "a").await.unwrap();
        let second = stream.enqueue("t", 10, "k", "b").await.unwrap();

        assert!(EntryId::parse(&first).unwrap() < EntryId::parse(&second).unwrap());
    }

    #[tokio::test]
    async fn enqueue_trims_to_max_len() {
        let stream = InMemoryStream::new();
        for i in 0..5 {
            stream.enqueue("t", 3, "k", &i.to_string()).await.unwrap();
        }
        assert_eq!(stream.len("t"), 3);
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_topic() {
        let stream = InMemoryStream::new();
        let err = stream.enqueue("", 3, "k", "v").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }

    #[tokio::test]
    async fn group_cursor_starts_at_beginning() {
        let stream = InMemoryStream::new();
        stream.enqueue("t", 10, "k1", "v1").await.unwrap();
        stream.create_group("t", "g").await.unwrap();

        let claimed = stream
            .claim_new("g", "c1", "t", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].key, "k1");
    }

    #[tokio::test]
    async fn claim_without_group_fails() {
        let stream = InMemoryStream::new();
        let err = stream
            .claim_new("g", "c1", "missing", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(!err.is_no_message());
    }

    #[tokio::test]
    async fn pending_is_scoped_to_consumer_and_cleared_by_ack() {
        let stream = InMemoryStream::new();
        stream.create_group("t", "g").await.unwrap();
        let id = stream.enqueue("t", 10, "k", "v").await.unwrap();

        stream
            .claim_new("g", "c1", "t", Duration::from_millis(10))
            .await
            .unwrap();

        assert!(
            stream
                .claim_pending("g", "c2", "t")
                .await
                .unwrap_err()
                .is_no_message()
        );
        assert_eq!(
            stream
                .claim_pending("g", "c1", "t")
                .await
                .unwrap()
                .messages
                .len(),
            1
        );

        stream.acknowledge("t", "g", &id).await.unwrap();
        assert!(stream.pending_ids("t", "g", "c1").is_empty());

        // 重复确认时确认数量为 0
        let err = stream.acknowledge("t", "g", &id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidReply);
    }

    #[tokio::test]
    async fn trimmed_pending_entries_are_reported() {
        let stream = InMemoryStream::new();
        stream.create_group("t", "g").await.unwrap();
        let first = stream.enqueue("t", 1, "k", "a").await.unwrap();
        stream
            .claim_new("g", "c1", "t", Duration::from_millis(10))
            .await
            .unwrap();

        // 第二条消息把第一条裁剪出流
        stream.enqueue("t", 1, "k", "b").await.unwrap();

        let batch = stream.claim_pending("g", "c1", "t").await.unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.trimmed, vec![first.clone()]);

        stream.acknowledge("t", "g", &first).await.unwrap();
        assert!(stream.pending_ids("t", "g", "c1").is_empty());
    }

    #[tokio::test]
    async fn huge_block_waits_for_message() {
        let stream = Arc::new(InMemoryStream::new());
        stream.create_group("t", "g").await.unwrap();

        let reader = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.claim_new("g", "c1", "t", Duration::MAX).await })
        };
        tokio::task::yield_now().await;
        stream.enqueue("t", 10, "k", "v").await.unwrap();

        let claimed = reader.await.unwrap().unwrap();
        assert_eq!(claimed.len(), 1);
    }
}
