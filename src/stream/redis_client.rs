//! 基于 Redis Streams 的流客户端
//!
//! 命令映射：
//! - 追加：`XADD topic MAXLEN ~ n * key value`
//! - 建组：`XGROUP CREATE topic group 0-0 MKSTREAM`
//! - 新消息：`XREADGROUP GROUP g c BLOCK ms STREAMS topic >`
//! - pending 消息：`XREADGROUP GROUP g c STREAMS topic 0-0`
//! - 确认：`XACK topic group id`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncConnectionConfig, FromRedisValue, Value};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use super::{Message, PendingBatch, StreamClient, ensure_not_empty};
use crate::error::{ErrorCode, MqError, Result};

/// 默认建连超时
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// 默认命令应答超时（阻塞读取在此基础上再加上阻塞时长）
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
/// 默认建连重试次数
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// 单次 `BLOCK` 的最长时长，更长的阻塞拆成多个分片
const MAX_BLOCK_SLICE: Duration = Duration::from_secs(5);
/// 空闲阻塞连接的最大保留数
const MAX_IDLE_BLOCKING_CONNECTIONS: usize = 16;

const INITIAL_RETRY_DELAY_MS: u64 = 100;
const MAX_RETRY_DELAY_MS: u64 = 2_000;

/// Redis 客户端选项
///
/// 每个字段单独修复：未设置或为零时使用默认值。
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub connect_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
    pub connect_retries: Option<u32>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置建连超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// 设置命令应答超时
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// 设置建连重试次数
    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = Some(retries);
        self
    }

    fn repair(&self) -> ResolvedClientOptions {
        ResolvedClientOptions {
            connect_timeout: self
                .connect_timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            response_timeout: self
                .response_timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_RESPONSE_TIMEOUT),
            connect_retries: self
                .connect_retries
                .filter(|r| *r > 0)
                .unwrap_or(DEFAULT_CONNECT_RETRIES),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedClientOptions {
    connect_timeout: Duration,
    response_timeout: Duration,
    connect_retries: u32,
}

/// Redis Streams 客户端
///
/// 非阻塞命令共享一个 [`ConnectionManager`]（断线自动重连，可安全并发使用）；
/// 阻塞读取使用独立的多路复用连接，避免 `BLOCK` 阻塞其他命令；
/// 这些连接读取结束后放回空闲池复用，同一时刻每个连接只服务一个阻塞读取。
#[derive(Clone)]
pub struct RedisStreamClient {
    client: redis::Client,
    manager: ConnectionManager,
    idle_blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
    options: ResolvedClientOptions,
}

impl RedisStreamClient {
    /// 连接 Redis
    ///
    /// # 参数
    /// * `url` - Redis 地址，例如 `redis://127.0.0.1:6379`
    /// * `options` - 客户端选项
    pub async fn connect(url: impl AsRef<str>, options: ClientOptions) -> Result<Self> {
        let client = redis::Client::open(url.as_ref())?;
        let options = options.repair();
        let manager = Self::connect_manager(&client, &options).await?;

        info!(
            connect_timeout_ms = options.connect_timeout.as_millis() as u64,
            response_timeout_ms = options.response_timeout.as_millis() as u64,
            "Connected to redis"
        );

        Ok(Self {
            client,
            manager,
            idle_blocking: Arc::new(Mutex::new(Vec::new())),
            options,
        })
    }

    async fn connect_manager(
        client: &redis::Client,
        options: &ResolvedClientOptions,
    ) -> Result<ConnectionManager> {
        let mut delay_ms = INITIAL_RETRY_DELAY_MS;

        for attempt in 1..=options.connect_retries {
            let err = match timeout(options.connect_timeout, ConnectionManager::new(client.clone()))
                .await
            {
                Ok(Ok(manager)) => return Ok(manager),
                Ok(Err(err)) => MqError::from(err),
                Err(_) => MqError::transport(
                    ErrorCode::ConnectionTimeout,
                    format!(
                        "redis connect timed out after {}ms",
                        options.connect_timeout.as_millis()
                    ),
                ),
            };

            if attempt == options.connect_retries {
                return Err(err);
            }

            warn!(
                attempt = attempt,
                max_attempts = options.connect_retries,
                error = %err,
                "Redis connection attempt failed, retrying..."
            );
            sleep(Duration::from_millis(delay_ms)).await;
            delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
        }

        Err(MqError::transport(
            ErrorCode::ConnectionFailed,
            "redis connect retries exhausted",
        ))
    }

    /// 在共享连接上执行命令，受应答超时约束
    async fn query<T>(&self, cmd: redis::Cmd) -> Result<T>
    where
        T: FromRedisValue + Send,
    {
        let mut conn = self.manager.clone();
        match timeout(self.options.response_timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(reply) => reply.map_err(MqError::from),
            Err(_) => Err(MqError::transport(
                ErrorCode::ConnectionTimeout,
                "redis response timed out",
            )),
        }
    }

    /// 取出一个空闲阻塞连接，没有时新建
    ///
    /// 连接的应答超时为最长 `BLOCK` 分片加上普通应答超时。
    async fn checkout_blocking(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.idle_pool().pop() {
            return Ok(conn);
        }

        let config = AsyncConnectionConfig::new()
            .set_response_timeout(MAX_BLOCK_SLICE.saturating_add(self.options.response_timeout));
        let connect = self
            .client
            .get_multiplexed_async_connection_with_config(&config);

        match timeout(self.options.connect_timeout, connect).await {
            Ok(conn) => conn.map_err(MqError::from),
            Err(_) => Err(MqError::transport(
                ErrorCode::ConnectionTimeout,
                "redis connect timed out",
            )),
        }
    }

    /// 放回阻塞连接；命令出错的连接直接丢弃，不经过这里
    fn checkin_blocking(&self, conn: MultiplexedConnection) {
        let mut idle = self.idle_pool();
        if idle.len() < MAX_IDLE_BLOCKING_CONNECTIONS {
            idle.push(conn);
        }
    }

    /// 当前空闲的阻塞连接数
    pub fn idle_blocking_connections(&self) -> usize {
        self.idle_pool().len()
    }

    fn idle_pool(&self) -> std::sync::MutexGuard<'_, Vec<MultiplexedConnection>> {
        self.idle_blocking
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================================
    // 键值便捷操作
    // ============================================================

    /// GET，键不存在时返回 `None`
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        ensure_not_empty("redis GET", &[("key", key)])?;
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query(cmd).await
    }

    /// SET
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        ensure_not_empty("redis SET", &[("key", key), ("value", value)])?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        let _: Value = self.query(cmd).await?;
        Ok(())
    }

    /// SET NX，返回是否写入成功
    pub async fn set_nx(&self, key: &str, value: &str) -> Result<bool> {
        ensure_not_empty("redis SET NX", &[("key", key), ("value", value)])?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        let reply: Option<String> = self.query(cmd).await?;
        Ok(reply.is_some())
    }

    /// SET EX NX，返回是否写入成功
    pub async fn set_nx_ex(&self, key: &str, value: &str, expire: Duration) -> Result<bool> {
        ensure_not_empty("redis SET EX NX", &[("key", key), ("value", value)])?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("EX")
            .arg(expire.as_secs().max(1))
            .arg("NX");
        let reply: Option<String> = self.query(cmd).await?;
        Ok(reply.is_some())
    }

    /// DEL
    pub async fn del(&self, key: &str) -> Result<()> {
        ensure_not_empty("redis DEL", &[("key", key)])?;
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        let _: i64 = self.query(cmd).await?;
        Ok(())
    }

    /// INCR
    pub async fn incr(&self, key: &str) -> Result<i64> {
        ensure_not_empty("redis INCR", &[("key", key)])?;
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.query(cmd).await
    }

    /// EVAL，执行 lua 脚本并返回原始应答
    pub async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<Value> {
        ensure_not_empty("redis EVAL", &[("script", script)])?;
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len()).arg(keys).arg(args);
        self.query(cmd).await
    }
}

#[async_trait]
impl StreamClient for RedisStreamClient {
    async fn enqueue(&self, topic: &str, max_len: usize, key: &str, value: &str) -> Result<String> {
        ensure_not_empty("redis XADD", &[("topic", topic)])?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .arg("*")
            .arg(key)
            .arg(value);
        self.query(cmd).await
    }

    async fn create_group(&self, topic: &str, group: &str) -> Result<()> {
        ensure_not_empty("redis XGROUP", &[("topic", topic), ("group", group)])?;

        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0-0")
            .arg("MKSTREAM");

        match self.query::<Value>(cmd).await {
            Ok(_) => Ok(()),
            Err(MqError::Transport { reason, .. }) if reason.contains("BUSYGROUP") => {
                debug!(topic = %topic, group = %group, "Consumer group already exists");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn claim_new(
        &self,
        group: &str,
        consumer_id: &str,
        topic: &str,
        block: Duration,
    ) -> Result<Vec<Message>> {
        ensure_not_empty(
            "redis XREADGROUP",
            &[("group", group), ("consumer_id", consumer_id), ("topic", topic)],
        )?;

        // 超出 Instant 表示范围的阻塞时长等同于一直阻塞
        let deadline = (!block.is_zero())
            .then(|| Instant::now().checked_add(block))
            .flatten();

        let mut conn = self.checkout_blocking().await?;
        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => MAX_BLOCK_SLICE,
            };

            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP")
                .arg(group)
                .arg(consumer_id)
                .arg("BLOCK")
                .arg(block_millis(remaining))
                .arg("STREAMS")
                .arg(topic)
                .arg(">");

            // 传输错误时连接随之丢弃，不放回空闲池
            let reply: Value = cmd.query_async(&mut conn).await?;
            let result = match parse_read_group_reply(reply) {
                Ok(batch) if !batch.messages.is_empty() => Ok(batch.messages),
                Ok(_) | Err(MqError::NoMessage)
                    if deadline.is_none_or(|deadline| Instant::now() < deadline) =>
                {
                    continue;
                }
                Ok(_) => Err(MqError::NoMessage),
                Err(err) => Err(err),
            };

            self.checkin_blocking(conn);
            return result;
        }
    }

    async fn claim_pending(
        &self,
        group: &str,
        consumer_id: &str,
        topic: &str,
    ) -> Result<PendingBatch> {
        ensure_not_empty(
            "redis XREADGROUP",
            &[("group", group), ("consumer_id", consumer_id), ("topic", topic)],
        )?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer_id)
            .arg("STREAMS")
            .arg(topic)
            .arg("0-0");

        let reply: Value = self.query(cmd).await?;
        parse_read_group_reply(reply)
    }

    async fn acknowledge(&self, topic: &str, group: &str, msg_id: &str) -> Result<()> {
        ensure_not_empty(
            "redis XACK",
            &[("topic", topic), ("group", group), ("msg_id", msg_id)],
        )?;

        let mut cmd = redis::cmd("XACK");
        cmd.arg(topic).arg(group).arg(msg_id);
        let reply: i64 = self.query(cmd).await?;
        if reply != 1 {
            return Err(MqError::invalid_reply(format!("xack reply: {}", reply)));
        }

        Ok(())
    }
}

/// 单个 `BLOCK` 分片的毫秒数，不超过 [`MAX_BLOCK_SLICE`]
///
/// `BLOCK 0` 在 Redis 中表示永久阻塞，因此至少为 1ms。
fn block_millis(remaining: Duration) -> u64 {
    u64::try_from(remaining.min(MAX_BLOCK_SLICE).as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

/// 解析 XREADGROUP 应答
///
/// 应答结构：
/// ```text
/// [ [ topic, [ [ id, [ key, value ] ], ... ] ] ]
/// ```
/// RESP3 下外层为 `{ topic => [...] }`。空应答视为没有消息；
/// 消息体已被裁剪（nil）的 pending 条目只返回 ID，放在 [`PendingBatch::trimmed`] 中。
pub(crate) fn parse_read_group_reply(reply: Value) -> Result<PendingBatch> {
    let entries = match reply {
        Value::Nil => return Err(MqError::NoMessage),
        Value::Array(streams) => match streams.into_iter().next() {
            None => return Err(MqError::NoMessage),
            Some(Value::Array(pair)) => {
                let [_topic, entries]: [Value; 2] = pair
                    .try_into()
                    .map_err(|_| MqError::invalid_reply("invalid msg format"))?;
                entries
            }
            Some(_) => return Err(MqError::invalid_reply("invalid msg format")),
        },
        Value::Map(streams) => match streams.into_iter().next() {
            None => return Err(MqError::NoMessage),
            Some((_topic, entries)) => entries,
        },
        _ => return Err(MqError::invalid_reply("invalid msg format")),
    };

    let Value::Array(entries) = entries else {
        return Err(MqError::invalid_reply("invalid msg format"));
    };

    let mut batch = PendingBatch::default();
    for entry in entries {
        let Value::Array(entry) = entry else {
            return Err(MqError::invalid_reply("invalid msg format"));
        };
        let [id, body]: [Value; 2] = entry
            .try_into()
            .map_err(|_| MqError::invalid_reply("invalid msg format"))?;

        let id: String = redis::from_redis_value(&id)
            .map_err(|err| MqError::invalid_reply(format!("invalid msg id: {}", err)))?;

        let fields = match body {
            Value::Nil => {
                debug!(msg_id = %id, "Pending entry body trimmed from stream");
                batch.trimmed.push(id);
                continue;
            }
            Value::Array(fields) => fields,
            Value::Map(fields) => fields.into_iter().flat_map(|(k, v)| [k, v]).collect(),
            _ => return Err(MqError::invalid_reply("invalid msg format")),
        };
        let [key, value]: [Value; 2] = fields
            .try_into()
            .map_err(|_| MqError::invalid_reply("invalid msg format"))?;

        let key: String = redis::from_redis_value(&key)
            .map_err(|err| MqError::invalid_reply(format!("invalid msg key: {}", err)))?;
        let value: String = redis::from_redis_value(&value)
            .map_err(|err| MqError::invalid_reply(format!("invalid msg value: {}", err)))?;

        batch.messages.push(Message { id, key, value });
    }

    if batch.is_empty() {
        return Err(MqError::NoMessage);
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, key: &str, value: &str) -> Value {
        Value::Array(vec![bulk(id), Value::Array(vec![bulk(key), bulk(value)])])
    }

    #[test]
    fn parses_stream_entries() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("orders"),
            Value::Array(vec![entry("1-0", "k1", "v1"), entry("2-0", "k2", "v2")]),
        ])]);

        let batch = parse_read_group_reply(reply).unwrap();
        assert_eq!(
            batch.messages,
            vec![Message::new("1-0", "k1", "v1"), Message::new("2-0", "k2", "v2")]
        );
        assert!(batch.trimmed.is_empty());
    }

    #[test]
    fn nil_and_empty_replies_mean_no_message() {
        assert!(parse_read_group_reply(Value::Nil).unwrap_err().is_no_message());
        assert!(
            parse_read_group_reply(Value::Array(vec![]))
                .unwrap_err()
                .is_no_message()
        );

        let empty_pending = Value::Array(vec![Value::Array(vec![
            bulk("orders"),
            Value::Array(vec![]),
        ])]);
        assert!(parse_read_group_reply(empty_pending).unwrap_err().is_no_message());
    }

    #[test]
    fn trimmed_pending_entries_are_reported_by_id() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("orders"),
            Value::Array(vec![
                Value::Array(vec![bulk("1-0"), Value::Nil]),
                entry("2-0", "k2", "v2"),
            ]),
        ])]);

        let batch = parse_read_group_reply(reply).unwrap();
        assert_eq!(batch.messages, vec![Message::new("2-0", "k2", "v2")]);
        assert_eq!(batch.trimmed, vec!["1-0".to_string()]);
    }

    #[test]
    fn only_trimmed_entries_is_not_empty() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("orders"),
            Value::Array(vec![Value::Array(vec![bulk("5-0"), Value::Nil])]),
        ])]);

        let batch = parse_read_group_reply(reply).unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.trimmed, vec!["5-0".to_string()]);
    }

    #[test]
    fn rejects_entries_with_extra_fields() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("orders"),
            Value::Array(vec![Value::Array(vec![
                bulk("1-0"),
                Value::Array(vec![bulk("k1"), bulk("v1"), bulk("k2"), bulk("v2")]),
            ])]),
        ])]);

        let err = parse_read_group_reply(reply).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidReply);
    }

    #[test]
    fn parses_resp3_map_reply() {
        let reply = Value::Map(vec![(
            bulk("orders"),
            Value::Array(vec![entry("3-1", "k", "v")]),
        )]);

        let batch = parse_read_group_reply(reply).unwrap();
        assert_eq!(batch.messages, vec![Message::new("3-1", "k", "v")]);
    }

    #[test]
    fn block_slices_are_bounded() {
        assert_eq!(block_millis(Duration::from_millis(250)), 250);
        assert_eq!(block_millis(Duration::ZERO), 1);
        assert_eq!(block_millis(Duration::MAX), MAX_BLOCK_SLICE.as_millis() as u64);
    }

    #[test]
    fn client_options_repair_each_field() {
        let resolved = ClientOptions::new()
            .with_connect_timeout(Duration::ZERO)
            .with_response_timeout(Duration::from_millis(250))
            .repair();

        assert_eq!(resolved.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(resolved.response_timeout, Duration::from_millis(250));
        assert_eq!(resolved.connect_retries, DEFAULT_CONNECT_RETRIES);
    }
}
