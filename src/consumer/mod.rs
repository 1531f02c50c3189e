//! 消费者模块
//!
//! 消费循环每一轮依次执行四个阶段：
//! 1. 认领新消息（最多阻塞 `receive_timeout`）
//! 2. 处理新消息：回调成功则确认，失败则累加失败次数并保留在 pending 中
//! 3. 死信投递：失败次数达到 `max_retry_limit` 的消息投递到死信，随后无论投递结果都执行确认
//! 4. 认领并处理 pending 消息（与阶段 2 相同的处理语义）；消息体已被裁剪的条目直接确认
//!
//! "没有消息" 不是错误，只会让对应阶段处理一个空批次；其他读取错误会结束本轮，下一轮照常进行。
//! 循环内的任何错误都不会终止消费者，只有 [`ConsumerHandle::stop`] 或外部取消才会。
//!
//! # 使用示例
//! ```rust,no_run
//! use std::sync::Arc;
//! use redis_stream_mq::consumer::{Consumer, ConsumerIdentity, ConsumerOptions, handler_fn};
//! use redis_stream_mq::stream::{ClientOptions, RedisStreamClient};
//!
//! # async fn example() -> redis_stream_mq::Result<()> {
//! let client = Arc::new(RedisStreamClient::connect("redis://127.0.0.1:6379", ClientOptions::new()).await?);
//! let consumer = Consumer::new(
//!     client,
//!     ConsumerIdentity::new("orders", "billing", "billing-1"),
//!     handler_fn(|_ctx, msg| async move {
//!         tracing::info!(msg_id = %msg.id, key = %msg.key, "handling order");
//!         anyhow::Ok(())
//!     }),
//!     ConsumerOptions::new().with_max_retry_limit(5),
//! )?;
//!
//! let handle = consumer.start();
//! // ...
//! handle.stop();
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod failure;
pub mod handler;
pub mod observer;
pub mod options;

pub use context::DeliveryContext;
pub use failure::{FailureEntry, FailureTable};
pub use handler::{HandlerFn, MessageHandler, handler_fn};
pub use observer::{DeliveryObserver, ReceivePhase, TracingObserver};
pub use options::{ConsumerOptions, EffectiveOptions};

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use crate::error::{MqError, Result};
use crate::stream::{Message, PendingBatch, StreamClient};

/// 消费者身份
///
/// 决定该消费者实例可以认领的未确认消息范围，构造后不可变。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerIdentity {
    pub topic: String,
    pub group: String,
    pub consumer_id: String,
}

impl ConsumerIdentity {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        consumer_id: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            consumer_id: consumer_id.into(),
        }
    }

    /// 校验三个字段均非空
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() || self.group.is_empty() || self.consumer_id.is_empty() {
            return Err(MqError::invalid_argument(
                "topic | group_id | consumer_id can't be empty",
            ));
        }
        Ok(())
    }
}

/// 消费者
///
/// 构造只做参数校验，不会启动任何后台任务；调用 [`Consumer::start`] 后才开始消费。
pub struct Consumer {
    client: Arc<dyn StreamClient>,
    identity: ConsumerIdentity,
    handler: Arc<dyn MessageHandler>,
    options: EffectiveOptions,
    failures: FailureTable,
}

impl Consumer {
    /// 创建消费者
    ///
    /// # 参数
    /// * `client` - 流客户端，可以被多个消费者共享
    /// * `identity` - 消费者身份，三个字段都不能为空
    /// * `handler` - 消息回调
    /// * `options` - 消费者选项，未设置的字段使用默认值
    pub fn new<H>(
        client: Arc<dyn StreamClient>,
        identity: ConsumerIdentity,
        handler: H,
        options: ConsumerOptions,
    ) -> Result<Self>
    where
        H: MessageHandler + 'static,
    {
        identity.validate()?;

        Ok(Self {
            client,
            identity,
            handler: Arc::new(handler),
            options: options.repair(),
            failures: FailureTable::new(),
        })
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    /// 修复后的选项
    pub fn options(&self) -> &EffectiveOptions {
        &self.options
    }

    /// 在新的 tokio 任务中启动消费循环，立即返回
    pub fn start(self) -> ConsumerHandle {
        self.spawn(CancellationToken::new())
    }

    /// 启动消费循环，父令牌取消时消费者随之停止
    pub fn start_with_parent(self, parent: &CancellationToken) -> ConsumerHandle {
        self.spawn(parent.child_token())
    }

    fn spawn(self, token: CancellationToken) -> ConsumerHandle {
        let identity = self.identity.clone();
        let span = info_span!(
            "consumer",
            topic = %identity.topic,
            group = %identity.group,
            consumer_id = %identity.consumer_id
        );
        let task = tokio::spawn(self.run(token.clone()).instrument(span));

        ConsumerHandle {
            identity,
            token,
            task,
        }
    }

    /// 在当前任务中运行消费循环，直到令牌被取消
    pub async fn run(mut self, token: CancellationToken) {
        let observer = self.options.observer.clone();
        observer.started(&self.identity);

        while !token.is_cancelled() {
            self.run_once(&token).await;
        }

        observer.stopped(&self.identity, self.failures.len());
    }

    /// 执行一轮四个阶段
    async fn run_once(&mut self, token: &CancellationToken) {
        // 新消息接收处理
        let fresh = match self.receive(token).await {
            Ok(messages) => messages,
            Err(MqError::NoMessage) => Vec::new(),
            Err(MqError::Cancelled) => return,
            Err(err) => {
                self.options
                    .observer
                    .receive_failed(&self.identity, ReceivePhase::New, &err);
                self.backoff(token).await;
                return;
            }
        };
        self.handle_messages(token, fresh).await;
        if token.is_cancelled() {
            return;
        }

        // 死信投递
        self.deliver_dead_letters(token).await;
        if token.is_cancelled() {
            return;
        }

        // pending 消息接收处理
        let pending = match self.receive_pending().await {
            Ok(batch) => batch,
            Err(MqError::NoMessage) => return,
            Err(err) => {
                self.options
                    .observer
                    .receive_failed(&self.identity, ReceivePhase::Pending, &err);
                self.backoff(token).await;
                return;
            }
        };
        self.settle_trimmed(&pending.trimmed).await;
        self.handle_messages(token, pending.messages).await;
    }

    async fn receive(&self, token: &CancellationToken) -> Result<Vec<Message>> {
        let claim = self.client.claim_new(
            &self.identity.group,
            &self.identity.consumer_id,
            &self.identity.topic,
            self.options.receive_timeout,
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(MqError::Cancelled),
            result = claim => result,
        }
    }

    async fn receive_pending(&self) -> Result<PendingBatch> {
        self.client
            .claim_pending(
                &self.identity.group,
                &self.identity.consumer_id,
                &self.identity.topic,
            )
            .await
    }

    /// 逐条执行回调：成功则确认，失败则累加失败次数
    async fn handle_messages(&mut self, token: &CancellationToken, messages: Vec<Message>) {
        for msg in messages {
            // 取消后剩余消息原样留在 pending 中
            if token.is_cancelled() {
                break;
            }

            let ctx = DeliveryContext::new(token, self.options.handle_msg_timeout);
            let outcome = ctx
                .run(async {
                    self.handler
                        .handle(&ctx, &msg)
                        .await
                        .map_err(|err| MqError::Handler(format!("{:#}", err)))
                })
                .await;

            if let Err(err) = outcome {
                let failures = self.failures.record_failure(&msg);
                self.options
                    .observer
                    .handle_failed(&self.identity, &msg, failures, &err);
                continue;
            }

            // 回调执行成功，进行 ack
            match self.acknowledge(&msg).await {
                Ok(()) => {
                    self.failures.clear(&msg.id);
                    self.options.observer.acknowledged(&self.identity, &msg);
                }
                Err(err) => self.options.observer.ack_failed(&self.identity, &msg, &err),
            }
        }
    }

    /// 消息体已被裁剪的 pending 条目无法再投递，直接确认并移出失败计数表
    async fn settle_trimmed(&mut self, trimmed: &[String]) {
        for msg_id in trimmed {
            let acked = self
                .client
                .acknowledge(&self.identity.topic, &self.identity.group, msg_id)
                .await;
            match acked {
                Ok(()) => {
                    let failures = self.failures.count(msg_id);
                    self.failures.clear(msg_id);
                    self.options
                        .observer
                        .trimmed(&self.identity, msg_id, failures);
                }
                Err(err) => self
                    .options
                    .observer
                    .trimmed_ack_failed(&self.identity, msg_id, &err),
            }
        }
    }

    /// 失败次数达到上限的消息投递到死信，然后执行 ack
    async fn deliver_dead_letters(&mut self, token: &CancellationToken) {
        for entry in self.failures.exhausted(self.options.max_retry_limit) {
            if token.is_cancelled() {
                break;
            }
            let msg = &entry.message;

            let ctx = DeliveryContext::new(token, self.options.dead_letter_deliver_timeout);
            let delivered = ctx
                .run(self.options.dead_letter_mailbox.deliver(&ctx, msg))
                .await;
            match delivered {
                Ok(()) => self
                    .options
                    .observer
                    .dead_lettered(&self.identity, msg, entry.count),
                Err(err) => self
                    .options
                    .observer
                    .dead_letter_failed(&self.identity, msg, &err),
            }

            // 投递失败也执行 ack，避免毒消息阻塞流
            match self.acknowledge(msg).await {
                Ok(()) => {
                    self.failures.clear(&msg.id);
                    self.options.observer.acknowledged(&self.identity, msg);
                }
                Err(err) => self.options.observer.ack_failed(&self.identity, msg, &err),
            }
        }
    }

    async fn acknowledge(&self, msg: &Message) -> Result<()> {
        self.client
            .acknowledge(&self.identity.topic, &self.identity.group, &msg.id)
            .await
    }

    async fn backoff(&self, token: &CancellationToken) {
        if self.options.error_backoff.is_zero() {
            return;
        }

        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(self.options.error_backoff) => {}
        }
    }
}

/// 运行中消费者的句柄
///
/// 丢弃句柄不会停止消费者，需要显式调用 [`ConsumerHandle::stop`]。
pub struct ConsumerHandle {
    identity: ConsumerIdentity,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// 停止消费者
    ///
    /// 只发出取消信号，不等待后台任务退出；重复调用没有额外效果。
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// 是否已发出停止信号
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 后台任务是否已退出
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn identity(&self) -> &ConsumerIdentity {
        &self.identity
    }

    /// 消费者使用的取消令牌
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 等待后台任务退出
    pub async fn join(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }
}
