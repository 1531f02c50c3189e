//! 消息回调定义

use std::future::Future;

use async_trait::async_trait;

use super::context::DeliveryContext;
use crate::stream::Message;

/// 接收到消息后执行的回调，由使用方实现
///
/// 同一条消息可能被投递多次（超时、重启、确认失败后的 pending 重投），回调需要幂等。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &DeliveryContext, msg: &Message) -> anyhow::Result<()>;
}

/// 闭包回调包装
pub struct HandlerFn<F> {
    f: F,
}

/// 将异步闭包包装为 [`MessageHandler`]
///
/// # 示例
/// ```rust,no_run
/// use redis_stream_mq::consumer::handler_fn;
///
/// let handler = handler_fn(|_ctx, msg| async move {
///     tracing::info!(msg_id = %msg.id, "received");
///     anyhow::Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(DeliveryContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(DeliveryContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: &DeliveryContext, msg: &Message) -> anyhow::Result<()> {
        (self.f)(ctx.clone(), msg.clone()).await
    }
}
