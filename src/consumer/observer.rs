//! 消费循环观察者
//!
//! 消费循环不依赖全局日志状态，所有诊断事件都通过注入的 [`DeliveryObserver`] 上报。
//! 默认实现 [`TracingObserver`] 把事件写入 `tracing`。

use tracing::{debug, error, info, warn};

use super::ConsumerIdentity;
use crate::error::MqError;
use crate::stream::Message;

/// 读取阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePhase {
    /// 认领新消息
    New,
    /// 认领 pending 消息
    Pending,
}

impl ReceivePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceivePhase::New => "new",
            ReceivePhase::Pending => "pending",
        }
    }
}

/// 消费循环事件观察者
///
/// 所有方法都有空的默认实现，按需覆盖。
pub trait DeliveryObserver: Send + Sync {
    /// 消费循环启动
    fn started(&self, _identity: &ConsumerIdentity) {}

    /// 消费循环退出，`unsettled` 为退出时失败计数表中的记录数
    fn stopped(&self, _identity: &ConsumerIdentity, _unsettled: usize) {}

    /// 读取消息失败（不包括 "没有消息"）
    fn receive_failed(&self, _identity: &ConsumerIdentity, _phase: ReceivePhase, _err: &MqError) {}

    /// 回调执行失败
    fn handle_failed(
        &self,
        _identity: &ConsumerIdentity,
        _msg: &Message,
        _failures: u32,
        _err: &MqError,
    ) {
    }

    /// 消息确认成功
    fn acknowledged(&self, _identity: &ConsumerIdentity, _msg: &Message) {}

    /// 消息确认失败
    fn ack_failed(&self, _identity: &ConsumerIdentity, _msg: &Message, _err: &MqError) {}

    /// 消息已投递到死信
    fn dead_lettered(&self, _identity: &ConsumerIdentity, _msg: &Message, _failures: u32) {}

    /// 死信投递失败
    fn dead_letter_failed(&self, _identity: &ConsumerIdentity, _msg: &Message, _err: &MqError) {}

    /// 消息体已被裁剪的 pending 条目已确认，`failures` 为确认前记录的失败次数
    fn trimmed(&self, _identity: &ConsumerIdentity, _msg_id: &str, _failures: u32) {}

    /// 消息体已被裁剪的 pending 条目确认失败，下一轮会再次尝试
    fn trimmed_ack_failed(&self, _identity: &ConsumerIdentity, _msg_id: &str, _err: &MqError) {}
}

/// 基于 `tracing` 的默认观察者
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DeliveryObserver for TracingObserver {
    fn started(&self, identity: &ConsumerIdentity) {
        info!(
            topic = %identity.topic,
            group = %identity.group,
            consumer_id = %identity.consumer_id,
            "Consumer started"
        );
    }

    fn stopped(&self, identity: &ConsumerIdentity, unsettled: usize) {
        info!(
            topic = %identity.topic,
            group = %identity.group,
            consumer_id = %identity.consumer_id,
            unsettled = unsettled,
            "Consumer stopped"
        );
    }

    fn receive_failed(&self, identity: &ConsumerIdentity, phase: ReceivePhase, err: &MqError) {
        error!(
            topic = %identity.topic,
            group = %identity.group,
            consumer_id = %identity.consumer_id,
            phase = phase.as_str(),
            error = %err,
            "receive msg failed"
        );
    }

    fn handle_failed(&self, identity: &ConsumerIdentity, msg: &Message, failures: u32, err: &MqError) {
        warn!(
            topic = %identity.topic,
            consumer_id = %identity.consumer_id,
            msg_id = %msg.id,
            failures = failures,
            error = %err,
            "msg handle failed"
        );
    }

    fn acknowledged(&self, identity: &ConsumerIdentity, msg: &Message) {
        debug!(
            topic = %identity.topic,
            consumer_id = %identity.consumer_id,
            msg_id = %msg.id,
            "msg acked"
        );
    }

    fn ack_failed(&self, identity: &ConsumerIdentity, msg: &Message, err: &MqError) {
        error!(
            topic = %identity.topic,
            group = %identity.group,
            consumer_id = %identity.consumer_id,
            msg_id = %msg.id,
            error = %err,
            "msg ack failed"
        );
    }

    fn dead_lettered(&self, identity: &ConsumerIdentity, msg: &Message, failures: u32) {
        warn!(
            topic = %identity.topic,
            consumer_id = %identity.consumer_id,
            msg_id = %msg.id,
            failures = failures,
            "msg delivered to dead letter"
        );
    }

    fn dead_letter_failed(&self, identity: &ConsumerIdentity, msg: &Message, err: &MqError) {
        error!(
            topic = %identity.topic,
            consumer_id = %identity.consumer_id,
            msg_id = %msg.id,
            error = %err,
            "dead letter deliver failed"
        );
    }

    fn trimmed(&self, identity: &ConsumerIdentity, msg_id: &str, failures: u32) {
        warn!(
            topic = %identity.topic,
            consumer_id = %identity.consumer_id,
            msg_id = %msg_id,
            failures = failures,
            "pending msg trimmed from stream, acked without delivery"
        );
    }

    fn trimmed_ack_failed(&self, identity: &ConsumerIdentity, msg_id: &str, err: &MqError) {
        error!(
            topic = %identity.topic,
            group = %identity.group,
            consumer_id = %identity.consumer_id,
            msg_id = %msg_id,
            error = %err,
            "trimmed msg ack failed"
        );
    }
}
