//! 测试公共工具

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis_stream_mq::consumer::ReceivePhase;
use redis_stream_mq::{
    ConsumerIdentity, DeadLetterMailbox, DeliveryContext, DeliveryObserver, Message, MqError,
    Result,
};

/// 轮询等待条件成立，超时返回 false
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// 记录所有事件的观察者
#[derive(Default)]
pub struct RecordingObserver {
    pub new_receive_failures: AtomicUsize,
    pub pending_receive_failures: AtomicUsize,
    pub handle_failures: AtomicUsize,
    pub ack_failures: AtomicUsize,
    pub dead_lettered: AtomicUsize,
    pub dead_letter_failures: AtomicUsize,
    pub trimmed_ack_failures: AtomicUsize,
    pub acked: Mutex<Vec<String>>,
    pub trimmed: Mutex<Vec<String>>,
    pub handle_errors: Mutex<Vec<MqError>>,
    pub unsettled: Mutex<Option<usize>>,
}

impl RecordingObserver {
    pub fn acked_ids(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn trimmed_ids(&self) -> Vec<String> {
        self.trimmed.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl DeliveryObserver for RecordingObserver {
    fn stopped(&self, _identity: &ConsumerIdentity, unsettled: usize) {
        *self.unsettled.lock().unwrap() = Some(unsettled);
    }

    fn receive_failed(&self, _identity: &ConsumerIdentity, phase: ReceivePhase, _err: &MqError) {
        match phase {
            ReceivePhase::New => self.new_receive_failures.fetch_add(1, Ordering::SeqCst),
            ReceivePhase::Pending => self.pending_receive_failures.fetch_add(1, Ordering::SeqCst),
        };
    }

    fn handle_failed(
        &self,
        _identity: &ConsumerIdentity,
        _msg: &Message,
        _failures: u32,
        err: &MqError,
    ) {
        self.handle_failures.fetch_add(1, Ordering::SeqCst);
        self.handle_errors.lock().unwrap().push(err.clone());
    }

    fn acknowledged(&self, _identity: &ConsumerIdentity, msg: &Message) {
        self.acked.lock().unwrap().push(msg.id.clone());
    }

    fn ack_failed(&self, _identity: &ConsumerIdentity, _msg: &Message, _err: &MqError) {
        self.ack_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn dead_lettered(&self, _identity: &ConsumerIdentity, _msg: &Message, _failures: u32) {
        self.dead_lettered.fetch_add(1, Ordering::SeqCst);
    }

    fn dead_letter_failed(&self, _identity: &ConsumerIdentity, _msg: &Message, _err: &MqError) {
        self.dead_letter_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn trimmed(&self, _identity: &ConsumerIdentity, msg_id: &str, _failures: u32) {
        self.trimmed.lock().unwrap().push(msg_id.to_string());
    }

    fn trimmed_ack_failed(&self, _identity: &ConsumerIdentity, _msg_id: &str, _err: &MqError) {
        self.trimmed_ack_failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// 记录死信的投递实现
#[derive(Default)]
pub struct RecordingMailbox {
    pub delivered: Mutex<Vec<Message>>,
    pub fail: bool,
}

impl RecordingMailbox {
    pub fn failing() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn delivered(&self) -> Vec<Message> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterMailbox for RecordingMailbox {
    async fn deliver(&self, _ctx: &DeliveryContext, msg: &Message) -> Result<()> {
        self.delivered.lock().unwrap().push(msg.clone());
        if self.fail {
            return Err(MqError::dead_letter("mailbox unavailable"));
        }
        Ok(())
    }
}
