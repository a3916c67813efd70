//! Worker bound to one notification channel.

use crate::notify::channel::{Channel, DeliveryResult};
use crate::notify::task::{NotificationKind, NotificationTask};
use crate::notify::worker::{Worker, WorkerError, WorkerState, DEFAULT_POLL_INTERVAL};
use crate::schedule::summary::MonthlySummary;
use log::debug;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// `Worker<NotificationTask>` that delivers every task through one channel.
pub struct ChannelWorker {
    channel_type: String,
    worker: Worker<NotificationTask>,
}

impl ChannelWorker {
    pub fn spawn(channel: Arc<dyn Channel>) -> Result<Self, WorkerError> {
        Self::spawn_with_poll_interval(channel, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_poll_interval(
        channel: Arc<dyn Channel>,
        poll_interval: Duration,
    ) -> Result<Self, WorkerError> {
        let channel_type = channel.channel_type().to_string();
        let log_name = channel_type.clone();
        let handler = move |task: NotificationTask| {
            let task_id = task.id;
            let kind = task.kind_name();
            deliver(channel.as_ref(), &task)
                .map(|()| {
                    debug!(
                        "event=channel_deliver module=notify status=ok channel={log_name} kind={kind} task_id={task_id}"
                    );
                })
                .map_err(|err| format!("channel={log_name} kind={kind} task_id={task_id} {err}"))
        };
        let worker = Worker::spawn(channel_type.clone(), poll_interval, handler)?;

        Ok(Self {
            channel_type,
            worker,
        })
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn enqueue(&self, task: NotificationTask) -> Result<(), WorkerError> {
        self.worker.enqueue(task)
    }

    pub fn send_message(
        &self,
        recipient: &str,
        body: &str,
        subject: Option<&str>,
    ) -> Result<(), WorkerError> {
        self.enqueue(NotificationTask::message(
            recipient,
            body,
            subject.map(str::to_string),
        ))
    }

    pub fn notify_low_balance(
        &self,
        recipient: &str,
        balance: Decimal,
        language: &str,
    ) -> Result<(), WorkerError> {
        self.enqueue(NotificationTask::low_balance(recipient, balance, language))
    }

    pub fn notify_low_stock(
        &self,
        recipient: &str,
        product_name: &str,
        available_quantity: u32,
        language: &str,
    ) -> Result<(), WorkerError> {
        self.enqueue(NotificationTask::low_stock(
            recipient,
            product_name,
            available_quantity,
            language,
        ))
    }

    pub fn send_monthly_summary(
        &self,
        recipient: &str,
        summary: MonthlySummary,
        language: &str,
    ) -> Result<(), WorkerError> {
        self.enqueue(NotificationTask::monthly_summary(recipient, summary, language))
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    /// See `Worker::stop`.
    pub fn stop(&self, timeout: Option<Duration>) -> bool {
        self.worker.stop(timeout)
    }

    /// See `Worker::drain`.
    pub fn drain(&self, timeout: Option<Duration>) -> bool {
        self.worker.drain(timeout)
    }

    /// Tasks dropped unhandled because of a stop.
    pub fn discarded(&self) -> usize {
        self.worker.discarded()
    }
}

fn deliver(channel: &dyn Channel, task: &NotificationTask) -> DeliveryResult {
    match &task.kind {
        NotificationKind::SendMessage { body, subject } => {
            channel.send_message(&task.recipient, body, subject.as_deref())
        }
        NotificationKind::LowBalance { balance } => {
            channel.notify_low_balance(&task.recipient, *balance, &task.language)
        }
        NotificationKind::LowStock {
            product_name,
            available_quantity,
        } => channel.notify_low_stock(
            &task.recipient,
            product_name,
            *available_quantity,
            &task.language,
        ),
        NotificationKind::MonthlySummary(summary) => {
            channel.send_monthly_summary(&task.recipient, summary, &task.language)
        }
    }
}
