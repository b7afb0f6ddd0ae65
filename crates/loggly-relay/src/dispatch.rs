// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hand-off between request handlers and the single task that talks to the chat API.
//!
//! Handlers push [`DeliveryTask`]s onto a [`DispatchQueue`] and answer their caller right away.
//! One [`DeliveryWorker`] drains the queue in FIFO order, one task at a time. A failed delivery
//! is logged and dropped: nothing is retried or requeued. The worker stops once every queue
//! handle has been dropped and the channel is empty.

use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument, Span};

use crate::chat::{ChatApi, FormData};
use crate::error::{RelayError, Result};

const DELIVERY_CHANNEL_BUFFER_SIZE: usize = 10;

/// Request-scoped context travelling with a task: the originating request's span, for log
/// correlation, and its cancellation token.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub request_id: u64,
    pub span: Span,
    pub cancel: CancellationToken,
}

impl DeliveryContext {
    pub fn new(request_id: u64, span: Span, cancel: CancellationToken) -> Self {
        DeliveryContext {
            request_id,
            span,
            cancel,
        }
    }
}

#[derive(Debug)]
pub struct DeliveryTask {
    /// chat API method, e.g. `chat.postMessage`
    pub method: String,
    pub context: DeliveryContext,
    pub form: FormData,
}

impl DeliveryTask {
    pub fn new(method: impl Into<String>, context: DeliveryContext, form: FormData) -> Self {
        DeliveryTask {
            method: method.into(),
            context,
            form,
        }
    }
}

/// Producer side of the delivery channel. Cheap to clone, one per handler.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: Sender<DeliveryTask>,
}

impl DispatchQueue {
    pub fn new() -> (DispatchQueue, Receiver<DeliveryTask>) {
        Self::with_capacity(DELIVERY_CHANNEL_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> (DispatchQueue, Receiver<DeliveryTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (DispatchQueue { tx }, rx)
    }

    /// Waits only for room in the channel, never for the delivery itself.
    pub async fn enqueue(&self, task: DeliveryTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| RelayError::QueueClosed)
    }
}

pub struct DeliveryWorker {
    chat: Arc<dyn ChatApi + Send + Sync>,
}

impl DeliveryWorker {
    pub fn new(chat: Arc<dyn ChatApi + Send + Sync>) -> Self {
        DeliveryWorker { chat }
    }

    /// Delivers queued tasks until the channel is closed and drained.
    pub async fn run(&self, mut rx: Receiver<DeliveryTask>) {
        while let Some(task) = rx.recv().await {
            self.deliver(task).await;
        }
        debug!("Delivery queue closed, worker exiting");
    }

    async fn deliver(&self, task: DeliveryTask) {
        let DeliveryTask {
            method,
            context,
            form,
        } = task;
        // cancellation is not checked here; the chat client fails fast on a cancelled context
        let result = self
            .chat
            .post_form(&context, &method, &form)
            .instrument(context.span.clone())
            .await;
        match result {
            Ok(()) => debug!(
                parent: &context.span,
                "Delivered {method} for request {}", context.request_id
            ),
            Err(e) => error!(
                parent: &context.span,
                "Failed to deliver {method} for request {}: {e}\n{form:?}", context.request_id
            ),
        }
    }
}
