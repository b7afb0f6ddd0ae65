// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::attachment::build_attachment;
use crate::chat::{attachment_message, text_message, ChatApi, FormData, POST_MESSAGE_METHOD};
use crate::config::Config;
use crate::dispatch::{DeliveryContext, DeliveryTask, DeliveryWorker, DispatchQueue};
use crate::error::RelayError;
use crate::formatter::{EventFormatter, FormatStyle};
use crate::http_utils::{
    create_json_response, create_text_response, log_and_create_http_response,
    verify_request_content_length, HttpResponse,
};
use crate::search_client::{EventSearch, SearchParams};

const ALERT_ENDPOINT_PATH: &str = "/loggly";
const SEARCH_ENDPOINT_PATH: &str = "/loggly/search";
const INFO_ENDPOINT_PATH: &str = "/info";
const SEARCH_FAILED_BODY: &str = "Something went wrong";
/// How long a stopping relay waits for queued deliveries before cancelling the rest.
const DELIVERY_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Form Slack posts for a slash command. Only `text` is needed; the rest is logged.
#[derive(Debug, Default, Deserialize)]
struct SlashCommand {
    #[serde(default)]
    text: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
}

/// Wires the HTTP listener, the delivery worker and the scheduled search together.
pub struct Relay {
    pub config: Arc<Config>,
    pub searcher: Arc<dyn EventSearch + Send + Sync>,
    pub chat: Arc<dyn ChatApi + Send + Sync>,
}

impl Relay {
    /// Serves until `shutdown` is cancelled, then waits for queued deliveries to be handed to
    /// the chat client before returning. Deliveries still queued after
    /// [`DELIVERY_DRAIN_TIMEOUT`] are cancelled.
    pub async fn start(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let now = Instant::now();

        // tasks are pushed by every handler and drained by the single delivery worker
        let (queue, rx) = DispatchQueue::new();
        let worker = DeliveryWorker::new(self.chat.clone());
        let mut worker_handle = tokio::spawn(async move {
            worker.run(rx).await;
        });

        // not tied to `shutdown`, so queued alerts survive it
        let deliveries = CancellationToken::new();
        let handlers = Arc::new(RelayHandlers {
            config: self.config.clone(),
            searcher: self.searcher.clone(),
            formatter: EventFormatter::new(self.config.display_time_zone.clone()),
            queue,
            deliveries: deliveries.clone(),
        });

        let search_timer = self.config.search_interval.map(|period| {
            let handlers = handlers.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { run_scheduled_search(handlers, period, shutdown).await })
        });

        let service_handlers = handlers.clone();
        let service = service_fn(move |req: Request<hyper::body::Incoming>| {
            // called for each http request
            let handlers = service_handlers.clone();
            async move { handlers.handle(req).await }
        });
        drop(handlers);

        debug!(
            "Relay started: listening on {:?} in {} ms",
            listener.local_addr(),
            now.elapsed().as_millis()
        );

        let served = Self::serve_tcp(listener, service, &mut worker_handle, shutdown).await;

        if let Some(timer) = search_timer {
            log_task_failure("Scheduled search", timer.await);
        }
        // every queue handle is gone now, the worker exits once the channel is drained
        if !worker_handle.is_finished() {
            match tokio::time::timeout(DELIVERY_DRAIN_TIMEOUT, &mut worker_handle).await {
                Ok(joined) => log_task_failure("Delivery worker", joined),
                Err(_) => {
                    error!(
                        "Deliveries still queued after {} s, cancelling them",
                        DELIVERY_DRAIN_TIMEOUT.as_secs()
                    );
                    deliveries.cancel();
                    log_task_failure("Delivery worker", worker_handle.await);
                }
            }
        }
        debug!("Relay stopped");
        served
    }

    async fn serve_tcp<S>(
        listener: TcpListener,
        service: S,
        worker_handle: &mut JoinHandle<()>,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        S: hyper::service::Service<
                Request<hyper::body::Incoming>,
                Response = HttpResponse,
            > + Clone
            + Send
            + 'static,
        S::Future: Send,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                },
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
                result = &mut *worker_handle => {
                    error!("Delivery worker died: {:?}", result);
                    return Err("Delivery worker terminated unexpectedly".into());
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }
}

/// Request handlers plus what they share: the search client, the formatter and the producer
/// side of the delivery queue.
pub struct RelayHandlers {
    pub config: Arc<Config>,
    pub searcher: Arc<dyn EventSearch + Send + Sync>,
    pub formatter: EventFormatter,
    pub queue: DispatchQueue,
    /// parent of every delivery context
    pub deliveries: CancellationToken,
}

impl RelayHandlers {
    pub async fn handle<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("request", id = request_id, path = %req.uri().path());
        self.route(request_id, req).instrument(span).await
    }

    async fn route<B>(&self, request_id: u64, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match (req.method(), req.uri().path()) {
            (&Method::POST, ALERT_ENDPOINT_PATH) => self.alert_handler(request_id, req).await,
            (&Method::POST, SEARCH_ENDPOINT_PATH) => self.search_handler(req).await,
            (&Method::GET, SEARCH_ENDPOINT_PATH) => {
                create_text_response("ok".to_string(), StatusCode::OK)
            }
            (_, INFO_ENDPOINT_PATH) => Self::info_handler(),
            _ => {
                let mut not_found = Response::default();
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    /// Builds the attachment synchronously and queues its delivery; the caller never waits
    /// for Slack.
    async fn alert_handler<B>(&self, request_id: u64, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        debug!("Received Loggly alert");
        let (parts, body) = req.into_parts();
        if let Some(response) = verify_request_content_length(
            &parts.headers,
            self.config.max_request_content_length,
            "Error processing alert",
        ) {
            return response;
        }

        let attachment = match read_body(body, self.config.max_request_content_length)
            .await
            .and_then(|b| build_attachment(&b))
        {
            Ok(attachment) => attachment,
            Err(err) => {
                return log_and_create_http_response(
                    &format!("Error processing alert: {err}"),
                    rejection_status(&err),
                );
            }
        };
        let form = match attachment_message(&self.config.slack_channel, &attachment) {
            Ok(form) => form,
            Err(err) => {
                return log_and_create_http_response(
                    &format!("Error encoding alert attachment: {err}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        match self.enqueue(request_id, form).await {
            Ok(()) => log_and_create_http_response(
                "Successfully queued alert for delivery",
                StatusCode::OK,
            ),
            Err(err) => log_and_create_http_response(
                &format!("Error queueing alert: {err}"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    }

    /// Runs the search while the caller waits; the formatted events are the response body.
    async fn search_handler<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let command = match read_body(req.into_body(), self.config.max_request_content_length)
            .await
            .and_then(|body| {
                serde_html_form::from_bytes::<SlashCommand>(&body)
                    .map_err(|err| RelayError::Body(err.to_string()))
            }) {
            Ok(command) => command,
            Err(err) => {
                return log_and_create_http_response(
                    &format!("Error processing search command: {err}"),
                    rejection_status(&err),
                );
            }
        };
        debug!(
            "Search requested by {:?} in {:?} via {:?}",
            command.user_name, command.channel_id, command.command
        );

        let query = match command.text.trim() {
            "" => self.config.search_query.clone(),
            text => text.to_string(),
        };
        let params = self.search_params(query);
        match self.searcher.search(&params).await {
            Ok(result) if result.total_events == 0 => create_text_response(
                format!("No events found for {}", params.query),
                StatusCode::OK,
            ),
            Ok(result) => create_text_response(
                self.formatter
                    .format_events(&result.events, FormatStyle::Compact),
                StatusCode::OK,
            ),
            Err(err) => {
                error!("Search for {:?} failed: {err}", params.query);
                create_text_response(
                    SEARCH_FAILED_BODY.to_string(),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        }
    }

    /// Runs the default query and posts what it found to the channel.
    pub async fn scheduled_search(&self) {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("scheduled_search", id = request_id);
        async {
            let params = self.search_params(self.config.search_query.clone());
            let result = match self.searcher.search(&params).await {
                Ok(result) => result,
                Err(err) => {
                    error!("Scheduled search for {:?} failed: {err}", params.query);
                    return;
                }
            };
            if result.total_events == 0 {
                debug!("Scheduled search found no events");
                return;
            }
            let text = self
                .formatter
                .format_events(&result.events, FormatStyle::Verbose);
            if let Err(err) = self
                .enqueue(request_id, text_message(&self.config.slack_channel, &text))
                .await
            {
                error!("Error queueing search results: {err}");
            }
        }
        .instrument(span)
        .await
    }

    fn search_params(&self, query: String) -> SearchParams {
        SearchParams::new(
            query,
            self.config.search_from.clone(),
            self.config.search_page_size,
        )
    }

    async fn enqueue(&self, request_id: u64, form: FormData) -> Result<(), RelayError> {
        let context =
            DeliveryContext::new(request_id, Span::current(), self.deliveries.child_token());
        self.queue
            .enqueue(DeliveryTask::new(POST_MESSAGE_METHOD, context, form))
            .await
    }

    fn info_handler() -> http::Result<HttpResponse> {
        let response_json = json!({
            "endpoints": [
                ALERT_ENDPOINT_PATH,
                SEARCH_ENDPOINT_PATH,
                INFO_ENDPOINT_PATH
            ]
        });
        create_json_response(response_json.to_string(), StatusCode::OK)
    }
}

/// Collects at most `limit` bytes, whether or not the request declared its length.
async fn read_body<B>(body: B, limit: usize) -> Result<bytes::Bytes, RelayError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(RelayError::BodyTooLarge { limit })
        }
        Err(err) => Err(RelayError::Body(err.to_string())),
    }
}

fn rejection_status(err: &RelayError) -> StatusCode {
    match err {
        RelayError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn log_task_failure(name: &str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("{name} task failed: {e:?}");
    }
}

async fn run_scheduled_search(
    handlers: Arc<RelayHandlers>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // discard first tick, which is instantaneous
    info!("Scheduled search every {} s", period.as_secs());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => handlers.scheduled_search().await,
        }
    }
}
