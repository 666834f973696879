//! HTTP ingest server
//!
//! Routes:
//! - `POST /data` - decode one sensor event and hand it to the dispatch worker
//! - `GET /health` - liveness probe
//!
//! Requests are handled concurrently by hyper, but every decoded event goes
//! through a bounded queue to a single worker thread that owns the
//! [`EventDispatcher`]. The handler waits for the worker's reply before
//! answering, so each event is fully processed before its response is sent.

use crate::config::RelayConfig;
use crate::dispatcher::{DispatchMode, EventDispatcher};
use crate::error::RelayError;
use crate::schema::decode_body;
use crate::types::{NormalizedReading, SensorEvent};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

/// Body returned for every accepted event
pub const ACCEPTED_BODY: &str = r#"{"result": "json loaded"}"#;

/// How undecodable bodies are answered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestPolicy {
    /// Always answer 200; undecodable bodies are logged and dropped
    #[default]
    Lenient,
    /// Answer 400 with the decode error
    Strict,
}

impl IngestPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            IngestPolicy::Strict
        } else {
            IngestPolicy::Lenient
        }
    }
}

struct DispatchJob {
    event: SensorEvent,
    reply: oneshot::Sender<NormalizedReading>,
}

/// Cloneable handle used by request handlers to reach the dispatch worker
#[derive(Clone)]
pub struct RelayHandle {
    jobs: mpsc::Sender<DispatchJob>,
    policy: IngestPolicy,
}

impl RelayHandle {
    pub fn policy(&self) -> IngestPolicy {
        self.policy
    }

    /// Queue an event and wait until the worker has processed it
    pub async fn submit(&self, event: SensorEvent) -> Result<NormalizedReading, RelayError> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(DispatchJob { event, reply })
            .await
            .map_err(|_| RelayError::ServerError("dispatch worker stopped".to_string()))?;
        response
            .await
            .map_err(|_| RelayError::ServerError("dispatch worker dropped the event".to_string()))
    }
}

/// Dispatch worker thread; joins once every [`RelayHandle`] is dropped
pub struct DispatchWorker {
    thread: JoinHandle<EventDispatcher>,
}

impl DispatchWorker {
    /// Wait for the worker to drain its queue and return the dispatcher
    pub fn join(self) -> Result<EventDispatcher, RelayError> {
        self.thread
            .join()
            .map_err(|_| RelayError::ServerError("dispatch worker panicked".to_string()))
    }
}

/// Start the dispatch worker thread
pub fn spawn_dispatcher(
    mut dispatcher: EventDispatcher,
    mode: DispatchMode,
    policy: IngestPolicy,
    queue_capacity: usize,
) -> Result<(RelayHandle, DispatchWorker), RelayError> {
    let (jobs, mut queue) = mpsc::channel::<DispatchJob>(queue_capacity.max(1));

    let thread = std::thread::Builder::new()
        .name("e4-dispatch".to_string())
        .spawn(move || {
            while let Some(job) = queue.blocking_recv() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    dispatcher.dispatch(&job.event, mode)
                }));
                match outcome {
                    Ok(reading) => {
                        if job.reply.send(reading).is_err() {
                            debug!("request finished before its event was dispatched");
                        }
                    }
                    // Dropping the reply tells the handler the event was lost
                    Err(payload) => error!(
                        kind = %job.event.kind(),
                        device_id = %job.event.device_id,
                        panic = panic_message(payload.as_ref()),
                        "dispatch panicked, event dropped"
                    ),
                }
            }
            dispatcher
        })?;

    Ok((RelayHandle { jobs, policy }, DispatchWorker { thread }))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Route one HTTP request
pub async fn handle_request(
    relay: RelayHandle,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let span = info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let response = match (req.method(), req.uri().path()) {
            (&Method::POST, "/data") => ingest(&relay, req).await,
            (&Method::GET, "/health") => text_response(StatusCode::OK, "OK"),
            _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
        };
        debug!(status = response.status().as_u16(), "request complete");
        Ok(response)
    }
    .instrument(span)
    .await
}

async fn ingest(relay: &RelayHandle, req: Request<Body>) -> Response<Body> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => return rejected(relay.policy, &format!("Failed to read body: {}", e)),
    };

    let event = match decode_body(&body) {
        Ok(event) => event,
        Err(e) => return rejected(relay.policy, &e.to_string()),
    };

    match relay.submit(event).await {
        Ok(reading) => debug!(kind = %reading.kind, "event dispatched"),
        Err(e) => error!(error = %e, "event was not dispatched"),
    }

    json_response(StatusCode::OK, ACCEPTED_BODY.to_string())
}

fn rejected(policy: IngestPolicy, message: &str) -> Response<Body> {
    match policy {
        IngestPolicy::Lenient => {
            debug!(error = %message, "dropping undecodable event");
            json_response(StatusCode::OK, ACCEPTED_BODY.to_string())
        }
        IngestPolicy::Strict => {
            debug!(error = %message, "rejecting undecodable event");
            json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": message }).to_string(),
            )
        }
    }
}

fn json_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Serve on an already bound listener until `shutdown` resolves
///
/// Returns the dispatcher once in-flight requests have completed and the
/// worker has drained its queue.
pub async fn run<F>(
    listener: TcpListener,
    dispatcher: EventDispatcher,
    config: &RelayConfig,
    shutdown: F,
) -> Result<EventDispatcher, RelayError>
where
    F: Future<Output = ()>,
{
    let (relay, worker) = spawn_dispatcher(
        dispatcher,
        DispatchMode::from(&config.pipeline),
        IngestPolicy::from_strict(config.pipeline.strict_ingest),
        config.pipeline.queue_capacity,
    )?;

    let make_service = make_service_fn(move |_conn| {
        let relay = relay.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(relay.clone(), req)))
        }
    });

    let server = hyper::Server::from_tcp(listener)
        .map_err(|e| RelayError::ServerError(e.to_string()))?
        .serve(make_service);

    info!(
        addr = %server.local_addr(),
        recording = config.pipeline.record_mode,
        strict = config.pipeline.strict_ingest,
        "relay listening"
    );

    server
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RelayError::ServerError(e.to_string()))?;

    info!("server stopped, draining dispatch queue");
    tokio::task::spawn_blocking(move || worker.join())
        .await
        .map_err(|e| RelayError::ServerError(e.to_string()))?
}

/// Bind the configured address and serve until `shutdown` resolves
pub async fn serve<F>(
    config: &RelayConfig,
    dispatcher: EventDispatcher,
    shutdown: F,
) -> Result<EventDispatcher, RelayError>
where
    F: Future<Output = ()>,
{
    let addr: SocketAddr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)?;
    run(listener, dispatcher, config, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationTable;
    use crate::sinks::{CaptureRecordSink, CaptureStreamSink, OscArg, SinkError, StreamSink};
    use crate::smoother::SmootherBank;
    use crate::types::{SensorReading, TagValue};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn relay(
        policy: IngestPolicy,
    ) -> (RelayHandle, DispatchWorker, CaptureStreamSink, CaptureRecordSink) {
        let stream = CaptureStreamSink::new();
        let record = CaptureRecordSink::new();
        let dispatcher = EventDispatcher::new(
            CalibrationTable::default(),
            SmootherBank::default(),
            Box::new(stream.clone()),
            Box::new(record.clone()),
        )
        .unwrap();
        let (handle, worker) =
            spawn_dispatcher(dispatcher, DispatchMode::new(true, true), policy, 8).unwrap();
        (handle, worker, stream, record)
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/data")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_valid_event_is_dispatched_before_response() {
        let (handle, _worker, stream, record) = relay(IngestPolicy::Lenient);

        let response = handle_request(
            handle,
            post(r#"{"type":"temp","device":"d1","run":"r1","timestamp":1000,"value":30.5}"#),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, ACCEPTED_BODY);
        assert_eq!(stream.messages()[0].address, "/e4/temp");
        assert_eq!(record.records()[0].timestamp_millis, 1000);
    }

    #[tokio::test]
    async fn test_lenient_policy_accepts_garbage() {
        let (handle, _worker, stream, _record) = relay(IngestPolicy::Lenient);

        let bodies = [
            "not json",
            r#"{"type":"hr","value":1}"#,
            r#"{"type":"acc","timestamp":1}"#,
        ];
        for body in bodies {
            let response = handle_request(handle.clone(), post(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, ACCEPTED_BODY);
        }
        assert!(stream.messages().is_empty());
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_garbage() {
        let (handle, _worker, _stream, _record) = relay(IngestPolicy::Strict);

        let unknown = post(r#"{"type":"hr","timestamp":1,"value":1}"#);
        let response = handle_request(handle.clone(), unknown).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert!(body["error"].as_str().unwrap().contains("hr"));

        let response = handle_request(
            handle,
            post(r#"{"type":"gsr","device":"d1","run":"r1","timestamp":1,"value":0.07}"#),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_and_unknown_routes() {
        let (handle, _worker, _stream, _record) = relay(IngestPolicy::Lenient);

        let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = handle_request(handle.clone(), health).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let get_data = Request::builder().uri("/data").body(Body::empty()).unwrap();
        let response = handle_request(handle, get_data).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_worker_returns_dispatcher_after_handles_drop() {
        let (handle, worker, _stream, _record) = relay(IngestPolicy::Lenient);
        handle_request(
            handle.clone(),
            post(r#"{"type":"acc","device":"d1","run":"r1","timestamp":1,"x":10,"y":0,"z":0}"#),
        )
        .await
        .unwrap();
        drop(handle);

        let dispatcher = tokio::task::spawn_blocking(move || worker.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatcher.stats().events, 1);
    }

    /// Stream sink that panics on tag messages
    struct PanicsOnTag(CaptureStreamSink);

    impl StreamSink for PanicsOnTag {
        fn send(&mut self, address: &str, value: &OscArg) -> Result<(), SinkError> {
            if address.ends_with("/tag") {
                panic!("cannot emit {}", address);
            }
            self.0.send(address, value)
        }
    }

    #[tokio::test]
    async fn test_worker_survives_a_panicking_event() {
        let stream = CaptureStreamSink::new();
        let dispatcher = EventDispatcher::new(
            CalibrationTable::default(),
            SmootherBank::default(),
            Box::new(PanicsOnTag(stream.clone())),
            Box::new(CaptureRecordSink::new()),
        )
        .unwrap();
        let mode = DispatchMode::new(false, false);
        let (handle, worker) = spawn_dispatcher(dispatcher, mode, IngestPolicy::Lenient, 8).unwrap();

        let tag = SensorEvent::new("d1", "r1", 1, SensorReading::Tag(TagValue::from("start")));
        assert!(handle.submit(tag).await.is_err());

        let response = handle_request(
            handle.clone(),
            post(r#"{"type":"temp","device":"d1","run":"r1","timestamp":2,"value":30.5}"#),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(stream.messages().len(), 1);
        assert_eq!(stream.messages()[0].address, "/e4/temp");

        drop(handle);
        let dispatcher = tokio::task::spawn_blocking(move || worker.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatcher.stats().events, 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_extreme_timestamp_does_not_stop_worker() {
        let stream = CaptureStreamSink::new();
        let dispatcher = EventDispatcher::new(
            CalibrationTable::default(),
            SmootherBank::default(),
            Box::new(stream.clone()),
            Box::new(CaptureRecordSink::new()),
        )
        .unwrap();
        // Not quiet, so the elapsed time field is evaluated for every event
        let mode = DispatchMode::new(false, false);
        let (handle, _worker) = spawn_dispatcher(dispatcher, mode, IngestPolicy::Strict, 8).unwrap();

        for body in [
            r#"{"type":"temp","timestamp":-9223372036854775808,"value":30.5}"#,
            r#"{"type":"temp","timestamp":9223372036854775807,"value":30.5}"#,
            r#"{"type":"temp","timestamp":1,"value":30.5}"#,
        ] {
            let response = handle_request(handle.clone(), post(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(stream.messages().len(), 3);
    }
}
