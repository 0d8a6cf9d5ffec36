use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time;
use tracing::{debug, warn};

use bridge_transport::{FramedMessage, FramedTransport, TransportError};

use crate::error::{HandlerError, RpcError};
use crate::method::{MethodMeta, ParamMeta};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;
type Handler = Arc<dyn Fn(Value, Option<String>) -> HandlerFuture + Send + Sync>;

const BUILTIN_NAMES: &[&str] = &["exit", "shutdown", "__get_methods__"];

/// Cooperative single-loop dispatcher over a framed transport: correlates
/// inbound replies to outstanding `request`/`async_request` calls by
/// correlation id, and routes everything else to a registered handler.
pub struct CommandServer {
    writer_tx: mpsc::UnboundedSender<FramedMessage>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<FramedMessage>>>>,
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
    default_handler: Arc<Mutex<Option<Handler>>>,
    method_meta: Arc<Mutex<HashMap<String, MethodMeta>>>,
    next_id: Arc<AtomicU64>,
    id_prefix: String,
    shutdown_rx: watch::Receiver<bool>,
}

#[derive(Clone)]
struct DispatchCtx {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<FramedMessage>>>>,
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
    default_handler: Arc<Mutex<Option<Handler>>>,
    method_meta: Arc<Mutex<HashMap<String, MethodMeta>>>,
    writer_tx: mpsc::UnboundedSender<FramedMessage>,
    id_prefix: String,
}

enum Dispatched {
    Continue,
    Shutdown,
}

impl DispatchCtx {
    fn reply(&self, request_id: Option<String>, result: Result<Value, HandlerError>) {
        if let Some(message) = response_message(&result, request_id) {
            let _ = self.writer_tx.send(message);
        }
    }
}

/// Wraps a handler result (or error) into the reply shape, or `None` when
/// no `request_id` was supplied (fire-and-forget, no reply is emitted).
///
/// A non-null mapping result is merged with `request_id` directly onto the
/// reply's top level (`{"status":"ok","request_id":"r1"}`); any other value
/// is wrapped under `result` (`{"result":value,"request_id":"r1"}`).
fn response_message(
    result: &Result<Value, HandlerError>,
    request_id: Option<String>,
) -> Option<FramedMessage> {
    let request_id = request_id?;
    Some(match result {
        Ok(Value::Object(map)) => FramedMessage {
            request_id: Some(request_id),
            extra: map.clone(),
            ..Default::default()
        },
        Ok(value) => FramedMessage {
            result: Some(value.clone()),
            request_id: Some(request_id),
            ..Default::default()
        },
        Err(err) => FramedMessage {
            error: Some(format!("{}: {}", err.exception, err.message)),
            traceback: Some(err.traceback.clone()),
            request_id: Some(request_id),
            ..Default::default()
        },
    })
}

impl CommandServer {
    /// Spawns the reader/dispatch loop and the writer loop as separate
    /// tokio tasks and returns a handle for registering handlers and
    /// issuing outbound requests.
    pub fn spawn<R, W>(reader: R, writer: W, id_prefix: impl Into<String>, poll_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let handlers = Arc::new(Mutex::new(HashMap::new()));
        let default_handler = Arc::new(Mutex::new(None));
        let method_meta = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<FramedMessage>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = Self {
            writer_tx: writer_tx.clone(),
            pending: pending.clone(),
            handlers: handlers.clone(),
            default_handler: default_handler.clone(),
            method_meta: method_meta.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
            id_prefix: id_prefix.into(),
            shutdown_rx,
        };

        let ctx = DispatchCtx {
            pending,
            handlers,
            default_handler,
            method_meta,
            writer_tx,
            id_prefix: server.id_prefix.clone(),
        };

        tokio::spawn(writer_task(writer, writer_rx));
        tokio::spawn(async move {
            dispatch_task(reader, ctx, poll_timeout).await;
            let _ = shutdown_tx.send(true);
        });

        server
    }

    /// Resolves once the dispatch loop has stopped, whether from a
    /// `shutdown` command or the transport closing.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    pub async fn register_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, Option<String>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        let wrapped: Handler = Arc::new(move |data, request_id| {
            Box::pin(std::future::ready(handler(data, request_id)))
        });
        self.handlers.lock().await.insert(name.clone(), wrapped);
        self.method_meta
            .lock()
            .await
            .entry(name)
            .or_insert_with(MethodMeta::default);
    }

    pub async fn register_async_handler<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        let wrapped: Handler = Arc::new(move |data, request_id| Box::pin(handler(data, request_id)));
        self.handlers.lock().await.insert(name.clone(), wrapped);
        self.method_meta
            .lock()
            .await
            .entry(name)
            .or_insert_with(MethodMeta::default);
    }

    pub async fn set_default_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Value, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |data, request_id| Box::pin(handler(data, request_id)));
        *self.default_handler.lock().await = Some(wrapped);
    }

    /// Auto-exposes every public, non-underscore-prefixed top-level function
    /// in `ast` as a command handler, binding an object payload to declared
    /// parameters positionally by declaration order.
    pub async fn register_script_handlers(
        &self,
        engine: Arc<Engine>,
        ast: Arc<AST>,
        scope: Arc<Mutex<Scope<'static>>>,
    ) {
        let exposed: Vec<(String, Vec<String>)> = ast
            .iter_functions()
            .filter(|f| f.access == rhai::FnAccess::Public && !f.name.starts_with('_'))
            .map(|f| {
                (
                    f.name.to_string(),
                    f.params.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect();

        for (name, params) in exposed {
            let meta = MethodMeta {
                params: params
                    .iter()
                    .map(|p| ParamMeta {
                        name: p.clone(),
                        required: true,
                        type_hint: "Dynamic".to_string(),
                    })
                    .collect(),
                doc: String::new(),
            };
            self.method_meta.lock().await.insert(name.clone(), meta);

            let engine = engine.clone();
            let ast = ast.clone();
            let scope = scope.clone();
            let params = params.clone();
            let fn_name = name.clone();
            let wrapped: Handler = Arc::new(move |data, _request_id| {
                let engine = engine.clone();
                let ast = ast.clone();
                let scope = scope.clone();
                let params = params.clone();
                let fn_name = fn_name.clone();
                Box::pin(async move {
                    let args = bind_args(&params, &data);
                    let mut scope_guard = scope.lock().await;
                    let outcome: Result<Dynamic, _> =
                        engine.call_fn(&mut scope_guard, &ast, &fn_name, args);
                    match outcome {
                        Ok(value) => rhai::serde::from_dynamic::<Value>(&value)
                            .map_err(|err| HandlerError::new("ScriptError", err.to_string())),
                        Err(err) => Err(HandlerError::new("ScriptError", err.to_string())),
                    }
                })
            });
            self.handlers.lock().await.insert(name, wrapped);
        }
    }

    fn next_correlation_id(&self) -> String {
        format!("{}{}", self.id_prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub async fn async_request(
        &self,
        command: impl Into<String>,
        data: Value,
    ) -> Result<(String, oneshot::Receiver<FramedMessage>), RpcError> {
        let id = self.next_correlation_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let message = FramedMessage::request(command, data, Some(id.clone()));
        if self.writer_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::ChannelClosed);
        }
        Ok((id, rx))
    }

    pub async fn request(
        &self,
        command: impl Into<String>,
        data: Value,
        timeout: Duration,
    ) -> Result<FramedMessage, RpcError> {
        let (id, rx) = self.async_request(command, data).await?;
        match time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Timeout(timeout))
            }
        }
    }
}

fn bind_args(params: &[String], data: &Value) -> Vec<Dynamic> {
    match data {
        Value::Object(map) => params
            .iter()
            .map(|name| {
                map.get(name)
                    .and_then(|v| rhai::serde::to_dynamic(v).ok())
                    .unwrap_or(Dynamic::UNIT)
            })
            .collect(),
        Value::Null => params.iter().map(|_| Dynamic::UNIT).collect(),
        other => {
            let mut args = Vec::with_capacity(params.len());
            if !params.is_empty() {
                args.push(rhai::serde::to_dynamic(other).unwrap_or(Dynamic::UNIT));
                for _ in 1..params.len() {
                    args.push(Dynamic::UNIT);
                }
            }
            args
        }
    }
}

async fn writer_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<FramedMessage>,
) {
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to serialize outbound message: {err}");
                continue;
            }
        };
        line.push(b'\n');
        if writer.write_all(&line).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn dispatch_task<R: AsyncRead + Unpin>(reader: R, ctx: DispatchCtx, poll_timeout: Duration) {
    let mut transport = FramedTransport::new(reader, tokio::io::sink());

    loop {
        match transport.get::<FramedMessage>(true, Some(poll_timeout)).await {
            Ok(message) => match handle_incoming(message, &ctx).await {
                Dispatched::Continue => {}
                Dispatched::Shutdown => break,
            },
            Err(TransportError::Timeout(_)) => continue,
            Err(TransportError::Closed) => break,
            Err(err) => {
                warn!("dispatch loop read error: {err}");
                continue;
            }
        }
    }

    for (_, tx) in ctx.pending.lock().await.drain() {
        let _ = tx.send(FramedMessage {
            error: Some("transport closed".to_string()),
            ..Default::default()
        });
    }
}

async fn handle_incoming(message: FramedMessage, ctx: &DispatchCtx) -> Dispatched {
    if let Some(request_id) = message.request_id.clone() {
        if request_id.starts_with(&ctx.id_prefix) {
            if let Some(tx) = ctx.pending.lock().await.remove(&request_id) {
                let _ = tx.send(message);
            }
            return Dispatched::Continue;
        }
    }

    let Some(command) = message.command.clone() else {
        return Dispatched::Continue;
    };
    let request_id = message.request_id.clone();
    let data = message.data.clone().unwrap_or(Value::Null);

    match command.as_str() {
        "exit" => {
            ctx.reply(request_id, Ok(serde_json::json!({"status": "exiting"})));
            tokio::time::sleep(Duration::from_millis(20)).await;
            std::process::exit(0);
        }
        "shutdown" => {
            ctx.reply(request_id, Ok(serde_json::json!({"status": "shutting_down"})));
            return Dispatched::Shutdown;
        }
        "__get_methods__" => {
            let meta = ctx.method_meta.lock().await;
            let methods: serde_json::Map<String, Value> = meta
                .iter()
                .filter(|(name, _)| !BUILTIN_NAMES.contains(&name.as_str()))
                .map(|(name, m)| (name.clone(), m.to_json()))
                .collect();
            ctx.reply(request_id, Ok(Value::Object(methods)));
        }
        _ => {
            let handler = {
                let handlers = ctx.handlers.lock().await;
                handlers.get(&command).cloned()
            };
            let handler = match handler {
                Some(h) => Some(h),
                None => ctx.default_handler.lock().await.clone(),
            };
            let ctx = ctx.clone();
            let command_for_error = command.clone();
            tokio::spawn(async move {
                let result = match handler {
                    Some(h) => h(data, request_id.clone()).await,
                    None => {
                        debug!(command = %command_for_error, "no handler registered");
                        Err(HandlerError::new(
                            "UnknownCommand",
                            format!("no handler registered for `{command_for_error}`"),
                        ))
                    }
                };
                if let (None, Err(err)) = (&request_id, &result) {
                    warn!(
                        command = %command_for_error,
                        exception = %err.exception,
                        message = %err.message,
                        "fire-and-forget handler failed, no reply to send"
                    );
                }
                ctx.reply(request_id, result);
            });
        }
    }

    Dispatched::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loopback() -> (
        impl AsyncRead + Unpin + Send + 'static,
        impl AsyncWrite + Unpin + Send + 'static,
        impl AsyncRead + Unpin + Send + 'static,
        impl AsyncWrite + Unpin + Send + 'static,
    ) {
        let (host, child) = tokio::io::duplex(8192);
        let (host_read, host_write) = tokio::io::split(host);
        let (child_read, child_write) = tokio::io::split(child);
        (host_read, host_write, child_read, child_write)
    }

    #[tokio::test]
    async fn greet_handler_responds_with_correlation_id() {
        let (host_read, host_write, child_read, child_write) = loopback();

        let server = CommandServer::spawn(child_read, child_write, "child-", Duration::from_millis(50));
        server
            .register_handler("greet", |data, _request_id| {
                let name = data.get("name").and_then(Value::as_str).unwrap_or("world");
                Ok(json!(format!("Hello, {name}!")))
            })
            .await;

        let mut host_transport = FramedTransport::new(host_read, host_write);
        host_transport
            .put(
                &FramedMessage::request("greet", json!({"name": "Ada"}), Some("host-1".into())),
                true,
                None,
            )
            .await
            .unwrap();

        let reply: FramedMessage = host_transport.get(true, Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(reply.request_id.as_deref(), Some("host-1"));
        assert_eq!(reply.result, Some(json!("Hello, Ada!")));
    }

    #[tokio::test]
    async fn mapping_shaped_handler_result_is_merged_not_wrapped() {
        let (host_read, host_write, child_read, child_write) = loopback();

        let server = CommandServer::spawn(child_read, child_write, "child-", Duration::from_millis(50));
        server
            .register_handler("status", |_data, _request_id| {
                Ok(json!({"status": "ok", "count": 3}))
            })
            .await;

        let mut host_transport = FramedTransport::new(host_read, host_write);
        host_transport
            .put(
                &FramedMessage::request("status", Value::Null, Some("host-1".into())),
                true,
                None,
            )
            .await
            .unwrap();

        let reply: serde_json::Value =
            host_transport.get(true, Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(
            reply,
            json!({"status": "ok", "count": 3, "request_id": "host-1"})
        );
    }

    #[tokio::test]
    async fn unknown_command_without_default_errors() {
        let (host_read, host_write, child_read, child_write) = loopback();
        let _server = CommandServer::spawn(child_read, child_write, "child-", Duration::from_millis(50));

        let mut host_transport = FramedTransport::new(host_read, host_write);
        host_transport
            .put(
                &FramedMessage::request("nope", Value::Null, Some("host-1".into())),
                true,
                None,
            )
            .await
            .unwrap();

        let reply: FramedMessage = host_transport.get(true, Some(Duration::from_secs(2))).await.unwrap();
        assert_eq!(reply.request_id.as_deref(), Some("host-1"));
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn fire_and_forget_request_gets_no_reply() {
        let (host_read, host_write, child_read, child_write) = loopback();
        let server = CommandServer::spawn(child_read, child_write, "child-", Duration::from_millis(20));
        server
            .register_handler("noop", |_data, _request_id| Ok(Value::Null))
            .await;

        let mut host_transport = FramedTransport::new(host_read, host_write);
        host_transport
            .put(&FramedMessage::request("noop", Value::Null, None), true, None)
            .await
            .unwrap();

        // give the dispatch loop a chance to run; no reply should ever arrive
        let result = host_transport
            .get::<FramedMessage>(true, Some(Duration::from_millis(150)))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn fire_and_forget_handler_error_is_swallowed_but_logged() {
        let (host_read, host_write, child_read, child_write) = loopback();
        let server = CommandServer::spawn(child_read, child_write, "child-", Duration::from_millis(20));
        server
            .register_handler("boom", |_data, _request_id| {
                Err(HandlerError::new("ScriptError", "kaboom"))
            })
            .await;

        let mut host_transport = FramedTransport::new(host_read, host_write);
        host_transport
            .put(&FramedMessage::request("boom", Value::Null, None), true, None)
            .await
            .unwrap();

        // the handler error goes to tracing (see the `warn!` call in the
        // dispatch loop's fire-and-forget branch), not back over the wire.
        let result = host_transport
            .get::<FramedMessage>(true, Some(Duration::from_millis(150)))
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn request_times_out_when_child_never_replies() {
        let (host_read, host_write, child_read, child_write) = loopback();
        let server = CommandServer::spawn(host_read, host_write, "host-", Duration::from_millis(20));

        // keep both halves of the peer side open but never respond, so the
        // dispatch loop keeps polling (timeout) instead of seeing EOF.
        let _keep_read = child_read;
        let _keep_write = child_write;

        let err = server
            .request("ping", Value::Null, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
    }
}
