//! Interceptor chain threaded around the HTTP call.
//!
//! Two ordered sequences of async hooks: request interceptors transform an
//! [`InterceptorContext`] before the transport runs, response interceptors
//! transform a [`ResponseView`] after it. Both run in registration order,
//! and the chain threads the most recent return value forward. A failing
//! interceptor aborts the chain: later interceptors are skipped and the
//! error identifies the direction, the index, and the phase that failed.
//!
//! Response interceptors never see a streaming body. For streamed calls the
//! [`ResponseView`] carries `body: None` and the byte stream is handed to
//! the parser untouched.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;

use crate::error::{Error, InterceptorDirection, InterceptorPhase, Result};
use crate::transport::HttpRequest;

/// Mutable state threaded through the request-side chain.
#[derive(Debug, Clone)]
pub struct InterceptorContext {
    pub request: HttpRequest,
    /// 0-based attempt number; increments across retries of the same call.
    pub attempt_number: u32,
    /// Stable id correlating every hop of one call. Interceptors must
    /// preserve it.
    pub correlation_id: String,
    pub started_at: SystemTime,
    /// Free-form scratch space for cooperating interceptors.
    pub custom: HashMap<String, Value>,
}

impl InterceptorContext {
    pub fn new(request: HttpRequest, attempt_number: u32) -> Self {
        Self {
            request,
            attempt_number,
            correlation_id: format!("corr-{:016x}", rand::random::<u64>()),
            started_at: SystemTime::now(),
            custom: HashMap::new(),
        }
    }
}

/// What response interceptors see. `body` is `None` for streamed calls;
/// the underlying byte stream is preserved verbatim.
#[derive(Debug, Clone)]
pub struct ResponseView {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
}

/// Async hook over the request context.
pub type RequestInterceptor = Arc<
    dyn Fn(InterceptorContext) -> Pin<Box<dyn Future<Output = Result<InterceptorContext>> + Send>>
        + Send
        + Sync,
>;

/// Async hook over the response view. The context is read-only here.
pub type ResponseInterceptor = Arc<
    dyn Fn(
            InterceptorContext,
            ResponseView,
        ) -> Pin<Box<dyn Future<Output = Result<ResponseView>> + Send>>
        + Send
        + Sync,
>;

/// Ordered request/response hook sequences.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    request: Vec<RequestInterceptor>,
    response: Vec<ResponseInterceptor>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request interceptor.
    pub fn add_request<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(InterceptorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<InterceptorContext>> + Send + 'static,
    {
        self.request
            .push(Arc::new(move |ctx| Box::pin(interceptor(ctx))));
    }

    /// Append a response interceptor.
    pub fn add_response<F, Fut>(&mut self, interceptor: F)
    where
        F: Fn(InterceptorContext, ResponseView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseView>> + Send + 'static,
    {
        self.response
            .push(Arc::new(move |ctx, view| Box::pin(interceptor(ctx, view))));
    }

    pub fn request_len(&self) -> usize {
        self.request.len()
    }

    pub fn response_len(&self) -> usize {
        self.response.len()
    }

    /// Run the request-side chain, threading the context forward.
    pub async fn run_request(&self, mut ctx: InterceptorContext) -> Result<InterceptorContext> {
        for (index, interceptor) in self.request.iter().enumerate() {
            let correlation_id = ctx.correlation_id.clone();
            let next = interceptor(ctx).await.map_err(|cause| {
                interceptor_error(InterceptorDirection::Request, index, cause)
            })?;
            if next.correlation_id != correlation_id {
                return Err(Error::Interceptor {
                    direction: InterceptorDirection::Request,
                    index,
                    phase: InterceptorPhase::ContextThreading,
                    message: "interceptor replaced the correlation id".into(),
                });
            }
            ctx = next;
        }
        Ok(ctx)
    }

    /// Run the response-side chain in registration order.
    pub async fn run_response(
        &self,
        ctx: &InterceptorContext,
        mut view: ResponseView,
    ) -> Result<ResponseView> {
        for (index, interceptor) in self.response.iter().enumerate() {
            view = interceptor(ctx.clone(), view).await.map_err(|cause| {
                interceptor_error(InterceptorDirection::Response, index, cause)
            })?;
        }
        Ok(view)
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("request", &format!("{} interceptors", self.request.len()))
            .field("response", &format!("{} interceptors", self.response.len()))
            .finish()
    }
}

fn interceptor_error(direction: InterceptorDirection, index: usize, cause: Error) -> Error {
    // An interceptor that already failed as an interceptor keeps its own
    // coordinates.
    if matches!(cause, Error::Interceptor { .. }) {
        return cause;
    }
    let phase = match cause {
        Error::Validation(_) => InterceptorPhase::Validation,
        _ => InterceptorPhase::Execution,
    };
    Error::Interceptor {
        direction,
        index,
        phase,
        message: cause.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> InterceptorContext {
        InterceptorContext::new(HttpRequest::post("https://example.com/v1/chat"), 0)
    }

    #[tokio::test]
    async fn test_request_chain_runs_in_order() {
        let mut chain = InterceptorChain::new();
        chain.add_request(|mut ctx| async move {
            ctx.custom.insert("order".into(), serde_json::json!(["a"]));
            Ok(ctx)
        });
        chain.add_request(|mut ctx| async move {
            let list = ctx.custom.get_mut("order").unwrap().as_array_mut().unwrap();
            list.push(serde_json::json!("b"));
            Ok(ctx)
        });

        let ctx = chain.run_request(context()).await.unwrap();
        assert_eq!(ctx.custom["order"], serde_json::json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_failing_request_interceptor_skips_rest() {
        let mut chain = InterceptorChain::new();
        chain.add_request(|ctx| async move { Ok(ctx) });
        chain.add_request(|_ctx| async move { Err(Error::provider("boom")) });
        chain.add_request(|mut ctx| async move {
            ctx.custom.insert("ran".into(), serde_json::json!(true));
            Ok(ctx)
        });

        let err = chain.run_request(context()).await.unwrap_err();
        match err {
            Error::Interceptor {
                direction,
                index,
                phase,
                ..
            } => {
                assert_eq!(direction, InterceptorDirection::Request);
                assert_eq!(index, 1);
                assert_eq!(phase, InterceptorPhase::Execution);
            }
            other => panic!("expected interceptor error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_maps_to_validation_phase() {
        let mut chain = InterceptorChain::new();
        chain.add_request(|_ctx| async move { Err(Error::validation("bad header")) });
        let err = chain.run_request(context()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Interceptor {
                phase: InterceptorPhase::Validation,
                index: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_correlation_id_must_be_preserved() {
        let mut chain = InterceptorChain::new();
        chain.add_request(|mut ctx| async move {
            ctx.correlation_id = "hijacked".into();
            Ok(ctx)
        });
        let err = chain.run_request(context()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Interceptor {
                phase: InterceptorPhase::ContextThreading,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_response_chain_threads_view() {
        let mut chain = InterceptorChain::new();
        chain.add_response(|_ctx, mut view| async move {
            view.headers.insert("x-first".into(), "1".into());
            Ok(view)
        });
        chain.add_response(|_ctx, mut view| async move {
            assert_eq!(view.headers.get("x-first").map(String::as_str), Some("1"));
            view.headers.insert("x-second".into(), "2".into());
            Ok(view)
        });

        let view = ResponseView {
            status: 200,
            headers: BTreeMap::new(),
            body: None,
        };
        let out = chain.run_response(&context(), view).await.unwrap();
        assert_eq!(out.headers.len(), 2);
    }

    #[tokio::test]
    async fn test_response_error_carries_direction() {
        let mut chain = InterceptorChain::new();
        chain.add_response(|_ctx, _view| async move { Err(Error::provider("nope")) });
        let view = ResponseView {
            status: 200,
            headers: BTreeMap::new(),
            body: None,
        };
        let err = chain.run_response(&context(), view).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Interceptor {
                direction: InterceptorDirection::Response,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let chain = InterceptorChain::new();
        let ctx = context();
        let correlation = ctx.correlation_id.clone();
        let out = chain.run_request(ctx).await.unwrap();
        assert_eq!(out.correlation_id, correlation);
    }
}
