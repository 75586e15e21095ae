use std::sync::atomic::{AtomicUsize, Ordering};
use std::fmt;
use std::sync::{Arc, Mutex, Once};

use awesome_db::DbError;
use awesome_web::{
    ApiError, Arguments, DispatchError, Endpoint, HandlerError, Method, Reply, Request, Response,
    Router, Signature,
};
use serde_json::json;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

static TRACING: Once = Once::new();

fn init_tracing_for_tests() {
    TRACING.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Collects the message of every warning emitted while installed.
#[derive(Clone, Default)]
struct Warnings(Arc<Mutex<Vec<String>>>);

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for Warnings {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0.lock().expect("warnings").push(visitor.0);
    }
}

impl Warnings {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().expect("warnings"))
    }
}

async fn echo(args: Arguments) -> Result<Response, HandlerError> {
    Ok(Response::json(json!({
        "args": args.values(),
        "request": args.request().map(|request| request.path().to_string()),
        "shadowed": args.shadowed(),
    })))
}

async fn create_blog(args: Arguments) -> Result<Response, HandlerError> {
    let name = args.get_str("name").unwrap_or_default();
    if name.trim().is_empty() {
        return Err(ApiError::value_invalid("name", "name cannot be empty.").into());
    }
    Ok(Response::json(json!({ "name": name })))
}

async fn broken(_args: Arguments) -> Result<Response, HandlerError> {
    Err(DbError::PoolClosed.into())
}

fn router() -> Router {
    init_tracing_for_tests();
    let mut router = Router::new();
    router
        .add_routes([
            Endpoint::get("/api/blogs", "api_blogs", Signature::new().optional("page"), echo),
            Endpoint::post(
                "/api/blogs",
                "api_create_blog",
                Signature::new()
                    .request()
                    .keyword("name")
                    .keyword("summary")
                    .keyword("content"),
                echo,
            ),
            Endpoint::post(
                "/api/blogs/{id}",
                "api_update_blog",
                Signature::new().keyword("id").keyword("name"),
                echo,
            ),
            Endpoint::post(
                "/api/drafts",
                "api_create_draft",
                Signature::new().keyword("name"),
                create_blog,
            ),
            Endpoint::get("/api/broken", "api_broken", Signature::new(), broken),
        ])
        .expect("routes");
    router
}

async fn send(router: &Router, request: Request) -> Reply {
    router.dispatch(request).await.expect("dispatch")
}

#[tokio::test]
async fn json_body_binds_exactly_the_named_parameters() {
    let router = router();
    let request = Request::new(Method::Post, "/api/blogs").with_json(&json!({
        "name": "a", "summary": "b", "content": "c", "ignored": true
    }));
    let reply = send(&router, request).await;
    assert_eq!(reply.status(), 200);
    assert_eq!(
        reply.to_json(),
        json!({
            "args": {"name": "a", "summary": "b", "content": "c"},
            "request": "/api/blogs",
            "shadowed": [],
        })
    );
}

#[tokio::test]
async fn missing_arguments_become_bad_requests() {
    let router = router();
    let request = Request::new(Method::Post, "/api/blogs").with_json(&json!({}));
    let reply = send(&router, request).await;
    assert_eq!(reply.status(), 400);
    assert_eq!(reply.to_json(), json!({"message": "Missing argument: name"}));

    let reply = router
        .dispatch(Request::new(Method::Post, "/api/blogs"))
        .await
        .expect("dispatch");
    assert_eq!(reply.to_json(), json!({"message": "Missing Content-Type"}));
}

#[tokio::test]
async fn optional_query_parameter_binds_as_text() {
    let router = router();
    let reply = send(&router, Request::new(Method::Get, "/api/blogs?page=2")).await;
    assert_eq!(reply.to_json()["args"], json!({"page": "2"}));

    let reply = send(&router, Request::new(Method::Get, "/api/blogs")).await;
    assert_eq!(reply.to_json()["args"], json!({}));
}

#[tokio::test]
async fn plain_text_posts_are_unsupported() {
    let router = router();
    let request = Request::new(Method::Post, "/api/blogs")
        .with_header("Content-Type", "text/plain")
        .with_body("name=a");
    let reply = send(&router, request).await;
    assert_eq!(
        reply.to_json(),
        json!({"message": "Unsupported Content-Type: text/plain"})
    );
}

#[tokio::test]
async fn path_value_beats_body_value() {
    let router = router();
    let request =
        Request::new(Method::Post, "/api/blogs/5").with_json(&json!({"id": "6", "name": "n"}));
    let reply = send(&router, request).await;
    assert_eq!(reply.to_json()["args"], json!({"id": "5", "name": "n"}));
    assert_eq!(reply.to_json()["shadowed"], json!(["id"]));
}

#[tokio::test]
async fn shadowed_body_value_is_warned_about() {
    let router = router();
    let warnings = Warnings::default();
    let subscriber = tracing_subscriber::registry().with(warnings.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let request = Request::new(Method::Post, "/api/blogs/5").with_json(&json!({"name": "n"}));
    send(&router, request).await;
    assert!(warnings.take().is_empty());

    let request =
        Request::new(Method::Post, "/api/blogs/5").with_json(&json!({"id": "6", "name": "n"}));
    let reply = send(&router, request).await;
    assert_eq!(reply.to_json()["args"]["id"], "5");
    assert_eq!(warnings.take(), ["Duplicate arg name in named arg and kw args: id"]);
}

#[tokio::test]
async fn api_errors_render_as_structured_replies() {
    let router = router();
    let request = Request::new(Method::Post, "/api/drafts").with_form([("name", "  ")]);
    let reply = send(&router, request).await;
    assert_eq!(reply.status(), 200);
    assert_eq!(
        reply.to_json(),
        json!({"error": "value:invalid", "data": "name", "message": "name cannot be empty."})
    );
}

#[tokio::test]
async fn other_handler_errors_propagate() {
    let router = router();
    let err = router
        .dispatch(Request::new(Method::Get, "/api/broken"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Handler(HandlerError::Database(DbError::PoolClosed))
    ));
    assert_eq!(err.status(), 500);
}

#[tokio::test]
async fn concurrent_dispatch_shares_the_router() {
    let router = Arc::new(router());
    let calls = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..16)
        .map(|idx| {
            let router = Arc::clone(&router);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                let target = format!("/api/blogs?page={idx}");
                let reply = router
                    .dispatch(Request::new(Method::Get, &target))
                    .await
                    .expect("dispatch");
                calls.fetch_add(1, Ordering::SeqCst);
                reply.to_json()["args"]["page"].clone()
            })
        })
        .collect();
    for (idx, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.expect("join"), json!(idx.to_string()));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 16);
}
