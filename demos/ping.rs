use keel::prelude::*;
use std::sync::Arc;

fn logger() -> Middleware {
    Middleware::new(|next: Handler| {
        Handler::new(move |ctx: Context| {
            let next = next.clone();
            async move {
                let (method, path) = (ctx.method().clone(), ctx.path().to_string());
                let res = next.call(ctx).await;
                match &res {
                    Ok(r) => log::info!("{} {} -> {}", method, path, r.status()),
                    Err(e) => log::info!("{} {} -> {}", method, path, e.status()),
                }
                res
            }
        })
    })
}

fn json(body: String) -> HTTPResult {
    Ok(Response::builder()
        .header("content-type", "application/json")
        .body(Body::from(body))?)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    #[cfg(feature = "logging")]
    env_logger::init();
    #[cfg(not(feature = "logging"))]
    tracing_subscriber::fmt::init();

    let mut app = App::new();
    app.pre(&[logger()]);
    app.route("/ping")?
        .name("ping")
        .get(Handler::new(|ctx: Context| async move {
            ctx.text(StatusCode::OK, "pong")
        }))?;

    let mut api = app.group("/api")?;
    api.route("/greet/:name")?
        .get(Handler::new(|ctx: Context| async move {
            let name = ctx.param("name").unwrap_or_default().to_string();
            ctx.text(StatusCode::OK, format!("hello, {}", name))
        }))?;

    let routes = serde_json::to_string(app.routes())?;
    app.route("/routes")?.get(Handler::new(move |_ctx: Context| {
        let routes = routes.clone();
        async move { json(routes) }
    }))?;

    let runner = Arc::new(Runner::new("ping", app.dispatcher()));
    runner.register_on_shutdown(|| println!("goodbye"));
    runner.start("127.0.0.1:3000").await?;
    runner.wait().await;

    Ok(())
}
