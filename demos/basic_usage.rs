use rmhttp::{Dispatcher, Encoding, HttpMethod, Request, Shape, TypedResult};
use serde::Deserialize;
use tokio::sync::oneshot;

#[derive(Debug, Deserialize)]
struct Slideshow {
    title: String,
    author: String,
}

#[derive(Debug, Deserialize)]
struct SlideshowEnvelope {
    slideshow: Slideshow,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("rmhttp=debug")
        .init();

    let dispatcher = Dispatcher::builder().verbose(true).build()?;

    println!("=== GET with query parameters ===");

    let request = Request::builder("https://httpbin.org/get", HttpMethod::Get, Encoding::Url)
        .parameters(vec![("page", serde_json::json!(2)), ("q", serde_json::json!("rust"))])
        .header("Accept", "application/json")?
        .build()?;
    println!("{}", request);

    let result: Option<TypedResult> = dispatcher.fetch(request, Shape::Object).await;
    match result {
        Some(Ok(payload)) => println!("args: {}", payload.as_object().and_then(|o| o.get("args")).cloned().unwrap_or_default()),
        Some(Err(error)) => println!("failed: {}", error),
        None => println!("cancelled"),
    }

    println!("\n=== POST with a JSON body ===");

    let request = Request::builder("https://httpbin.org/post", HttpMethod::Post, Encoding::Json)
        .parameters(vec![("name", "rmhttp"), ("language", "rust")])
        .build()?;

    let (tx, rx) = oneshot::channel();
    dispatcher.send(request, Shape::Object, move |result: TypedResult| {
        let _ = tx.send(result);
    });
    if let Ok(Ok(payload)) = rx.await {
        println!("echoed json: {}", payload.as_object().and_then(|o| o.get("json")).cloned().unwrap_or_default());
    }

    println!("\n=== Decoding into a model ===");

    let request = Request::builder("https://httpbin.org/json", HttpMethod::Get, Encoding::Url).build()?;
    if let Some(Ok(payload)) = dispatcher.fetch::<SlideshowEnvelope>(request, Shape::Model).await {
        if let Some(envelope) = payload.into_model() {
            println!("{} by {}", envelope.slideshow.title, envelope.slideshow.author);
        }
    }

    println!("\n=== Status code errors ===");

    let request = Request::builder("https://httpbin.org/get12345", HttpMethod::Get, Encoding::Url).build()?;
    let result: Option<TypedResult> = dispatcher.fetch(request, Shape::Object).await;
    if let Some(Err(error)) = result {
        println!("{} ({:?})", error, error.kind());
    }

    println!("\n=== Cancellation ===");

    let request = Request::builder("https://httpbin.org/delay/5", HttpMethod::Get, Encoding::Url).build()?;
    let handle = dispatcher.send(request, Shape::Object, |_: TypedResult| {
        println!("never printed");
    });
    handle.cancel();
    println!("in flight after cancel: {}", dispatcher.in_flight().await);

    Ok(())
}
