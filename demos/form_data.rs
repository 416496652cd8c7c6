use std::time::Duration;

use rmhttp::{
    DispatchObserver, Dispatcher, Encoding, ErrorInfo, FormDataFile, HttpMethod, Request, RequestId,
    Response, Shape, TypedResult,
};

struct Timings;

impl DispatchObserver for Timings {
    fn on_finish(&self, id: RequestId, response: &Response) {
        let timeline = response.timeline();
        println!(
            "request {} finished: headers after {:?}, done after {:?}",
            id,
            timeline.time_to_headers(),
            timeline.latency()
        );
    }

    fn on_fail(&self, id: RequestId, error: &ErrorInfo) {
        println!("request {} failed: {}", id, error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("rmhttp=info")
        .init();

    let dispatcher = Dispatcher::builder().observer(Timings).build()?;

    println!("=== Multipart upload ===");

    let request = Request::builder("https://httpbin.org/post", HttpMethod::Post, Encoding::FormData)
        .parameters(vec![("title", "quarterly report"), ("draft", "no")])
        .form_file(FormDataFile::new(
            "attachment",
            b"col_a,col_b\n1,2\n".to_vec(),
            "report.csv",
            "text/csv",
        ))
        .timeout(Duration::from_secs(20))
        .build()?;

    let result: Option<TypedResult> = dispatcher.fetch(request, Shape::Object).await;
    if let Some(Ok(payload)) = result {
        if let Some(object) = payload.as_object() {
            println!("form: {}", object.get("form").cloned().unwrap_or_default());
            println!("files: {}", object.get("files").cloned().unwrap_or_default());
        }
    }

    println!("\n=== URL-encoded form ===");

    let request = Request::builder("https://httpbin.org/post", HttpMethod::Post, Encoding::Url)
        .parameters(rmhttp::Parameters::list().push("tag[]", "a").push("tag[]", "b"))
        .build()?;
    let result: Option<TypedResult> = dispatcher.fetch(request, Shape::Object).await;
    if let Some(Ok(payload)) = result {
        println!("form: {}", payload.as_object().and_then(|o| o.get("form")).cloned().unwrap_or_default());
    }

    Ok(())
}
