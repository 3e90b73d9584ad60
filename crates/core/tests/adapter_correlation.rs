//! Bot adapters driven end to end over the scripted mock transport.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use gridforge_core::bot::{
    AdapterTimeouts, BannedWordValidator, BlueWillowParser, BotClient, ChatBotAdapter,
    ContentParser, ErrorKind, MidjourneyParser,
};
use gridforge_core::engine::EngineConfig;
use gridforge_core::job::{FsJobStore, JobConfig, JobRunner, JobStatus, JobStore};
use gridforge_core::testing::MockTransport;
use gridforge_core::transport::{InteractionRequest, TransportError};
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn timeouts(wait: Duration) -> AdapterTimeouts {
    AdapterTimeouts {
        reply: wait,
        queued: wait,
    }
}

fn adapter<P: ContentParser>(transport: &MockTransport, parser: P) -> ChatBotAdapter<P> {
    ChatBotAdapter::new(
        Arc::new(transport.clone()),
        parser,
        Arc::new(BannedWordValidator::new(["gore"])),
        "",
    )
    .with_timeouts(timeouts(Duration::from_secs(2)))
}

async fn started<P: ContentParser>(transport: &MockTransport, parser: P) -> ChatBotAdapter<P> {
    let client = adapter(transport, parser);
    client.start(&CancellationToken::new()).await.unwrap();
    client
}

fn png(size: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(size, size, Rgb([200, 100, 50]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_midjourney_generation_tree() {
    let transport = MockTransport::midjourney();
    let client = started(&transport, MidjourneyParser::new()).await;
    let cancel = CancellationToken::new();

    let preview = client.imagine("a red fox", &cancel).await.unwrap();
    assert_eq!(preview.response_prompt, "a red fox");
    assert_eq!(preview.image_ids.len(), 4);
    assert!(preview.url.ends_with("/grid.png"));

    let upscaled = client.upscale(&preview, 2, &cancel).await.unwrap();
    assert!(upscaled.ends_with("/upscale.png"));

    let varied = client.variation(&preview, 0, &cancel).await.unwrap();
    assert_ne!(varied.message_id, preview.message_id);
    assert_eq!(varied.response_prompt, "a red fox");

    let from_variation = client.upscale(&varied, 3, &cancel).await.unwrap();
    assert_ne!(from_variation, upscaled);

    let sent = transport.sent();
    assert_eq!(sent.len(), 4);
    assert!(matches!(sent[0], InteractionRequest::Command(_)));
    assert!(sent[1..]
        .iter()
        .all(|r| matches!(r, InteractionRequest::Component(_))));
}

#[tokio::test]
async fn test_duplicate_events_resolve_each_request_once() {
    let transport = MockTransport::midjourney();
    transport.set_duplicate_events(true);
    let client = started(&transport, MidjourneyParser::new()).await;
    let cancel = CancellationToken::new();

    let preview = client.imagine("a cat", &cancel).await.unwrap();
    let first = client.upscale(&preview, 0, &cancel).await.unwrap();
    let second = client.upscale(&preview, 1, &cancel).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(client.correlator().pending(&gridforge_core::SearchKey::Upscale("a cat".into())), 0);
}

#[tokio::test]
async fn test_echoed_prompt_keys_follow_up_replies() {
    let transport = MockTransport::midjourney();
    transport.set_echo_suffix(" --v 5");
    let client = started(&transport, MidjourneyParser::new()).await;
    let cancel = CancellationToken::new();

    let preview = client.imagine("a cat", &cancel).await.unwrap();
    assert_eq!(preview.prompt, "a cat");
    assert_eq!(preview.response_prompt, "a cat --v 5");
    assert!(client.upscale(&preview, 1, &cancel).await.is_ok());
}

#[tokio::test]
async fn test_queued_job_still_resolves() {
    let transport = MockTransport::midjourney();
    transport.queue_prompt("slow cat");
    let client = started(&transport, MidjourneyParser::new()).await;

    let preview = client
        .imagine("slow cat", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(preview.response_prompt, "slow cat");
}

#[tokio::test]
async fn test_embed_errors_are_classified() {
    let transport = MockTransport::midjourney();
    transport.reject_prompt("bad", "Banned prompt", "not allowed");
    transport.reject_prompt("busy", "Queue full", "try later");
    transport.reject_prompt("stuck", "Action required", "verify");
    let client = started(&transport, MidjourneyParser::new()).await;
    let cancel = CancellationToken::new();

    let kind = |r: Result<_, gridforge_core::BotError>| r.unwrap_err().kind;
    assert_eq!(kind(client.imagine("bad", &cancel).await), ErrorKind::Validation);
    assert_eq!(kind(client.imagine("busy", &cancel).await), ErrorKind::Capacity);
    assert_eq!(kind(client.imagine("stuck", &cancel).await), ErrorKind::Fatal);
}

#[tokio::test]
async fn test_banned_prompt_is_never_sent() {
    let transport = MockTransport::midjourney();
    let client = started(&transport, MidjourneyParser::new()).await;

    let err = client
        .imagine("lots of GORE here", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_send_failures_map_to_error_kinds() {
    let transport = MockTransport::midjourney();
    let client = started(&transport, MidjourneyParser::new()).await;
    let cancel = CancellationToken::new();

    transport.fail_next_send(TransportError::BadGateway);
    let err = client.imagine("a cat", &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Transient);

    let preview = client.imagine("a cat", &cancel).await.unwrap();
    transport.fail_next_send(TransportError::MessageNotFound);
    let err = client.upscale(&preview, 0, &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_silent_bot_times_out() {
    let transport = MockTransport::midjourney();
    transport.ignore_prompt("void");
    let client = adapter(&transport, MidjourneyParser::new())
        .with_timeouts(timeouts(Duration::from_millis(50)));
    client.start(&CancellationToken::new()).await.unwrap();

    let err = client
        .imagine("void", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_cancel_interrupts_wait() {
    let transport = MockTransport::midjourney();
    transport.ignore_prompt("void");
    let client = started(&transport, MidjourneyParser::new()).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let err = client.imagine("void", &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_out_of_range_index() {
    let transport = MockTransport::midjourney();
    let client = started(&transport, MidjourneyParser::new()).await;
    let cancel = CancellationToken::new();

    let preview = client.imagine("a cat", &cancel).await.unwrap();
    let err = client.upscale(&preview, 4, &cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_operations_require_start() {
    let transport = MockTransport::midjourney();
    let client = adapter(&transport, MidjourneyParser::new());

    let err = client
        .imagine("a cat", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let transport = MockTransport::midjourney();
    let client = adapter(&transport, MidjourneyParser::new());
    let cancel = CancellationToken::new();
    client.start(&cancel).await.unwrap();
    client.start(&cancel).await.unwrap();
    assert_eq!(transport.start_count(), 1);
}

#[tokio::test]
async fn test_cancel_interrupts_command_discovery() {
    let transport = MockTransport::midjourney();
    transport.set_command_delay(Duration::from_secs(30));
    let client = adapter(&transport, MidjourneyParser::new());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let started = std::time::Instant::now();
    let err = client.start(&cancel).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));

    // Not ready yet, so a later start runs discovery again.
    transport.set_command_delay(Duration::ZERO);
    client.start(&CancellationToken::new()).await.unwrap();
    client.imagine("a cat", &CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_bluewillow_generation_tree() {
    let transport = MockTransport::bluewillow();
    let client = started(&transport, BlueWillowParser::new()).await;
    let cancel = CancellationToken::new();
    assert_eq!(client.concurrency(), 5);

    let preview = client.imagine("a blue whale", &cancel).await.unwrap();
    assert_eq!(preview.image_ids.len(), 4);

    let upscaled = client.upscale(&preview, 1, &cancel).await.unwrap();
    assert!(upscaled.ends_with("/upscale.png"));

    let varied = client.variation(&preview, 2, &cancel).await.unwrap();
    let again = client.upscale(&varied, 0, &cancel).await.unwrap();
    assert_ne!(again, upscaled);
}

#[tokio::test]
async fn test_job_over_adapter_downloads_album() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::midjourney();
    transport.set_download_body(png(32));
    let client = Arc::new(adapter(&transport, MidjourneyParser::new()));
    let store = Arc::new(FsJobStore::new(dir.path()));

    let mut config = JobConfig::new(
        "full",
        dir.path(),
        vec!["an owl".to_string(), "a hare".to_string()],
    );
    config.engine = EngineConfig {
        upscale: false,
        variation: false,
        concurrency: 0,
        wait: Duration::ZERO,
        first_wait: Duration::ZERO,
        max_attempts: 2,
    };
    config.download = true;
    config.thumbnail = true;

    let outcome = JobRunner::new(client, Arc::clone(&store) as Arc<dyn JobStore>)
        .with_downloader(Arc::new(transport.clone()))
        .run_job(&config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Finished);
    assert_eq!(outcome.images, 8);
    assert_eq!(transport.downloads().len(), 2);

    let images = dir.path().join("full/images");
    assert!(images.join("a_hare_00000_00.png").exists());
    assert!(images.join("an_owl_00001_03.png").exists());
    assert!(images.join("_thumbnails/an_owl_00001_03.jpg").exists());

    let index = std::fs::read_to_string(dir.path().join("full/index.html")).unwrap();
    assert!(index.contains("images/_thumbnails/a_hare_00000_01.jpg"));
}
