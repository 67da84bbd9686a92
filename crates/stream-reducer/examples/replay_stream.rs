use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt as _;
use stream_reducer::prelude::*;

const BODY: &[&str] = &[
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"<think>The user wants a n\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"umber.</thi\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"nk>The answer\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\" is 42.\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
];

/// Replays a canned chat-completion stream, printing each snapshot.
///
/// Pass `--cancel` to cancel after the second chunk.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ReducerError> {
    init_observability();
    let cancel_early = std::env::args().any(|arg| arg == "--cancel");
    let config = ReducerConfig::from_env()?;

    let (sink, mut updates) = ChannelSink::channel();
    let controller = StreamController::from_config(&config, sink);
    controller.attach_abort(|| eprintln!("transport aborted"));

    let chunks = BODY
        .iter()
        .map(|chunk| Ok::<_, std::io::Error>(Bytes::from_static(chunk.as_bytes())));
    let body = futures::stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        chunk
    });

    let canceller = controller.clone();
    let printer = tokio::spawn(async move {
        let mut seen = 0;
        while let Some(update) = updates.recv().await {
            match update {
                SinkUpdate::Snapshot(state) => {
                    seen += 1;
                    println!(
                        "#{} {:?} reasoning={:?} answer={:?}",
                        state.sequence_number,
                        state.phase,
                        state.reasoning_buffer,
                        state.answer_buffer
                    );
                    if cancel_early && seen == 2 {
                        canceller.cancel();
                    }
                }
                SinkUpdate::Status { message, .. } => println!("status: {message}"),
                SinkUpdate::Terminal(state) => {
                    println!("terminal: {:?}", state.phase);
                    break;
                }
            }
        }
    });

    let state = drive_with_config(&controller, OpenAiChatMapper::new(), body, &config).await;
    let _ = printer.await;
    println!("final answer: {}", state.answer_buffer);
    Ok(())
}
