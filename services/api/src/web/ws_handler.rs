//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a lesson's WebSocket connection.
//! The connection owns one `LessonSessionController`; client messages drive it, a
//! one-second interval drives its timer, and binary frames feed the microphone.

use crate::{
    adapters::FrameRecorder,
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::AppState,
        voice::WsVoicePlayer,
    },
};
use amibuddy_core::{
    domain::{AudioFormat, CharacterRef, ImageRef, Locale},
    phrases, LessonError, LessonSessionController, PlaybackStatus, UploadOutcome,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitStream, StreamExt},
    SinkExt,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
    time::{interval_at, timeout, Instant},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const TIMER_PERIOD: Duration = Duration::from_secs(1);
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

/// Serializes and queues a control message. Returns false once the client is gone.
fn send_message(outbound: &UnboundedSender<Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => outbound.send(Message::Text(json.into())).is_ok(),
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

/// What the client sends first: the buddy and how its microphone frames are encoded.
struct LessonInit {
    character: CharacterRef,
    format: AudioFormat,
}

async fn wait_for_init(receiver: &mut SplitStream<WebSocket>) -> Option<LessonInit> {
    match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init {
                character_id,
                character_name,
                sample_rate,
                audio_mime,
            }) => {
                let format = match audio_mime {
                    Some(mime) => AudioFormat::Encoded { mime },
                    None => AudioFormat::Pcm16 {
                        sample_rate: sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
                    },
                };
                Some(LessonInit {
                    character: CharacterRef {
                        id: character_id,
                        name: character_name,
                    },
                    format,
                })
            }
            _ => {
                error!("First message was not a valid Init message.");
                None
            }
        },
        _ => {
            error!("Client disconnected before sending Init message.");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New lesson connection established for user: {}", user_id);

    // Everything bound for the client goes through one queue so the voice player,
    // the state forwarder and the loop below never contend for the sink.
    let (mut sink, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(msg).await.is_err() {
                debug!("Client sink closed; stopping writer.");
                break;
            }
        }
    });

    // --- 1. Initialization Phase ---
    let account = match app_state.accounts.get_account(user_id).await {
        Ok(account) => account,
        Err(e) => {
            error!("Failed to load account {}: {:?}", user_id, e);
            send_message(
                &outbound,
                &ServerMessage::Error {
                    message: "Failed to load your account.".to_string(),
                },
            );
            drop(outbound);
            let _ = writer.await;
            return;
        }
    };
    let user = account.user_context();
    let locale = user.locale;

    let Some(init) = wait_for_init(&mut receiver).await else {
        writer.abort();
        return;
    };
    info!(
        "Starting lesson with character '{}' ({}), audio {:?}",
        init.character.name, init.character.id, init.format
    );

    let recorder = Arc::new(FrameRecorder::new(init.format));
    let voice = Arc::new(WsVoicePlayer::new(
        app_state.synthesizer.clone(),
        outbound.clone(),
    ));
    let character_name = init.character.name.clone();
    let mut lesson = LessonSessionController::new(
        user,
        init.character,
        app_state.lesson_policy(),
        app_state.lesson_collaborators(voice, recorder.clone()),
    );

    let forwarder = {
        let mut states = lesson.subscribe();
        let outbound = outbound.clone();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                let msg = ServerMessage::StateChanged {
                    state: state.as_str().to_string(),
                };
                if !send_message(&outbound, &msg) {
                    break;
                }
            }
        })
    };

    let ready = ServerMessage::LessonReady {
        character_name,
        locale: locale.code().to_string(),
    };
    if !send_message(&outbound, &ready) {
        error!("Failed to send lesson ready message.");
        forwarder.abort();
        writer.abort();
        return;
    }

    // --- 2. Main Message Loop ---
    let mut ticker = interval_at(Instant::now() + TIMER_PERIOD, TIMER_PERIOD);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(elapsed) = lesson.tick(1) {
                    send_message(&outbound, &ServerMessage::timer(elapsed));
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let replies = handle_text_message(text.as_str(), &mut lesson, locale).await;
                        for reply in &replies {
                            send_message(&outbound, reply);
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if !recorder.push_frame(&data) {
                            debug!("Dropped {} byte audio frame outside a recording.", data.len());
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client sent close message.");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    None => {
                        info!("Client disconnected.");
                        break;
                    }
                }
            }
        }
    }

    // --- 3. Cleanup ---
    // Dropping the controller releases any held microphone and closes the state channel,
    // which ends the forwarder once it has queued the last state.
    drop(lesson);
    let _ = forwarder.await;
    drop(outbound);
    if !drain_writer(writer, WRITER_DRAIN).await {
        warn!("Client did not accept queued messages in time; dropping them.");
    }
    info!("Lesson connection closed for user: {}", user_id);
}

/// Waits for the writer to flush what is already queued, aborting it after `limit`.
/// Every sender must be dropped first or the writer never finishes.
async fn drain_writer(writer: JoinHandle<()>, limit: Duration) -> bool {
    let abort = writer.abort_handle();
    match timeout(limit, writer).await {
        Ok(_) => true,
        Err(_) => {
            abort.abort();
            false
        }
    }
}

/// Applies one client message to the lesson and returns the messages to send back.
async fn handle_text_message(
    text: &str,
    lesson: &mut LessonSessionController,
    locale: Locale,
) -> Vec<ServerMessage> {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return Vec::new();
        }
    };

    let result: Result<Vec<ServerMessage>, LessonError> = match client_msg {
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
            Ok(Vec::new())
        }
        ClientMessage::SubmitHomework { image } => {
            match lesson.begin_upload(ImageRef::new(image)).await {
                Ok(UploadOutcome::Analyzed(analysis)) => {
                    Ok(vec![ServerMessage::analysis_ready(&analysis)])
                }
                Ok(UploadOutcome::UpgradeRequired { quota, free_limit }) => {
                    Ok(vec![ServerMessage::UpgradeRequired {
                        homework_count: quota.homework_count,
                        free_limit,
                        message: phrases::upgrade_prompt(locale, free_limit),
                    }])
                }
                Err(e) => Err(e),
            }
        }
        ClientMessage::StartRecording => lesson.start_recording().await.map(|_| Vec::new()),
        ClientMessage::CancelRecording => lesson.cancel_recording().await.map(|_| Vec::new()),
        ClientMessage::StopRecording => lesson
            .stop_recording()
            .await
            .map(|exchange| vec![ServerMessage::exchange(exchange)]),
        ClientMessage::FinishLesson => lesson
            .finish()
            .await
            .map(|summary| summary.map(ServerMessage::finished).into_iter().collect()),
        ClientMessage::BeginReview => lesson.begin_review().map(|_| Vec::new()),
        ClientMessage::SubmitReview { image } => lesson
            .submit_review(ImageRef::new(image))
            .await
            .map(|review| vec![ServerMessage::review_ready(review)]),
        ClientMessage::ReturnHome => lesson
            .return_home()
            .await
            .map(|report| vec![ServerMessage::saved(&report)]),
        ClientMessage::Replay => lesson.replay().await.map(|_| Vec::new()),
        ClientMessage::PlaybackBlocked => {
            lesson.mark_playback_blocked();
            Ok(Vec::new())
        }
    };

    let mut replies = match result {
        Ok(replies) => replies,
        Err(e) => {
            warn!("Lesson action failed: {}", e);
            vec![ServerMessage::Error {
                message: e.user_message(locale).to_string(),
            }]
        }
    };
    if lesson.replay_available()
        && matches!(
            lesson.playback_status(),
            PlaybackStatus::Blocked | PlaybackStatus::Failed
        )
    {
        replies.push(ServerMessage::ReplayAvailable);
    }
    replies
}
