//! Provider client tests against an in-process mock server

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Multipart, State},
    http::header,
    response::IntoResponse,
    routing::post,
};
use base64::Engine;
use common::{FakeSpeech, FixedTranscriber, wav_clip};
use kitsune::api::RelayState;
use kitsune::chat::{ChatMessage, ChatRequest};
use kitsune::voice::{
    AudioFormat, SpeechProvider, SpeechToText, SttBackend, TextToSpeech, Transcriber, TtsBackend,
    VoiceSelection,
};
use kitsune::{ChatProvider, Error, OpenAiChat};
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};

const MP3: &[u8] = b"ID3\x04\x00mock-mp3";

type Seen = Arc<Mutex<Vec<Value>>>;

async fn chat_completions(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
    seen.lock().unwrap().push(body);
    Json(json!({ "choices": [{ "message": { "role": "assistant", "content": "Yip!" } }] }))
}

async fn empty_completions() -> Json<Value> {
    Json(json!({ "choices": [{ "message": { "content": "  " } }] }))
}

async fn whisper(State(seen): State<Seen>, mut multipart: Multipart) -> Json<Value> {
    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.unwrap_or_default();
        let value = if name == "model" {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            String::new()
        };
        fields.push(json!({ "name": name, "content_type": content_type, "value": value }));
    }
    seen.lock().unwrap().push(Value::Array(fields));
    Json(json!({ "text": "  hello fox  " }))
}

async fn slow_whisper() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({ "text": "too late" }))
}

async fn openai_speech(State(seen): State<Seen>, Json(body): Json<Value>) -> impl IntoResponse {
    seen.lock().unwrap().push(body);
    ([(header::CONTENT_TYPE, "audio/mpeg")], MP3)
}

async fn kokoro(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
    seen.lock().unwrap().push(body);
    let audio = base64::engine::general_purpose::STANDARD.encode(MP3);
    Json(json!({ "audio": format!("data:audio/mp3;base64,{audio}") }))
}

/// Start a mock provider plus a real relay; returns the base URL and the
/// request log
async fn serve() -> (String, Seen) {
    let seen: Seen = Arc::default();

    let relay = kitsune::api::router(Arc::new(RelayState {
        transcriber: Arc::new(FixedTranscriber(Some("relayed".to_string()))),
        speech: Arc::new(FakeSpeech::new(false)),
        default_voice: VoiceSelection::default(),
        default_speed: 1.0,
    }));

    let mock = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/empty/chat/completions", post(empty_completions))
        .route("/v1/audio/transcriptions", post(whisper))
        .route("/slow/audio/transcriptions", post(slow_whisper))
        .route("/v1/audio/speech", post(openai_speech))
        .route("/kokoro", post(kokoro))
        .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, mock.merge(relay)).await.unwrap();
    });

    (format!("http://{addr}"), seen)
}

fn request(text: &str) -> ChatRequest {
    ChatRequest {
        model: "gpt-4".to_string(),
        messages: vec![
            ChatMessage {
                role: "system",
                content: "Be a fox.".to_string(),
            },
            ChatMessage {
                role: "user",
                content: text.to_string(),
            },
        ],
        max_tokens: 300,
    }
}

// ============================================================================
// Chat
// ============================================================================

#[tokio::test]
async fn test_chat_completion() {
    let (base, seen) = serve().await;
    let chat = OpenAiChat::with_base_url("sk-test".to_string(), format!("{base}/v1/")).unwrap();

    let reply = assert_ok!(chat.complete(&request("hello")).await);
    assert_eq!(reply, "Yip!");

    let body = seen.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["max_tokens"], 300);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "hello");
}

#[tokio::test]
async fn test_chat_without_content_is_an_error() {
    let (base, _) = serve().await;
    let chat = OpenAiChat::with_base_url("sk-test".to_string(), format!("{base}/empty")).unwrap();

    let err = assert_err!(chat.complete(&request("hello")).await);
    assert!(matches!(err, Error::Chat(_)));
}

#[tokio::test]
async fn test_chat_http_error_keeps_status() {
    let (base, _) = serve().await;
    let chat = OpenAiChat::with_base_url("sk-test".to_string(), format!("{base}/missing")).unwrap();

    let err = chat.complete(&request("hello")).await.unwrap_err();
    assert!(err.to_string().contains("404"));
}

// ============================================================================
// Speech-to-text
// ============================================================================

#[tokio::test]
async fn test_whisper_upload() {
    let (base, seen) = serve().await;
    let stt = SpeechToText::new(
        SttBackend::Whisper {
            api_key: "sk-test".to_string(),
            base_url: format!("{base}/v1"),
        },
        "whisper-1".to_string(),
        Duration::from_secs(5),
    )
    .unwrap();

    assert_eq!(stt.transcribe(&wav_clip()).await.unwrap(), "hello fox");

    let fields = seen.lock().unwrap()[0].clone();
    let fields = fields.as_array().unwrap();
    let file = fields.iter().find(|f| f["name"] == "file").unwrap();
    assert_eq!(file["content_type"], "audio/wav");
    let model = fields.iter().find(|f| f["name"] == "model").unwrap();
    assert_eq!(model["value"], "whisper-1");
}

#[tokio::test]
async fn test_transcription_through_relay() {
    let (base, _) = serve().await;
    let stt = SpeechToText::new_relay(base, Duration::from_secs(5)).unwrap();

    assert_eq!(stt.transcribe(&wav_clip()).await.unwrap(), "relayed");
}

#[tokio::test]
async fn test_slow_transcription_times_out() {
    let (base, _) = serve().await;
    let stt = SpeechToText::new(
        SttBackend::Whisper {
            api_key: "sk-test".to_string(),
            base_url: format!("{base}/slow"),
        },
        "whisper-1".to_string(),
        Duration::from_millis(100),
    )
    .unwrap();

    let err = assert_err!(stt.transcribe(&wav_clip()).await);
    assert!(matches!(err, Error::Timeout(_, _)));
}

// ============================================================================
// Text-to-speech
// ============================================================================

#[tokio::test]
async fn test_openai_speech() {
    let (base, seen) = serve().await;
    let tts = TextToSpeech::new(
        TtsBackend::OpenAI {
            api_key: "sk-test".to_string(),
            model: "tts-1".to_string(),
            base_url: format!("{base}/v1"),
        },
        1.0,
    )
    .unwrap();

    let clip = tts
        .synthesize("Bonjour", &VoiceSelection::new("alloy", "fr"))
        .await
        .unwrap();
    assert_eq!(clip.format, AudioFormat::Mp3);
    assert_eq!(clip.data, MP3);

    let body = seen.lock().unwrap()[0].clone();
    assert_eq!(body["input"], "Bonjour");
    assert_eq!(body["voice"], "alloy");
    assert_eq!(body["response_format"], "mp3");
}

#[tokio::test]
async fn test_kokoro_base64_audio() {
    let (base, seen) = serve().await;
    let tts = TextToSpeech::new(
        TtsBackend::Kokoro {
            api_key: "di-test".to_string(),
            url: format!("{base}/kokoro"),
            stream: false,
        },
        1.0,
    )
    .unwrap();

    let clip = tts
        .synthesize_at("Salut", &VoiceSelection::default(), 1.5)
        .await
        .unwrap();
    assert_eq!(clip.data, MP3);

    let body = seen.lock().unwrap()[0].clone();
    assert_eq!(body["preset_voice"], json!(["ff_siwis"]));
    assert_eq!(body["output_format"], "mp3");
    assert_eq!(body["speed"], 1.5);
    assert_eq!(body["stream"], false);
}

#[tokio::test]
async fn test_speech_through_relay() {
    let (base, _) = serve().await;
    let tts = TextToSpeech::new(TtsBackend::Relay { base_url: base }, 1.0).unwrap();

    let clip = tts
        .synthesize("hi", &VoiceSelection::default())
        .await
        .unwrap();
    assert_eq!(clip.format, AudioFormat::Mp3);
    assert!(clip.data.starts_with(b"ID3"));
}

#[tokio::test]
async fn test_speed_out_of_range_is_rejected_before_calling() {
    let (base, seen) = serve().await;
    let tts = TextToSpeech::new(
        TtsBackend::Kokoro {
            api_key: "di-test".to_string(),
            url: format!("{base}/kokoro"),
            stream: false,
        },
        1.0,
    )
    .unwrap();

    let err = tts
        .synthesize_at("hi", &VoiceSelection::default(), 8.0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Tts(_)));
    assert!(seen.lock().unwrap().is_empty());
}
