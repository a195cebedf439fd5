use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

pub mod backend;
pub mod config;
pub mod geometry;
pub mod notifier;
pub mod orchestrator;
pub mod persistence;
pub mod queries;
pub mod settings;
pub mod settings_store;
pub mod surfaces;

#[cfg(test)]
mod tests;

use backend::{BackendError, ChatMessage, InferenceService, OllamaClient, StreamEvent, Translation};
use config::AppConfig;
use notifier::CrossSurfaceNotifier;
use orchestrator::QueryState;
use persistence::{JsonFileStore, KeyValueStore};
use surfaces::{OptionsSurface, SpotlightSurface, ToastSurface};

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Full contents of the spotlight input field
    Input(String),
    Model(String),
    Think(bool),
    Language(String),
    SearchUrl(String),
    SearchKey(String),
    Models,
    /// One-shot streamed chat with the selected model
    Chat(String),
    /// Rendered answer panel height in pixels
    Measure(f64),
    Copy,
    Show,
    Hide,
    Toggle,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(rest) = line.strip_prefix(':') else {
            return Command::Input(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match name {
            "model" => Command::Model(arg.to_string()),
            "think" => match arg {
                "on" | "true" | "1" => Command::Think(true),
                "off" | "false" | "0" => Command::Think(false),
                _ => Command::Unknown(line.to_string()),
            },
            "lang" => Command::Language(arg.to_string()),
            "search-url" => Command::SearchUrl(arg.to_string()),
            "search-key" => Command::SearchKey(arg.to_string()),
            "models" => Command::Models,
            "chat" if !arg.is_empty() => Command::Chat(arg.to_string()),
            "measure" => arg
                .parse()
                .map(Command::Measure)
                .unwrap_or_else(|_| Command::Unknown(line.to_string())),
            "copy" => Command::Copy,
            "show" => Command::Show,
            "hide" => Command::Hide,
            "toggle" => Command::Toggle,
            "quit" | "q" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

pub fn describe_answer(state: &QueryState<String>) -> Option<String> {
    match state {
        QueryState::Idle => None,
        QueryState::Debouncing { .. } | QueryState::InFlight { .. } => Some("answer: ...".to_string()),
        QueryState::Settled { payload: None, .. } => None,
        QueryState::Settled { payload: Some(text), .. } => Some(format!("answer: {}", text)),
        QueryState::Failed { error, .. } => Some(format!("answer error: {}", error)),
    }
}

pub fn describe_translation(state: &QueryState<Translation>) -> Option<String> {
    match state {
        QueryState::Idle => None,
        QueryState::Debouncing { .. } | QueryState::InFlight { .. } => {
            Some("translation: ...".to_string())
        }
        QueryState::Settled { payload: None, .. } => None,
        QueryState::Settled { payload: Some(t), .. } => {
            Some(format!("translation [{}]: {}", t.detected_language, t.text))
        }
        QueryState::Failed { error, .. } => Some(format!("translation error: {}", error)),
    }
}

/// Stream a reply to `prompt` into `out` token by token and return the full
/// text.
pub async fn stream_chat(
    ollama: &OllamaClient,
    model: &str,
    prompt: &str,
    mut out: impl Write,
) -> Result<String, BackendError> {
    let messages = [ChatMessage::new("user", prompt)];
    let (events, mut tokens) = mpsc::unbounded_channel();

    let printer = async {
        let mut reply = String::new();
        while let Some(event) = tokens.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    let _ = write!(out, "{}", token);
                    let _ = out.flush();
                    reply.push_str(&token);
                }
                StreamEvent::Done => break,
            }
        }
        let _ = writeln!(out);
        reply
    };

    let (result, reply) = tokio::join!(ollama.chat_stream(model, &messages, events), printer);
    result.map(|()| reply)
}

/// Print panel and window changes as they happen.
fn spawn_renderer(
    mut answer: watch::Receiver<QueryState<String>>,
    mut translation: watch::Receiver<QueryState<Translation>>,
    mut height: watch::Receiver<f64>,
    mut toast: watch::Receiver<Option<String>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = answer.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(line) = describe_answer(&answer.borrow_and_update()) {
                        println!("{}", line);
                    }
                }
                changed = translation.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(line) = describe_translation(&translation.borrow_and_update()) {
                        println!("{}", line);
                    }
                }
                changed = height.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    println!("[window height {}]", *height.borrow_and_update());
                }
                changed = toast.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(message) = toast.borrow_and_update().as_deref() {
                        println!("[toast] {}", message);
                    }
                }
            }
        }
    })
}

async fn run_console(config: AppConfig) {
    log::info!("Settings file: {}", config.settings_path.display());
    let engine: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&config.settings_path));
    let notifier = CrossSurfaceNotifier::default();
    let service = Arc::new(InferenceService::with_urls(
        &config.ollama_url,
        &config.translate_url,
    ));
    log::info!("Inference server: {}", service.ollama().base_url());

    let spotlight = SpotlightSurface::open(
        Arc::clone(&engine),
        notifier.clone(),
        service.clone(),
        service.clone(),
        &config,
    );
    let options = OptionsSurface::open(
        engine,
        notifier.clone(),
        service.clone(),
        config.settings_debounce,
    );
    let toast = ToastSurface::open(&notifier, config.toast_duration);
    let renderer = spawn_renderer(
        spotlight.watch_answer(),
        spotlight.watch_translation(),
        spotlight.watch_height(),
        toast.watch(),
    );

    if !spotlight.settings().snapshot().is_model_configured() {
        println!("No model selected; use :models then :model <name>");
    }
    spotlight.show();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read input: {}", e);
                break;
            }
        };

        match Command::parse(&line) {
            Command::Input(text) => spotlight.on_input(&text),
            Command::Model(model) => options.set_selected_model(&model),
            Command::Think(enabled) => options.set_enable_thinking(enabled),
            Command::Language(language) => options.set_second_language(&language),
            Command::SearchUrl(url) => options.set_web_search_url(&url),
            Command::SearchKey(key) => options.set_web_search_key(&key),
            Command::Models => match options.refresh_models().await {
                Ok(models) if models.is_empty() => println!("No models installed"),
                Ok(models) => {
                    for model in models {
                        println!("  {}", model);
                    }
                }
                Err(e) => println!("Failed to list models: {}", e),
            },
            Command::Chat(prompt) => {
                let model = options.settings().selected_model;
                if model.is_empty() {
                    println!("No model selected; use :model <name>");
                } else if let Err(e) =
                    stream_chat(service.ollama(), &model, &prompt, std::io::stdout()).await
                {
                    println!("Chat failed: {}", e);
                }
            }
            Command::Measure(height) => spotlight.report_answer_height(height),
            Command::Copy => match spotlight.copy_result() {
                Some(text) => println!("{}", text),
                None => println!("Nothing to copy"),
            },
            Command::Show => spotlight.show(),
            Command::Hide => spotlight.hide(),
            Command::Toggle => {
                spotlight.toggle();
            }
            Command::Quit => break,
            Command::Unknown(line) => println!("Unknown command: {}", line),
        }

        if options.is_save_failed() {
            println!("[options] saving failed");
        }
    }

    renderer.abort();
    options.close();
    spotlight.hide();
}

pub fn run() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            return;
        }
    };
    runtime.block_on(run_console(config));
}
