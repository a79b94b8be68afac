use std::time::{Duration, Instant};

use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::ollama::{OllamaClient, ProbeReport, ServerStatus, StreamEvent, BASE_URL};
use crate::segment;
use crate::tui::AppEvent;

pub const STOPPED_NOTICE: &str = "Generation stopped by user.";
const EMPTY_RESPONSE_NOTICE: &str = "(no response)";
const PROBE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// The single in-flight generation. The placeholder message is addressed by
/// the index it had at creation time; `accumulated` is the running total the
/// placeholder is overwritten with on every fragment.
struct GenerationSession {
    id: u64,
    message_index: usize,
    accumulated: String,
    fragments: usize,
    cancel: CancellationToken,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Transcript (append-only; the placeholder is mutated in place)
    pub messages: Vec<ChatMessage>,

    // Prompt input
    pub input: String,
    pub input_cursor: usize,

    // Server status and model registry
    pub status: ServerStatus,
    pub available_models: Vec<String>,
    pub selected_model: Option<String>,

    // Generation session
    session: Option<GenerationSession>,
    next_session_id: u64,

    // Probe scheduling
    probe_in_flight: bool,
    last_probe: Option<Instant>,

    // Chat viewport
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,

    // Model picker state
    pub show_model_picker: bool,
    pub model_picker_state: ListState,

    // Animation state
    pub animation_frame: u8, // 0-2 for the pending-indicator dots

    pub ollama: OllamaClient,
    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(events: UnboundedSender<AppEvent>) -> Self {
        let config = Config::load().unwrap_or_default();
        Self::with_config(config, events)
    }

    pub fn with_config(config: Config, events: UnboundedSender<AppEvent>) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            messages: Vec::new(),

            input: String::new(),
            input_cursor: 0,

            status: ServerStatus::NotRunning,
            available_models: Vec::new(),
            // Validated against the first listing; see on_probe.
            selected_model: config.default_model,

            session: None,
            next_session_id: 0,

            probe_in_flight: false,
            last_probe: None,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            show_model_picker: false,
            model_picker_state: ListState::default(),

            animation_frame: 0,

            ollama: OllamaClient::new(BASE_URL),
            events,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.session.is_some()
    }

    /// Tick animation frame and probe scheduling (called by Tick event)
    pub fn tick(&mut self) {
        if self.is_generating() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        if self.probe_due() {
            self.spawn_probe();
        }
    }

    /// A probe is due while the server is not healthy, no probe is running,
    /// and the interval has elapsed. The status is re-read here at fire time,
    /// so polling stops as soon as a probe reports `Running`.
    fn probe_due(&self) -> bool {
        if self.status == ServerStatus::Running || self.probe_in_flight {
            return false;
        }
        self.last_probe
            .map_or(true, |at| at.elapsed() >= PROBE_INTERVAL)
    }

    pub fn spawn_probe(&mut self) {
        self.probe_in_flight = true;
        self.last_probe = Some(Instant::now());

        let client = self.ollama.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            let report = client.probe().await;
            let _ = tx.send(AppEvent::Probe(report));
        });
    }

    pub fn on_probe(&mut self, report: ProbeReport) {
        self.probe_in_flight = false;
        if self.status != report.status {
            tracing::info!(status = ?report.status, "server status changed");
        }
        self.status = report.status;

        // The registry is only updated by a healthy probe.
        if report.status == ServerStatus::Running {
            self.available_models = report.models;
            let selection_valid = self
                .selected_model
                .as_ref()
                .is_some_and(|m| self.available_models.contains(m));
            if !selection_valid {
                self.selected_model = self.available_models.first().cloned();
            }
        }
    }

    /// Send the current input as a prompt. No-op unless the server is
    /// healthy, a model is selected, the trimmed prompt is non-empty, and no
    /// generation is already running.
    pub fn send_message(&mut self) {
        let prompt = self.input.trim().to_string();
        if prompt.is_empty() || self.is_generating() || self.status != ServerStatus::Running {
            return;
        }
        let Some(model) = self.selected_model.clone() else {
            return;
        };

        self.input.clear();
        self.input_cursor = 0;

        let (session, cancel) = self.begin_exchange(prompt.clone());

        let client = self.ollama.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            client.generate(model, prompt, session, tx, cancel).await;
        });

        self.scroll_chat_to_bottom();
    }

    /// Push the user message and the assistant placeholder in one batch and
    /// open a new session addressing the placeholder's index. Any previous
    /// session handle is replaced; its events no longer match the id.
    fn begin_exchange(&mut self, prompt: String) -> (u64, CancellationToken) {
        self.messages.push(ChatMessage {
            role: ChatRole::User,
            content: prompt,
        });
        self.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: segment::pending_placeholder(),
        });

        let id = self.next_session_id;
        self.next_session_id += 1;
        let cancel = CancellationToken::new();
        self.session = Some(GenerationSession {
            id,
            message_index: self.messages.len() - 1,
            accumulated: String::new(),
            fragments: 0,
            cancel: cancel.clone(),
        });

        (id, cancel)
    }

    /// Request cancellation of the active generation. The session stays open
    /// until the stream task acknowledges with a Cancelled event.
    pub fn cancel_generation(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.cancel();
        }
    }

    pub fn on_stream_event(&mut self, session_id: u64, event: StreamEvent) {
        match event {
            StreamEvent::Fragment(text) => self.apply_fragment(session_id, text),
            StreamEvent::Done => self.finish_session(session_id, None),
            StreamEvent::Cancelled => {
                self.finish_session(session_id, Some(STOPPED_NOTICE.to_string()));
            }
            StreamEvent::Failed(err) => {
                self.finish_session(session_id, Some(format!("Error: {err}")));
            }
        }
    }

    fn apply_fragment(&mut self, session_id: u64, text: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.id != session_id {
            return;
        }

        session.accumulated.push_str(&text);
        session.fragments += 1;
        let index = session.message_index;
        let content = session.accumulated.clone();
        if let Some(slot) = self.messages.get_mut(index) {
            slot.content = content;
        }

        self.scroll_chat_to_bottom();
    }

    /// Close the session. Completion (`notice == None`) finalizes the
    /// placeholder in place with the accumulated text. Cancellation and
    /// errors keep the partial text as the answer and append the notice as
    /// its own message; if nothing arrived, the placeholder itself becomes
    /// the notice so the pending sentinel never survives.
    fn finish_session(&mut self, session_id: u64, notice: Option<String>) {
        let Some(session) = self.session.take() else {
            return;
        };
        if session.id != session_id {
            self.session = Some(session);
            return;
        }

        match notice {
            None => {
                let content = if session.accumulated.is_empty() {
                    EMPTY_RESPONSE_NOTICE.to_string()
                } else {
                    session.accumulated
                };
                if let Some(slot) = self.messages.get_mut(session.message_index) {
                    slot.content = content;
                }
            }
            Some(notice) => {
                if session.fragments == 0 {
                    if let Some(slot) = self.messages.get_mut(session.message_index) {
                        slot.content = notice;
                    }
                } else {
                    self.messages.push(ChatMessage {
                        role: ChatRole::Assistant,
                        content: notice,
                    });
                }
            }
        }

        self.scroll_chat_to_bottom();
    }

    // Model picker

    pub fn open_model_picker(&mut self) {
        if self.available_models.is_empty() {
            return;
        }
        let current_idx = self
            .selected_model
            .as_ref()
            .and_then(|m| self.available_models.iter().position(|c| c == m))
            .unwrap_or(0);
        self.model_picker_state.select(Some(current_idx));
        self.show_model_picker = true;
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    /// Confirm the highlighted model. Returns the chosen id so the caller
    /// can persist it. Silently a no-op for anything outside the registry.
    pub fn confirm_model(&mut self) -> Option<String> {
        let model = self
            .model_picker_state
            .selected()
            .and_then(|i| self.available_models.get(i).cloned())?;
        self.selected_model = Some(model.clone());
        self.show_model_picker = false;
        Some(model)
    }

    // Chat viewport

    pub fn scroll_down(&mut self, amount: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(amount);
    }

    pub fn scroll_up(&mut self, amount: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(amount);
    }

    pub fn scroll_half_page_down(&mut self) {
        self.scroll_down((self.chat_height / 2).max(1));
    }

    pub fn scroll_half_page_up(&mut self) {
        self.scroll_up((self.chat_height / 2).max(1));
    }

    /// Keep the newest content visible while a response streams in. Uses the
    /// same wrapped-line estimate as the renderer's layout.
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;

        for msg in &self.messages {
            total_lines += 1; // Role line ("You:" or "AI:")
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1; // Empty line still takes one line
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // Blank line after message
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.chat_scroll = total_lines.saturating_sub(visible_height);
        } else {
            self.chat_scroll = 0;
        }
    }
}
