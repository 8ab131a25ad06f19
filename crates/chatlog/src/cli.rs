//! Interactive REPL view
//!
//! Renders the conversation by subscribing to store change events and
//! forwards user input to the response router. Slash commands edit,
//! delete, export and import history.

use chatlog_core::{
    Author, ChangeEvent, Message, Mode, ResponseRouter, Stats, Submission,
};
use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, DefaultHinter, Emacs, KeyCode, KeyModifiers, Keybindings,
    MenuBuilder, Prompt, Reedline, ReedlineEvent, ReedlineMenu, Signal, Suggestion,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Available commands for autocomplete display
const COMMANDS: &[(&str, &str)] = &[
    ("/help", "Show this help"),
    ("/exit", "Quit"),
    ("/quit", "Quit"),
    ("/clear", "Delete the whole conversation: /clear [-y]"),
    ("/history", "Show the conversation with message ids"),
    ("/stats", "Show message count, last save and mode"),
    ("/mode", "Show or set the responder: /mode local|remote"),
    ("/edit", "Edit one of your messages: /edit <id> <text>"),
    ("/delete", "Delete a message: /delete <id> [-y]"),
    ("/export", "Write the conversation as JSON: /export <path>"),
    ("/import", "Replace the conversation from JSON: /import <path>"),
];

/// Parsed REPL input
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send(String),
    Exit,
    /// `confirmed` is set by `-y` / `--yes`
    Clear { confirmed: bool },
    Help,
    History,
    Stats,
    ShowMode,
    SetMode(Mode),
    Edit(u64, String),
    Delete { id: u64, confirmed: bool },
    Export(String),
    Import(String),
    Invalid(String),
}

impl Command {
    fn parse(input: &str) -> Command {
        let input = input.trim();
        if !input.starts_with('/') {
            return Command::Send(input.to_string());
        }

        let (name, rest) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };

        match name.to_lowercase().as_str() {
            "/exit" | "/quit" | "/q" => Command::Exit,
            "/clear" => match split_yes_flag(rest) {
                (confirmed, args) if args.is_empty() => Command::Clear { confirmed },
                _ => Command::Invalid("usage: /clear [-y]".to_string()),
            },
            "/help" | "/?" => Command::Help,
            "/history" => Command::History,
            "/stats" => Command::Stats,
            "/mode" if rest.is_empty() => Command::ShowMode,
            "/mode" => match rest.parse() {
                Ok(mode) => Command::SetMode(mode),
                Err(_) => Command::Invalid(format!("unknown mode '{}', use local or remote", rest)),
            },
            "/edit" => match rest.split_once(char::is_whitespace) {
                Some((id, text)) if !text.trim().is_empty() => match id.parse() {
                    Ok(id) => Command::Edit(id, text.trim().to_string()),
                    Err(_) => Command::Invalid(format!("invalid message id '{}'", id)),
                },
                _ => Command::Invalid("usage: /edit <id> <text>".to_string()),
            },
            "/delete" => match split_yes_flag(rest) {
                (confirmed, args) if args.len() == 1 => match args[0].parse() {
                    Ok(id) => Command::Delete { id, confirmed },
                    Err(_) => Command::Invalid(format!("invalid message id '{}'", args[0])),
                },
                _ => Command::Invalid("usage: /delete <id> [-y]".to_string()),
            },
            "/export" if !rest.is_empty() => Command::Export(rest.to_string()),
            "/import" if !rest.is_empty() => Command::Import(rest.to_string()),
            "/export" | "/import" => Command::Invalid(format!("usage: {} <path>", name)),
            _ => Command::Invalid(format!(
                "unknown command: {}. Type /help for a list of commands",
                input
            )),
        }
    }
}

/// Separate a `-y` / `--yes` flag from the remaining arguments
fn split_yes_flag(rest: &str) -> (bool, Vec<&str>) {
    let (flags, args): (Vec<&str>, Vec<&str>) = rest
        .split_whitespace()
        .partition(|arg| matches!(*arg, "-y" | "--yes"));
    (!flags.is_empty(), args)
}

/// Answers that confirm a destructive command; anything else declines
fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Command completer for reedline
#[derive(Clone)]
pub struct CommandCompleter {
    commands: Vec<(&'static str, &'static str)>,
}

impl CommandCompleter {
    pub fn new() -> Self {
        Self {
            commands: COMMANDS.to_vec(),
        }
    }
}

impl Default for CommandCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for CommandCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if !line.starts_with('/') {
            return Vec::new();
        }

        self.commands
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(line))
            .map(|(cmd, desc)| Suggestion {
                value: cmd.to_string(),
                description: Some(desc.to_string()),
                extra: None,
                span: reedline::Span::new(0, pos),
                append_whitespace: true,
                style: None,
            })
            .collect()
    }
}

/// Prompt showing the active mode
struct ModePrompt {
    router: ResponseRouter,
    style: Style,
}

impl ModePrompt {
    fn new(router: ResponseRouter) -> Self {
        Self {
            router,
            style: Color::Cyan.bold(),
        }
    }
}

impl Prompt for ModePrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(self.style.paint(format!("[{}] > ", self.router.mode())).to_string())
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: reedline::PromptHistorySearch,
    ) -> Cow<'_, str> {
        Cow::Borrowed("")
    }
}

/// One-off prompt for a y/N question
struct ConfirmPrompt {
    question: String,
}

impl Prompt for ConfirmPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        Cow::Owned(
            Color::Yellow
                .bold()
                .paint(format!("{} [y/N] ", self.question))
                .to_string(),
        )
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: reedline::PromptHistorySearch,
    ) -> Cow<'_, str> {
        Cow::Borrowed("")
    }
}

/// Ask a y/N question on the same line editor. Ctrl-C, Ctrl-D and errors decline.
fn confirm(line_editor: &mut Reedline, question: &str) -> bool {
    let prompt = ConfirmPrompt {
        question: question.to_string(),
    };
    match line_editor.read_line(&prompt) {
        Ok(Signal::Success(answer)) => is_yes(&answer),
        _ => false,
    }
}

/// Diff two snapshots into lines to print: new messages, edits and removals
fn render_changes(previous: &[Message], current: &[Message]) -> Vec<String> {
    let before: HashMap<u64, &Message> = previous.iter().map(|m| (m.id, m)).collect();
    let mut lines = Vec::new();

    if current.is_empty() && !previous.is_empty() {
        lines.push(Style::new().dimmed().paint("Conversation cleared.").to_string());
        return lines;
    }

    for message in current {
        match before.get(&message.id) {
            None => lines.push(format_message(message)),
            Some(old) if old.text != message.text || old.edited != message.edited => {
                lines.push(format_message(message))
            }
            Some(_) => {}
        }
    }

    let live: std::collections::HashSet<u64> = current.iter().map(|m| m.id).collect();
    let removed = previous.iter().filter(|m| !live.contains(&m.id)).count();
    if removed > 0 {
        lines.push(
            Style::new()
                .dimmed()
                .paint(format!("{} message(s) removed.", removed))
                .to_string(),
        );
    }

    lines
}

fn format_message(message: &Message) -> String {
    let (label, color) = match message.author {
        Author::User => ("you", Color::Green),
        Author::Bot => ("bot", Color::Yellow),
    };
    let mut line = format!(
        "{} {}",
        color.bold().paint(format!("{}:", label)),
        message.text
    );
    if message.edited {
        line.push_str(&Style::new().dimmed().paint(" (edited)").to_string());
    }
    line
}

fn format_stats(stats: &Stats, mode: Mode) -> String {
    format!(
        "Messages: {} | Last Saved: {} | Mode: {}",
        stats.count,
        stats.last_persisted_at,
        mode.to_string().to_uppercase()
    )
}

/// Print store changes as they are committed
fn attach_view(router: &ResponseRouter) {
    let rendered = Arc::new(Mutex::new(router.store().list()));
    router.store().bus().subscribe(move |event: &ChangeEvent| {
        let mut previous = rendered.lock().unwrap_or_else(PoisonError::into_inner);
        for line in render_changes(&previous, &event.messages) {
            println!("{}", line);
        }
        *previous = event.messages.clone();
    });
}

/// Run CLI interactive mode
pub async fn run_cli(router: ResponseRouter) -> anyhow::Result<()> {
    info!("Starting CLI mode in {} mode", router.mode());

    print_welcome();
    print_history(&router.store().list());
    attach_view(&router);

    let mut keybindings = default_keybindings();

    // Trigger completion on '/' key
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Char('/'),
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );

    let menu = Box::new(
        ColumnarMenu::default()
            .with_name("command_menu")
            .with_columns(1)
            .with_column_width(Some(50))
            .with_only_buffer_difference(false),
    );

    let hinter = DefaultHinter::default().with_style(Style::new().dimmed());

    let mut line_editor = Reedline::create()
        .with_completer(Box::new(CommandCompleter::new()))
        .with_menu(ReedlineMenu::EngineCompleter(menu))
        .with_hinter(Box::new(hinter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    let prompt = ModePrompt::new(router.clone());

    loop {
        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if !handle_command(&router, &mut line_editor, Command::parse(&line)).await {
                    break;
                }
            }
            Ok(Signal::CtrlC) => {
                println!("^C");
                continue;
            }
            Ok(Signal::CtrlD) => break,
            Err(err) => {
                eprintln!("\nError: {}\n", err);
                break;
            }
        }
    }

    println!("\nGoodbye!\n");
    Ok(())
}

/// Submit one message, print the reply and exit
pub async fn run_once(router: ResponseRouter, text: &str) -> anyhow::Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("message is empty");
    }

    match router.submit(text).reply().await {
        Some(reply) => {
            println!("{}", reply.text);
            Ok(())
        }
        None => anyhow::bail!("no reply was stored"),
    }
}

/// Execute one command. Returns `false` when the REPL should exit.
async fn handle_command(
    router: &ResponseRouter,
    line_editor: &mut Reedline,
    command: Command,
) -> bool {
    let store = router.store();

    match command {
        Command::Exit => return false,
        Command::Send(text) => {
            // Remote replies arrive on their own; the view prints them.
            if let Submission::Ignored = router.submit(&text) {
                eprintln!("Nothing to send.");
            }
        }
        Command::Clear { confirmed } => {
            if confirmed || confirm(line_editor, "Clear all messages?") {
                store.clear();
            } else {
                println!("Cancelled.");
            }
        }
        Command::Help => print_help(),
        Command::History => print_history(&store.list()),
        Command::Stats => println!("{}", format_stats(&store.stats(), router.mode())),
        Command::ShowMode => println!("Mode: {}", router.mode()),
        Command::SetMode(mode) => {
            router.set_mode(mode);
            println!("{}", format_stats(&store.stats(), mode));
        }
        Command::Edit(id, text) => {
            if let Err(e) = store.update(id, &text) {
                eprintln!("Cannot edit message: {}", e);
            }
        }
        Command::Delete { id, confirmed } => {
            if store.get(id).is_none() {
                eprintln!("No message with id {}", id);
            } else if confirmed || confirm(line_editor, &format!("Delete message #{}?", id)) {
                store.remove(id);
            } else {
                println!("Cancelled.");
            }
        }
        Command::Export(path) => match store.export_snapshot() {
            Ok(json) => match tokio::fs::write(&path, json).await {
                Ok(()) => println!("Exported {} messages to {}", store.stats().count, path),
                Err(e) => eprintln!("Export failed: {}", e),
            },
            Err(e) => eprintln!("Export failed: {}", e),
        },
        Command::Import(path) => match tokio::fs::read_to_string(&path).await {
            Ok(json) => match store.try_import_snapshot(&json) {
                Ok(count) => println!("Chat imported successfully ({} messages).", count),
                Err(e) => eprintln!("Invalid JSON file: {}", e),
            },
            Err(e) => eprintln!("Cannot read {}: {}", path, e),
        },
        Command::Invalid(reason) => eprintln!("{}", reason),
    }

    true
}

/// Default keybindings for reedline
fn default_keybindings() -> Keybindings {
    let mut keybindings = Keybindings::new();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Enter, ReedlineEvent::Submit);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Esc, ReedlineEvent::Esc);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('c'), ReedlineEvent::CtrlC);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('d'), ReedlineEvent::CtrlD);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Up, ReedlineEvent::Up);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Down, ReedlineEvent::Down);
    keybindings
}

fn print_welcome() {
    println!();
    println!("chatlog - type a message and press Enter");
    println!("Commands: /help, /mode, /history, /exit (type / for suggestions)");
    println!();
}

fn print_help() {
    println!();
    println!("Available commands:");
    for (cmd, desc) in COMMANDS {
        println!("  {:<10} {}", cmd, desc);
    }
    println!();
}

fn print_history(messages: &[Message]) {
    if messages.is_empty() {
        return;
    }

    println!("{}", "─".repeat(50));
    for message in messages {
        let stamp = message
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M");
        println!(
            "{} {} {}",
            Style::new().dimmed().paint(format!("#{}", message.id)),
            Style::new().dimmed().paint(stamp.to_string()),
            format_message(message)
        );
    }
    println!("{}", "─".repeat(50));
}
