use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use satsang_backend::{Contact, UserId, spawn_heartbeat};
use satsang_chat::{Section, Sender, SessionMode, SessionView, UserProfile};

use crate::bootstrap::AppRuntime;

/// `:`-prefixed app commands. Plain text (including `/`-prefixed assistant
/// text while in peer mode) flows to the session unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewChat,
    History,
    Open(usize),
    Delete(usize),
    Stop,
    Peer(u64),
    Leave,
    Sections,
    Section(String),
    Login { id: u64, name: String },
    Logout,
    Models,
    Help,
    Quit,
}

/// Returns `None` for plain message text, `Some(Err(..))` for a malformed
/// or unknown command.
pub fn parse_command(line: &str) -> Option<Result<Command, String>> {
    let line = line.trim();
    let rest = line.strip_prefix(':')?;
    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();

    let parsed = match name {
        "new" => Ok(Command::NewChat),
        "history" => Ok(Command::History),
        "open" => parse_index(words.next()).map(Command::Open),
        "delete" => parse_index(words.next()).map(Command::Delete),
        "stop" => Ok(Command::Stop),
        "peer" => parse_user_id(words.next()).map(Command::Peer),
        "leave" => Ok(Command::Leave),
        "sections" => Ok(Command::Sections),
        "section" => match words.next() {
            Some(slug) => Ok(Command::Section(slug.to_string())),
            None => Err("usage: :section <slug>".to_string()),
        },
        "login" => match (parse_user_id(words.next()), words.next()) {
            (Ok(id), Some(name)) => Ok(Command::Login {
                id,
                name: name.to_string(),
            }),
            _ => Err("usage: :login <id> <name>".to_string()),
        },
        "logout" => Ok(Command::Logout),
        "models" => Ok(Command::Models),
        "help" => Ok(Command::Help),
        "quit" | "q" => Ok(Command::Quit),
        other => Err(format!("unknown command ':{other}'; try :help")),
    };
    Some(parsed)
}

fn parse_index(word: Option<&str>) -> Result<usize, String> {
    word.and_then(|raw| raw.parse::<usize>().ok())
        .filter(|index| *index >= 1)
        .ok_or_else(|| "expected a 1-based conversation number".to_string())
}

fn parse_user_id(word: Option<&str>) -> Result<u64, String> {
    word.and_then(|raw| raw.parse::<u64>().ok())
        .ok_or_else(|| "expected a numeric user id".to_string())
}

const HELP_TEXT: &str = "\
:new                start a fresh assistant conversation
:history            list saved conversations
:open <n>           reopen conversation n from :history
:delete <n>         delete conversation n from :history
:stop               cancel the in-flight assistant request
:peer <id>          open the direct-message thread with a user
:leave              leave peer mode
:sections           list guided-search sections
:section <slug>     start a guided search for a section
:login <id> <name>  store a local identity
:logout             forget the stored identity
:models             list models offered by the assistant endpoint
:quit               exit";

fn sender_prefix(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "you",
        Sender::Assistant => "assistant",
        Sender::Peer => "peer",
    }
}

/// Lines to print for one view transition. Appended messages print as a
/// suffix; a replaced transcript (mode switch, reopened snapshot) reprints
/// wholesale under a separator.
pub fn render_update(previous: &SessionView, next: &SessionView) -> Vec<String> {
    let mut lines = Vec::new();

    let appended = next.messages.len() >= previous.messages.len()
        && next.messages[..previous.messages.len()] == previous.messages[..];
    if appended {
        for message in &next.messages[previous.messages.len()..] {
            lines.push(format!("{}> {}", sender_prefix(message.sender), message.text));
        }
    } else {
        match (&next.recipient, next.mode) {
            (Some(contact), SessionMode::Peer) => {
                lines.push(format!("--- direct messages with {} ---", contact.display_name()));
            }
            _ => lines.push("--- conversation ---".to_string()),
        }
        for message in &next.messages {
            lines.push(format!("{}> {}", sender_prefix(message.sender), message.text));
        }
    }

    if next.notice != previous.notice
        && let Some(notice) = &next.notice
    {
        lines.push(format!("! {notice}"));
    }

    lines
}

/// Interactive loop over stdin. A background task renders transcript
/// updates as they are published, so assistant replies and peer history
/// appear without blocking the prompt.
pub async fn run(mut runtime: AppRuntime) -> std::io::Result<()> {
    let mut views = runtime.session.subscribe();
    let printer = tokio::spawn(async move {
        let mut previous = views.borrow_and_update().clone();
        while views.changed().await.is_ok() {
            let next = views.borrow_and_update().clone();
            for line in render_update(&previous, &next) {
                println!("{line}");
            }
            previous = next;
        }
    });

    println!("satsang — type a message, or :help for commands");
    if let Some(greeting) = runtime.session.view().messages.first() {
        println!("assistant> {}", greeting.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_command(trimmed) {
            None => runtime.session.submit(trimmed).await,
            Some(Err(message)) => println!("{message}"),
            Some(Ok(Command::Quit)) => break,
            Some(Ok(command)) => run_command(&mut runtime, command).await,
        }
    }

    printer.abort();
    if let Some(heartbeat) = runtime.heartbeat.take() {
        heartbeat.abort();
    }
    Ok(())
}

async fn run_command(runtime: &mut AppRuntime, command: Command) {
    match command {
        Command::NewChat => runtime.session.start_new_chat(),
        Command::History => print_history(&runtime.session.view()),
        Command::Open(index) => {
            let view = runtime.session.view();
            match view.history.get(index - 1) {
                Some(entry) => runtime.session.load_snapshot(&entry.id),
                None => println!("no conversation {index}; see :history"),
            }
        }
        Command::Delete(index) => {
            let view = runtime.session.view();
            match view.history.get(index - 1) {
                Some(entry) => {
                    let id = entry.id.clone();
                    runtime.session.delete_snapshot(&id).await;
                    println!("deleted \"{}\"", entry.title);
                }
                None => println!("no conversation {index}; see :history"),
            }
        }
        Command::Stop => runtime.session.cancel_request(),
        Command::Peer(id) => {
            let contact = lookup_contact(runtime, UserId::new(id)).await;
            runtime.session.bind_peer(Some(contact)).await;
        }
        Command::Leave => runtime.session.bind_peer(None).await,
        Command::Sections => {
            for section in Section::ALL {
                println!("{:<15} {}", section.slug(), section.label());
            }
        }
        Command::Section(slug) => match Section::from_slug(&slug) {
            Some(section) => runtime.session.start_section_search(section),
            None => println!("unknown section '{slug}'; see :sections"),
        },
        Command::Login { id, name } => login(runtime, UserId::new(id), name).await,
        Command::Logout => logout(runtime).await,
        Command::Models => print_models(runtime).await,
        Command::Help => println!("{HELP_TEXT}"),
        Command::Quit => {}
    }
}

fn print_history(view: &SessionView) {
    if view.history.is_empty() {
        println!("no saved conversations");
        return;
    }
    for (index, entry) in view.history.iter().enumerate() {
        let marker = if view.current_chat_id.as_ref() == Some(&entry.id) {
            "*"
        } else {
            " "
        };
        println!("{marker}{:>3}  {}", index + 1, entry.title);
    }
}

/// Prefers the backend's contact record so peer mode shows real display
/// fields; an unreachable backend still yields a usable minimal binding.
async fn lookup_contact(runtime: &AppRuntime, id: UserId) -> Contact {
    match runtime.backend.contacts().await {
        Ok(contacts) => contacts
            .into_iter()
            .find(|contact| contact.id == id)
            .unwrap_or_else(|| minimal_contact(id)),
        Err(error) => {
            warn!(error = %error, "contact lookup failed; binding without a profile");
            minimal_contact(id)
        }
    }
}

fn minimal_contact(id: UserId) -> Contact {
    Contact {
        id,
        karmic_name: format!("user {id}"),
        ..Contact::default()
    }
}

async fn login(runtime: &mut AppRuntime, id: UserId, name: String) {
    let profile = UserProfile::new(id, name);
    if let Err(error) = runtime.profiles.save(&profile).await {
        warn!(error = %error, "failed to persist the profile; identity holds for this run only");
    }
    runtime.session.set_local_user(Some(id)).await;
    if let Some(heartbeat) = runtime.heartbeat.take() {
        heartbeat.abort();
    }
    runtime.heartbeat = Some(spawn_heartbeat(
        runtime.backend.clone(),
        id,
        runtime.heartbeat_period(),
    ));
    runtime.profile = Some(profile);
    println!("logged in as user {id}");
}

async fn logout(runtime: &mut AppRuntime) {
    if let Err(error) = runtime.profiles.clear().await {
        warn!(error = %error, "failed to clear the stored profile");
    }
    runtime.session.set_local_user(None).await;
    if let Some(heartbeat) = runtime.heartbeat.take() {
        heartbeat.abort();
    }
    runtime.profile = None;
    println!("logged out");
}

async fn print_models(runtime: &AppRuntime) {
    match runtime.assistant.fetch_models().await {
        Ok(catalog) => {
            if let Some(warning) = &catalog.warning {
                println!("! {warning}");
            }
            for entry in &catalog.entries {
                match &entry.provider {
                    Some(provider) => println!("{:<50} {provider}", entry.id),
                    None => println!("{}", entry.id),
                }
            }
        }
        Err(error) => println!("could not list models: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satsang_chat::Message;

    fn view_with(messages: Vec<Message>) -> SessionView {
        SessionView {
            messages,
            history: Vec::new(),
            mode: SessionMode::Assistant,
            recipient: None,
            current_chat_id: None,
            is_loading: false,
            menu_open: false,
            notice: None,
        }
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("hare krishna"), None);
        assert_eq!(parse_command("/force assistant"), None);
    }

    #[test]
    fn commands_parse_with_arguments() {
        assert_eq!(parse_command(":new"), Some(Ok(Command::NewChat)));
        assert_eq!(parse_command(":open 2"), Some(Ok(Command::Open(2))));
        assert_eq!(parse_command(":peer 7"), Some(Ok(Command::Peer(7))));
        assert_eq!(
            parse_command(":section knowledge_base"),
            Some(Ok(Command::Section("knowledge_base".to_string())))
        );
        assert_eq!(
            parse_command(":login 7 Ivan"),
            Some(Ok(Command::Login {
                id: 7,
                name: "Ivan".to_string()
            }))
        );
    }

    #[test]
    fn malformed_commands_report_usage() {
        assert!(matches!(parse_command(":open zero"), Some(Err(_))));
        assert!(matches!(parse_command(":open 0"), Some(Err(_))));
        assert!(matches!(parse_command(":peer"), Some(Err(_))));
        assert!(matches!(parse_command(":banish"), Some(Err(_))));
    }

    #[test]
    fn appended_messages_render_as_a_suffix() {
        let previous = view_with(vec![Message::assistant("welcome")]);
        let mut next = previous.clone();
        next.messages.push(Message::user("hello"));
        next.messages.push(Message::assistant("om"));

        let lines = render_update(&previous, &next);
        assert_eq!(lines, vec!["you> hello", "assistant> om"]);
    }

    #[test]
    fn replaced_transcript_reprints_wholesale() {
        let previous = view_with(vec![
            Message::assistant("welcome"),
            Message::user("hello"),
        ]);
        let next = view_with(vec![Message::assistant("welcome again")]);

        let lines = render_update(&previous, &next);
        assert_eq!(lines[0], "--- conversation ---");
        assert_eq!(lines[1], "assistant> welcome again");
    }

    #[test]
    fn new_notices_are_rendered_once() {
        let previous = view_with(vec![]);
        let mut next = previous.clone();
        next.notice = Some("Message not sent: backend is down".to_string());

        let lines = render_update(&previous, &next);
        assert_eq!(lines, vec!["! Message not sent: backend is down"]);

        let unchanged = render_update(&next, &next.clone());
        assert!(unchanged.is_empty());
    }
}
