//! Forkchat terminal front-end
//!
//! A line-oriented driver over the conversation tree. Plain input (or `say`)
//! sends a user message under the last message shown; slash commands navigate
//! and edit the branches. Levels are numbered from 0 at the root: level `n`
//! lists the alternatives for the `n+1`th message.

use forkchat::llm::{all_models, find_model, label_for, OpenAITransport, Role};
use forkchat::tree::ROOT_ID;
use forkchat::{BranchCursor, Config, ConversationTree, MessageNode, SettingsStore, SqliteStore, TaskStore};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Input = Lines<BufReader<Stdin>>;
type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const PREVIEW_CHARS: usize = 60;

const HELP: &str = "\
commands:
  <text> | say <text>      send a message and stream the answer
  /reroll                  generate another answer next to the last one
  /continue                keep writing the last answer
  /stop                    abort running generations
  /branches [level]        list alternatives at a level (default: last)
  /select <level> <n>      show alternative n at a level
  /delete <level> <n>      delete alternative n and everything below it
  /edit <text>             replace the text of the last message
  /model [id]              list models or switch model
  /temperature <value>     set sampling temperature
  /show                    print the selected conversation
  /quit                    exit";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Say(String),
    Reroll,
    Continue,
    Stop,
    Branches(Option<usize>),
    Select(usize, usize),
    Delete(usize, usize),
    Edit(String),
    Model(Option<String>),
    Temperature(f32),
    Show,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        let text = line.strip_prefix("say ").unwrap_or(line).trim();
        return Ok((!text.is_empty()).then(|| Command::Say(text.to_string())));
    }

    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let number = |arg: Option<&&str>, what: &str| -> Result<usize, String> {
        arg.ok_or_else(|| format!("missing {what}"))?
            .parse()
            .map_err(|_| format!("{what} must be a number"))
    };

    let command = match name {
        "/reroll" => Command::Reroll,
        "/continue" => Command::Continue,
        "/stop" => Command::Stop,
        "/branches" => Command::Branches(match args.first() {
            Some(_) => Some(number(args.first(), "level")?),
            None => None,
        }),
        "/select" => Command::Select(number(args.first(), "level")?, number(args.get(1), "index")?),
        "/delete" => Command::Delete(number(args.first(), "level")?, number(args.get(1), "index")?),
        "/edit" if !rest.is_empty() => Command::Edit(rest.to_string()),
        "/edit" => return Err("missing text".to_string()),
        "/model" => Command::Model(args.first().map(|s| (*s).to_string())),
        "/temperature" => Command::Temperature(
            rest.parse()
                .map_err(|_| "temperature must be a number".to_string())?,
        ),
        "/show" => Command::Show,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => return Err(format!("unknown command {other}, try /help")),
    };
    Ok(Some(command))
}

fn preview(node: &MessageNode) -> String {
    let text = node.text().replace('\n', " ");
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn show(tree: &ConversationTree) -> CliResult<()> {
    let path = tree.selected_path()?;
    for (level, pair) in path.windows(2).enumerate() {
        let parent = pair[0].node();
        let node = pair[1].node();
        let position = parent.position_of(&node.id).map_or(0, |p| p + 1);
        println!(
            "[{level}] {} ({position}/{}){}",
            node.role,
            parent.children.len(),
            node.meta
                .model
                .as_deref()
                .map(|m| format!(" {}", label_for(m).unwrap_or(m)))
                .unwrap_or_default()
        );
        println!("{}", node.text());
        if let Some(error) = node.error() {
            println!("  error: {error}");
        }
        println!();
    }
    Ok(())
}

fn list_branches(cursor: &BranchCursor, level: usize) {
    let node = cursor.node();
    println!("level {level}: {} alternatives, {} messages below", node.children.len(), node.weight);
    for (index, child) in cursor.children().iter().enumerate() {
        let marker = if node.selected.as_deref() == Some(child.id.as_str()) { '*' } else { ' ' };
        let model = child
            .meta
            .model
            .as_deref()
            .map(|m| label_for(m).unwrap_or(m))
            .unwrap_or_default();
        println!(
            "{marker} {index}: {} [{} below] {model} {}",
            child.role,
            child.weight,
            preview(child)
        );
    }
}

fn child_at(cursor: &BranchCursor, index: usize) -> Option<String> {
    cursor.node().children.get(index).cloned()
}

/// Level whose selected child is the last message shown
fn last_level(path: &[BranchCursor]) -> usize {
    path.len().saturating_sub(2)
}

/// Stream `node_id`'s generation to stdout until it ends.
///
/// Typing `/stop` or pressing Ctrl-C aborts it.
async fn follow(tree: &ConversationTree, node_id: &str, input: &mut Input) -> CliResult<()> {
    let Some(task) = tree.tasks().find(node_id) else {
        return Ok(());
    };

    let finished = Arc::new(Notify::new());
    let notify = Arc::clone(&finished);
    let watched = node_id.to_string();
    let list_sub = tree.tasks().subscribe(move |tasks| {
        if !tasks.iter().any(|t| t.id() == watched) {
            notify.notify_one();
        }
    });

    let printed = Arc::new(Mutex::new(0usize));
    let cursor = Arc::clone(&printed);
    let text_sub = task.result().subscribe(move |text| {
        let mut printed = cursor.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(delta) = text.get(*printed..) {
            print!("{delta}");
            let _ = std::io::stdout().flush();
            *printed = text.len();
        }
    });

    if tree.tasks().is_active(node_id) {
        loop {
            tokio::select! {
                () = finished.notified() => break,
                _ = tokio::signal::ctrl_c() => task.abort(),
                line = input.next_line() => match line?.as_deref().map(str::trim) {
                    Some("/stop") | None => task.abort(),
                    Some(_) => eprintln!("generating, /stop to abort"),
                },
            }
        }
    }

    text_sub.unsubscribe();
    list_sub.unsubscribe();
    println!();

    let node = tree.node(node_id);
    if let Some(error) = node.error() {
        println!("error: {error}");
    } else if task.is_aborted() {
        println!("(stopped)");
    }
    Ok(())
}

async fn run(tree: &ConversationTree, command: Command, input: &mut Input) -> CliResult<bool> {
    let path = tree.selected_path()?;
    let level = last_level(&path);

    match command {
        Command::Say(text) => {
            let Some(cursor) = path.last() else {
                return Ok(true);
            };
            let user_id = cursor.send(text)?;
            if let Some(answer) = tree.node(&user_id).selected {
                follow(tree, &answer, input).await?;
            }
        }
        Command::Reroll => {
            // A trailing user message gets its first answer instead
            let at = match path.last().map(BranchCursor::node) {
                Some(last) if last.role == Role::Assistant && path.len() > 1 => level,
                _ => path.len() - 1,
            };
            let answer = path[at].regenerate()?;
            follow(tree, &answer, input).await?;
        }
        Command::Continue => {
            let cursor = &path[level];
            if cursor.continue_selected()? {
                if let Some(answer) = cursor.node().selected {
                    print!("... ");
                    follow(tree, &answer, input).await?;
                }
            } else {
                println!("nothing to continue");
            }
        }
        Command::Stop => {
            let running = tree.tasks().get().len();
            tree.tasks().abort_all();
            println!("stopped {running} generation(s)");
        }
        Command::Branches(at) => {
            let at = at.unwrap_or(level);
            match path.get(at) {
                Some(cursor) => list_branches(cursor, at),
                None => println!("no level {at}"),
            }
        }
        Command::Select(at, index) => {
            let Some(cursor) = path.get(at) else {
                println!("no level {at}");
                return Ok(true);
            };
            match child_at(cursor, index) {
                Some(child) => {
                    cursor.select_child(&child)?;
                    show(tree)?;
                }
                None => println!("no alternative {index} at level {at}"),
            }
        }
        Command::Delete(at, index) => {
            let Some(cursor) = path.get(at) else {
                println!("no level {at}");
                return Ok(true);
            };
            match child_at(cursor, index) {
                Some(child) => {
                    let report = cursor.delete_child(&child)?;
                    println!(
                        "deleted {} message(s), aborted {} generation(s)",
                        report.removed, report.aborted
                    );
                    if !report.failed.is_empty() {
                        println!("could not remove: {}", report.failed.join(", "));
                    }
                }
                None => println!("no alternative {index} at level {at}"),
            }
        }
        Command::Edit(text) => {
            if !path[level].edit_selected(text)? {
                println!("nothing to edit");
            }
        }
        Command::Model(None) => {
            let current = tree.settings().get().model;
            for model in all_models() {
                let marker = if model.id == current { '*' } else { ' ' };
                println!("{marker} {} ({})", model.id, model.label);
            }
        }
        Command::Model(Some(id)) => match find_model(&id) {
            Some(model) => {
                tree.settings().update(|s| s.model = model.id.to_string())?;
                println!("model: {}", model.label);
            }
            None => println!("unknown model {id}"),
        },
        Command::Temperature(value) => {
            tree.settings().update(|s| s.temperature = value)?;
            println!("temperature: {value}");
        }
        Command::Show => show(tree)?,
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forkchat=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let records = Arc::new(SqliteStore::open(&config.db_path)?);
    let settings = Arc::new(SettingsStore::load(records.clone()));

    let transport = Arc::new(OpenAITransport::new(config.endpoint.clone())?);
    let tasks = Arc::new(TaskStore::new(transport).with_timeout(config.task_timeout));
    let tree = ConversationTree::new(records, tasks, Arc::clone(&settings))
        .with_fallback_api_key(config.api_key.clone());

    let total = tree.repair_weights(ROOT_ID)?;
    tracing::info!(messages = total, endpoint = %config.endpoint, "Conversation loaded");

    if settings.get().api_key.is_none() && config.api_key.is_none() {
        tracing::warn!("No API key configured. Set OPENAI_API_KEY.");
        eprintln!("warning: no API key configured, set OPENAI_API_KEY");
    }

    show(&tree)?;
    println!("type /help for commands");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = input.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Ok(Some(command)) => {
                if !run(&tree, command, &mut input).await? {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => println!("{message}"),
        }
    }

    tree.tasks().abort_all();
    Ok(())
}
