use std::error::Error;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use english_tutor::config::Config;
use english_tutor::db::operations::sessions;
use english_tutor::logging;
use english_tutor::tutor::events::TutorEvent;
use english_tutor::tutor::prompt::{self, GREETING, TUTOR_NAME};
use english_tutor::tutor::{TurnOutcome, TutorSession};
use english_tutor::{AnthropicGateway, GenerationGateway, Ledger, Level, Role};

const HELP: &str = "Commands: /stats, /goals, /goal add <text>, /goal del <text>, /help, /quit";

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    if let Err(err) = run(config).await {
        error!(error = %err, "english tutor stopped");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let ledger = Ledger::open(&config.db_path).await?;
    println!("Progress is saved in {}", ledger.path().display());

    let anthropic = AnthropicGateway::from_env(prompt::system_prompt(&config.native_language));
    if !anthropic.is_available() {
        warn!("ANTHROPIC_API_KEY missing or placeholder, every turn will fail until it is set");
    }
    let gateway: Arc<dyn GenerationGateway> = Arc::new(anthropic);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let resume_id = match sessions::last_session(&ledger).await? {
        Some(last) => {
            println!(
                "Continue the previous conversation? It had {} messages (level: {}). [Y/n]",
                last.total_messages, last.level
            );
            let answer = lines.next_line().await?.unwrap_or_default();
            let answer = answer.trim().to_ascii_lowercase();
            (answer.is_empty() || answer == "y" || answer == "yes").then_some(last.id)
        }
        None => None,
    };

    let session = Arc::new(match resume_id {
        Some(id) => TutorSession::resume(ledger, gateway, id).await?,
        None => TutorSession::start(ledger, gateway, Level::Beginner).await?,
    });

    if resume_id.is_some() {
        for message in session.transcript() {
            let speaker = match message.role {
                Role::User => "You",
                Role::Assistant => TUTOR_NAME,
            };
            println!("{speaker}: {}", message.content);
        }
    } else {
        println!("{TUTOR_NAME}: {GREETING}");
    }
    println!("{HELP}");

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => print_event(&envelope.event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut turns: Vec<JoinHandle<()>> = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/help" => println!("{HELP}"),
            "/stats" => print_stats(&session).await?,
            "/goals" => print_goals(&session.goals()),
            _ => {
                if let Some(goal) = line.strip_prefix("/goal add ") {
                    if !session.add_goal(goal).await? {
                        println!("(empty goal ignored)");
                    }
                } else if let Some(goal) = line.strip_prefix("/goal del ") {
                    if !session.delete_goal(goal.trim()).await? {
                        println!("(no goal named \"{}\")", goal.trim());
                    }
                } else if line.starts_with('/') {
                    println!("Unknown command. {HELP}");
                } else {
                    turns.retain(|turn| !turn.is_finished());
                    turns.push(submit_in_background(&session, line.to_string()));
                }
            }
        }
    }

    if !turns.is_empty() {
        info!(pending = turns.len(), "waiting for in-flight replies before closing");
    }
    for turn in turns {
        let _ = turn.await;
    }
    session.shutdown().await?;
    printer.abort();
    Ok(())
}

fn submit_in_background(session: &Arc<TutorSession>, text: String) -> JoinHandle<()> {
    let turn = session.spawn_submit(text);
    tokio::spawn(async move {
        match turn.await {
            Ok(Ok(TurnOutcome::Busy)) => println!("(still waiting for the previous reply, send it again afterwards)"),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => error!(error = %err, "turn could not be saved"),
            Err(err) => error!(error = %err, "turn task failed"),
        }
    })
}

fn print_event(event: &TutorEvent) {
    match event {
        TutorEvent::ReplyReady { reply, .. } => {
            println!("{TUTOR_NAME}: {}", reply.reply);
            let feedback = &reply.feedback;
            if !feedback.positive.is_empty() {
                println!("  + {}", feedback.positive);
            }
            if feedback.has_correction() {
                println!("  ! {}", feedback.correction.as_deref().unwrap_or_default());
            }
            if !feedback.tip.is_empty() {
                println!("  tip: {}", feedback.tip);
            }
            if let Some(level) = reply.level {
                println!("  level: {level}");
            }
            if !reply.new_words.is_empty() {
                println!("  new words: {}", reply.new_words.join(", "));
            }
        }
        TutorEvent::Error { message, .. } => println!("{TUTOR_NAME}: {message}"),
        TutorEvent::GoalsChanged { goals, .. } => print_goals(goals),
    }
}

fn print_goals(goals: &[String]) {
    if goals.is_empty() {
        println!("No goals yet.");
        return;
    }
    println!("Goals:");
    for goal in goals {
        println!("  - {goal}");
    }
}

async fn print_stats(session: &TutorSession) -> Result<(), Box<dyn Error>> {
    let snapshot = session.snapshot();
    let cumulative = session.cumulative().await?;
    println!(
        "Session {}: {} messages, {} corrections, {} words, accuracy {:.0}%, level {}",
        snapshot.session_id,
        snapshot.user_messages,
        snapshot.corrections,
        snapshot.words_learned,
        snapshot.accuracy_pct,
        snapshot.level
    );
    println!(
        "All sessions: {} sessions, {} words, {} corrections, average accuracy {:.0}%",
        cumulative.total_sessions,
        cumulative.total_words,
        cumulative.total_corrections,
        cumulative.avg_accuracy
    );
    Ok(())
}
