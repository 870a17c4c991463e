use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coach_core::model::{Difficulty, InterviewPlan, InterviewSetup};
use coach_core::oracle::{ChatClient, LanguageModel, LlmOracle};
use coach_core::questions::{LlmQuestionSource, QuestionPolicy, QuestionRequest, QuestionSource};
use coach_core::report::{DashboardStats, SessionReport};
use coach_core::resume::{ResumeDigest, infer_roles};
use coach_core::session::{
    InputMode, Phase, SessionContext, SessionController, SessionEnd, SessionHandle, SessionPolicy,
    SessionSnapshot,
};
use coach_core::speech::VoicePreference;
use coach_core::speech::adapter::{DEFAULT_RETRY_BACKOFF, SpeechAdapter};
use coach_core::store::{JsonFileStore, SessionStore};
use coach_service::config::Config;
use coach_service::prompt_loader;
use coach_service::terminal_speech::{LineInput, TerminalPlatform, parse_line};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;

const COUNTDOWN_WARNING: Duration = Duration::from_secs(5 * 60);

#[derive(Parser)]
#[command(version, about = "Practice job interviews with an AI coach")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a mock interview in the terminal
    Interview(InterviewArgs),
    /// List saved interviews, newest first
    History,
    /// Delete a saved interview
    Delete {
        /// Id shown by `history`
        id: String,
    },
    /// Show totals and averages over saved interviews
    Stats,
    /// Suggest job roles for the skills in a resume
    Roles {
        /// Resume digest as JSON
        resume: PathBuf,
    },
}

#[derive(Args)]
struct InterviewArgs {
    /// Job role to interview for. Inferred from the resume when omitted.
    #[arg(long)]
    role: Option<String>,
    #[arg(long, default_value = "medium")]
    difficulty: Difficulty,
    /// Comma separated topics to focus on
    #[arg(long, default_value = "")]
    topics: String,
    /// File with one question per line, used instead of generated questions
    #[arg(long)]
    questions: Option<PathBuf>,
    /// Resume digest as JSON
    #[arg(long)]
    resume: Option<PathBuf>,
    /// Answer by typing only; nothing is read out
    #[arg(long)]
    text: bool,
    /// Do not save the finished interview
    #[arg(long)]
    no_save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr; stdout carries the interview itself.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting interview coach...");

    // --- 3. Parse Command-Line Arguments ---
    let cli = Cli::parse();
    let store = JsonFileStore::new(config.store_path.clone());

    match cli.command {
        Command::Interview(args) => run_interview(&mut config, &store, args).await,
        Command::History => show_history(&config, &store).await,
        Command::Delete { id } => {
            store.delete(&id).await.context("Failed to delete interview")?;
            println!("Deleted interview {id}");
            Ok(())
        }
        Command::Stats => show_stats(&config, &store).await,
        Command::Roles { resume } => {
            let resume = load_resume(&resume)?;
            let roles = infer_roles(&resume.skills);
            if roles.is_empty() {
                println!("No role suggestions for these skills.");
            }
            for (rank, role) in roles.iter().enumerate() {
                println!("{}. {}", rank + 1, role);
            }
            Ok(())
        }
    }
}

fn load_resume(path: &Path) -> Result<ResumeDigest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resume: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse resume: {}", path.display()))
}

fn build_setup(args: &InterviewArgs) -> Result<InterviewSetup> {
    let resume = args.resume.as_deref().map(load_resume).transpose()?;

    let role = match (&args.role, &resume) {
        (Some(role), _) => role.clone(),
        (None, Some(resume)) => {
            let role = resume
                .job_role
                .clone()
                .or_else(|| infer_roles(&resume.skills).into_iter().next())
                .context("Could not infer a job role from the resume; pass --role")?;
            println!("Interviewing for: {role}");
            role
        }
        (None, None) => anyhow::bail!("--role is required when no resume is given"),
    };

    let mut setup = InterviewSetup::new(role, args.difficulty)?.with_topics(&args.topics);
    if let Some(path) = &args.questions {
        let bank = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read question bank: {}", path.display()))?;
        setup = setup.with_question_bank(&bank);
    }
    if let Some(resume) = resume {
        setup = setup.with_resume(resume);
    }
    Ok(setup)
}

/// Lines typed on stdin. A dedicated thread does the blocking reads.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read from stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

async fn run_interview(config: &mut Config, store: &JsonFileStore, args: InterviewArgs) -> Result<()> {
    // --- 4. Load Prompts ---
    let prompts = Arc::new(
        prompt_loader::load_prompt_set(config.prompts_dir.as_deref()).context("Failed to load LLM prompts")?,
    );

    // --- 5. Initialize API Clients ---
    let model: Arc<dyn LanguageModel> = Arc::new(ChatClient::new(
        config.take_api_key()?,
        config.chat_model.clone(),
        config.openai_base_url.clone(),
    ));
    let oracle = Arc::new(LlmOracle::new(model.clone(), prompts.clone()));

    // --- 6. Prepare Questions ---
    let setup = build_setup(&args)?;
    let source = LlmQuestionSource::new(
        model,
        prompts,
        QuestionPolicy {
            question_count: config.question_count,
            introductory_count: config.intro_questions,
        },
    );
    println!("Preparing your interview questions...");
    let questions = source
        .generate(&QuestionRequest::from(&setup))
        .await
        .context("Failed to prepare interview questions. Please check your inputs or try again")?;
    let plan = InterviewPlan::new(setup, questions)?;

    // --- 7. Session Setup ---
    let platform = Arc::new(TerminalPlatform::default());
    let speech = Arc::new(SpeechAdapter::new(
        platform.clone(),
        VoicePreference::default(),
        DEFAULT_RETRY_BACKOFF,
    ));
    let policy = SessionPolicy {
        max_duration: config.max_duration(),
        rearm_delay: config.rearm_delay,
        text_only: args.text,
        ..SessionPolicy::default()
    };
    let context = SessionContext::new(config.user_id.clone(), speech, oracle.clone()).with_policy(policy);
    let (controller, handle) = SessionController::new(context);
    let mut session = tokio::spawn(controller.run());

    println!(
        "\nStarting a {} interview for {} with {} questions.",
        plan.setup().difficulty,
        plan.setup().role,
        plan.len()
    );
    println!("Type your answers and press Enter. Commands: /skip, /done, /stop");
    handle.start(plan)?;

    // --- 8. Interview Loop ---
    let mut lines = spawn_stdin_reader();
    let mut state = handle.state();
    let mut view = SessionView::new(args.text);
    let mut watching = true;
    let mut input_open = true;

    let outcome = loop {
        tokio::select! {
            outcome = &mut session => break outcome.context("Interview session task failed")?,
            changed = state.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    continue;
                }
                let snapshot = state.borrow_and_update().clone();
                view.render(&snapshot);
            }
            line = lines.recv(), if input_open => match line {
                Some(line) => route_line(&line, &handle, &platform),
                None => {
                    tracing::info!("Input closed, ending the interview");
                    input_open = false;
                    let _ = handle.stop();
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, ending the interview...");
                let _ = handle.stop();
            }
        }
    };
    view.render(&state.borrow().clone());

    // --- 9. Results ---
    match outcome.end {
        SessionEnd::Completed => println!("\nInterview complete!"),
        SessionEnd::Stopped => println!("\nInterview stopped."),
        SessionEnd::TimedOut => println!("\nTime is up."),
    }
    if outcome.turns.is_empty() {
        println!("No questions were answered, so there is nothing to score.");
        return Ok(());
    }

    println!("Scoring your interview...");
    let Some(mut report) = SessionReport::from_outcome(&outcome, oracle.as_ref()).await else {
        return Ok(());
    };
    println!("\nScore: {}/100", report.score.score);
    println!("{}", report.score.summary);
    println!(
        "Answered {} of {} questions in {} min.",
        report.turns.iter().filter(|t| !t.is_skipped()).count(),
        outcome.plan.as_ref().map_or(0, InterviewPlan::len),
        report.duration_minutes
    );

    if args.no_save {
        return Ok(());
    }
    loop {
        match report.save(store, &outcome.user_id).await {
            Ok(id) => {
                println!("Saved interview {id}");
                break;
            }
            Err(e) => {
                tracing::error!("Failed to save interview: {}", e);
                println!("Could not save the interview ({e}). Press Enter to retry, or type 'discard'.");
                match lines.recv().await {
                    Some(answer) if answer.trim() == "discard" => break,
                    Some(_) => continue,
                    None => break,
                }
            }
        }
    }
    Ok(())
}

fn route_line(line: &str, handle: &SessionHandle, platform: &TerminalPlatform) {
    let sent = match parse_line(line) {
        LineInput::Skip => handle.skip(),
        LineInput::Stop => handle.stop(),
        LineInput::Done => handle.finish_answer(),
        LineInput::Unknown(cmd) => {
            println!("Unknown command {cmd}. Use /skip, /done or /stop.");
            Ok(())
        }
        LineInput::Text(text) => {
            if platform.deliver_line(&text) {
                Ok(())
            } else {
                handle.submit_answer(text)
            }
        }
    };
    if let Err(e) = sent {
        tracing::debug!("Dropping input: {}", e);
    }
}

/// Prints what changed between snapshots. The terminal platform already
/// prints everything that is spoken, so questions and feedback are only
/// printed here in text-only mode.
struct SessionView {
    text_only: bool,
    announced: Option<usize>,
    prompted: Option<(usize, InputMode)>,
    shown_turns: usize,
    last_error: Option<String>,
    warned: bool,
}

impl SessionView {
    fn new(text_only: bool) -> Self {
        Self {
            text_only,
            announced: None,
            prompted: None,
            shown_turns: 0,
            last_error: None,
            warned: false,
        }
    }

    fn render(&mut self, snapshot: &SessionSnapshot) {
        for (idx, turn) in snapshot.turns.iter().enumerate().skip(self.shown_turns) {
            if self.text_only {
                println!("\nFeedback on question {}:\n{}", idx + 1, turn.feedback().summary_text());
            }
            self.shown_turns = idx + 1;
        }

        let asking = matches!(snapshot.phase, Phase::Asking | Phase::Listening);
        if asking && self.announced != Some(snapshot.current_index) {
            self.announced = Some(snapshot.current_index);
            println!(
                "\n--- Question {} of {} ---",
                snapshot.current_index + 1,
                snapshot.question_count
            );
            if self.text_only {
                if let Some(question) = &snapshot.question {
                    println!("{question}");
                }
            }
        }

        if snapshot.phase == Phase::Listening
            && self.prompted != Some((snapshot.current_index, snapshot.input_mode))
        {
            self.prompted = Some((snapshot.current_index, snapshot.input_mode));
            match snapshot.input_mode {
                InputMode::Voice => println!("(listening: type what you would say, then Enter)"),
                InputMode::Text => println!("(your answer:)"),
            }
        }

        if snapshot.phase == Phase::Processing && !snapshot.live_transcript.is_empty() {
            tracing::debug!("Processing answer: {}", snapshot.live_transcript);
        }

        if snapshot.error != self.last_error {
            if let Some(error) = &snapshot.error {
                println!("! {error}");
            }
            self.last_error = snapshot.error.clone();
        }

        if let Some(remaining) = snapshot.remaining {
            if !self.warned && remaining <= COUNTDOWN_WARNING && snapshot.phase != Phase::Complete {
                self.warned = true;
                println!("! {} minutes left in this interview.", remaining.as_secs().div_ceil(60));
            }
        }
    }
}

async fn show_history(config: &Config, store: &JsonFileStore) -> Result<()> {
    let records = store
        .list(&config.user_id)
        .await
        .context("Failed to load saved interviews")?;
    if records.is_empty() {
        println!("No saved interviews yet.");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {}  {} ({})  score {}/100  {} min  {} questions",
            record.id,
            record.date.format("%Y-%m-%d %H:%M"),
            record.role,
            record.difficulty,
            record.score,
            record.duration_minutes,
            record.turns.len()
        );
    }
    Ok(())
}

async fn show_stats(config: &Config, store: &JsonFileStore) -> Result<()> {
    let records = store
        .list(&config.user_id)
        .await
        .context("Failed to load saved interviews")?;
    let stats = DashboardStats::from_records(&records);

    println!("Total interviews:   {}", stats.total_interviews);
    println!("Average score:      {}%", stats.average_score);
    println!("Average duration:   {}m", stats.average_duration_minutes);
    println!(
        "Most frequent role: {}",
        stats.most_frequent_role.as_deref().unwrap_or("N/A")
    );
    for (role, count) in &stats.role_counts {
        println!("  {role}: {count}");
    }
    if !stats.recent.is_empty() {
        println!("Recent: {}", stats.recent.join(", "));
    }
    Ok(())
}
