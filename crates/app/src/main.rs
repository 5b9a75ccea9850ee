use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use mood_recommender_core::{
    AppConfig, Collaborators, Expression, ExpressionScores, HttpSongCatalog, InMemorySongCatalog,
    ModelState, MoodClassifier, MoodError, Phase, Playlist, ScriptedDetector, ScriptedOutcome,
    SessionController, Song, SongCatalog, SyntheticCamera,
};
use tracing_subscriber::EnvFilter;

fn main() -> mood_recommender_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Detect {
            scores,
            no_face,
            offline,
        } => {
            let outcome = scores.outcome(no_face)?;
            runtime.block_on(run_detect(config, outcome, offline))
        }
        Commands::Classify { scores } => run_classify(&config, &scores.parse()?),
        Commands::Recent => runtime.block_on(run_recent(&config)),
    }
}

fn load_config(cli: &Cli) -> mood_recommender_core::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    };
    if let Some(url) = &cli.api_url {
        config.catalog.base_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run_detect(
    config: AppConfig,
    outcome: ScriptedOutcome,
    offline: bool,
) -> mood_recommender_core::Result<()> {
    tracing::info!(offline, "starting detection session");

    let catalog: Arc<dyn SongCatalog> = if offline {
        Arc::new(InMemorySongCatalog::new(Vec::new()))
    } else {
        Arc::new(HttpSongCatalog::new(&config.catalog)?)
    };
    let collaborators = Collaborators {
        camera: Arc::new(SyntheticCamera::new()),
        detector: Arc::new(ScriptedDetector::new(outcome)),
        catalog,
    };

    let mut session = SessionController::mount(config.session.clone(), collaborators);
    let mut playlist = session.playlist();

    session
        .wait_for(|view| view.models != ModelState::Loading)
        .await?;
    session.trigger().await?;

    let finished = tokio::select! {
        view = session.wait_for(|view| {
            matches!(
                view.phase,
                Phase::ResultNoFace | Phase::ResultClassified(_) | Phase::ResultError { .. }
            )
        }) => Some(view?),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(finished) = finished else {
        tracing::info!("interrupted");
        session.unmount().await;
        return Ok(());
    };

    match finished.classification() {
        Some(classification) => {
            let expression = classification.expression;
            println!("{} {}", expression.emoji(), classification.headline());
            println!("{}", expression.encouragement());

            // The mood listing replaces the initial one once it lands.
            let title = classification.mood.playlist_title();
            let fetched = tokio::time::timeout(
                config.catalog.request_timeout(),
                playlist.wait_for(|list| list.title == title),
            )
            .await;
            match fetched {
                Ok(Ok(list)) => print_playlist(&list),
                _ => println!("(no songs for this mood)"),
            }

            session
                .wait_for(|view| view.phase == Phase::Idle)
                .await?;
            tracing::info!("camera switched off");
        }
        None => {
            let message = finished.message.unwrap_or_default();
            println!("{message}");
        }
    }

    let view = session.unmount().await;
    tracing::info!(phase = %view.phase, camera_on = view.camera_on, "session ended");
    Ok(())
}

fn run_classify(config: &AppConfig, scores: &ExpressionScores) -> mood_recommender_core::Result<()> {
    let classifier = MoodClassifier::new(config.session.confidence_threshold);
    let classification = classifier.classify(scores);
    tracing::debug!(?classification, "classified scores");
    println!("{}", serde_json::to_string_pretty(&classification)?);
    println!(
        "{} {}",
        classification.expression.emoji(),
        classification.headline()
    );
    Ok(())
}

async fn run_recent(config: &AppConfig) -> mood_recommender_core::Result<()> {
    tracing::info!(url = %config.catalog.base_url, "fetching recent songs");
    let catalog = HttpSongCatalog::new(&config.catalog)?;
    let songs = catalog.fetch_recent_songs().await?;
    print_playlist(&Playlist::discover(songs));
    Ok(())
}

fn print_playlist(playlist: &Playlist) {
    println!("{}", playlist.title);
    if playlist.songs.is_empty() {
        println!("  (empty)");
    }
    for Song { title, artist, .. } in &playlist.songs {
        println!("  {title} - {artist}");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Recommends music from your facial expression", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the song service.
    #[arg(long, env = "MOOD_API_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one detection session against a synthetic camera.
    Detect {
        #[command(flatten)]
        scores: ScoreArgs,
        /// Simulate a frame with nobody in it. Scores are ignored.
        #[arg(long, conflicts_with_all = ["pairs", "json"])]
        no_face: bool,
        /// Use an empty in-memory song catalog instead of the service.
        #[arg(long)]
        offline: bool,
    },
    /// Classify expression scores without running a session.
    Classify {
        #[command(flatten)]
        scores: ScoreArgs,
    },
    /// List the most recently added songs.
    Recent,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// Scores as `name=value` pairs, e.g. `happy=0.8 sad=0.1`.
    #[arg(value_name = "SCORE")]
    pairs: Vec<String>,

    /// Scores as a JSON object, e.g. `{"happy": 0.8}`.
    #[arg(long, conflicts_with = "pairs")]
    json: Option<String>,
}

impl ScoreArgs {
    /// What the scripted detector answers. All-zero scores are still a face.
    fn outcome(&self, no_face: bool) -> mood_recommender_core::Result<ScriptedOutcome> {
        if no_face {
            return Ok(ScriptedOutcome::NoFace);
        }
        Ok(ScriptedOutcome::face(self.parse()?))
    }

    fn parse(&self) -> mood_recommender_core::Result<ExpressionScores> {
        if let Some(raw) = &self.json {
            return Ok(serde_json::from_str(raw)?);
        }

        let mut scores = ExpressionScores::new();
        for pair in &self.pairs {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| MoodError::msg(format!("expected name=value, got `{pair}`")))?;
            let expression = Expression::from_label(name.trim())
                .ok_or_else(|| MoodError::msg(format!("unknown expression `{name}`")))?;
            let value: f32 = value
                .trim()
                .parse()
                .map_err(|_| MoodError::msg(format!("invalid score `{value}` for {name}")))?;
            scores.set(expression, value);
        }
        Ok(scores)
    }
}
