use dotenv::dotenv;
use progress_monitor::config::Config;
use progress_monitor::progress::find_resumable_sessions;
use progress_monitor::sessions::SessionManager;
use progress_types::SessionState;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    log::info!(
        "Watching {} dir(s), discovery every {:?}",
        config.watch_dirs.len(),
        config.discover_interval
    );
    for dir in &config.watch_dirs {
        log::info!("  {}", dir.display());
    }

    let manager = SessionManager::with_options(config.session_options());
    let mut ticker = tokio::time::interval(config.discover_interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => scan(&manager, &config),
            _ = &mut shutdown => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    manager.close();
}

fn scan(manager: &SessionManager, config: &Config) {
    let ids = manager.discover_all(&config.watch_dirs);
    let active = manager
        .all()
        .iter()
        .filter(|s| s.state() == SessionState::Active)
        .inspect(|s| {
            // replay from the top so viewers get the history too
            if let Err(e) = s.start_tailing(true) {
                log::warn!("[SESSIONS] Cannot tail {}: {}", s.id(), e);
            }
        })
        .count();

    let resumable = find_resumable_sessions(&config.watch_dirs);
    log::info!(
        "{} session(s), {} active, {} resumable",
        ids.len(),
        active,
        resumable.len()
    );
    for session in &resumable {
        log::debug!(
            "Resumable: {} ({} answered{})",
            session.plan_description,
            session.qa_count,
            if session.pending_question.is_some() { ", question pending" } else { "" }
        );
    }
}
