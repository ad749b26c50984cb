#[tokio::main]
async fn main() -> orchestrator::Result<()> {
    orchestrator::init_tracing();
    let mode = orchestrator::parse_command()?;
    tracing::info!(
        version = orchestrator::version::VERSION,
        git_sha = orchestrator::version::GIT_SHA,
        dirty = orchestrator::version::GIT_DIRTY,
        built_at = orchestrator::version::BUILD_TIMESTAMP,
        mode = ?mode,
        "orchestrator starting"
    );
    orchestrator::run(mode).await
}
