use expense_agent::{
    agent::DecisionEngine,
    api::{start_server, ApiState},
    audit::{IdempotencyStore, InMemoryIdempotencyStore, PgIdempotencyStore},
    config::Config,
    db,
    execution::ExecutionEngine,
    integrations::{InMemoryEventBoard, InMemoryLedger, InMemoryReceiptStorage, Ledger, QuickBooksLedger},
    llm::AnthropicClient,
    processor::ExpenseProcessor,
    receipt::VisionReceiptReader,
    state::InMemoryExpenseStore,
    token::{CredentialStore, HttpTokenEndpoint, InMemoryCredentialStore, PgCredentialStore, TokenManager},
    tools::Services,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    let config = Config::from_env()?;

    if config.agent.api_key.is_empty() {
        warn!("ANTHROPIC_API_KEY not set; model calls will fail and expenses will be flagged");
    }

    info!("Expense Processor - API Server");
    info!(port = config.port, model = %config.agent.model, "Configuration loaded");

    let pool = match config.database_url.as_deref() {
        Some(url) => Some(db::connect_lazy(url)?),
        None => {
            warn!("DATABASE_URL not set; credentials and idempotency keys stay in memory");
            None
        }
    };

    // Collaborators
    let client = Arc::new(AnthropicClient::new(&config.agent)?);
    let store = Arc::new(InMemoryExpenseStore::new());
    let board = Arc::new(InMemoryEventBoard::new());
    let receipts = Arc::new(InMemoryReceiptStorage::new());
    let reader = Arc::new(VisionReceiptReader::new(client.clone(), receipts.clone()));

    let ledger: Arc<dyn Ledger> = match &config.ledger {
        Some(ledger_config) => {
            let credentials: Arc<dyn CredentialStore> = match &pool {
                Some(pool) => Arc::new(PgCredentialStore::new(pool.clone())),
                None => Arc::new(InMemoryCredentialStore::new()),
            };
            let endpoint = Arc::new(HttpTokenEndpoint::new(
                ledger_config.token_url.clone(),
                ledger_config.client_id.clone(),
                ledger_config.client_secret.clone(),
                config.agent.request_timeout,
            )?);
            let tokens = Arc::new(TokenManager::new(
                credentials,
                endpoint,
                ledger_config.seed_refresh_token.clone(),
            ));
            info!(base_url = %ledger_config.base_url, "Posting to the accounting ledger");
            Arc::new(QuickBooksLedger::new(ledger_config, tokens, config.agent.request_timeout)?)
        }
        None => {
            warn!("Ledger credentials not set; posting to an in-memory ledger");
            Arc::new(InMemoryLedger::new())
        }
    };

    let idempotency: Arc<dyn IdempotencyStore> = match &pool {
        Some(pool) => Arc::new(PgIdempotencyStore::new(pool.clone())),
        None => Arc::new(InMemoryIdempotencyStore::new()),
    };

    let services = Services {
        store,
        ledger,
        board,
        receipts,
        reader,
    };
    let engine = DecisionEngine::new(
        client,
        ExecutionEngine::with_catalog()?,
        config.agent.max_iterations,
    );
    let processor = Arc::new(ExpenseProcessor::new(engine, services, idempotency));

    info!("Processor initialized");
    info!("Starting API server...");

    let state = ApiState {
        processor,
        stuck_threshold_minutes: config.stuck_threshold_minutes,
        max_recovery_attempts: config.max_recovery_attempts,
        orphan_age_days: config.orphan_age_days,
        max_orphans_per_run: config.max_orphans_per_run,
    };
    start_server(state, config.port).await?;

    Ok(())
}
