#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

use std::{io, str::FromStr, sync::Arc, time::Duration, time::SystemTime};

use color_eyre::eyre::{Result, eyre};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    antifraud::screening::{EvaluationQueue, FraudScreening},
    cli::CliArgs,
    config::{Settings, TransportKind},
    csv::{CsvRequestRecord, RequestKind},
    decision::{
        consumer::{ConsumerStats, DecisionConsumer},
        handler::{DecisionHandler, MessageHandler},
        publisher::DecisionPublisher,
    },
    messaging::{MessageConsumer, MessagePublisher, memory::InMemoryBroker},
    query::transaction::{SqliteDailyAccumulation, count_pending},
    store::{EventSourcedTransactions, init_store},
    transactions::{CreateTransactionRequest, TransactionService},
};

mod antifraud;
pub(crate) mod cli;
mod config;
mod csv;
mod decision;
mod domain;
mod logging;
mod messaging;
mod query;
mod store;
mod transactions;

// One consumer per partition, each with its own read position.
const MEMORY_PARTITIONS: usize = 3;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init_logging();

    let cli_args = CliArgs::load()?;
    let rows = csv::read_input::<CsvRequestRecord>(&cli_args.input_file_path)?;
    let settings = Settings::from_env()?;
    let rules = settings.fraud_rules()?;

    // Event store and transaction views share one sqlite db, a fresh file per
    // run unless DATABASE_URL points somewhere else.
    let database_url = match &settings.database_url {
        Some(url) => url.clone(),
        None => sqlite_uri()?,
    };
    let sqlite_pool = sqlite_pool(&database_url).await?;
    init_store(&sqlite_pool).await?;

    let transactions = Arc::new(EventSourcedTransactions::from_pool(sqlite_pool.clone()));
    let handler: Arc<dyn MessageHandler> = Arc::new(DecisionHandler::new(transactions.clone()));

    let mut consumers = Consumers::new(settings.retry_backoff);
    let transport: Arc<dyn MessagePublisher> = match settings.transport {
        TransportKind::Memory => {
            let broker = InMemoryBroker::new(MEMORY_PARTITIONS);
            for partition in 0..broker.partitions() {
                let subscription = broker
                    .subscribe(
                        &settings.decision_topic,
                        &settings.consumer_group,
                        partition as i32,
                    )
                    .await?;
                consumers.spawn(subscription, handler.clone());
            }
            Arc::new(broker)
        }
        TransportKind::Kafka => kafka_transport(&settings, &mut consumers, handler.clone())?,
    };

    let screening = FraudScreening::new(
        transactions.clone(),
        Arc::new(SqliteDailyAccumulation::new(sqlite_pool.clone())),
        rules,
        DecisionPublisher::new(transport, settings.decision_topic.clone()),
    );
    let queue = EvaluationQueue::spawn(Arc::new(screening));
    let service = TransactionService::new(
        sqlite_pool.clone(),
        transactions,
        queue.submitter(),
        settings.default_currency.clone(),
    );

    service.resubmit_pending().await?;

    let interrupted = tokio::select! {
        _ = async {
            for row_result in rows {
                match row_result {
                    Ok(row) => {
                        let _ = handle_request(&service, row)
                            .await
                            .inspect_err(|e| debug!("Error processing row: {}", e));
                    }
                    Err(e) => debug!("Error parsing row: {}", e),
                }
            }
        } => false,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, finishing in-flight work");
            true
        }
    };

    queue.drain().await;
    if !interrupted {
        wait_for_decisions(&sqlite_pool, settings.drain_timeout).await?;
    }
    let stats = consumers.stop().await;
    info!(
        "Decisions: {} applied, {} unchanged, {} dropped",
        stats.applied, stats.unchanged, stats.dropped
    );

    let views = service.list_transactions().await?;
    csv::write_report(&views, io::stdout())?;

    Ok(())
}

async fn handle_request(service: &TransactionService, r: CsvRequestRecord) -> Result<()> {
    match r.kind {
        RequestKind::Open => {
            service
                .open_account(
                    r.account,
                    &format!("ACC-{}", r.account.simple()),
                    r.holder.as_deref().unwrap_or_default(),
                )
                .await?;
        }
        RequestKind::Deactivate => service.deactivate_account(r.account).await?,
        RequestKind::Reactivate => service.reactivate_account(r.account).await?,
        RequestKind::Transfer => {
            let record = service
                .create_transaction(CreateTransactionRequest {
                    source_account_id: r.account,
                    target_account_id: r.target.unwrap_or(Uuid::nil()),
                    transfer_type_id: r.transfer_type.unwrap_or_default(),
                    value: r.amount.unwrap_or_default(),
                    currency: r.currency,
                })
                .await?;
            debug!("Accepted {} as {}", record.id, record.status);
        }
    }

    Ok(())
}

/// Waits until every transaction got its decision, or gives up after `timeout`.
async fn wait_for_decisions(sqlite_pool: &SqlitePool, timeout: Duration) -> Result<()> {
    let settled = tokio::time::timeout(timeout, async {
        while count_pending(sqlite_pool).await? > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok::<_, sqlx::Error>(())
    })
    .await;

    match settled {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(
                "{} transactions still pending after {:?}",
                count_pending(sqlite_pool).await?,
                timeout
            );
            Ok(())
        }
    }
}

/// Decision consumers running in the background, one per subscription.
struct Consumers {
    retry_backoff: Duration,
    shutdown: Vec<watch::Sender<bool>>,
    running: JoinSet<ConsumerStats>,
}

impl Consumers {
    fn new(retry_backoff: Duration) -> Self {
        Consumers {
            retry_backoff,
            shutdown: Vec::new(),
            running: JoinSet::new(),
        }
    }

    fn spawn<C: MessageConsumer + 'static>(&mut self, consumer: C, handler: Arc<dyn MessageHandler>) {
        let (consumer, shutdown) = DecisionConsumer::new(consumer, handler, self.retry_backoff);
        self.shutdown.push(shutdown);
        self.running.spawn(consumer.run());
    }

    async fn stop(mut self) -> ConsumerStats {
        for shutdown in &self.shutdown {
            let _ = shutdown.send(true);
        }

        let mut total = ConsumerStats::default();
        while let Some(joined) = self.running.join_next().await {
            match joined {
                Ok(stats) => {
                    total.applied += stats.applied;
                    total.unchanged += stats.unchanged;
                    total.dropped += stats.dropped;
                    total.retried += stats.retried;
                }
                Err(e) => warn!("Decision consumer failed: {}", e),
            }
        }
        total
    }
}

#[cfg(feature = "kafka")]
fn kafka_transport(
    settings: &Settings,
    consumers: &mut Consumers,
    handler: Arc<dyn MessageHandler>,
) -> Result<Arc<dyn MessagePublisher>> {
    use crate::messaging::kafka::{KafkaConsumer, KafkaPublisher};

    let publisher = KafkaPublisher::new(&settings.kafka_brokers, &settings.kafka_client_id)?;
    let subscription = KafkaConsumer::subscribe(
        &settings.kafka_brokers,
        &settings.kafka_client_id,
        &settings.consumer_group,
        &settings.decision_topic,
    )?;
    consumers.spawn(subscription, handler);

    Ok(Arc::new(publisher))
}

#[cfg(not(feature = "kafka"))]
fn kafka_transport(
    _settings: &Settings,
    _consumers: &mut Consumers,
    _handler: Arc<dyn MessageHandler>,
) -> Result<Arc<dyn MessagePublisher>> {
    Err(eyre!("TRANSPORT=kafka needs a build with the 'kafka' feature"))
}

async fn sqlite_pool(sqlite_uri: &str) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(sqlite_uri)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
    SqlitePool::connect_with(opts).await.map_err(|e| eyre!(e))
}

fn sqlite_uri() -> Result<String> {
    let db_suffix = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|e| eyre!(e))?
        .as_nanos();
    let path = std::env::temp_dir().join(format!("antifraud-{}.db", db_suffix));
    Ok(format!("sqlite:{}?mode=rwc", path.display()))
}
