use btp_relay_link::{
    test_helpers::{
        MockDestination,
        MockSourceChain,
    },
    Config,
    Link,
};
use btp_relay_types::{
    BmcLinkStatus,
    BtpAddress,
    ErrorCode,
};
use clap::Args;
use rand::{
    rngs::StdRng,
    Rng,
    SeedableRng,
};
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct Command {
    /// The BMC on the source chain.
    #[arg(
        long = "src",
        default_value = "btp://0x1.icon/cx0000000000000000000000000000000000000001",
        env = "BTP_SRC"
    )]
    pub src: BtpAddress,

    /// The BMC on the destination chain.
    #[arg(
        long = "dst",
        default_value = "btp://0x61.bsc/0x0000000000000000000000000000000000000002",
        env = "BTP_DST"
    )]
    pub dst: BtpAddress,

    /// The number of source blocks to produce.
    #[arg(long = "blocks", default_value = "20", env)]
    pub blocks: u32,

    /// The minimum number of events in a source block.
    #[arg(long = "min-events-per-block", default_value = "0", env)]
    pub min_events_per_block: i64,

    /// The maximum number of events in a source block.
    #[arg(long = "max-events-per-block", default_value = "8", env)]
    pub max_events_per_block: i64,

    /// The time between two source blocks.
    #[arg(long = "block-time", default_value = "200ms", env)]
    pub block_time: humantime::Duration,

    /// The seed of the event distribution.
    #[arg(long = "seed", default_value = "0", env)]
    pub seed: u64,

    /// Only submit relay messages once they are full.
    #[arg(long = "max-size-tx", env)]
    pub max_size_tx: bool,

    /// The interval between two queries of a relay transaction result.
    #[arg(long = "result-poll-interval", default_value = "100ms", env)]
    pub result_poll_interval: humantime::Duration,

    /// Resubmit a relay transaction still pending after this long.
    #[arg(long = "result-timeout", env)]
    pub result_timeout: Option<humantime::Duration>,

    /// The transaction size limit of the destination chain.
    #[arg(long = "tx-size-limit", default_value = "4096", env)]
    pub tx_size_limit: usize,

    /// The room kept free in each transaction.
    #[arg(long = "margin", default_value = "1024", env)]
    pub margin: i64,

    /// Revert codes the destination returns to the first relay transactions.
    #[arg(long = "revert", value_delimiter = ',', env)]
    pub reverts: Vec<i64>,
}

impl From<&Command> for Config {
    fn from(command: &Command) -> Self {
        let mut config = Config::new(command.src.clone(), command.dst.clone());
        config.max_size_tx = command.max_size_tx;
        config.result_poll_interval = command.result_poll_interval.into();
        config.result_timeout = command.result_timeout.map(Into::into);
        config
    }
}

pub async fn exec(command: Command) -> anyhow::Result<()> {
    let source = MockSourceChain::new();
    let destination = MockDestination::new(BmcLinkStatus::new(0, 0));
    destination.update_data(|data| {
        data.tx_size_limit = command.tx_size_limit;
        data.margin = command.margin;
    });
    for code in &command.reverts {
        destination.script_revert(ErrorCode::new(*code));
    }

    let link = Link::new(Config::from(&command), source.clone(), destination.clone())?;
    let mut handle = tokio::spawn({
        let link = link.clone();
        async move { link.run().await }
    });

    let mut producer = tokio::spawn(produce(source.clone(), command.clone()));
    let mut produced = false;
    let mut check = tokio::time::interval(Duration::from_millis(50));

    let result = loop {
        tokio::select! {
            result = &mut handle => break result?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, stopping the link");
                link.stop();
                break handle.await?
            }
            done = &mut producer, if !produced => {
                done?;
                produced = true;
                tracing::info!(events = source.total_events(), "source chain is done");
            }
            _ = check.tick() => {
                if produced && destination.status().rx_seq == source.total_events() {
                    tracing::info!("every event is delivered");
                    link.stop();
                    break handle.await?
                }
            }
        }
    };
    producer.abort();

    let report = link.report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    result?;
    Ok(())
}

async fn produce(source: MockSourceChain, command: Command) {
    let mut rng = StdRng::seed_from_u64(command.seed);
    let min_events = command.min_events_per_block.max(0);
    let max_events = command.max_events_per_block.max(min_events);
    for _ in 0..command.blocks {
        tokio::time::sleep(command.block_time.into()).await;
        let events = rng.gen_range(min_events..=max_events);
        let height = source.produce_block(events);
        tracing::debug!(height, events, "produced source block");
    }
}
