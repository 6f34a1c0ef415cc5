//! Runs one file sink fed from stdin, wired up from an agent properties file or from the
//! base64 sink object in the environment.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::ArgMatches;
use filesink_core::channel::MemoryChannel;
use filesink_core::config::{
    ChannelConfig, Context, ENV_SINK_OBJECT, FileSinkConfig, RunnerConfig,
};
use filesink_core::runner::SinkRunner;
use filesink_core::sinker::FileSink;
use filesink_core::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cmdline::{ARG_AGENT, ARG_CHANNEL, ARG_CONFIG, ARG_SINK};

/// How often the input side checks whether a full channel has room again.
const CHANNEL_FULL_RETRY: Duration = Duration::from_millis(10);
/// How often to check whether the sink has drained the channel after end of input.
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(50);
/// Key of the sink properties naming the channel it drains.
const KEY_CHANNEL: &str = "channel";

#[derive(Debug, Clone)]
pub(crate) struct AgentOpts {
    config: Option<PathBuf>,
    agent: String,
    sink: String,
    channel: String,
}

impl From<&ArgMatches> for AgentOpts {
    fn from(args: &ArgMatches) -> Self {
        let value = |id: &str| args.get_one::<String>(id).cloned().unwrap_or_default();
        Self {
            config: args.get_one::<String>(ARG_CONFIG).map(PathBuf::from),
            agent: value(ARG_AGENT),
            sink: value(ARG_SINK),
            channel: value(ARG_CHANNEL),
        }
    }
}

/// Everything needed to build the channel, the sink and its runner.
#[derive(Debug, Clone)]
struct AgentConfig {
    sink_name: String,
    channel_name: String,
    sink: Context,
    channel: ChannelConfig,
    runner: RunnerConfig,
}

impl AgentConfig {
    async fn load(opts: &AgentOpts) -> Result<Self> {
        match &opts.config {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("reading {}: {e}", path.display()))
                })?;
                Self::from_properties(&text, opts)
            }
            None => {
                let context = Context::from_env()?.ok_or_else(|| {
                    Error::Config(format!(
                        "no --config given and {ENV_SINK_OBJECT} is not set"
                    ))
                })?;
                Self::from_sink_object(context, opts)
            }
        }
    }

    /// Picks `<agent>.sinks.<sink>.*` and `<agent>.channels.<channel>.*` out of an agent file.
    fn from_properties(text: &str, opts: &AgentOpts) -> Result<Self> {
        let agent = Context::from_properties(text)?;
        let sink = agent.sub_properties(&format!("{}.sinks.{}.", opts.agent, opts.sink));
        if sink.is_empty() {
            return Err(Error::Config(format!(
                "no properties for sink '{}' of agent '{}'",
                opts.sink, opts.agent
            )));
        }

        let channel_name = sink
            .get_string(KEY_CHANNEL)
            .unwrap_or(opts.channel.as_str())
            .to_string();
        let channel =
            agent.sub_properties(&format!("{}.channels.{channel_name}.", opts.agent));

        Ok(Self {
            sink_name: opts.sink.clone(),
            channel: ChannelConfig::try_from(&channel)?,
            runner: RunnerConfig::try_from(&sink)?,
            channel_name,
            sink,
        })
    }

    /// The sink object is flat; channel settings sit under `channel.`.
    fn from_sink_object(context: Context, opts: &AgentOpts) -> Result<Self> {
        Ok(Self {
            sink_name: opts.sink.clone(),
            channel_name: opts.channel.clone(),
            channel: ChannelConfig::try_from(&context.sub_properties("channel."))?,
            runner: RunnerConfig::try_from(&context)?,
            sink: context,
        })
    }
}

/// Validates the configuration without touching the target file.
pub(crate) async fn check(opts: AgentOpts) -> Result<()> {
    let config = AgentConfig::load(&opts).await?;
    let sink = FileSinkConfig::try_from(&config.sink)?;
    info!(
        sink = %config.sink_name,
        channel = %config.channel_name,
        path = %sink.path.display(),
        decode = %sink.decode,
        capacity = config.channel.capacity,
        transaction_capacity = config.channel.transaction_capacity,
        "Configuration is valid"
    );
    Ok(())
}

pub(crate) async fn run(opts: AgentOpts) -> Result<()> {
    let config = AgentConfig::load(&opts).await?;
    run_with_input(config, BufReader::new(tokio::io::stdin())).await
}

async fn run_with_input<R>(config: AgentConfig, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let cln_token = CancellationToken::new();
    let channel = MemoryChannel::new(config.channel_name.as_str(), config.channel);
    let sink = FileSink::configure(&config.sink_name, &config.sink, channel.clone())?;
    let counter = sink.counter();

    let runner_handle = SinkRunner::new(sink, config.runner).start(cln_token.clone());
    // a runner that stops on its own (fatal error) stops the input side too
    let runner_guard = cln_token.clone().drop_guard();
    let runner = tokio::spawn(async move {
        let _guard = runner_guard;
        runner_handle.await
    });

    // wait for SIG{INT,TERM} and invoke cancellation token
    let shutdown_token = cln_token.clone();
    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_token.cancel();
    });

    let fed = feed(input, &channel, &cln_token).await?;
    info!(events = fed, "Reached end of input, waiting for the sink to drain");
    wait_until_drained(&channel, &cln_token).await;
    cln_token.cancel();

    let summary = runner
        .await
        .and_then(|handle| handle)
        .map_err(|e| Error::Channel(format!("sink runner task failed: {e}")))??;
    info!(
        processed = summary.processed,
        backoffs = summary.backoffs,
        failures = summary.failures,
        left_in_channel = channel.len(),
        "Sink finished"
    );
    debug!(metrics = %counter.encode()?, "Sink counters");
    shutdown_handle.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(error = ?e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Puts every input line into the channel, waiting while the channel is full. A trailing
/// `\r` is stripped, the payload is otherwise left as raw bytes.
async fn feed<R>(input: R, channel: &MemoryChannel, cln_token: &CancellationToken) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut segments = input.split(b'\n');
    let mut fed = 0;
    loop {
        let segment = tokio::select! {
            _ = cln_token.cancelled() => return Ok(fed),
            segment = segments.next_segment() => segment?,
        };
        let Some(mut line) = segment else {
            return Ok(fed);
        };
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        let body = Bytes::from(line);
        loop {
            match channel.put(body.clone()) {
                Ok(_) => break,
                Err(Error::ChannelFull(_)) => {
                    tokio::select! {
                        _ = cln_token.cancelled() => return Ok(fed),
                        _ = tokio::time::sleep(CHANNEL_FULL_RETRY) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
        fed += 1;
    }
}

async fn wait_until_drained(channel: &MemoryChannel, cln_token: &CancellationToken) {
    while !channel.is_empty() {
        tokio::select! {
            _ = cln_token.cancelled() => return,
            _ = tokio::time::sleep(DRAIN_CHECK_INTERVAL) => {}
        }
    }
}
