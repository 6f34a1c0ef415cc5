use std::error::Error;

use tracing::{error, info};

mod agent;
mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    match matches.subcommand() {
        Some(("run", args)) => {
            let opts = agent::AgentOpts::from(args);
            info!(?opts, "Starting agent");
            agent::run(opts)
                .await
                .map_err(|e| format!("Error running file sink agent: {e:?}"))?;
        }
        Some(("check", args)) => {
            let opts = agent::AgentOpts::from(args);
            agent::check(opts)
                .await
                .map_err(|e| format!("Invalid configuration: {e:?}"))?;
        }
        Some((other, _)) => return Err(format!("unknown subcommand '{other}'").into()),
        None => return Err("no subcommand given".into()),
    }
    Ok(())
}
