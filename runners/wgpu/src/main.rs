use add_runner_wgpu::Options;
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global subscriber")?;

    let options = Options::parse();
    let config = options
        .resolve()
        .context("failed to resolve run configuration")?;
    let outcome = add_runner_wgpu::run(&config, options.print_limits)
        .with_context(|| format!("running the {} kernel failed", config.kernel))?;

    // "Hello World!" with the default inputs.
    println!("{}{}", outcome.before, outcome.after);
    Ok(())
}
