mod cli;

use clap::Parser;
use cli::Cli;
use colored::Colorize;
use drydock_build::{Pipeline, PipelineResult};
use drydock_config::{AmbientEnv, load_settings};
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_result(result: &PipelineResult) {
    if result.pushed_tags.is_empty() {
        println!("{}", "Build finished, nothing was pushed".green());
    } else {
        println!("{}", "Published:".green().bold());
        for tag_ref in result.tag_refs() {
            println!("  {}", tag_ref.cyan());
        }
    }
    if let Some(digest_ref) = result.digest_ref() {
        println!("{} {}", "Digest:".green().bold(), digest_ref);
    }
    for warning in &result.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let env = AmbientEnv::capture();
    let mut settings = load_settings(cli.config.as_deref())?;
    cli.apply(&mut settings);

    if !settings.auto_tag_gate() {
        tracing::info!(
            "skipping automated docker build for {}",
            settings.commit.git_ref
        );
        println!(
            "{} ref is neither a tag nor the default branch",
            "Skipped:".yellow().bold()
        );
        return Ok(());
    }

    let config = match settings.into_pipeline_config(&env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(2);
        }
    };

    let pipeline = Pipeline::default();
    let cancellation = pipeline.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            cancellation.cancel();
        }
    });

    match pipeline.run(config).await {
        Ok(result) => {
            print_result(&result);
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e.user_message());
            std::process::exit(1);
        }
    }
}
